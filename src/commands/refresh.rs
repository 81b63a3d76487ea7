use crate::database::Database;
use crate::directory::{EpisodeDirectory, Subscription};
use crate::error::AppError;
use crate::feeds::{FeedReader, Notifier};
use chrono::Utc;
use futures_util::future::join_all;

/// Background refresh: read every subscribed show's feed since its last fetch
/// and add anything new to the queue. Returns whether new episodes were found.
pub async fn fetch_new_episodes<D, F, N>(
    db: &Database,
    directory: &D,
    feeds: &F,
    notifier: &N,
    send_notifications: bool,
) -> Result<bool, AppError>
where
    D: EpisodeDirectory,
    F: FeedReader,
    N: Notifier,
{
    let subscriptions = directory.get_user_subscriptions().await?;
    log::info!("Checking {} subscriptions for new episodes", subscriptions.len());

    let results = join_all(subscriptions.iter().map(|subscription| {
        refresh_subscription(
            db,
            directory,
            feeds,
            notifier,
            subscription,
            send_notifications,
        )
    }))
    .await;

    let mut data_found = false;
    for (subscription, result) in subscriptions.iter().zip(results) {
        match result {
            Ok(found) => data_found |= found,
            Err(e) => log::warn!("Refresh of {} failed: {}", subscription.show_title, e),
        }
    }
    Ok(data_found)
}

async fn refresh_subscription<D, F, N>(
    db: &Database,
    directory: &D,
    feeds: &F,
    notifier: &N,
    subscription: &Subscription,
    send_notifications: bool,
) -> Result<bool, AppError>
where
    D: EpisodeDirectory,
    F: FeedReader,
    N: Notifier,
{
    let Some(since) = subscription.last_fetched else {
        // Never fetched; start counting from now
        directory
            .update_last_fetched(&subscription.show_id, Utc::now())
            .await?;
        return Ok(false);
    };

    let update = feeds.read_new_episodes(subscription, since).await?;

    if let Err(e) = directory
        .update_episode_count(&subscription.show_id, update.total_count)
        .await
    {
        log::warn!("Failed to update episode count for {}: {}", subscription.show_id, e);
    }

    // Oldest first so the newest ends up at the head of the queue
    for episode in update.episodes.iter().rev() {
        db.append(episode)?;
    }

    if send_notifications {
        if let Some(newest) = update.episodes.first() {
            notifier.new_episodes(&subscription.show_title, &newest.title, update.episodes.len());
        }
    }

    directory
        .update_last_fetched(&subscription.show_id, Utc::now())
        .await?;

    if !update.episodes.is_empty() {
        log::info!(
            "Added {} new episodes of {}",
            update.episodes.len(),
            subscription.show_title
        );
    }
    Ok(!update.episodes.is_empty())
}

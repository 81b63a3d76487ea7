//! Subscription feeds and new-episode notifications
//!
//! Background refresh reads every subscribed show's feed through a
//! [`FeedReader`] and announces what it found through a [`Notifier`].

use crate::database::EpisodeInfo;
use crate::directory::Subscription;
use crate::error::AppError;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;

/// Episodes published after the cutoff plus the feed's total episode count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedUpdate {
    /// Newest first.
    pub episodes: Vec<EpisodeInfo>,
    pub total_count: i64,
}

pub trait FeedReader: Send + Sync {
    fn read_new_episodes(
        &self,
        subscription: &Subscription,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<FeedUpdate, AppError>> + Send;
}

pub trait Notifier: Send + Sync {
    fn new_episodes(&self, show_title: &str, newest_title: &str, count: usize);
}

/// Writes new-episode announcements to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn new_episodes(&self, show_title: &str, newest_title: &str, count: usize) {
        if count == 1 {
            log::info!("New episode of {}: {}", show_title, newest_title);
        } else {
            log::info!(
                "{} new episodes of {}, latest: {}",
                count,
                show_title,
                newest_title
            );
        }
    }
}

/// Fetches and parses RSS/Atom feeds over HTTP.
pub struct RssFeedReader {
    client: reqwest::Client,
}

impl RssFeedReader {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(30))
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }
}

impl FeedReader for RssFeedReader {
    async fn read_new_episodes(
        &self,
        subscription: &Subscription,
        since: DateTime<Utc>,
    ) -> Result<FeedUpdate, AppError> {
        log::info!("Fetching feed for {} from {}", subscription.show_title, subscription.feed_url);

        let response = self.client.get(&subscription.feed_url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Http(format!(
                "Feed returned status: {}",
                response.status()
            )));
        }
        let body = response.bytes().await?;

        let feed = feed_rs::parser::parse(&body[..])
            .map_err(|e| AppError::Other(format!("Failed to parse feed: {}", e)))?;

        Ok(episodes_since(feed, subscription, since))
    }
}

/// Keep the feed entries published strictly after `since` that carry audio.
pub fn episodes_since(
    feed: feed_rs::model::Feed,
    subscription: &Subscription,
    since: DateTime<Utc>,
) -> FeedUpdate {
    let total_count = feed.entries.len() as i64;

    let mut dated: Vec<(DateTime<Utc>, EpisodeInfo)> = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let published = entry.published.or(entry.updated)?;
            if published <= since {
                return None;
            }

            // Audio URL from the enclosure, else an audio link
            let audio_url = entry
                .media
                .first()
                .and_then(|m| m.content.first())
                .and_then(|c| c.url.as_ref())
                .map(|u| u.to_string())
                .or_else(|| {
                    entry
                        .links
                        .iter()
                        .find(|l| {
                            l.media_type
                                .as_deref()
                                .is_some_and(|t| t.starts_with("audio/"))
                        })
                        .map(|l| l.href.clone())
                })?;

            let duration_secs = entry
                .media
                .first()
                .and_then(|m| m.content.first())
                .and_then(|c| c.duration)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);

            let info = EpisodeInfo {
                episode_id: entry.id,
                audio_url,
                title: entry.title.map(|t| t.content).unwrap_or_default(),
                show_id: Some(subscription.show_id.clone()),
                show_title: subscription.show_title.clone(),
                artwork_url: subscription.artwork_url.clone(),
                duration_secs,
                release_date: Some(published.to_rfc3339()),
            };
            Some((published, info))
        })
        .collect();

    dated.sort_by(|a, b| b.0.cmp(&a.0));

    FeedUpdate {
        episodes: dated.into_iter().map(|(_, info)| info).collect(),
        total_count,
    }
}

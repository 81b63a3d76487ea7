// Background refresh tests
// Run with: cargo test --lib commands::tests

use super::fetch_new_episodes;
use crate::database::{Database, EpisodeInfo};
use crate::directory::Subscription;
use crate::feeds::FeedUpdate;
use crate::worker::testing::{FakeDirectory, FakeFeeds, FakeNotifier};
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

fn setup_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("test.db")).unwrap();
    (db, temp_dir)
}

fn subscription(show_id: &str, fetched: bool) -> Subscription {
    Subscription {
        show_id: show_id.to_string(),
        show_title: format!("Show {}", show_id),
        feed_url: format!("https://feeds.example.com/{}.xml", show_id),
        artwork_url: None,
        last_fetched: fetched.then(|| Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()),
    }
}

fn new_episode(show_id: &str, id: &str) -> EpisodeInfo {
    EpisodeInfo {
        episode_id: id.to_string(),
        audio_url: format!("https://cdn.example.com/{}/{}.mp3", show_id, id),
        title: format!("Episode {}", id),
        show_id: Some(show_id.to_string()),
        show_title: format!("Show {}", show_id),
        artwork_url: None,
        duration_secs: 1800,
        release_date: None,
    }
}

fn ids(db: &Database) -> Vec<String> {
    db.list_entries()
        .unwrap()
        .into_iter()
        .map(|e| e.episode_id)
        .collect()
}

#[tokio::test]
async fn test_new_episodes_are_queued_newest_first() {
    let (db, _temp) = setup_test_db();
    let directory = FakeDirectory::default();
    directory
        .subscriptions
        .lock()
        .unwrap()
        .push(subscription("s1", true));

    let mut feeds = FakeFeeds::default();
    feeds.updates.insert(
        "s1".to_string(),
        FeedUpdate {
            episodes: vec![new_episode("s1", "newest"), new_episode("s1", "older")],
            total_count: 120,
        },
    );
    let notifier = FakeNotifier::default();

    let found = fetch_new_episodes(&db, &directory, &feeds, &notifier, true)
        .await
        .unwrap();

    assert!(found);
    assert_eq!(ids(&db), vec!["newest", "older"]);
    assert_eq!(directory.episode_counts.lock().unwrap().get("s1"), Some(&120));
    assert!(directory.last_fetched.lock().unwrap().contains_key("s1"));
    assert_eq!(
        notifier.sent.lock().unwrap().as_slice(),
        &[("Show s1".to_string(), "Episode newest".to_string(), 2)]
    );
}

#[tokio::test]
async fn test_no_notification_unless_requested() {
    let (db, _temp) = setup_test_db();
    let directory = FakeDirectory::default();
    directory
        .subscriptions
        .lock()
        .unwrap()
        .push(subscription("s1", true));
    let mut feeds = FakeFeeds::default();
    feeds.updates.insert(
        "s1".to_string(),
        FeedUpdate {
            episodes: vec![new_episode("s1", "e1")],
            total_count: 1,
        },
    );
    let notifier = FakeNotifier::default();

    assert!(fetch_new_episodes(&db, &directory, &feeds, &notifier, false)
        .await
        .unwrap());
    assert!(notifier.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_never_fetched_subscription_is_stamped_and_skipped() {
    let (db, _temp) = setup_test_db();
    let directory = FakeDirectory::default();
    directory
        .subscriptions
        .lock()
        .unwrap()
        .push(subscription("s1", false));
    let mut feeds = FakeFeeds::default();
    feeds.updates.insert(
        "s1".to_string(),
        FeedUpdate {
            episodes: vec![new_episode("s1", "e1")],
            total_count: 1,
        },
    );
    let notifier = FakeNotifier::default();

    let found = fetch_new_episodes(&db, &directory, &feeds, &notifier, true)
        .await
        .unwrap();

    assert!(!found);
    assert!(ids(&db).is_empty());
    assert!(directory.last_fetched.lock().unwrap().contains_key("s1"));
    assert!(directory.episode_counts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_failing_feed_does_not_block_others() {
    let (db, _temp) = setup_test_db();
    let directory = FakeDirectory::default();
    {
        let mut subscriptions = directory.subscriptions.lock().unwrap();
        subscriptions.push(subscription("broken", true));
        subscriptions.push(subscription("s2", true));
    }
    let mut feeds = FakeFeeds::default();
    feeds.updates.insert(
        "s2".to_string(),
        FeedUpdate {
            episodes: vec![new_episode("s2", "e1")],
            total_count: 4,
        },
    );
    let notifier = FakeNotifier::default();

    let found = fetch_new_episodes(&db, &directory, &feeds, &notifier, false)
        .await
        .unwrap();

    assert!(found);
    assert_eq!(ids(&db), vec!["e1"]);
    assert!(!directory.last_fetched.lock().unwrap().contains_key("broken"));
}

#[tokio::test]
async fn test_nothing_new() {
    let (db, _temp) = setup_test_db();
    let directory = FakeDirectory::default();
    directory
        .subscriptions
        .lock()
        .unwrap()
        .push(subscription("s1", true));
    let mut feeds = FakeFeeds::default();
    feeds.updates.insert("s1".to_string(), FeedUpdate::default());
    let notifier = FakeNotifier::default();

    assert!(!fetch_new_episodes(&db, &directory, &feeds, &notifier, true)
        .await
        .unwrap());
    assert!(notifier.sent.lock().unwrap().is_empty());
}

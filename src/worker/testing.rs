//! In-memory stand-ins for the directory, feeds, notifier and audio engine.

use crate::directory::{EpisodeDirectory, RemoteEpisode, Subscription};
use crate::error::AppError;
use crate::feeds::{FeedReader, FeedUpdate, Notifier};
use crate::state::PlayerItem;
use crate::worker::transport::Transport;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
pub struct FakeDirectory {
    pub episodes: Mutex<HashMap<String, RemoteEpisode>>,
    pub liked: Mutex<HashSet<String>>,
    pub subscriptions: Mutex<Vec<Subscription>>,
    pub fail_likes: bool,
    /// (episode_id, liked) for every like RPC that reached the directory.
    pub like_calls: Mutex<Vec<(String, bool)>>,
    pub last_fetched: Mutex<HashMap<String, DateTime<Utc>>>,
    pub episode_counts: Mutex<HashMap<String, i64>>,
}

impl FakeDirectory {
    pub fn with_episode(self, id: &str, likes: u32) -> Self {
        self.episodes.lock().unwrap().insert(
            id.to_string(),
            RemoteEpisode {
                id: id.to_string(),
                audio_url: format!("https://cdn.example.com/audio/{}.mp3", id),
                duration_secs: 600,
                listen_count: 10,
                like_count: likes,
                comment_count: 1,
            },
        );
        self
    }
}

impl EpisodeDirectory for FakeDirectory {
    async fn get_episode(&self, episode_id: &str) -> Result<Option<RemoteEpisode>, AppError> {
        Ok(self.episodes.lock().unwrap().get(episode_id).cloned())
    }

    async fn has_liked(&self, episode_id: &str) -> Result<bool, AppError> {
        Ok(self.liked.lock().unwrap().contains(episode_id))
    }

    async fn add_like(&self, episode_id: &str) -> Result<(), AppError> {
        self.like_calls
            .lock()
            .unwrap()
            .push((episode_id.to_string(), true));
        if self.fail_likes {
            return Err(AppError::Http("like failed".into()));
        }
        self.liked.lock().unwrap().insert(episode_id.to_string());
        Ok(())
    }

    async fn remove_like(&self, episode_id: &str) -> Result<(), AppError> {
        self.like_calls
            .lock()
            .unwrap()
            .push((episode_id.to_string(), false));
        if self.fail_likes {
            return Err(AppError::Http("unlike failed".into()));
        }
        self.liked.lock().unwrap().remove(episode_id);
        Ok(())
    }

    async fn get_user_subscriptions(&self) -> Result<Vec<Subscription>, AppError> {
        Ok(self.subscriptions.lock().unwrap().clone())
    }

    async fn update_last_fetched(&self, show_id: &str, at: DateTime<Utc>) -> Result<(), AppError> {
        self.last_fetched
            .lock()
            .unwrap()
            .insert(show_id.to_string(), at);
        Ok(())
    }

    async fn update_episode_count(&self, show_id: &str, count: i64) -> Result<(), AppError> {
        self.episode_counts
            .lock()
            .unwrap()
            .insert(show_id.to_string(), count);
        Ok(())
    }
}

/// Feed contents per show id. Shows without an entry fail to fetch.
#[derive(Default)]
pub struct FakeFeeds {
    pub updates: HashMap<String, FeedUpdate>,
}

impl FeedReader for FakeFeeds {
    async fn read_new_episodes(
        &self,
        subscription: &Subscription,
        _since: DateTime<Utc>,
    ) -> Result<FeedUpdate, AppError> {
        self.updates
            .get(&subscription.show_id)
            .cloned()
            .ok_or_else(|| AppError::Http(format!("no feed for {}", subscription.show_id)))
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    pub sent: Mutex<Vec<(String, String, usize)>>,
}

impl Notifier for FakeNotifier {
    fn new_episodes(&self, show_title: &str, newest_title: &str, count: usize) {
        self.sent
            .lock()
            .unwrap()
            .push((show_title.to_string(), newest_title.to_string(), count));
    }
}

#[derive(Debug, Default)]
pub struct FakeTransport {
    pub loaded: Option<PlayerItem>,
    pub position: f64,
    pub playing: bool,
    pub ready: bool,
}

impl Transport for FakeTransport {
    fn load(&mut self, item: &PlayerItem) {
        self.loaded = Some(item.clone());
        self.position = 0.0;
        self.ready = false;
    }

    fn play(&mut self) {
        self.playing = true;
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn seek(&mut self, position_secs: f64) {
        self.position = position_secs;
    }

    fn position(&self) -> f64 {
        self.position
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn is_ready(&self) -> bool {
        self.ready
    }
}

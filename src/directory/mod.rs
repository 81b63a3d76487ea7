//! Remote episode directory
//!
//! Metadata, social stats, likes and the user's subscriptions live on a
//! backend service. The queue engine only talks to it through
//! [`EpisodeDirectory`]; [`HttpDirectory`] is the JSON-over-HTTP client.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Episode metadata and social counters as the backend reports them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEpisode {
    pub id: String,
    pub audio_url: String,
    #[serde(default)]
    pub duration_secs: i64,
    #[serde(default)]
    pub listen_count: u32,
    #[serde(default)]
    pub like_count: u32,
    #[serde(default)]
    pub comment_count: u32,
}

/// A show the user follows; new episodes of it are ingested into the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub show_id: String,
    pub show_title: String,
    pub feed_url: String,
    pub artwork_url: Option<String>,
    pub last_fetched: Option<DateTime<Utc>>,
}

/// Async lookups and RPCs against the backend. Implementations must be
/// shareable across spawned tasks.
pub trait EpisodeDirectory: Send + Sync + 'static {
    /// `Ok(None)` when the backend has no such episode.
    fn get_episode(
        &self,
        episode_id: &str,
    ) -> impl Future<Output = Result<Option<RemoteEpisode>, AppError>> + Send;

    fn has_liked(&self, episode_id: &str) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn add_like(&self, episode_id: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    fn remove_like(&self, episode_id: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    fn get_user_subscriptions(
        &self,
    ) -> impl Future<Output = Result<Vec<Subscription>, AppError>> + Send;

    fn update_last_fetched(
        &self,
        show_id: &str,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn update_episode_count(
        &self,
        show_id: &str,
        count: i64,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

#[derive(Debug, Deserialize)]
struct LikeStatus {
    liked: bool,
}

/// JSON client for the directory service
pub struct HttpDirectory {
    client: reqwest::Client,
    base_url: String,
    user_id: Option<String>,
    api_token: Option<String>,
}

impl HttpDirectory {
    pub fn new(base_url: &str, user_id: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            user_id,
            api_token: None,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.api_token = token;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn user(&self) -> Result<&str, AppError> {
        self.user_id
            .as_deref()
            .ok_or_else(|| AppError::Config("No user_id configured for the directory".into()))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send_ok(&self, builder: reqwest::RequestBuilder) -> Result<(), AppError> {
        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(AppError::Http(format!(
                "Directory returned status: {}",
                response.status()
            )));
        }
        Ok(())
    }
}

impl EpisodeDirectory for HttpDirectory {
    async fn get_episode(&self, episode_id: &str) -> Result<Option<RemoteEpisode>, AppError> {
        let response = self
            .request(reqwest::Method::GET, &format!("episodes/{}", episode_id))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AppError::Http(format!(
                "Episode lookup returned status: {}",
                response.status()
            )));
        }
        Ok(Some(response.json::<RemoteEpisode>().await?))
    }

    async fn has_liked(&self, episode_id: &str) -> Result<bool, AppError> {
        let Some(user) = self.user_id.as_deref() else {
            return Ok(false);
        };
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("users/{}/likes/{}", user, episode_id),
            )
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(AppError::Http(format!(
                "Like lookup returned status: {}",
                response.status()
            )));
        }
        Ok(response.json::<LikeStatus>().await?.liked)
    }

    async fn add_like(&self, episode_id: &str) -> Result<(), AppError> {
        let path = format!("users/{}/likes/{}", self.user()?, episode_id);
        self.send_ok(self.request(reqwest::Method::PUT, &path)).await
    }

    async fn remove_like(&self, episode_id: &str) -> Result<(), AppError> {
        let path = format!("users/{}/likes/{}", self.user()?, episode_id);
        self.send_ok(self.request(reqwest::Method::DELETE, &path)).await
    }

    async fn get_user_subscriptions(&self) -> Result<Vec<Subscription>, AppError> {
        let path = format!("users/{}/subscriptions", self.user()?);
        let response = self.request(reqwest::Method::GET, &path).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Http(format!(
                "Subscriptions returned status: {}",
                response.status()
            )));
        }
        Ok(response.json::<Vec<Subscription>>().await?)
    }

    async fn update_last_fetched(&self, show_id: &str, at: DateTime<Utc>) -> Result<(), AppError> {
        let builder = self
            .request(reqwest::Method::PATCH, &format!("shows/{}", show_id))
            .json(&serde_json::json!({ "last_fetched": at.to_rfc3339() }));
        self.send_ok(builder).await
    }

    async fn update_episode_count(&self, show_id: &str, count: i64) -> Result<(), AppError> {
        let builder = self
            .request(reqwest::Method::PATCH, &format!("shows/{}", show_id))
            .json(&serde_json::json!({ "episode_count": count }));
        self.send_ok(builder).await
    }
}

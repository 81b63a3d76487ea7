use serde::{Deserialize, Serialize};

/// Episode metadata as it arrives from a subscription feed or a manual add.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeInfo {
    pub episode_id: String,
    pub audio_url: String,
    pub title: String,
    pub show_id: Option<String>,
    pub show_title: String,
    pub artwork_url: Option<String>,
    pub duration_secs: i64,
    pub release_date: Option<String>,
}

/// One persisted playlist slot. `sort_index` defines the order; the queue
/// is presented with the highest index first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub episode_id: String,
    pub audio_url: String,
    pub title: String,
    pub show_id: Option<String>,
    pub show_title: String,
    pub artwork_url: Option<String>,
    pub duration_secs: i64,
    pub release_date: Option<String>,
    pub sort_index: i64,
    pub added_date: String,
}

impl QueueEntry {
    /// Whether two projections of the same entry differ in what a row displays.
    /// `sort_index` is ignored: reorders are tracked by position, not content.
    pub fn same_content(&self, other: &QueueEntry) -> bool {
        self.episode_id == other.episode_id
            && self.audio_url == other.audio_url
            && self.title == other.title
            && self.show_title == other.show_title
            && self.artwork_url == other.artwork_url
            && self.duration_secs == other.duration_secs
            && self.release_date == other.release_date
    }
}

/// Saved playback progress for one audio URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenRecord {
    pub audio_url: String,
    pub position_secs: f64,
    pub is_listened: bool,
    pub updated_at: String,
}

impl ListenRecord {
    /// Whole percent of the episode covered by the saved position.
    pub fn percent_of(&self, duration_secs: i64) -> u8 {
        percent_listened(self.position_secs, duration_secs)
    }
}

pub fn percent_listened(position_secs: f64, duration_secs: i64) -> u8 {
    if duration_secs <= 0 || !position_secs.is_finite() || position_secs <= 0.0 {
        return 0;
    }
    let ratio = position_secs / duration_secs as f64;
    (ratio * 100.0).floor().clamp(0.0, 100.0) as u8
}

/// Change notification delivered to store subscribers. Positions refer to
/// the descending-order view returned by `Database::list_entries`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreChange {
    Inserted { episode_id: String, position: usize },
    Updated { episode_id: String, position: usize },
    Deleted { episode_id: String, position: usize },
    Moved { episode_id: String, from: usize, to: usize },
    Cleared,
}

impl std::fmt::Display for StoreChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inserted {
                episode_id,
                position,
            } => write!(f, "inserted {} at {}", episode_id, position),
            Self::Updated {
                episode_id,
                position,
            } => write!(f, "updated {} at {}", episode_id, position),
            Self::Deleted {
                episode_id,
                position,
            } => write!(f, "deleted {} from {}", episode_id, position),
            Self::Moved {
                episode_id,
                from,
                to,
            } => write!(f, "moved {} {} -> {}", episode_id, from, to),
            Self::Cleared => write!(f, "cleared"),
        }
    }
}

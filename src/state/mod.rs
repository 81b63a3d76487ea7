//! Derived per-episode state for the queue view
//!
//! [`RowTable`] is the only place row state is mutated. Rows are keyed by
//! episode id; a row index exists only as a projection of `order`, so an
//! insert, delete or move touches exactly one ordering vector and every facet
//! of a row travels with it.

use crate::database::QueueEntry;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Social and progress counters shown on a row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserStats {
    pub listen_count: u32,
    pub like_count: u32,
    pub comment_count: u32,
    pub is_in_queue: bool,
    pub is_liked: bool,
    pub percent_listened: u8,
    pub is_listened: bool,
    pub is_downloaded: bool,
}

impl Default for UserStats {
    fn default() -> Self {
        Self {
            listen_count: 0,
            like_count: 0,
            comment_count: 0,
            is_in_queue: true,
            is_liked: false,
            percent_listened: 0,
            is_listened: false,
            is_downloaded: false,
        }
    }
}

/// The resource the player loads for a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "location", rename_all = "snake_case")]
pub enum PlayerItem {
    Remote(String),
    Local(PathBuf),
}

impl PlayerItem {
    /// Last path component, used to match transport events against entries.
    pub fn file_name(&self) -> Option<String> {
        match self {
            PlayerItem::Remote(url) => url_file_name(url),
            PlayerItem::Local(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().to_string()),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, PlayerItem::Local(_))
    }
}

/// File name component of a URL's path, ignoring query and fragment.
pub fn url_file_name(url: &str) -> Option<String> {
    let name = match reqwest::Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string)),
        Err(_) => url.rsplit('/').next().map(str::to_string),
    };
    name.filter(|n| !n.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerLifecycle {
    Loading,
    Playing,
    Paused,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowState {
    pub entry: QueueEntry,
    pub stats: UserStats,
    pub player_item: PlayerItem,
    /// Present only while a download for this row is in flight.
    pub download_progress: Option<f32>,
    /// Duration reported by the directory, when it knows one.
    pub remote_duration_secs: Option<i64>,
    /// Like state set on this device that the directory has not confirmed yet.
    pub pending_like: Option<bool>,
}

impl RowState {
    /// Duration used for listen progress.
    pub fn duration_secs(&self) -> i64 {
        effective_duration(self.remote_duration_secs, self.entry.duration_secs)
    }
}

/// The directory's duration when positive, else the queued entry's.
pub fn effective_duration(remote_secs: Option<i64>, entry_secs: i64) -> i64 {
    match remote_secs {
        Some(secs) if secs > 0 => secs,
        _ => entry_secs,
    }
}

/// Render-time projection of a row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowView {
    pub row: usize,
    pub episode_id: String,
    pub title: String,
    pub show_title: String,
    pub duration_secs: i64,
    pub stats: UserStats,
    pub player_item: PlayerItem,
    pub lifecycle: Option<PlayerLifecycle>,
    pub download_progress: Option<f32>,
}

/// What applying one fetched stats result did to the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsOutcome {
    /// Result belongs to a superseded generation and was discarded.
    Stale,
    /// Counted, but nothing to repaint yet (reload pending or row gone).
    Unchanged,
    /// Only this row needs repainting.
    Patched(usize),
    /// Last outstanding fetch of a reload landed; repaint everything.
    Completed,
}

#[derive(Debug, Default)]
pub struct RowTable {
    order: Vec<String>,
    rows: HashMap<String, RowState>,
    generation: u64,
    outstanding: usize,
    need_reload: bool,
}

impl RowTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn reload_pending(&self) -> bool {
        self.need_reload
    }

    // =========================================================================
    // Bulk refresh
    // =========================================================================

    /// Replace every row from a fresh ordered entry list. Stats reset to
    /// defaults; in-flight download progress survives for ids still queued.
    /// Starts a new generation with one outstanding fetch per row.
    pub fn rebuild<F>(&mut self, entries: Vec<QueueEntry>, mut resolve: F) -> u64
    where
        F: FnMut(&QueueEntry) -> PlayerItem,
    {
        let mut previous = std::mem::take(&mut self.rows);
        self.order.clear();

        for entry in entries {
            if self.rows.contains_key(&entry.episode_id) {
                log::warn!("Duplicate queue entry {} ignored", entry.episode_id);
                continue;
            }
            let carried = previous.remove(&entry.episode_id);
            let row = RowState {
                player_item: resolve(&entry),
                stats: UserStats::default(),
                download_progress: carried.as_ref().and_then(|old| old.download_progress),
                remote_duration_secs: carried.as_ref().and_then(|old| old.remote_duration_secs),
                pending_like: carried.and_then(|old| old.pending_like),
                entry,
            };
            self.order.push(row.entry.episode_id.clone());
            self.rows.insert(row.entry.episode_id.clone(), row);
        }

        self.generation += 1;
        self.outstanding = self.order.len();
        self.need_reload = self.outstanding > 0;
        self.generation
    }

    /// Account for one fetch result. `stats == None` means the episode had no
    /// metadata; the row keeps its defaults. A like made here that the fetched
    /// stats do not reflect yet stays applied on top of them.
    pub fn apply_stats(
        &mut self,
        generation: u64,
        episode_id: &str,
        stats: Option<UserStats>,
    ) -> StatsOutcome {
        if generation != self.generation {
            log::debug!(
                "Discarding stats for {} from generation {} (current {})",
                episode_id,
                generation,
                self.generation
            );
            return StatsOutcome::Stale;
        }
        self.outstanding = self.outstanding.saturating_sub(1);

        let patched = match (stats, self.rows.get_mut(episode_id)) {
            (Some(mut stats), Some(row)) => {
                match row.pending_like {
                    Some(liked) if liked == stats.is_liked => row.pending_like = None,
                    Some(true) => {
                        stats.is_liked = true;
                        stats.like_count += 1;
                    }
                    Some(false) => {
                        stats.is_liked = false;
                        stats.like_count = stats.like_count.saturating_sub(1);
                    }
                    None => {}
                }
                row.stats = stats;
                true
            }
            _ => false,
        };

        if self.need_reload {
            if self.outstanding == 0 {
                self.need_reload = false;
                return StatsOutcome::Completed;
            }
            return StatsOutcome::Unchanged;
        }

        match self.row_of(episode_id) {
            Some(row) if patched => StatsOutcome::Patched(row),
            _ => StatsOutcome::Unchanged,
        }
    }

    /// Register a single-row fetch under the current generation.
    pub fn begin_row_fetch(&mut self, episode_id: &str) -> Option<u64> {
        if !self.rows.contains_key(episode_id) {
            return None;
        }
        self.outstanding += 1;
        Some(self.generation)
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.rows.clear();
        self.generation += 1;
        self.outstanding = 0;
        self.need_reload = false;
    }

    // =========================================================================
    // Structural mutation
    // =========================================================================

    /// Drop a row. Returns the row index it occupied.
    pub fn remove(&mut self, episode_id: &str) -> Option<usize> {
        let row = self.row_of(episode_id)?;
        self.order.remove(row);
        self.rows.remove(episode_id);
        Some(row)
    }

    /// Move the row at `from` to `to`, shifting the rows in between.
    /// Out-of-range positions leave the table untouched.
    pub fn move_row(&mut self, from: usize, to: usize) -> bool {
        if from >= self.order.len() || to >= self.order.len() {
            return false;
        }
        let id = self.order.remove(from);
        self.order.insert(to, id);
        true
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub fn id_at(&self, row: usize) -> Option<&str> {
        self.order.get(row).map(String::as_str)
    }

    pub fn row_of(&self, episode_id: &str) -> Option<usize> {
        self.order.iter().position(|id| id == episode_id)
    }

    pub fn get(&self, episode_id: &str) -> Option<&RowState> {
        self.rows.get(episode_id)
    }

    pub fn ids(&self) -> &[String] {
        &self.order
    }

    /// Entries in display order.
    pub fn entries(&self) -> Vec<QueueEntry> {
        self.order
            .iter()
            .filter_map(|id| self.rows.get(id))
            .map(|row| row.entry.clone())
            .collect()
    }

    /// Swap in refreshed metadata for an entry already in the table.
    pub fn replace_entry(&mut self, entry: QueueEntry) -> Option<usize> {
        let row = self.row_of(&entry.episode_id)?;
        let state = self.rows.get_mut(&entry.episode_id)?;
        if !state.player_item.is_local() {
            state.player_item = PlayerItem::Remote(entry.audio_url.clone());
        }
        state.entry = entry;
        Some(row)
    }

    /// The entry that plays after `episode_id`.
    pub fn next_after(&self, episode_id: &str) -> Option<&str> {
        let row = self.row_of(episode_id)?;
        self.id_at(row + 1)
    }

    // =========================================================================
    // Targeted mutation
    // =========================================================================

    /// Mark liked and bump the count. Liking a liked row changes nothing.
    pub fn like(&mut self, episode_id: &str) -> bool {
        let Some(row) = self.rows.get_mut(episode_id) else {
            return false;
        };
        if row.stats.is_liked {
            return false;
        }
        row.pending_like = Some(true);
        row.stats.is_liked = true;
        row.stats.like_count += 1;
        true
    }

    /// Clear the liked flag; the count only drops if the row was liked.
    pub fn unlike(&mut self, episode_id: &str) -> bool {
        let Some(row) = self.rows.get_mut(episode_id) else {
            return false;
        };
        if row.stats.is_liked {
            row.stats.like_count = row.stats.like_count.saturating_sub(1);
        }
        row.pending_like = Some(false);
        row.stats.is_liked = false;
        true
    }

    pub fn set_listened(&mut self, episode_id: &str, listened: bool, percent: u8) -> bool {
        let Some(row) = self.rows.get_mut(episode_id) else {
            return false;
        };
        row.stats.is_listened = listened;
        row.stats.percent_listened = percent;
        true
    }

    pub fn set_remote_duration(&mut self, episode_id: &str, duration_secs: i64) -> bool {
        let Some(row) = self.rows.get_mut(episode_id) else {
            return false;
        };
        row.remote_duration_secs = Some(duration_secs).filter(|secs| *secs > 0);
        true
    }

    pub fn set_percent(&mut self, episode_id: &str, percent: u8) -> bool {
        let Some(row) = self.rows.get_mut(episode_id) else {
            return false;
        };
        if row.stats.percent_listened == percent {
            return false;
        }
        row.stats.percent_listened = percent;
        true
    }

    /// Record download status and the resource the player should use.
    pub fn set_downloaded(&mut self, episode_id: &str, item: PlayerItem) -> bool {
        let Some(row) = self.rows.get_mut(episode_id) else {
            return false;
        };
        row.stats.is_downloaded = item.is_local();
        row.player_item = item;
        row.download_progress = None;
        true
    }

    pub fn set_progress(&mut self, episode_id: &str, progress: Option<f32>) -> bool {
        let Some(row) = self.rows.get_mut(episode_id) else {
            return false;
        };
        row.download_progress = progress;
        true
    }

    // =========================================================================
    // Projection
    // =========================================================================

    pub fn view(
        &self,
        row: usize,
        lifecycle: impl Fn(&str) -> Option<PlayerLifecycle>,
    ) -> Option<RowView> {
        let id = self.order.get(row)?;
        let state = self.rows.get(id)?;
        Some(RowView {
            row,
            episode_id: id.clone(),
            title: state.entry.title.clone(),
            show_title: state.entry.show_title.clone(),
            duration_secs: state.entry.duration_secs,
            stats: state.stats.clone(),
            player_item: state.player_item.clone(),
            lifecycle: lifecycle(id),
            download_progress: state.download_progress,
        })
    }

    pub fn snapshot(&self, lifecycle: impl Fn(&str) -> Option<PlayerLifecycle>) -> Vec<RowView> {
        (0..self.order.len())
            .filter_map(|row| self.view(row, &lifecycle))
            .collect()
    }
}

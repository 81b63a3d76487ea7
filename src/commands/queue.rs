//! Row actions and ordering operations on the queue screen
//!
//! Every action resolves the touched row to an episode id once, at the
//! boundary; a row outside the table is a no-op.

use crate::database::QueueEntry;
use crate::directory::EpisodeDirectory;
use crate::error::AppError;
use crate::state::{PlayerItem, RowView};
use crate::worker::transport::Transport;
use crate::worker::{QueueWorker, ViewUpdate};
use std::path::PathBuf;
use tracing::Instrument;

impl<D: EpisodeDirectory, T: Transport> QueueWorker<D, T> {
    /// Entries in display order.
    pub fn get_queue_items(&self) -> Vec<QueueEntry> {
        self.table.entries()
    }

    pub fn row_view(&self, row: usize) -> Option<RowView> {
        self.table.view(row, |id| self.session.lifecycle_of(id))
    }

    pub fn go_to_episode_details(&self, row: usize) {
        if let Some(episode_id) = self.table.id_at(row) {
            self.emit(ViewUpdate::ShowEpisodeDetails {
                episode_id: episode_id.to_string(),
            });
        }
    }

    fn row_entry(&self, row: usize) -> Option<QueueEntry> {
        let id = self.table.id_at(row)?;
        self.table.get(id).map(|state| state.entry.clone())
    }

    // =========================================================================
    // Likes and listened state
    // =========================================================================

    /// Flip the like locally and tell the directory in the background. A failed
    /// RPC is logged and otherwise ignored.
    pub fn toggle_like(&mut self, row: usize) {
        let Some(episode_id) = self.table.id_at(row).map(str::to_string) else {
            return;
        };
        let liked = self
            .table
            .get(&episode_id)
            .is_some_and(|state| state.stats.is_liked);

        if liked {
            self.table.unlike(&episode_id);
        } else {
            self.table.like(&episode_id);
        }
        self.emit(ViewUpdate::Row { row });

        let directory = self.directory.clone();
        let span = tracing::debug_span!("like", %episode_id, like = !liked);
        tokio::spawn(
            async move {
                let result = if liked {
                    directory.remove_like(&episode_id).await
                } else {
                    directory.add_like(&episode_id).await
                };
                if let Err(e) = result {
                    log::warn!("Like update for {} failed: {}", episode_id, e);
                }
            }
            .instrument(span),
        );
    }

    /// Mark listened (keeping the saved position) or unlistened (forgetting it).
    pub fn toggle_listened(&mut self, row: usize) -> Result<(), AppError> {
        let Some(entry) = self.row_entry(row) else {
            return Ok(());
        };
        let Some(state) = self.table.get(&entry.episode_id) else {
            return Ok(());
        };
        let listened = !state.stats.is_listened;
        let duration_secs = state.duration_secs();

        self.db.set_listened(&entry.audio_url, listened)?;
        let percent = if listened {
            self.db
                .listen_record(&entry.audio_url)?
                .map_or(0, |record| record.percent_of(duration_secs))
        } else {
            0
        };

        self.table.set_listened(&entry.episode_id, listened, percent);
        self.emit(ViewUpdate::Row { row });
        Ok(())
    }

    // =========================================================================
    // Downloads
    // =========================================================================

    /// Start, cancel or remove the download depending on the row's state.
    pub async fn toggle_download(&mut self, row: usize) -> Result<(), AppError> {
        let Some(entry) = self.row_entry(row) else {
            return Ok(());
        };
        if self.downloads.is_active(&entry.audio_url) {
            self.cancel_download(row);
            return Ok(());
        }
        let downloaded = self
            .table
            .get(&entry.episode_id)
            .is_some_and(|state| state.stats.is_downloaded || state.player_item.is_local());
        if downloaded {
            self.undownload(row).await;
            Ok(())
        } else {
            self.start_download(row)
        }
    }

    pub fn start_download(&mut self, row: usize) -> Result<(), AppError> {
        let Some(entry) = self.row_entry(row) else {
            return Ok(());
        };
        self.downloads.start(&entry.audio_url, &entry.episode_id)?;
        self.table.set_progress(&entry.episode_id, Some(0.0));
        self.emit(ViewUpdate::DownloadProgress { row, fraction: 0.0 });
        Ok(())
    }

    /// User-initiated cancel: the row reverts to not downloaded, no alert.
    pub fn cancel_download(&mut self, row: usize) {
        let Some(entry) = self.row_entry(row) else {
            return;
        };
        if self.downloads.cancel(&entry.audio_url).is_some() {
            self.table
                .set_downloaded(&entry.episode_id, PlayerItem::Remote(entry.audio_url.clone()));
            self.emit(ViewUpdate::Row { row });
        }
    }

    /// Delete the cached copy and fall back to streaming.
    pub async fn undownload(&mut self, row: usize) {
        let Some(entry) = self.row_entry(row) else {
            return;
        };
        match self.downloads.remove_cached(&entry.audio_url).await {
            Ok(()) => {
                self.table
                    .set_downloaded(&entry.episode_id, PlayerItem::Remote(entry.audio_url.clone()));
                self.emit_row_of(&entry.episode_id);
            }
            Err(e) => self.alert(
                "undownload",
                format!("Error undownloading {}", entry.title),
                Some("Please try again later"),
                &e.to_string(),
            ),
        }
    }

    pub(crate) fn on_download_progress(&mut self, url: &str, transfer: u64, fraction: f32) {
        let Some((episode_id, fraction)) = self.downloads.progress(url, transfer, fraction) else {
            return;
        };
        self.table.set_progress(&episode_id, Some(fraction));
        if let Some(row) = self.table.row_of(&episode_id) {
            self.emit(ViewUpdate::DownloadProgress { row, fraction });
        }
    }

    pub(crate) fn on_download_finished(&mut self, url: &str, transfer: u64, file: Option<PathBuf>) {
        let Some(episode_id) = self.downloads.finish(url, transfer) else {
            log::debug!("Ignoring finish for inactive transfer {} of {}", transfer, url);
            if let Some(path) = file {
                self.discard_orphan(url, path);
            }
            return;
        };

        match file {
            Some(path) => {
                log::info!("Episode {} downloaded to {:?}", episode_id, path);
                self.table.set_downloaded(&episode_id, PlayerItem::Local(path));
                self.emit_row_of(&episode_id);
            }
            None => {
                self.table
                    .set_downloaded(&episode_id, PlayerItem::Remote(url.to_string()));
                self.emit_row_of(&episode_id);
                let title = self
                    .table
                    .get(&episode_id)
                    .map_or_else(|| episode_id.clone(), |state| state.entry.title.clone());
                self.alert(
                    "download",
                    format!("Error downloading {}", title),
                    None,
                    &format!("Download of {} failed", url),
                );
            }
        }
    }

    /// Delete a file a cancelled transfer managed to persist, unless a row
    /// already plays it or a newer transfer for the URL is running.
    fn discard_orphan(&self, url: &str, path: PathBuf) {
        let item = PlayerItem::Local(path);
        let in_use = self.downloads.is_active(url)
            || self
                .table
                .ids()
                .iter()
                .any(|id| self.table.get(id).is_some_and(|state| state.player_item == item));
        if in_use {
            return;
        }
        if let PlayerItem::Local(path) = item {
            log::debug!("Removing orphaned download {:?}", path);
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Failed to remove {:?}: {}", path, e);
            }
        }
    }

    // =========================================================================
    // Ordering
    // =========================================================================

    /// Move a row, mirroring the store reorder into the table. Notifications
    /// are held while the store rewrites order indices.
    pub fn move_row(&mut self, from: usize, to: usize) -> Result<(), AppError> {
        if from >= self.table.len() || to >= self.table.len() || from == to {
            return Ok(());
        }
        {
            let _pause = self.db.pause_notifications();
            self.db.move_entry(from, to)?;
        }
        self.table.move_row(from, to);
        self.emit(ViewUpdate::Reload);
        Ok(())
    }

    /// Remove a row from the store and the table. An in-flight download for it
    /// is cancelled.
    pub fn delete_row(&mut self, row: usize) -> Result<(), AppError> {
        let Some(entry) = self.row_entry(row) else {
            return Ok(());
        };
        self.downloads.cancel(&entry.audio_url);
        self.db.remove(&entry.episode_id)?;
        self.table.remove(&entry.episode_id);
        log::info!("Removed {} from the queue", entry.episode_id);
        self.emit(ViewUpdate::Reload);
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<(), AppError> {
        self.downloads.cancel_all();
        self.db.remove_all()?;
        self.table.clear();
        self.emit(ViewUpdate::Reload);
        Ok(())
    }
}

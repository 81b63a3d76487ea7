pub mod download;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

use crate::commands::ErrorLog;
use crate::config::QueueConfig;
use crate::database::{Database, QueueEntry, StoreChange};
use crate::directory::{EpisodeDirectory, RemoteEpisode};
use crate::error::AppError;
use crate::state::{effective_duration, RowTable, RowView, StatsOutcome, UserStats};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use download::{DownloadEvent, DownloadManager};
use transport::{PlaybackSession, Transport, TransportEvent};

/// Results of asynchronous work, marshalled back onto the worker loop.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    StatsLoaded {
        generation: u64,
        episode_id: String,
        remote: Option<RemoteEpisode>,
        liked: bool,
    },
    Download(DownloadEvent),
    Transport(TransportEvent),
}

/// What the view layer should repaint or present.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewUpdate {
    /// Repaint every row.
    Reload,
    Row { row: usize },
    DownloadProgress { row: usize, fraction: f32 },
    Alert { title: String, message: Option<String> },
    ShowEpisodeDetails { episode_id: String },
    PlayerLoading { loading: bool },
}

/// User actions, addressed by the row the user touched.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueCommand {
    Refresh,
    RefreshRow { episode_id: String },
    ToggleLike { row: usize },
    ToggleListened { row: usize },
    ToggleDownload { row: usize },
    CancelDownload { row: usize },
    Play { row: usize },
    Move { from: usize, to: usize },
    Delete { row: usize },
    Clear,
    OpenDetails { row: usize },
    Shutdown,
}

/// Owner of every piece of queue screen state. All mutation happens on the
/// task running [`QueueWorker::run`]; spawned work reports back through
/// [`QueueEvent`]s.
pub struct QueueWorker<D: EpisodeDirectory, T: Transport> {
    pub(crate) db: Arc<Database>,
    pub(crate) directory: Arc<D>,
    pub(crate) config: QueueConfig,
    pub(crate) table: RowTable,
    pub(crate) downloads: DownloadManager,
    pub(crate) session: PlaybackSession<T>,
    pub(crate) errors: Arc<ErrorLog>,
    events_tx: mpsc::UnboundedSender<QueueEvent>,
    events_rx: mpsc::UnboundedReceiver<QueueEvent>,
    store_rx: mpsc::UnboundedReceiver<StoreChange>,
    view_tx: mpsc::UnboundedSender<ViewUpdate>,
    rows: Arc<RwLock<Vec<RowView>>>,
}

impl<D: EpisodeDirectory, T: Transport> QueueWorker<D, T> {
    pub fn new(
        db: Arc<Database>,
        directory: Arc<D>,
        session: PlaybackSession<T>,
        config: QueueConfig,
        errors: Arc<ErrorLog>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ViewUpdate>), AppError> {
        let store_rx = db.subscribe()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = mpsc::unbounded_channel();
        let downloads = DownloadManager::new(config.download_dir.clone(), events_tx.clone());

        let worker = Self {
            db,
            directory,
            config,
            table: RowTable::new(),
            downloads,
            session,
            errors,
            events_tx,
            events_rx,
            store_rx,
            view_tx,
            rows: Arc::new(RwLock::new(Vec::new())),
        };
        Ok((worker, view_rx))
    }

    /// Sender the audio engine reports readiness and end-of-item through.
    pub fn events(&self) -> mpsc::UnboundedSender<QueueEvent> {
        self.events_tx.clone()
    }

    /// Snapshot of the rendered rows, republished after every handled step.
    pub fn rows(&self) -> Arc<RwLock<Vec<RowView>>> {
        self.rows.clone()
    }

    pub fn table(&self) -> &RowTable {
        &self.table
    }

    pub fn session(&self) -> &PlaybackSession<T> {
        &self.session
    }

    /// Give up the player so another screen can drive it.
    pub fn into_session(self) -> PlaybackSession<T> {
        self.session
    }

    /// Run until cancelled or told to shut down, then hand the player back.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<QueueCommand>,
        cancel: CancellationToken,
    ) -> PlaybackSession<T> {
        log::info!("Queue worker started");

        self.refresh();
        self.publish().await;

        let mut ticker = tokio::time::interval(self.config.position_poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("Queue worker cancelled");
                    break;
                }
                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event);
                }
                Some(change) = self.store_rx.recv() => {
                    self.on_store_change(change);
                }
                command = commands.recv() => {
                    match command {
                        Some(QueueCommand::Shutdown) | None => {
                            log::info!("Queue worker shutting down");
                            break;
                        }
                        Some(command) => self.handle_command(command).await,
                    }
                }
                _ = ticker.tick() => {
                    self.on_tick();
                }
            }

            self.publish().await;
        }

        self.downloads.cancel_all();
        log::info!("Queue worker stopped");
        self.into_session()
    }

    pub async fn handle_command(&mut self, command: QueueCommand) {
        let result = match command {
            QueueCommand::Refresh => {
                self.refresh();
                Ok(())
            }
            QueueCommand::RefreshRow { episode_id } => {
                self.refresh_row(&episode_id);
                Ok(())
            }
            QueueCommand::ToggleLike { row } => {
                self.toggle_like(row);
                Ok(())
            }
            QueueCommand::ToggleListened { row } => self.toggle_listened(row),
            QueueCommand::ToggleDownload { row } => self.toggle_download(row).await,
            QueueCommand::CancelDownload { row } => {
                self.cancel_download(row);
                Ok(())
            }
            QueueCommand::Play { row } => self.play(row),
            QueueCommand::Move { from, to } => self.move_row(from, to),
            QueueCommand::Delete { row } => self.delete_row(row),
            QueueCommand::Clear => self.clear_all(),
            QueueCommand::OpenDetails { row } => {
                self.go_to_episode_details(row);
                Ok(())
            }
            QueueCommand::Shutdown => Ok(()),
        };

        if let Err(e) = result {
            self.errors.log_error("queue_command", &e.to_string(), None);
        }
    }

    pub fn handle_event(&mut self, event: QueueEvent) {
        match event {
            QueueEvent::StatsLoaded {
                generation,
                episode_id,
                remote,
                liked,
            } => self.on_stats_loaded(generation, &episode_id, remote, liked),
            QueueEvent::Download(DownloadEvent::Progress {
                url,
                transfer,
                fraction,
            }) => self.on_download_progress(&url, transfer, fraction),
            QueueEvent::Download(DownloadEvent::Finished {
                url,
                transfer,
                file,
            }) => self.on_download_finished(&url, transfer, file),
            QueueEvent::Transport(TransportEvent::ReadyToPlay) => self.on_ready_to_play(),
            QueueEvent::Transport(TransportEvent::ReachedEnd { item }) => {
                self.on_item_finished(&item)
            }
        }
    }

    /// Wait for and apply the next async result. Returns false once no sender
    /// remains.
    pub async fn next_event(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(event) => {
                self.handle_event(event);
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Bulk and per-row refresh
    // =========================================================================

    /// Reload the ordered entries from the store and start a new generation of
    /// stats fetches. A store failure leaves the table empty.
    pub fn refresh(&mut self) {
        match self.db.list_entries() {
            Ok(entries) => self.refresh_with(entries),
            Err(e) => {
                log::error!("Failed to load queue entries: {}", e);
                self.errors.log_error("refresh", &e.to_string(), None);
                self.table.clear();
                self.emit(ViewUpdate::Reload);
            }
        }
    }

    fn refresh_with(&mut self, entries: Vec<QueueEntry>) {
        let downloads = &self.downloads;
        let generation = self
            .table
            .rebuild(entries, |entry| downloads.resolve(&entry.audio_url));

        if self.table.is_empty() {
            self.emit(ViewUpdate::Reload);
            return;
        }

        log::debug!(
            "Refreshing {} rows, generation {}",
            self.table.len(),
            generation
        );
        for episode_id in self.table.ids().to_vec() {
            self.spawn_stats_fetch(generation, episode_id);
        }
    }

    /// Re-fetch one row's stats; only that row is repainted.
    pub fn refresh_row(&mut self, episode_id: &str) {
        if let Some(generation) = self.table.begin_row_fetch(episode_id) {
            self.spawn_stats_fetch(generation, episode_id.to_string());
        }
    }

    fn spawn_stats_fetch(&self, generation: u64, episode_id: String) {
        let directory = self.directory.clone();
        let events = self.events_tx.clone();
        let span = tracing::debug_span!("stats_fetch", %episode_id, generation);

        tokio::spawn(
            async move {
                let (remote, liked) = match directory.get_episode(&episode_id).await {
                    Ok(Some(remote)) => {
                        let liked = match directory.has_liked(&episode_id).await {
                            Ok(liked) => liked,
                            Err(e) => {
                                log::debug!("Like lookup for {} failed: {}", episode_id, e);
                                false
                            }
                        };
                        (Some(remote), liked)
                    }
                    Ok(None) => (None, false),
                    Err(e) => {
                        log::debug!("Episode lookup for {} failed: {}", episode_id, e);
                        (None, false)
                    }
                };
                let _ = events.send(QueueEvent::StatsLoaded {
                    generation,
                    episode_id,
                    remote,
                    liked,
                });
            }
            .instrument(span),
        );
    }

    fn on_stats_loaded(
        &mut self,
        generation: u64,
        episode_id: &str,
        remote: Option<RemoteEpisode>,
        liked: bool,
    ) {
        let stats = match remote {
            Some(remote) => {
                if generation == self.table.generation() {
                    self.table.set_remote_duration(episode_id, remote.duration_secs);
                }
                self.table
                    .get(episode_id)
                    .map(|row| self.compose_stats(&row.entry, &remote, liked))
            }
            None => {
                log::debug!("No metadata for {}, keeping defaults", episode_id);
                None
            }
        };

        match self.table.apply_stats(generation, episode_id, stats) {
            StatsOutcome::Completed => self.emit(ViewUpdate::Reload),
            StatsOutcome::Patched(row) => self.emit(ViewUpdate::Row { row }),
            StatsOutcome::Stale | StatsOutcome::Unchanged => {}
        }
    }

    /// Merge remote counters with local listen progress and cache state.
    fn compose_stats(&self, entry: &QueueEntry, remote: &RemoteEpisode, liked: bool) -> UserStats {
        let record = match self.db.listen_record(&entry.audio_url) {
            Ok(record) => record,
            Err(e) => {
                log::warn!("Failed to read listen record for {}: {}", entry.episode_id, e);
                None
            }
        };
        let duration = effective_duration(Some(remote.duration_secs), entry.duration_secs);

        UserStats {
            listen_count: remote.listen_count,
            like_count: remote.like_count,
            comment_count: remote.comment_count,
            is_in_queue: true,
            is_liked: liked,
            percent_listened: record.as_ref().map_or(0, |r| r.percent_of(duration)),
            is_listened: record.as_ref().is_some_and(|r| r.is_listened),
            is_downloaded: self.downloads.resolve(&entry.audio_url).is_local(),
        }
    }

    // =========================================================================
    // Store notifications
    // =========================================================================

    /// Changes the table already mirrors are no-ops; anything else that alters
    /// the ordered list triggers a bulk refresh.
    pub fn on_store_change(&mut self, change: StoreChange) {
        log::debug!("Store change: {}", change);

        let entries = match self.db.list_entries() {
            Ok(entries) => entries,
            Err(e) => {
                log::error!("Failed to load queue entries: {}", e);
                self.errors.log_error("store_change", &e.to_string(), None);
                self.table.clear();
                self.emit(ViewUpdate::Reload);
                return;
            }
        };

        let mirrored = entries.len() == self.table.len()
            && entries
                .iter()
                .zip(self.table.ids())
                .all(|(entry, id)| &entry.episode_id == id);
        if !mirrored {
            self.refresh_with(entries);
            return;
        }

        if let StoreChange::Updated { episode_id, .. } = change {
            let Some(entry) = entries.into_iter().find(|e| e.episode_id == episode_id) else {
                return;
            };
            let changed = self
                .table
                .get(&episode_id)
                .is_some_and(|row| !row.entry.same_content(&entry));
            if changed {
                if let Some(row) = self.table.replace_entry(entry) {
                    self.emit(ViewUpdate::Row { row });
                    self.refresh_row(&episode_id);
                }
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    pub(crate) fn emit(&self, update: ViewUpdate) {
        let _ = self.view_tx.send(update);
    }

    /// Surface a user-actionable failure and keep it in the error log.
    pub(crate) fn alert(&self, command: &str, title: String, message: Option<&str>, error: &str) {
        self.errors.log_error(command, error, Some(&title));
        self.emit(ViewUpdate::Alert {
            title,
            message: message.map(str::to_string),
        });
    }

    pub(crate) fn emit_row_of(&self, episode_id: &str) {
        if let Some(row) = self.table.row_of(episode_id) {
            self.emit(ViewUpdate::Row { row });
        }
    }

    pub fn snapshot(&self) -> Vec<RowView> {
        self.table.snapshot(|id| self.session.lifecycle_of(id))
    }

    async fn publish(&self) {
        let snapshot = self.snapshot();
        *self.rows.write().await = snapshot;
    }
}

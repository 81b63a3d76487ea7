use crate::database::percent_listened;
use crate::directory::EpisodeDirectory;
use crate::error::AppError;
use crate::state::PlayerItem;
use crate::worker::transport::{finished_entry, Toggle, Transport};
use crate::worker::{QueueWorker, ViewUpdate};

impl<D: EpisodeDirectory, T: Transport> QueueWorker<D, T> {
    /// Play or pause the row's episode, switching the player over to it when
    /// another one is active.
    pub fn play(&mut self, row: usize) -> Result<(), AppError> {
        let Some(state) = self.table.id_at(row).and_then(|id| self.table.get(id)) else {
            return Ok(());
        };
        let entry = state.entry.clone();
        let item = state.player_item.clone();

        match self.session.toggle(&self.db, &entry, &item)? {
            Toggle::StillLoading => {}
            Toggle::Paused | Toggle::Playing => self.emit(ViewUpdate::Row { row }),
            Toggle::Activated { previous } => {
                self.emit(ViewUpdate::PlayerLoading { loading: true });
                if let Some(previous) = previous {
                    self.emit_row_of(&previous);
                }
                self.emit(ViewUpdate::Row { row });
            }
        }
        Ok(())
    }

    pub(crate) fn on_ready_to_play(&mut self) {
        if self.session.on_ready() {
            self.emit(ViewUpdate::PlayerLoading { loading: false });
            if let Some(active) = self.session.active_episode() {
                self.emit_row_of(active);
            }
        }
    }

    /// Position observer tick.
    pub fn on_tick(&mut self) {
        let sample = match self.session.sample(&self.db) {
            Ok(Some(sample)) => sample,
            Ok(None) => return,
            Err(e) => {
                log::warn!("Failed to save playback position: {}", e);
                return;
            }
        };

        let mut repaint = sample.became_ready;
        if sample.became_ready {
            self.emit(ViewUpdate::PlayerLoading { loading: false });
        }
        if let Some(state) = self.table.get(&sample.episode_id) {
            let percent = percent_listened(sample.position_secs, state.duration_secs());
            repaint |= self.table.set_percent(&sample.episode_id, percent);
        }
        if repaint {
            self.emit_row_of(&sample.episode_id);
        }
    }

    /// Natural end of an item. The finished episode is marked listened; only
    /// the end of the active episode advances playback.
    pub(crate) fn on_item_finished(&mut self, item: &PlayerItem) {
        let entries = self.table.entries();
        let Some(finished) = finished_entry(item, &entries).cloned() else {
            log::debug!("Ignoring end of {:?}, not in the queue", item);
            return;
        };
        let episode_id = finished.episode_id.clone();
        log::info!("Finished {} ({})", finished.title, episode_id);

        if let Err(e) = self.db.set_listened(&finished.audio_url, true) {
            log::warn!("Failed to mark {} listened: {}", episode_id, e);
        }
        self.table.set_listened(&episode_id, true, 100);

        if self.session.active_episode() != Some(episode_id.as_str()) {
            log::debug!("{} is no longer active, not advancing", episode_id);
            self.emit_row_of(&episode_id);
            return;
        }
        self.session.clear_active();

        if let Some(next) = self.table.next_after(&episode_id).map(str::to_string) {
            if let Some(state) = self.table.get(&next) {
                let (entry, next_item) = (state.entry.clone(), state.player_item.clone());
                match self.session.activate(&self.db, &entry, &next_item) {
                    Ok(_) => {
                        self.emit(ViewUpdate::PlayerLoading { loading: true });
                        self.emit_row_of(&next);
                    }
                    Err(e) => log::warn!("Failed to start {}: {}", next, e),
                }
            }
        }

        if self.config.remove_on_finish {
            match self.db.remove(&episode_id) {
                Ok(_) => {
                    self.table.remove(&episode_id);
                    self.emit(ViewUpdate::Reload);
                }
                Err(e) => {
                    log::warn!("Failed to remove finished {}: {}", episode_id, e);
                    self.emit_row_of(&episode_id);
                }
            }
        } else {
            self.emit_row_of(&episode_id);
        }
    }
}

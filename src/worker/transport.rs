//! Transport control for the shared sequential player
//!
//! There is one player per process. Whoever owns the [`PlaybackSession`]
//! drives it; another screen takes over by receiving the session (or its
//! transport via [`PlaybackSession::into_transport`]) rather than reaching
//! into shared globals.

use crate::database::{Database, QueueEntry};
use crate::error::AppError;
use crate::state::{url_file_name, PlayerItem, PlayerLifecycle};

pub const NOW_PLAYING_KEY: &str = "now_playing";

/// Command surface of the audio engine. Decoding and output happen elsewhere;
/// readiness and end-of-item come back as [`TransportEvent`]s.
pub trait Transport: Send {
    fn load(&mut self, item: &PlayerItem);
    fn play(&mut self);
    fn pause(&mut self);
    fn seek(&mut self, position_secs: f64);
    /// Current position of the loaded item, in seconds.
    fn position(&self) -> f64;
    fn is_playing(&self) -> bool;
    fn is_ready(&self) -> bool;
}

/// Callbacks from the audio engine.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    ReadyToPlay,
    /// The item played to its natural end.
    ReachedEnd { item: PlayerItem },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Toggle {
    /// The row is still loading; nothing changed.
    StillLoading,
    Paused,
    Playing,
    /// A different row became active. Holds the one it replaced.
    Activated { previous: Option<String> },
}

/// One position sample of the active item.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub episode_id: String,
    pub position_secs: f64,
    /// Loading was cleared by this sample.
    pub became_ready: bool,
}

#[derive(Debug)]
struct ActiveItem {
    episode_id: String,
    /// Listen records are keyed by the remote URL, not the local copy.
    resume_key: String,
    loading: bool,
}

pub struct PlaybackSession<T: Transport> {
    transport: T,
    active: Option<ActiveItem>,
}

impl<T: Transport> PlaybackSession<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            active: None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn active_episode(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.episode_id.as_str())
    }

    pub fn is_loading(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.loading)
    }

    pub fn lifecycle_of(&self, episode_id: &str) -> Option<PlayerLifecycle> {
        let active = self.active.as_ref().filter(|a| a.episode_id == episode_id)?;
        Some(if active.loading {
            PlayerLifecycle::Loading
        } else if self.transport.is_playing() {
            PlayerLifecycle::Playing
        } else {
            PlayerLifecycle::Paused
        })
    }

    /// Make `entry` the active item. A different active item is paused and its
    /// position saved first. Playback starts from the saved resume position.
    /// Returns the episode that was active before.
    pub fn activate(
        &mut self,
        db: &Database,
        entry: &QueueEntry,
        item: &PlayerItem,
    ) -> Result<Option<String>, AppError> {
        let previous = self.release(db)?;

        self.transport.load(item);
        if let Some(position) = db.saved_position(&entry.audio_url)? {
            log::debug!("Resuming {} at {:.1}s", entry.episode_id, position);
            self.transport.seek(position);
        }
        self.transport.play();
        db.set_setting(NOW_PLAYING_KEY, &entry.episode_id)?;

        log::info!("Now playing {} ({})", entry.title, entry.episode_id);
        self.active = Some(ActiveItem {
            episode_id: entry.episode_id.clone(),
            resume_key: entry.audio_url.clone(),
            loading: true,
        });
        Ok(previous)
    }

    /// Play/pause the active row, or activate a different one.
    pub fn toggle(
        &mut self,
        db: &Database,
        entry: &QueueEntry,
        item: &PlayerItem,
    ) -> Result<Toggle, AppError> {
        match &self.active {
            Some(active) if active.episode_id == entry.episode_id => {
                if active.loading {
                    return Ok(Toggle::StillLoading);
                }
                if self.transport.is_playing() {
                    self.transport.pause();
                    db.save_position(&entry.audio_url, self.transport.position())?;
                    Ok(Toggle::Paused)
                } else {
                    self.transport.play();
                    Ok(Toggle::Playing)
                }
            }
            _ => Ok(Toggle::Activated {
                previous: self.activate(db, entry, item)?,
            }),
        }
    }

    /// Transport reported ready. Returns true when this ended a loading phase.
    pub fn on_ready(&mut self) -> bool {
        match self.active.as_mut() {
            Some(active) if active.loading => {
                active.loading = false;
                true
            }
            _ => false,
        }
    }

    /// Periodic observer: confirms playback is progressing and persists the
    /// resume position while playing.
    pub fn sample(&mut self, db: &Database) -> Result<Option<Sample>, AppError> {
        let Some(active) = self.active.as_mut() else {
            return Ok(None);
        };
        let position_secs = self.transport.position();
        let playing = self.transport.is_playing();

        let mut became_ready = false;
        if active.loading && (self.transport.is_ready() || (playing && position_secs > 0.0)) {
            active.loading = false;
            became_ready = true;
        }
        if playing && !active.loading {
            db.save_position(&active.resume_key, position_secs)?;
        }

        Ok(Some(Sample {
            episode_id: active.episode_id.clone(),
            position_secs,
            became_ready,
        }))
    }

    /// Pause and forget the active item, saving where it stopped.
    pub fn stop(&mut self, db: &Database) -> Result<Option<String>, AppError> {
        self.release(db)
    }

    /// Drop the active pointer without touching the transport, e.g. when the
    /// item reached its end by itself.
    pub fn clear_active(&mut self) -> Option<String> {
        self.active.take().map(|a| a.episode_id)
    }

    /// Hand the player to another owner.
    pub fn into_transport(self) -> T {
        self.transport
    }

    fn release(&mut self, db: &Database) -> Result<Option<String>, AppError> {
        let Some(previous) = self.active.take() else {
            return Ok(None);
        };
        if self.transport.is_playing() {
            self.transport.pause();
        }
        let position = self.transport.position();
        if position > 0.0 {
            db.save_position(&previous.resume_key, position)?;
        }
        Ok(Some(previous.episode_id))
    }
}

/// Find the queued entry a finished item belongs to, by file name. A local
/// copy and its remote URL share the same name.
pub fn finished_entry<'a, I>(item: &PlayerItem, entries: I) -> Option<&'a QueueEntry>
where
    I: IntoIterator<Item = &'a QueueEntry>,
{
    let name = item.file_name()?;
    entries
        .into_iter()
        .find(|entry| url_file_name(&entry.audio_url).as_deref() == Some(name.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::testing::FakeTransport;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn entry(id: &str) -> QueueEntry {
        QueueEntry {
            episode_id: id.to_string(),
            audio_url: format!("https://cdn.example.com/audio/{}.mp3", id),
            title: format!("Episode {}", id),
            show_id: None,
            show_title: "Test Show".to_string(),
            artwork_url: None,
            duration_secs: 600,
            release_date: None,
            sort_index: 0,
            added_date: String::new(),
        }
    }

    fn remote(e: &QueueEntry) -> PlayerItem {
        PlayerItem::Remote(e.audio_url.clone())
    }

    fn setup() -> (Database, TempDir, PlaybackSession<FakeTransport>) {
        let temp = TempDir::new().unwrap();
        let db = Database::new(&temp.path().join("test.db")).unwrap();
        (db, temp, PlaybackSession::new(FakeTransport::default()))
    }

    #[test]
    fn test_activate_seeks_to_saved_position() {
        let (db, _temp, mut session) = setup();
        let a = entry("a");
        db.save_position(&a.audio_url, 42.0).unwrap();

        assert_eq!(session.activate(&db, &a, &remote(&a)).unwrap(), None);

        let transport = session.transport();
        assert_eq!(transport.loaded, Some(remote(&a)));
        assert_eq!(transport.position, 42.0);
        assert!(transport.playing);
        assert_eq!(session.lifecycle_of("a"), Some(PlayerLifecycle::Loading));
        assert_eq!(db.get_setting(NOW_PLAYING_KEY).unwrap().as_deref(), Some("a"));
    }

    #[test]
    fn test_switching_saves_previous_position() {
        let (db, _temp, mut session) = setup();
        let (a, b) = (entry("a"), entry("b"));
        session.activate(&db, &a, &remote(&a)).unwrap();
        session.on_ready();
        session.transport.position = 120.0;

        let previous = session.activate(&db, &b, &remote(&b)).unwrap();
        assert_eq!(previous.as_deref(), Some("a"));
        assert_eq!(db.saved_position(&a.audio_url).unwrap(), Some(120.0));
        assert_eq!(session.lifecycle_of("a"), None);
        assert_eq!(session.active_episode(), Some("b"));
    }

    #[test]
    fn test_toggle_lifecycle() {
        let (db, _temp, mut session) = setup();
        let a = entry("a");

        assert_eq!(
            session.toggle(&db, &a, &remote(&a)).unwrap(),
            Toggle::Activated { previous: None }
        );
        assert_eq!(session.toggle(&db, &a, &remote(&a)).unwrap(), Toggle::StillLoading);

        assert!(session.on_ready());
        assert!(!session.on_ready());
        assert_eq!(session.lifecycle_of("a"), Some(PlayerLifecycle::Playing));

        assert_eq!(session.toggle(&db, &a, &remote(&a)).unwrap(), Toggle::Paused);
        assert_eq!(session.lifecycle_of("a"), Some(PlayerLifecycle::Paused));
        assert_eq!(session.toggle(&db, &a, &remote(&a)).unwrap(), Toggle::Playing);
    }

    #[test]
    fn test_sample_clears_loading_and_saves_position() {
        let (db, _temp, mut session) = setup();
        let a = entry("a");
        session.activate(&db, &a, &remote(&a)).unwrap();

        // Not progressing yet
        let sample = session.sample(&db).unwrap().unwrap();
        assert!(!sample.became_ready);
        assert!(session.is_loading());

        session.transport.position = 3.0;
        let sample = session.sample(&db).unwrap().unwrap();
        assert!(sample.became_ready);
        assert!(!session.is_loading());
        assert_eq!(db.saved_position(&a.audio_url).unwrap(), Some(3.0));
    }

    #[test]
    fn test_sample_without_active_item() {
        let (db, _temp, mut session) = setup();
        assert!(session.sample(&db).unwrap().is_none());
    }

    #[test]
    fn test_finished_entry_matches_by_file_name() {
        let entries = vec![entry("a"), entry("b")];
        let local = PlayerItem::Local(PathBuf::from("/data/Podcast_Downloads/b.mp3"));
        assert_eq!(
            finished_entry(&local, &entries).map(|e| e.episode_id.as_str()),
            Some("b")
        );

        let unrelated = PlayerItem::Remote("https://elsewhere.example.com/other.mp3".into());
        assert!(finished_entry(&unrelated, &entries).is_none());
    }

    #[test]
    fn test_into_transport_hands_over_player() {
        let (db, _temp, mut session) = setup();
        let a = entry("a");
        session.activate(&db, &a, &remote(&a)).unwrap();
        let transport = session.into_transport();
        assert!(transport.playing);

        let next = PlaybackSession::new(transport);
        assert_eq!(next.active_episode(), None);
    }
}

pub mod models;


use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

pub use models::*;

const ENTRY_COLUMNS: &str = "episode_id, audio_url, title, show_id, show_title, artwork_url,
                             duration_secs, release_date, sort_index, added_date";

/// Persistent queue store. Entries are ordered by `sort_index`, highest first;
/// every mutation is announced to subscribers unless delivery is paused.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    watchers: Mutex<Vec<mpsc::UnboundedSender<StoreChange>>>,
    paused: AtomicBool,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
        ",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            watchers: Mutex::new(Vec::new()),
            paused: AtomicBool::new(false),
        };

        db.init_schema()?;

        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS queue_items (
                episode_id TEXT PRIMARY KEY,
                audio_url TEXT NOT NULL,
                title TEXT NOT NULL,
                show_id TEXT,
                show_title TEXT NOT NULL DEFAULT '',
                artwork_url TEXT,
                duration_secs INTEGER NOT NULL DEFAULT 0,
                release_date TEXT,
                sort_index INTEGER NOT NULL,
                added_date TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_queue_items_sort
                ON queue_items(sort_index DESC);

            -- Playback progress, keyed by the remote audio URL
            CREATE TABLE IF NOT EXISTS listened_to (
                audio_url TEXT PRIMARY KEY,
                position_secs REAL NOT NULL DEFAULT 0,
                is_listened INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- App settings (key-value store)
            CREATE TABLE IF NOT EXISTS app_settings (
                key TEXT PRIMARY KEY,
                value TEXT,
                updated_at TEXT DEFAULT (datetime('now'))
            );
        "#,
        )?;
        Ok(())
    }

    // =========================================================================
    // Change notifications
    // =========================================================================

    /// Register for change notifications. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<StoreChange>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watchers
            .lock()
            .map_err(|_| anyhow!("watcher list lock poisoned"))?
            .push(tx);
        Ok(rx)
    }

    /// Stop delivering notifications until the returned guard is dropped.
    /// Changes made while paused are not replayed.
    pub fn pause_notifications(&self) -> NotificationPause<'_> {
        let was_paused = self.paused.swap(true, Ordering::SeqCst);
        NotificationPause {
            db: self,
            was_paused,
        }
    }

    pub fn notifications_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn notify(&self, change: StoreChange) {
        if self.notifications_paused() {
            log::debug!("Store notification suppressed: {}", change);
            return;
        }
        match self.watchers.lock() {
            Ok(mut watchers) => watchers.retain(|tx| tx.send(change.clone()).is_ok()),
            Err(_) => log::warn!("Dropping store notification, watcher lock poisoned"),
        }
    }

    // =========================================================================
    // Queue entries
    // =========================================================================

    /// Ordered view of the queue, most recently added (highest index) first.
    pub fn list_entries(&self) -> Result<Vec<QueueEntry>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM queue_items ORDER BY sort_index DESC",
            ENTRY_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map([], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn get_entry(&self, episode_id: &str) -> Result<Option<QueueEntry>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM queue_items WHERE episode_id = ?", ENTRY_COLUMNS);
        let entry = conn
            .query_row(&sql, params![episode_id], entry_from_row)
            .optional()?;
        Ok(entry)
    }

    pub fn entry_count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM queue_items", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Add an episode at the head of the queue, or refresh its metadata if it
    /// is already queued. Returns true when a new entry was created.
    pub fn append(&self, episode: &EpisodeInfo) -> Result<bool> {
        let conn = self.conn()?;

        let exists = conn
            .query_row(
                "SELECT 1 FROM queue_items WHERE episode_id = ?",
                params![episode.episode_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        if exists {
            conn.execute(
                "UPDATE queue_items SET
                    audio_url = ?, title = ?, show_id = COALESCE(?, show_id), show_title = ?,
                    artwork_url = COALESCE(?, artwork_url), duration_secs = ?,
                    release_date = COALESCE(?, release_date)
                 WHERE episode_id = ?",
                params![
                    episode.audio_url,
                    episode.title,
                    episode.show_id,
                    episode.show_title,
                    episode.artwork_url,
                    episode.duration_secs,
                    episode.release_date,
                    episode.episode_id
                ],
            )?;
            let position = position_of(&conn, &episode.episode_id)?.unwrap_or(0);
            drop(conn);
            self.notify(StoreChange::Updated {
                episode_id: episode.episode_id.clone(),
                position,
            });
            return Ok(false);
        }

        let next_index: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sort_index), -1) + 1 FROM queue_items",
            [],
            |row| row.get(0),
        )?;
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO queue_items (episode_id, audio_url, title, show_id, show_title, artwork_url,
                                      duration_secs, release_date, sort_index, added_date)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                episode.episode_id,
                episode.audio_url,
                episode.title,
                episode.show_id,
                episode.show_title,
                episode.artwork_url,
                episode.duration_secs,
                episode.release_date,
                next_index,
                now
            ],
        )?;
        drop(conn);

        self.notify(StoreChange::Inserted {
            episode_id: episode.episode_id.clone(),
            position: 0,
        });
        Ok(true)
    }

    /// Remove one entry. Returns false if the episode was not queued.
    pub fn remove(&self, episode_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let Some(position) = position_of(&conn, episode_id)? else {
            return Ok(false);
        };
        conn.execute(
            "DELETE FROM queue_items WHERE episode_id = ?",
            params![episode_id],
        )?;
        drop(conn);

        self.notify(StoreChange::Deleted {
            episode_id: episode_id.to_string(),
            position,
        });
        Ok(true)
    }

    pub fn remove_all(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count = conn.execute("DELETE FROM queue_items", [])?;
        drop(conn);

        if count > 0 {
            log::info!("Cleared {} queue entries", count);
        }
        self.notify(StoreChange::Cleared);
        Ok(count)
    }

    /// Move the entry at view position `from` to view position `to`, shifting
    /// the entries in between. Only the indices inside the affected range are
    /// rewritten, in a single transaction.
    pub fn move_entry(&self, from: usize, to: usize) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let slots: Vec<(String, i64)> = {
            let mut stmt =
                tx.prepare("SELECT episode_id, sort_index FROM queue_items ORDER BY sort_index DESC")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        if from >= slots.len() || to >= slots.len() {
            return Err(anyhow!(
                "move {} -> {} out of range for {} entries",
                from,
                to,
                slots.len()
            ));
        }
        if from == to {
            return Ok(());
        }

        let indices: Vec<i64> = slots.iter().map(|(_, index)| *index).collect();
        let mut ids: Vec<String> = slots.into_iter().map(|(id, _)| id).collect();
        let moved = ids.remove(from);
        ids.insert(to, moved.clone());

        let (lo, hi) = (from.min(to), from.max(to));
        for pos in lo..=hi {
            tx.execute(
                "UPDATE queue_items SET sort_index = ? WHERE episode_id = ?",
                params![indices[pos], ids[pos]],
            )?;
        }
        tx.commit()?;
        drop(conn);

        self.notify(StoreChange::Moved {
            episode_id: moved,
            from,
            to,
        });
        Ok(())
    }

    // =========================================================================
    // Listen records
    // =========================================================================

    pub fn listen_record(&self, audio_url: &str) -> Result<Option<ListenRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT audio_url, position_secs, is_listened, updated_at
                 FROM listened_to WHERE audio_url = ?",
                params![audio_url],
                |row| {
                    Ok(ListenRecord {
                        audio_url: row.get(0)?,
                        position_secs: row.get(1)?,
                        is_listened: row.get::<_, i32>(2)? == 1,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Resume position for an episode, if one was saved.
    pub fn saved_position(&self, audio_url: &str) -> Result<Option<f64>> {
        Ok(self
            .listen_record(audio_url)?
            .map(|record| record.position_secs)
            .filter(|secs| *secs > 0.0))
    }

    pub fn save_position(&self, audio_url: &str, position_secs: f64) -> Result<()> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO listened_to (audio_url, position_secs, is_listened, updated_at)
             VALUES (?, ?, 0, ?)
             ON CONFLICT(audio_url) DO UPDATE SET position_secs = excluded.position_secs,
                                                  updated_at = excluded.updated_at",
            params![audio_url, position_secs.max(0.0), now],
        )?;
        Ok(())
    }

    /// Marking listened keeps the saved position; marking unlistened forgets
    /// the record entirely so the episode starts over.
    pub fn set_listened(&self, audio_url: &str, listened: bool) -> Result<()> {
        let conn = self.conn()?;
        if listened {
            let now = chrono::Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO listened_to (audio_url, position_secs, is_listened, updated_at)
                 VALUES (?, 0, 1, ?)
                 ON CONFLICT(audio_url) DO UPDATE SET is_listened = 1, updated_at = excluded.updated_at",
                params![audio_url, now],
            )?;
        } else {
            conn.execute(
                "DELETE FROM listened_to WHERE audio_url = ?",
                params![audio_url],
            )?;
        }
        Ok(())
    }

    // =========================================================================
    // Settings
    // =========================================================================

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            "SELECT value FROM app_settings WHERE key = ?",
            params![key],
            |row| row.get(0),
        );
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT OR REPLACE INTO app_settings (key, value, updated_at) VALUES (?, ?, ?)",
            params![key, value, now],
        )?;
        Ok(())
    }

    pub fn get_all_settings(&self) -> Result<std::collections::HashMap<String, String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM app_settings")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut settings = std::collections::HashMap::new();
        for row in rows {
            let (key, value) = row?;
            settings.insert(key, value);
        }
        Ok(settings)
    }
}

/// Resumes store notifications when dropped.
pub struct NotificationPause<'a> {
    db: &'a Database,
    was_paused: bool,
}

impl Drop for NotificationPause<'_> {
    fn drop(&mut self) {
        self.db.paused.store(self.was_paused, Ordering::SeqCst);
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<QueueEntry> {
    Ok(QueueEntry {
        episode_id: row.get(0)?,
        audio_url: row.get(1)?,
        title: row.get(2)?,
        show_id: row.get(3)?,
        show_title: row.get(4)?,
        artwork_url: row.get(5)?,
        duration_secs: row.get(6)?,
        release_date: row.get(7)?,
        sort_index: row.get(8)?,
        added_date: row.get(9)?,
    })
}

fn position_of(conn: &Connection, episode_id: &str) -> Result<Option<usize>> {
    let index: Option<i64> = conn
        .query_row(
            "SELECT sort_index FROM queue_items WHERE episode_id = ?",
            params![episode_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(index) = index else {
        return Ok(None);
    };
    let ahead: i64 = conn.query_row(
        "SELECT COUNT(*) FROM queue_items WHERE sort_index > ?",
        params![index],
        |row| row.get(0),
    )?;
    Ok(Some(ahead as usize))
}

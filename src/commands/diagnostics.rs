use crate::config::QueueConfig;
use crate::database::Database;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Recent user-actionable and fatal errors, oldest dropped first
pub struct ErrorLog {
    errors: Mutex<VecDeque<ErrorEntry>>,
    max_entries: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEntry {
    pub timestamp: String,
    pub command: String,
    pub error: String,
    pub context: Option<String>,
}

impl ErrorLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            errors: Mutex::new(VecDeque::new()),
            max_entries,
        }
    }

    pub fn log_error(&self, command: &str, error: &str, context: Option<&str>) {
        let entry = ErrorEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            command: command.to_string(),
            error: error.to_string(),
            context: context.map(|s| s.to_string()),
        };

        log::error!("[{}] {}: {}", entry.timestamp, command, error);

        let Ok(mut errors) = self.errors.lock() else {
            return;
        };
        if errors.len() >= self.max_entries {
            errors.pop_front();
        }
        errors.push_back(entry);
    }

    pub fn get_errors(&self) -> Vec<ErrorEntry> {
        self.errors
            .lock()
            .map(|errors| errors.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.clear();
        }
    }
}

impl Default for ErrorLog {
    fn default() -> Self {
        // Keep last 100 errors
        Self::new(100)
    }
}

#[derive(Debug, Serialize)]
pub struct DiagnosticsReport {
    pub app_version: String,
    pub database_status: String,
    pub database_path: String,
    pub queue_count: usize,
    pub download_dir: String,
    pub download_dir_exists: bool,
    pub now_playing: Option<String>,
    pub recent_errors: Vec<ErrorEntry>,
}

/// Store health and recent errors
pub fn get_diagnostics(
    db: &Database,
    config: &QueueConfig,
    error_log: &ErrorLog,
) -> DiagnosticsReport {
    let (database_status, queue_count) = match db.entry_count() {
        Ok(count) => ("OK".to_string(), count),
        Err(e) => (format!("ERROR: {}", e), 0),
    };

    DiagnosticsReport {
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        database_status,
        database_path: config.database_path.to_string_lossy().to_string(),
        queue_count,
        download_dir: config.download_dir.to_string_lossy().to_string(),
        download_dir_exists: config.download_dir.is_dir(),
        now_playing: db
            .get_setting(crate::worker::transport::NOW_PLAYING_KEY)
            .ok()
            .flatten(),
        recent_errors: error_log.get_errors(),
    }
}

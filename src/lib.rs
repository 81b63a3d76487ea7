pub mod commands;
pub mod config;
pub mod database;
pub mod directory;
pub mod error;
pub mod feeds;
pub mod state;
pub mod worker;

pub use commands::{fetch_new_episodes, ErrorLog};
pub use config::QueueConfig;
pub use database::Database;
pub use error::AppError;
pub use worker::{QueueCommand, QueueEvent, QueueWorker, ViewUpdate};

/// Install the global subscriber. `log` records are forwarded into it.
/// Filter defaults to `episode_queue=info`, overridable with `RUST_LOG`.
pub fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("episode_queue=info"));

    if let Err(e) = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("Logging already initialized: {}", e);
    }
}

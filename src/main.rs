use clap::{Parser, Subcommand};
use episode_queue::commands::get_diagnostics;
use episode_queue::config::{load_env_value, API_TOKEN_KEY};
use episode_queue::directory::HttpDirectory;
use episode_queue::feeds::{LogNotifier, RssFeedReader};
use episode_queue::{fetch_new_episodes, AppError, Database, ErrorLog, QueueConfig};
use std::path::{Path, PathBuf};

/// Command-line arguments for episode-queue
#[derive(Parser, Debug)]
#[command(name = "episode-queue")]
#[command(about = "Podcast episode queue")]
#[command(version)]
struct Cli {
    /// YAML config file
    #[arg(short, long, env = "EPISODE_QUEUE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Print the queue in play order
    List,
    /// Check subscriptions for new episodes and queue them
    Refresh,
    /// Print the diagnostics report as JSON
    Diagnostics,
}

#[tokio::main]
async fn main() {
    episode_queue::init_logging();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        log::error!("{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = QueueConfig::load(&config_path)?;

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::new(&config.database_path)?;

    match cli.command {
        Command::List => list(&db),
        Command::Refresh => refresh(&db, &config, &config_path).await,
        Command::Diagnostics => {
            let report = get_diagnostics(&db, &config, &ErrorLog::default());
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("episode-queue")
        .join("config.yaml")
}

fn list(db: &Database) -> Result<(), AppError> {
    let entries = db.list_entries()?;
    if entries.is_empty() {
        println!("Queue is empty");
        return Ok(());
    }
    for (row, entry) in entries.iter().enumerate() {
        let progress = db
            .listen_record(&entry.audio_url)?
            .map(|record| {
                if record.is_listened {
                    "listened".to_string()
                } else {
                    format!("{}%", record.percent_of(entry.duration_secs))
                }
            })
            .unwrap_or_default();
        println!(
            "{:>3}  {}  [{}]  {}",
            row, entry.title, entry.show_title, progress
        );
    }
    Ok(())
}

async fn refresh(db: &Database, config: &QueueConfig, config_path: &Path) -> Result<(), AppError> {
    let env_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let directory = HttpDirectory::new(
        &config.directory_url,
        config.user_id.clone(),
        config.request_timeout(),
    )
    .with_token(load_env_value(env_dir, API_TOKEN_KEY));
    let feeds = RssFeedReader::new(config.request_timeout());

    let found = fetch_new_episodes(
        db,
        &directory,
        &feeds,
        &LogNotifier,
        config.notify_new_episodes,
    )
    .await?;

    if found {
        println!("New episodes added ({} queued)", db.entry_count()?);
    } else {
        println!("No new episodes");
    }
    Ok(())
}

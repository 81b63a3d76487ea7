use super::QueueEvent;
use crate::error::AppError;
use crate::state::{url_file_name, PlayerItem};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Progress below this step is not reported.
const PROGRESS_STEP: f32 = 0.01;

/// Reported by a transfer task back to the queue worker
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    Progress {
        url: String,
        transfer: u64,
        fraction: f32,
    },
    /// `file` is `None` when the transfer or the move into the download
    /// directory failed.
    Finished {
        url: String,
        transfer: u64,
        file: Option<PathBuf>,
    },
}

struct ActiveDownload {
    episode_id: String,
    transfer: u64,
    cancel: CancellationToken,
    progress: f32,
}

/// Tracks in-flight downloads keyed by source URL and resolves the cached copy
/// of a URL inside the download directory.
pub struct DownloadManager {
    active: HashMap<String, ActiveDownload>,
    download_dir: PathBuf,
    client: reqwest::Client,
    events: mpsc::UnboundedSender<QueueEvent>,
    next_transfer: u64,
}

impl DownloadManager {
    pub fn new(download_dir: PathBuf, events: mpsc::UnboundedSender<QueueEvent>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(600))
            .build()
            .unwrap_or_default();
        Self {
            active: HashMap::new(),
            download_dir,
            client,
            events,
            next_transfer: 0,
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn is_active(&self, url: &str) -> bool {
        self.active.contains_key(url)
    }

    /// Begin streaming `url` into the download directory. At most one transfer
    /// per URL may be in flight.
    pub fn start(&mut self, url: &str, episode_id: &str) -> Result<(), AppError> {
        if self.active.contains_key(url) {
            return Err(AppError::Download(format!("Already downloading {}", url)));
        }

        let (transfer, cancel) = self.register(url, episode_id);

        let span = tracing::info_span!("download", %url, episode_id);
        tokio::spawn(
            transfer_task(
                self.client.clone(),
                url.to_string(),
                transfer,
                self.download_dir.clone(),
                self.events.clone(),
                cancel,
            )
            .instrument(span),
        );
        log::info!("Download started for {} ({})", episode_id, url);
        Ok(())
    }

    pub(crate) fn register(&mut self, url: &str, episode_id: &str) -> (u64, CancellationToken) {
        self.next_transfer += 1;
        let cancel = CancellationToken::new();
        self.active.insert(
            url.to_string(),
            ActiveDownload {
                episode_id: episode_id.to_string(),
                transfer: self.next_transfer,
                cancel: cancel.clone(),
                progress: 0.0,
            },
        );
        (self.next_transfer, cancel)
    }

    /// Stop a transfer. Returns the episode it belonged to.
    pub fn cancel(&mut self, url: &str) -> Option<String> {
        let download = self.active.remove(url)?;
        download.cancel.cancel();
        log::info!("Download cancelled for {}", download.episode_id);
        Some(download.episode_id)
    }

    pub fn cancel_all(&mut self) {
        for (_, download) in self.active.drain() {
            download.cancel.cancel();
        }
    }

    /// Record progress. Returns the episode and fraction to show, or `None`
    /// when the event is from an inactive transfer or would move backwards.
    pub fn progress(&mut self, url: &str, transfer: u64, fraction: f32) -> Option<(String, f32)> {
        let download = self.active.get_mut(url)?;
        if download.transfer != transfer {
            return None;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        if fraction < download.progress {
            return None;
        }
        download.progress = fraction;
        Some((download.episode_id.clone(), fraction))
    }

    /// Close out a transfer. Each transfer finishes at most once.
    pub fn finish(&mut self, url: &str, transfer: u64) -> Option<String> {
        match self.active.get(url) {
            Some(download) if download.transfer == transfer => {}
            _ => return None,
        }
        self.active.remove(url).map(|d| d.episode_id)
    }

    /// Where the cached copy of `url` lives, if it has a usable file name.
    pub fn cached_path(&self, url: &str) -> Option<PathBuf> {
        url_file_name(url).map(|name| self.download_dir.join(name))
    }

    /// Local copy when one exists, else the remote URL.
    pub fn resolve(&self, url: &str) -> PlayerItem {
        match self.cached_path(url) {
            Some(path) if path.is_file() => PlayerItem::Local(path),
            _ => PlayerItem::Remote(url.to_string()),
        }
    }

    /// Delete the cached copy of `url`. A copy that is already gone is fine.
    pub async fn remove_cached(&self, url: &str) -> Result<(), AppError> {
        let path = self
            .cached_path(url)
            .ok_or_else(|| AppError::Download(format!("No file name in {}", url)))?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                log::info!("Removed cached file {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for DownloadManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

async fn transfer_task(
    client: reqwest::Client,
    url: String,
    transfer: u64,
    download_dir: PathBuf,
    events: mpsc::UnboundedSender<QueueEvent>,
    cancel: CancellationToken,
) {
    let temp = download_dir.join(format!(".{}.part", uuid::Uuid::new_v4()));

    let result = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = tokio::fs::remove_file(&temp).await;
            log::debug!("Transfer {} stopped by cancel", transfer);
            return;
        }
        result = stream_to_file(&client, &url, transfer, &temp, &download_dir, &events) => result,
    };

    let file = match result {
        Ok(bytes) => {
            log::info!("Download complete: {} bytes", bytes);
            keep_unless_cancelled(&temp, &download_dir, &url, &cancel).await
        }
        Err(e) => {
            log::warn!("Download of {} failed: {}", url, e);
            None
        }
    };
    if file.is_none() {
        let _ = tokio::fs::remove_file(&temp).await;
    }

    let _ = events.send(QueueEvent::Download(DownloadEvent::Finished {
        url,
        transfer,
        file,
    }));
}

/// Single streaming attempt; writes into `temp` and reports progress.
async fn stream_to_file(
    client: &reqwest::Client,
    url: &str,
    transfer: u64,
    temp: &Path,
    download_dir: &Path,
    events: &mpsc::UnboundedSender<QueueEvent>,
) -> Result<u64, AppError> {
    tokio::fs::create_dir_all(download_dir).await?;

    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(AppError::Download(format!(
            "Download failed with status: {}",
            response.status()
        )));
    }

    let content_length = response.content_length().filter(|len| *len > 0);
    let mut stream = response.bytes_stream();
    let mut file = tokio::fs::File::create(temp).await?;
    let mut downloaded: u64 = 0;
    let mut reported: f32 = 0.0;

    let _ = events.send(QueueEvent::Download(DownloadEvent::Progress {
        url: url.to_string(),
        transfer,
        fraction: 0.0,
    }));

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;

        if let Some(expected) = content_length {
            let fraction = (downloaded as f64 / expected as f64).min(1.0) as f32;
            if fraction - reported >= PROGRESS_STEP || (fraction >= 1.0 && reported < 1.0) {
                reported = fraction;
                let _ = events.send(QueueEvent::Download(DownloadEvent::Progress {
                    url: url.to_string(),
                    transfer,
                    fraction,
                }));
            }
        }
    }
    file.flush().await?;

    if let Some(expected) = content_length {
        if downloaded != expected {
            return Err(AppError::Download(format!(
                "Download incomplete: got {} bytes, expected {}",
                downloaded, expected
            )));
        }
    }
    Ok(downloaded)
}

/// Move a finished payload into the download directory under the URL's file
/// name. Any filesystem failure yields `None`.
pub async fn persist_payload(temp: &Path, download_dir: &Path, url: &str) -> Option<PathBuf> {
    let Some(name) = url_file_name(url) else {
        log::warn!("No file name in {}", url);
        return None;
    };
    if let Err(e) = tokio::fs::create_dir_all(download_dir).await {
        log::warn!("Failed to create {:?}: {}", download_dir, e);
        return None;
    }
    let target = download_dir.join(name);
    match tokio::fs::rename(temp, &target).await {
        Ok(()) => Some(target),
        Err(e) => {
            log::warn!("Failed to move download into {:?}: {}", target, e);
            None
        }
    }
}

/// Persist a finished payload, then drop it again if the transfer was
/// cancelled meanwhile.
async fn keep_unless_cancelled(
    temp: &Path,
    download_dir: &Path,
    url: &str,
    cancel: &CancellationToken,
) -> Option<PathBuf> {
    let target = persist_payload(temp, download_dir, url).await?;
    if cancel.is_cancelled() {
        log::debug!("Cancelled after transfer, removing {:?}", target);
        if let Err(e) = tokio::fs::remove_file(&target).await {
            log::warn!("Failed to remove {:?}: {}", target, e);
        }
        return None;
    }
    Some(target)
}

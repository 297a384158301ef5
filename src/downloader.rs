use crate::error::FetchError;
use crate::retry::RetryingClient;
use crate::transport::{HttpResponse, RequestOptions};
use crate::types::{DownloadOutcome, DownloadState};
use crate::validate::validate_response;
use futures_util::StreamExt;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{debug, error, info};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, REFERER};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;

const SPREADSHEET_ACCEPT: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet,application/vnd.ms-excel,*/*";

/// Request options for HEAD checks and file downloads.
pub fn spreadsheet_request(referer: &str, timeout: std::time::Duration) -> RequestOptions {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(SPREADSHEET_ACCEPT));
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    if !referer.is_empty() {
        if let Ok(referer) = HeaderValue::from_str(referer) {
            headers.insert(REFERER, referer);
        }
    }
    RequestOptions {
        headers,
        timeout: Some(timeout),
    }
}

/// Runs one download attempt through HEAD check, streamed GET and size check.
pub struct Downloader {
    client: Arc<RetryingClient>,
    output_dir: PathBuf,
    progress: Option<MultiProgress>,
}

impl Downloader {
    pub fn new(client: Arc<RetryingClient>, output_dir: PathBuf, show_progress: bool) -> Self {
        Self {
            client,
            output_dir,
            progress: show_progress.then(MultiProgress::new),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Download `url` into `<output_dir>/<filename>`.
    ///
    /// Never returns an error: every failure becomes a failed outcome, and a
    /// failed outcome never leaves a file behind.
    pub async fn download(&self, url: &str, filename: &str, referer: &str) -> DownloadOutcome {
        let start_time = Instant::now();
        let path = self.output_dir.join(filename);
        let pb = self.create_progress_bar(filename);
        info!("Starting download: {} -> {}", url, path.display());

        let mut state = DownloadState::Idle;
        let result = self.run(url, &path, referer, &pb, &mut state).await;

        let duration = start_time.elapsed();
        match result {
            Ok(size) => {
                pb.finish_with_message(format!("{} ({:.1} KB)", filename, size as f64 / 1024.0));
                info!("Downloaded: {} ({:.1} KB)", filename, size as f64 / 1024.0);
                DownloadOutcome {
                    success: true,
                    filename: filename.to_string(),
                    path,
                    file_size: size,
                    error: None,
                    url: url.to_string(),
                    last_state: DownloadState::Succeeded,
                    duration,
                }
            }
            Err(e) => {
                let error_msg = e.to_string();
                error!("Download failed for {} during {:?}: {}", url, state, error_msg);
                pb.abandon_with_message(format!("{} failed", filename));
                DownloadOutcome {
                    success: false,
                    filename: filename.to_string(),
                    path,
                    file_size: 0,
                    error: Some(error_msg),
                    url: url.to_string(),
                    last_state: state,
                    duration,
                }
            }
        }
    }

    fn transition(url: &str, state: &mut DownloadState, next: DownloadState) {
        debug_assert!(!state.is_terminal(), "{:?} is terminal", state);
        debug!("{}: {:?} -> {:?}", url, state, next);
        *state = next;
    }

    async fn run(
        &self,
        url: &str,
        path: &Path,
        referer: &str,
        pb: &ProgressBar,
        state: &mut DownloadState,
    ) -> Result<u64, FetchError> {
        let config = self.client.config();
        let options = spreadsheet_request(referer, config.timeout());

        Self::transition(url, state, DownloadState::HeadValidating);
        let head = self.client.head(url, &options).await.map_err(|e| match e {
            e if e.is_no_response() => FetchError::HeadersUnavailable(Box::new(e)),
            e => e,
        })?;
        debug!(
            "HEAD {}: status={} type={} length={:?}",
            url,
            head.status,
            head.content_type(),
            head.content_length()
        );
        validate_response(&head, config.min_file_size)?;

        sleep(config.jittered(config.pre_download_delay)).await;

        Self::transition(url, state, DownloadState::Downloading);
        let options = spreadsheet_request(referer, config.download_timeout());
        let resp = self.client.get(url, &options).await.map_err(|e| match e {
            e if e.is_no_response() => FetchError::DownloadUnavailable(Box::new(e)),
            e => e,
        })?;
        validate_response(&resp, config.min_file_size)?;

        if let Err(e) = self.stream_to_file(resp, path, pb).await {
            remove_quietly(path).await;
            return Err(e);
        }

        Self::transition(url, state, DownloadState::Verifying);
        let size = tokio::fs::metadata(path).await?.len();
        if size < config.min_file_size {
            debug!("{} is only {} bytes: {:?}", path.display(), size, preview(path).await);
            remove_quietly(path).await;
            return Err(FetchError::TruncatedDownload {
                size,
                minimum: config.min_file_size,
            });
        }

        Ok(size)
    }

    async fn stream_to_file(&self, resp: HttpResponse, path: &Path, pb: &ProgressBar) -> Result<u64, FetchError> {
        let rate_limit = self.client.config().max_bytes_per_sec;
        pb.set_length(resp.content_length().unwrap_or(0));

        let mut file = File::create(path).await?;
        let mut stream = resp.into_body();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::Stream(e.to_string()))?;

            if let Some(rate_limit) = rate_limit {
                let delay = std::time::Duration::from_secs_f64(chunk.len() as f64 / rate_limit as f64);
                sleep(delay).await;
            }

            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            pb.set_position(downloaded);
        }

        file.flush().await?;
        Ok(downloaded)
    }

    fn create_progress_bar(&self, filename: &str) -> ProgressBar {
        let Some(multi) = &self.progress else {
            return ProgressBar::hidden();
        };
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        let pb = multi.add(ProgressBar::new(0));
        pb.set_style(style);
        pb.set_message(filename.to_string());
        pb
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            error!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// First bytes of a rejected file, for the debug log.
async fn preview(path: &Path) -> String {
    match tokio::fs::read(path).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes[..bytes.len().min(50)]).into_owned(),
        Err(_) => String::new(),
    }
}

//! Session controller: pages in order, files in order, one at a time.

use crate::config::FetcherConfig;
use crate::downloader::{spreadsheet_request, Downloader};
use crate::error::{DownloaderError, FetchError};
use crate::filename::{ensure_unique_filename, resolve_filename};
use crate::links::discover_links;
use crate::retry::RetryingClient;
use crate::transport::{RequestOptions, Transport};
use crate::types::{DatasetOutcome, DiscoveredLink, FetchTarget, SessionStats, SessionSummary};
use log::{error, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;

const PAGE_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
pub const STATS_FILE: &str = "download_stats.csv";

pub struct Session {
    client: Arc<RetryingClient>,
    downloader: Downloader,
}

impl Session {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: FetcherConfig,
        output_dir: PathBuf,
        show_progress: bool,
    ) -> Result<Self, DownloaderError> {
        config.validate()?;
        std::fs::create_dir_all(&output_dir)?;
        let client = Arc::new(RetryingClient::new(transport, config));
        let downloader = Downloader::new(client.clone(), output_dir, show_progress);
        Ok(Self { client, downloader })
    }

    fn config(&self) -> &FetcherConfig {
        self.client.config()
    }

    pub fn output_dir(&self) -> &Path {
        self.downloader.output_dir()
    }

    /// Process every target in order and write the stats CSV.
    pub async fn run(&self, targets: &[FetchTarget]) -> SessionSummary {
        let start_time = Instant::now();
        let mut stats = SessionStats::default();
        let mut datasets = Vec::with_capacity(targets.len());

        info!("Processing {} URL(s) into {}", targets.len(), self.output_dir().display());

        for (i, target) in targets.iter().enumerate() {
            info!(
                "Processing URL {}/{}: {} ({})",
                i + 1,
                targets.len(),
                target.dataset_name,
                target.url
            );

            let dataset = self.process_target(target, &mut stats).await;
            stats.record_page(&dataset);
            datasets.push(dataset);

            if i + 1 < targets.len() {
                let delay = self.config().jittered(self.config().delay_between_urls);
                info!("Waiting {:.1?} before next URL", delay);
                sleep(delay).await;
            }
        }

        let summary = SessionSummary {
            datasets,
            stats,
            total_duration: start_time.elapsed(),
        };

        if let Err(e) = write_stats_csv(&summary, self.output_dir()) {
            error!("Failed to write stats CSV: {}", e);
        }

        summary
    }

    /// Discover and download every spreadsheet on one page.
    pub async fn process_target(&self, target: &FetchTarget, stats: &mut SessionStats) -> DatasetOutcome {
        let mut dataset = DatasetOutcome::new(target);

        let html = match self.fetch_page(&target.url).await {
            Ok(html) => html,
            Err(e) => {
                let msg = format!("Error processing URL {}: {}", target.url, e);
                error!("{}", msg);
                dataset.errors.push(msg.clone());
                stats.errors.push(msg);
                return dataset;
            }
        };

        let base_url = self.base_url_for(&target.url);
        let links: Vec<DiscoveredLink> = discover_links(&html, &base_url)
            .into_iter()
            .enumerate()
            .map(|(i, url)| DiscoveredLink { url, index: i + 1 })
            .collect();
        dataset.files_found = links.len();

        if links.is_empty() {
            let msg = "No spreadsheet files found on this page".to_string();
            warn!("{}: {}", target.url, msg);
            dataset.errors.push(msg);
            return dataset;
        }

        info!("Found {} spreadsheet(s) for dataset {}", links.len(), target.dataset_name);

        let referer = format!("{}/", base_url.trim_end_matches('/'));
        let head_options = spreadsheet_request(&referer, self.config().timeout());

        for link in &links {
            let name = resolve_filename(&self.client, &head_options, &link.url, &target.dataset_name, link.index).await;
            let name = ensure_unique_filename(self.output_dir(), &name);
            info!("Downloading file {}/{}: {}", link.index, links.len(), name);

            let outcome = self.downloader.download(&link.url, &name, &referer).await;
            stats.record_download(&outcome);
            dataset.record(outcome);

            if link.index < links.len() {
                sleep(self.config().jittered(self.config().delay_between_files)).await;
            }
        }

        dataset
    }

    async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(PAGE_ACCEPT));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-GB,en;q=0.9"));
        let options = RequestOptions {
            headers,
            timeout: Some(self.config().timeout()),
        };

        let resp = self.client.get(url, &options).await?;
        let html = resp.text().await.map_err(|e| FetchError::Stream(e.to_string()))?;
        info!("Fetched {} ({} bytes)", url, html.len());
        Ok(html)
    }

    /// Configured site origin, or the origin of the page itself.
    fn base_url_for(&self, page_url: &str) -> String {
        if let Some(base) = &self.config().base_url {
            return base.clone();
        }
        match url::Url::parse(page_url) {
            Ok(parsed) => parsed.origin().ascii_serialization(),
            Err(_) => page_url.to_string(),
        }
    }
}

pub fn write_stats_csv(summary: &SessionSummary, output_dir: &Path) -> Result<(), DownloaderError> {
    std::fs::create_dir_all(output_dir)?;

    let stats_path = output_dir.join(STATS_FILE);
    let mut wtr = csv::WriterBuilder::new().from_path(stats_path)?;

    wtr.write_record([
        "Dataset",
        "Filename",
        "Status",
        "Size (KB)",
        "Duration (s)",
        "URL",
        "Error",
    ])?;

    for dataset in &summary.datasets {
        for report in &dataset.downloads {
            wtr.write_record(&[
                dataset.dataset_name.clone(),
                report.filename.clone(),
                if report.success { "Success" } else { "Failed" }.to_string(),
                format!("{:.1}", report.file_size as f64 / 1024.0),
                format!("{:.2}", report.duration.as_secs_f64()),
                report.url.clone(),
                report.error.clone().unwrap_or_default(),
            ])?;
        }
    }

    wtr.flush()?;
    Ok(())
}

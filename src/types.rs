use std::path::PathBuf;
use std::time::Duration;

use crate::parser::extract_dataset_name;

#[derive(Debug, Clone, PartialEq)]
pub struct FetchTarget {
    pub url: String,
    pub dataset_name: String,
}

impl FetchTarget {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let dataset_name = extract_dataset_name(&url);
        Self { url, dataset_name }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredLink {
    pub url: String,
    /// 1-based position in discovery order.
    pub index: usize,
}

/// Where a single download attempt is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Idle,
    HeadValidating,
    Downloading,
    Verifying,
    Succeeded,
    Failed,
}

impl DownloadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DownloadState::Succeeded | DownloadState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadOutcome {
    pub success: bool,
    pub filename: String,
    pub path: PathBuf,
    pub file_size: u64,
    pub error: Option<String>,
    pub url: String,
    /// `Succeeded`, or the stage the attempt was in when it failed.
    pub last_state: DownloadState,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetOutcome {
    pub url: String,
    pub dataset_name: String,
    pub files_found: usize,
    pub files_downloaded: usize,
    pub downloads: Vec<DownloadOutcome>,
    pub errors: Vec<String>,
}

impl DatasetOutcome {
    pub fn new(target: &FetchTarget) -> Self {
        Self {
            url: target.url.clone(),
            dataset_name: target.dataset_name.clone(),
            files_found: 0,
            files_downloaded: 0,
            downloads: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Record a finished download, keeping `files_downloaded` in step with the outcomes.
    pub fn record(&mut self, outcome: DownloadOutcome) {
        if outcome.success {
            self.files_downloaded += 1;
        } else {
            self.errors.push(format!(
                "Failed to download {} ({}): {}",
                outcome.filename,
                outcome.url,
                outcome.error.as_deref().unwrap_or("unknown error")
            ));
        }
        self.downloads.push(outcome);
    }

    pub fn success_rate(&self) -> f64 {
        if self.files_found == 0 {
            return 0.0;
        }
        self.files_downloaded as f64 / self.files_found as f64 * 100.0
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.downloads
            .iter()
            .filter(|d| d.success)
            .map(|d| d.file_size)
            .sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    pub urls_processed: usize,
    pub files_found: usize,
    pub files_downloaded: usize,
    pub total_bytes: u64,
    pub errors: Vec<String>,
}

impl SessionStats {
    pub fn record_download(&mut self, outcome: &DownloadOutcome) {
        if outcome.success {
            self.files_downloaded += 1;
            self.total_bytes += outcome.file_size;
        } else if let Some(error) = &outcome.error {
            self.errors.push(format!("{}: {}", outcome.url, error));
        }
    }

    pub fn record_page(&mut self, dataset: &DatasetOutcome) {
        self.urls_processed += 1;
        self.files_found += dataset.files_found;
    }
}

#[derive(Debug)]
pub struct SessionSummary {
    pub datasets: Vec<DatasetOutcome>,
    pub stats: SessionStats,
    pub total_duration: Duration,
}

impl SessionSummary {
    pub fn failed_downloads(&self) -> usize {
        self.stats.files_found.saturating_sub(self.stats.files_downloaded)
    }
}

/// A spreadsheet already sitting in the download directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingFile {
    pub name: String,
    pub size: u64,
    pub path: PathBuf,
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DownloaderError {
    #[error("Failed to parse targets file: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Cleaning failed: {0}")]
    CleaningError(String),

    #[error("Unreadable workbook: {0}")]
    WorkbookError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Per-request and per-file failures. These never escape the orchestrator;
/// they end up as the error detail of a failed outcome.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("rate limited (HTTP 429) on {url} after {attempts} attempts")]
    RateLimitExhausted { url: String, attempts: u32 },

    #[error("request to {url} failed after {attempts} attempts: {reason}")]
    RequestFailed {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("HTTP error: {status} for URL: {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("response is HTML/text instead of a spreadsheet (Content-Type: {content_type})")]
    NotASpreadsheet { content_type: String },

    #[error("file too small ({size} bytes) - likely an error page")]
    SuspiciouslySmall { size: u64 },

    #[error("downloaded file too small ({size} bytes, minimum {minimum})")]
    TruncatedDownload { size: u64, minimum: u64 },

    #[error("headers unavailable after retries: {0}")]
    HeadersUnavailable(Box<FetchError>),

    #[error("download unavailable after retries: {0}")]
    DownloadUnavailable(Box<FetchError>),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl FetchError {
    /// True when the request layer gave up without ever producing a response.
    pub fn is_no_response(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimitExhausted { .. } | FetchError::RequestFailed { .. }
        )
    }
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        FetchError::Io(e.to_string())
    }
}

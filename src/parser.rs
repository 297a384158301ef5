use crate::error::DownloaderError;
use crate::types::FetchTarget;
use csv::ReaderBuilder;
use log::debug;
use regex::Regex;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use url::Url;

const FALLBACK_DATASET: &str = "ONS_DATASET";

/// Reads page URLs from a targets file.
///
/// One target per line; only the first tab-separated column is used so an
/// annotated TSV works too. Blank lines and `#` comments are skipped.
pub async fn parse_targets(path: &Path) -> Result<Vec<FetchTarget>, DownloaderError> {
    let mut file = File::open(path).await?;

    let mut contents = String::new();
    file.read_to_string(&mut contents).await?;

    parse_targets_str(&contents)
}

pub fn parse_targets_str(contents: &str) -> Result<Vec<FetchTarget>, DownloaderError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(contents.as_bytes());

    let mut targets = Vec::new();

    for (line, result) in reader.records().enumerate() {
        let record = result.map_err(|e| DownloaderError::ParseError(e.to_string()))?;
        let url = record.get(0).unwrap_or("").trim();
        if url.is_empty() {
            continue;
        }
        if let Err(reason) = check_target_url(url) {
            return Err(DownloaderError::ParseError(format!("record {}: {}", line + 1, reason)));
        }

        let target = FetchTarget::new(url);
        debug!("Parsed target: {:?}", target);
        targets.push(target);
    }

    Ok(targets)
}

/// Accepts only absolute http(s) URLs with a host.
pub fn check_target_url(url: &str) -> Result<(), String> {
    let parsed = Url::parse(url).map_err(|e| format!("'{}' is not a valid URL ({})", url, e))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(format!("'{}' is not an http(s) URL", url));
    }
    Ok(())
}

/// Targets given directly on the command line.
pub fn parse_target_urls(urls: &[String]) -> Result<Vec<FetchTarget>, DownloaderError> {
    urls.iter()
        .map(|url| {
            let url = url.trim();
            check_target_url(url).map_err(DownloaderError::ParseError)?;
            Ok(FetchTarget::new(url))
        })
        .collect()
}

/// Short dataset code from a `/datasets/<segment>` URL, e.g. `VACS01`.
///
/// Takes the leading letters+digits run of the segment; otherwise the part
/// before the first `_` or `-`, capped at 10 characters.
pub fn extract_dataset_name(url: &str) -> String {
    let Ok(segment_re) = Regex::new(r"/datasets/([^/]+)") else {
        return FALLBACK_DATASET.to_string();
    };
    let Some(segment) = segment_re.captures(url).and_then(|c| c.get(1)) else {
        return FALLBACK_DATASET.to_string();
    };
    let segment = segment.as_str();

    if let Ok(ident_re) = Regex::new(r"^([a-zA-Z]+\d+)") {
        if let Some(ident) = ident_re.captures(segment).and_then(|c| c.get(1)) {
            return ident.as_str().to_uppercase();
        }
    }

    let head = segment
        .split('_')
        .next()
        .unwrap_or("")
        .split('-')
        .next()
        .unwrap_or("");
    let name: String = head.to_uppercase().chars().take(10).collect();
    if name.is_empty() {
        FALLBACK_DATASET.to_string()
    } else {
        name
    }
}

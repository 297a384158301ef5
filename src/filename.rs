//! Local filename resolution for discovered links.

use log::debug;
use std::path::Path;

use crate::links::{has_spreadsheet_extension, spreadsheet_path};
use crate::retry::RetryingClient;
use crate::transport::RequestOptions;

/// Last component of a `/`- or `\`-separated path, if non-empty.
fn basename(path: &str) -> Option<&str> {
    path.rsplit(['/', '\\']).next().filter(|name| !name.is_empty())
}

/// Spreadsheet basename carried by the URL itself, in its path or a
/// `uri=`-style query value.
pub fn filename_from_url(url: &str) -> Option<String> {
    let path = match url::Url::parse(url) {
        Ok(parsed) if has_spreadsheet_extension(parsed.path()) => parsed.path().to_string(),
        Ok(parsed) => spreadsheet_path(&format!("?{}", parsed.query().unwrap_or("")))?.to_string(),
        Err(_) => spreadsheet_path(url)?.to_string(),
    };
    basename(&path)
        .filter(|name| has_spreadsheet_extension(name))
        .map(str::to_string)
}

/// `filename=` value from a `Content-Disposition` header, stripped of quotes
/// and any directory components.
pub fn filename_from_disposition(header: &str) -> Option<String> {
    let start = header.find("filename=")? + "filename=".len();
    let value = header[start..].split(';').next()?.trim();
    let value = value.trim_matches(|c| c == '"' || c == '\'');
    basename(value)
        .filter(|name| has_spreadsheet_extension(name))
        .map(str::to_string)
}

pub fn fallback_filename(dataset_name: &str, index: usize) -> String {
    format!("{}_file_{}.xlsx", dataset_name.to_lowercase(), index)
}

/// Picks a filename for `url`: URL basename, then `Content-Disposition`
/// from a HEAD request, then a synthesized `<dataset>_file_<index>.xlsx`.
pub async fn resolve_filename(
    client: &RetryingClient,
    options: &RequestOptions,
    url: &str,
    dataset_name: &str,
    index: usize,
) -> String {
    if let Some(name) = filename_from_url(url) {
        return name;
    }

    match client.head(url, options).await {
        Ok(resp) => {
            if let Some(name) = resp.content_disposition().and_then(filename_from_disposition) {
                return name;
            }
        }
        Err(e) => debug!("No Content-Disposition for {}: {}", url, e),
    }

    fallback_filename(dataset_name, index)
}

/// First free name among `name`, `stem_1.ext`, `stem_2.ext`, ... in `dir`.
pub fn ensure_unique_filename(dir: &Path, name: &str) -> String {
    if !dir.join(name).exists() {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    };

    let mut counter = 1;
    loop {
        let candidate = format!("{}_{}{}", stem, counter, ext);
        if !dir.join(&candidate).exists() {
            return candidate;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetcherConfig;
    use crate::retry::testing::{Reply, ScriptedTransport};
    use reqwest::Method;
    use std::sync::Arc;

    fn client(transport: ScriptedTransport) -> RetryingClient {
        RetryingClient::new(
            Arc::new(transport),
            FetcherConfig {
                max_retries: 0,
                retry_delay: 0.0,
                ..FetcherConfig::default()
            },
        )
    }

    #[test]
    fn url_basename_wins() {
        assert_eq!(
            filename_from_url("https://www.ons.gov.uk/data/vacs01aug2025.xlsx"),
            Some("vacs01aug2025.xlsx".to_string())
        );
        assert_eq!(
            filename_from_url("https://www.ons.gov.uk/file?uri=/employment/datasets/vacs01/current/vacs01.xls"),
            Some("vacs01.xls".to_string())
        );
        assert_eq!(filename_from_url("https://www.ons.gov.uk/download?id=12"), None);
    }

    #[test]
    fn disposition_parsing() {
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="x06.xlsx""#),
            Some("x06.xlsx".to_string())
        );
        assert_eq!(
            filename_from_disposition("attachment; filename=jobs03.xls; size=100"),
            Some("jobs03.xls".to_string())
        );
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="../../etc/evil.xlsx""#),
            Some("evil.xlsx".to_string())
        );
        assert_eq!(filename_from_disposition(r#"attachment; filename="report.pdf""#), None);
        assert_eq!(filename_from_disposition("inline"), None);
    }

    #[test]
    fn unique_names_take_numeric_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let first = ensure_unique_filename(dir.path(), "vacs01.xlsx");
        assert_eq!(first, "vacs01.xlsx");
        std::fs::write(dir.path().join(&first), b"x").unwrap();

        let second = ensure_unique_filename(dir.path(), "vacs01.xlsx");
        assert_eq!(second, "vacs01_1.xlsx");
        std::fs::write(dir.path().join(&second), b"x").unwrap();

        assert_eq!(ensure_unique_filename(dir.path(), "vacs01.xlsx"), "vacs01_2.xlsx");
    }

    #[test]
    fn unique_name_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data"), b"x").unwrap();
        assert_eq!(ensure_unique_filename(dir.path(), "data"), "data_1");
    }

    #[tokio::test]
    async fn resolution_is_stable_for_an_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(ScriptedTransport::new());
        let url = "https://www.ons.gov.uk/data/x06.xlsx";
        let a = resolve_filename(&client, &RequestOptions::default(), url, "X06", 1).await;
        let b = resolve_filename(&client, &RequestOptions::default(), url, "X06", 1).await;
        assert_eq!(a, b);
        assert_eq!(ensure_unique_filename(dir.path(), &a), "x06.xlsx");
    }

    #[tokio::test]
    async fn content_disposition_used_when_url_has_no_name() {
        let url = "https://www.ons.gov.uk/download?id=7";
        let transport = ScriptedTransport::new().on(
            Method::HEAD,
            url,
            vec![Reply::Response {
                status: 200,
                headers: vec![("content-disposition", r#"attachment; filename="vacs02.xlsx""#.to_string())],
                body: Vec::new(),
            }],
        );
        let name = resolve_filename(&client(transport), &RequestOptions::default(), url, "VACS02", 3).await;
        assert_eq!(name, "vacs02.xlsx");
    }

    #[tokio::test]
    async fn falls_back_to_synthesized_name() {
        let url = "https://www.ons.gov.uk/download?id=9";
        let transport = ScriptedTransport::new().on(Method::HEAD, url, vec![Reply::Status(500)]);
        let name = resolve_filename(&client(transport), &RequestOptions::default(), url, "VACS03", 2).await;
        assert_eq!(name, "vacs03_file_2.xlsx");
    }
}

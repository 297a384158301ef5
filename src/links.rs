//! Spreadsheet link discovery.

use scraper::{Html, Selector};
use std::collections::HashSet;

pub const SPREADSHEET_EXTENSIONS: [&str; 2] = [".xlsx", ".xls"];

/// True when `name` (a path or bare filename) ends in a spreadsheet extension.
pub fn has_spreadsheet_extension(name: &str) -> bool {
    let lower = name.to_lowercase();
    SPREADSHEET_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// The part of `href` that names a spreadsheet: its path, or failing that a
/// query value such as `/file?uri=/path/vacs01.xlsx`. Fragments are ignored.
pub fn spreadsheet_path(href: &str) -> Option<&str> {
    let href = href.split('#').next().unwrap_or("");
    let (path, query) = match href.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (href, None),
    };
    if has_spreadsheet_extension(path) {
        return Some(path);
    }
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('=').map(|(_, value)| value))
        .find(|value| has_spreadsheet_extension(value))
}

/// Make `href` absolute against the site `base_url`.
pub fn resolve_href(base_url: &str, href: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if href.starts_with("http") {
        href.to_string()
    } else if href.starts_with('/') {
        format!("{}{}", base, href)
    } else {
        format!("{}/{}", base, href.trim_start_matches('/'))
    }
}

/// Every anchor on the page whose href points at a spreadsheet, made absolute
/// and deduplicated in document order.
pub fn discover_links(html: &str, base_url: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(anchor) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&anchor) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty() || spreadsheet_path(href).is_none() {
            continue;
        }

        let url = resolve_href(base_url, href);
        if seen.insert(url.clone()) {
            links.push(url);
        }
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://www.ons.gov.uk";

    #[test]
    fn resolves_all_href_forms() {
        let html = r#"
            <a href="/file?uri=/data/vacs01.xlsx">relative</a>
            <a href="data/x06.xls">bare</a>
            <a href="https://cdn.example.com/jobs03.xlsx">absolute</a>
        "#;
        let links = discover_links(html, BASE);
        assert_eq!(
            links,
            vec![
                "https://www.ons.gov.uk/file?uri=/data/vacs01.xlsx".to_string(),
                "https://www.ons.gov.uk/data/x06.xls".to_string(),
                "https://cdn.example.com/jobs03.xlsx".to_string(),
            ]
        );
    }

    #[test]
    fn query_strings_and_fragments_are_ignored_for_matching() {
        let html = r##"
            <a href="/files/vacs01.xlsx?version=2">versioned</a>
            <a href="/files/vacs02.XLS#top">upper</a>
            <a href="/files/readme.pdf?f=a.xlsx.bak">not a sheet</a>
            <a href="/files/notes.pdf#a.xlsx">fragment only</a>
        "##;
        let links = discover_links(html, BASE);
        assert_eq!(
            links,
            vec![
                "https://www.ons.gov.uk/files/vacs01.xlsx?version=2".to_string(),
                "https://www.ons.gov.uk/files/vacs02.XLS#top".to_string(),
            ]
        );
    }

    #[test]
    fn table_and_download_section_links_are_deduplicated() {
        let html = r#"
            <div class="download-section"><a href="/a/vacs01.xlsx">download</a></div>
            <table><tr><td><a href="/a/vacs01.xlsx">table</a></td></tr></table>
            <p><a href="https://www.ons.gov.uk/a/vacs01.xlsx">body</a></p>
        "#;
        assert_eq!(discover_links(html, BASE), vec!["https://www.ons.gov.uk/a/vacs01.xlsx".to_string()]);
    }

    #[test]
    fn never_returns_non_spreadsheets_or_duplicates() {
        let html = r#"
            <a href="/index.html">home</a>
            <a href="/data.csv">csv</a>
            <a href="/x.xlsx.bak">backup</a>
            <a>no href</a>
            <a href="">empty</a>
            <a href="/a.xls">a</a><a href="/a.xls">a again</a>
            <a href="/b.xlsx">b</a>
        "#;
        let links = discover_links(html, BASE);
        let unique: HashSet<_> = links.iter().collect();
        assert_eq!(unique.len(), links.len());
        assert!(links.iter().all(|l| spreadsheet_path(l).is_some()));
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn trailing_slash_base_joins_with_single_slash() {
        assert_eq!(resolve_href("https://www.ons.gov.uk/", "/x.xlsx"), "https://www.ons.gov.uk/x.xlsx");
        assert_eq!(resolve_href("https://www.ons.gov.uk/", "x.xlsx"), "https://www.ons.gov.uk/x.xlsx");
    }

    #[test]
    fn spreadsheet_path_prefers_path_then_query() {
        assert_eq!(spreadsheet_path("/a/b.xlsx?x=1"), Some("/a/b.xlsx"));
        assert_eq!(spreadsheet_path("/file?uri=/a/c.xls&lang=en"), Some("/a/c.xls"));
        assert_eq!(spreadsheet_path("/file?uri=/a/c.pdf"), None);
        assert_eq!(spreadsheet_path("/file#d.xlsx"), None);
    }

    #[test]
    fn page_without_links_is_empty() {
        assert!(discover_links("<html><body><p>nothing</p></body></html>", BASE).is_empty());
    }
}

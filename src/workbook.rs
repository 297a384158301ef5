//! Minimal `.xlsx` reader: every worksheet as a grid of display strings.
//!
//! Reads the OOXML parts directly: `xl/workbook.xml` and its relationships
//! for sheet names and order, `xl/sharedStrings.xml` for the string table,
//! and each `xl/worksheets/sheetN.xml` for cells.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use quick_xml::events::attributes::Attributes;
use quick_xml::events::Event;
use quick_xml::Reader;
use zip::ZipArchive;

use crate::clean::RawSheet;
use crate::error::DownloaderError;

const MAX_SHEETS: usize = 100;
/// Zip-bomb guard for any single XML part.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
const WORKSHEET_PREFIX: &str = "xl/worksheets/sheet";

type Archive = ZipArchive<File>;

fn workbook_error(path: &Path, detail: impl std::fmt::Display) -> DownloaderError {
    DownloaderError::WorkbookError(format!("{}: {}", path.display(), detail))
}

/// All worksheets of the workbook at `path`, in workbook order.
pub fn read_workbook(path: &Path) -> Result<Vec<RawSheet>, DownloaderError> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| workbook_error(path, e))?;

    let shared_strings = match read_entry(&mut archive, "xl/sharedStrings.xml")? {
        Some(xml) => parse_shared_strings(&xml).map_err(|e| workbook_error(path, e))?,
        None => Vec::new(),
    };

    let mut sheets = Vec::new();
    for (name, part) in sheet_parts(&mut archive, path)?.into_iter().take(MAX_SHEETS) {
        let Some(xml) = read_entry(&mut archive, &part)? else {
            return Err(workbook_error(path, format!("missing worksheet part {}", part)));
        };
        let cells = parse_sheet_cells(&xml, &shared_strings).map_err(|e| workbook_error(path, e))?;
        sheets.push(RawSheet { name, cells });
    }
    Ok(sheets)
}

fn read_entry(archive: &mut Archive, name: &str) -> Result<Option<Vec<u8>>, DownloaderError> {
    let entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(DownloaderError::WorkbookError(format!("{}: {}", name, e))),
    };
    let mut buf = Vec::new();
    entry.take(MAX_XML_ENTRY_BYTES).read_to_end(&mut buf)?;
    Ok(Some(buf))
}

fn attr(attributes: Attributes<'_>, local: &[u8]) -> Option<String> {
    attributes
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// `(sheet name, zip part)` pairs in workbook order. Falls back to the
/// numbered worksheet parts when the workbook index is missing.
fn sheet_parts(archive: &mut Archive, path: &Path) -> Result<Vec<(String, String)>, DownloaderError> {
    let workbook = read_entry(archive, "xl/workbook.xml")?;
    let rels = read_entry(archive, "xl/_rels/workbook.xml.rels")?;

    if let (Some(workbook), Some(rels)) = (workbook, rels) {
        let targets = parse_relationships(&rels).map_err(|e| workbook_error(path, e))?;
        let declared = parse_sheet_declarations(&workbook).map_err(|e| workbook_error(path, e))?;
        let parts: Vec<(String, String)> = declared
            .into_iter()
            .filter_map(|(name, rel_id)| targets.get(&rel_id).map(|target| (name, part_path(target))))
            .collect();
        if !parts.is_empty() {
            return Ok(parts);
        }
    }

    let mut numbered: Vec<(u32, String)> = archive
        .file_names()
        .filter(|n| n.starts_with(WORKSHEET_PREFIX) && n.ends_with(".xml"))
        .filter_map(|n| {
            let index = n.trim_start_matches(WORKSHEET_PREFIX).trim_end_matches(".xml").parse().ok()?;
            Some((index, n.to_string()))
        })
        .collect();
    numbered.sort();
    Ok(numbered
        .into_iter()
        .map(|(index, part)| (format!("Sheet{}", index), part))
        .collect())
}

/// Relationship targets are relative to `xl/` unless rooted.
fn part_path(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(rooted) => rooted.to_string(),
        None => format!("xl/{}", target),
    }
}

fn parse_relationships(xml: &[u8]) -> Result<HashMap<String, String>, quick_xml::Error> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut targets = HashMap::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (attr(e.attributes(), b"Id"), attr(e.attributes(), b"Target")) {
                    targets.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(targets)
}

/// `(name, r:id)` of every `<sheet>` in `xl/workbook.xml`.
fn parse_sheet_declarations(xml: &[u8]) -> Result<Vec<(String, String)>, quick_xml::Error> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut sheets = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                if let (Some(name), Some(id)) = (attr(e.attributes(), b"name"), attr(e.attributes(), b"id")) {
                    sheets.push((name, id));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

/// One entry per `<si>`; rich-text runs are concatenated, phonetic hints skipped.
fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, quick_xml::Error> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut in_phonetic = false;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"rPh" => in_phonetic = true,
                b"t" if !in_phonetic => in_text = true,
                _ => {}
            },
            Event::Text(t) if in_text => current.push_str(&t.unescape()?),
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"rPh" => in_phonetic = false,
                b"t" => in_text = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Zero-based column of an `A1`-style reference.
fn column_index(reference: &str) -> Option<usize> {
    let letters: Vec<u8> = reference.bytes().take_while(u8::is_ascii_alphabetic).collect();
    if letters.is_empty() {
        return None;
    }
    let number = letters
        .iter()
        .fold(0usize, |acc, b| acc * 26 + (b.to_ascii_uppercase() - b'A' + 1) as usize);
    Some(number - 1)
}

#[derive(Default)]
struct PendingCell {
    column: usize,
    kind: String,
    value: String,
}

impl PendingCell {
    fn display(&self, shared_strings: &[String]) -> String {
        match self.kind.as_str() {
            "s" => self
                .value
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|i| shared_strings.get(i).cloned())
                .unwrap_or_default(),
            "b" => match self.value.trim() {
                "1" => "TRUE".to_string(),
                _ => "FALSE".to_string(),
            },
            _ => self.value.clone(),
        }
    }
}

/// Rows placed by their `r` number, so blank rows above a table keep the
/// header offset the same as in the spreadsheet.
fn parse_sheet_cells(xml: &[u8], shared_strings: &[String]) -> Result<Vec<Vec<String>>, quick_xml::Error> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut row_number = 0usize;
    let mut cell: Option<PendingCell> = None;
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => {
                    row_number = attr(e.attributes(), b"r")
                        .and_then(|r| r.parse().ok())
                        .unwrap_or(row_number + 1);
                    row.clear();
                }
                b"c" => {
                    let column = attr(e.attributes(), b"r")
                        .and_then(|r| column_index(&r))
                        .unwrap_or(row.len());
                    cell = Some(PendingCell {
                        column,
                        kind: attr(e.attributes(), b"t").unwrap_or_default(),
                        value: String::new(),
                    });
                }
                b"v" | b"t" => in_value = cell.is_some(),
                _ => {}
            },
            Event::Text(t) if in_value => {
                if let Some(cell) = cell.as_mut() {
                    cell.value.push_str(&t.unescape()?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let Some(done) = cell.take() {
                        if row.len() <= done.column {
                            row.resize(done.column + 1, String::new());
                        }
                        row[done.column] = done.display(shared_strings);
                    }
                }
                b"row" => {
                    let index = row_number.saturating_sub(1).max(rows.len());
                    rows.resize(index, Vec::new());
                    rows.push(std::mem::take(&mut row));
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

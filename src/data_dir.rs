//! Housekeeping for the download directory.

use crate::error::DownloaderError;
use crate::links::has_spreadsheet_extension;
use crate::types::ExistingFile;
use log::{error, info};
use std::path::Path;

/// Spreadsheets already present in `dir`, sorted by name. A missing
/// directory has no files.
pub fn list_existing_files(dir: &Path) -> Result<Vec<ExistingFile>, DownloaderError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if metadata.is_file() && has_spreadsheet_extension(&name) {
            files.push(ExistingFile {
                name,
                size: metadata.len(),
                path: entry.path(),
            });
        }
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

/// Delete every spreadsheet in `dir`, then confirm none remain.
/// Returns the number of files removed.
pub fn flush_spreadsheets(dir: &Path) -> Result<usize, DownloaderError> {
    let files = list_existing_files(dir)?;
    let mut removed = 0;

    for file in &files {
        match std::fs::remove_file(&file.path) {
            Ok(()) => {
                info!("Deleted file: {}", file.path.display());
                removed += 1;
            }
            Err(e) => error!("Failed to delete {}: {}", file.path.display(), e),
        }
    }

    let remaining = list_existing_files(dir)?;
    if !remaining.is_empty() {
        return Err(DownloaderError::IoError(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("{} still holds {} spreadsheet file(s)", dir.display(), remaining.len()),
        )));
    }

    info!("Folder {} has been cleared of spreadsheet files", dir.display());
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_only_spreadsheets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.xlsx"), vec![0u8; 2048]).unwrap();
        std::fs::write(dir.path().join("a.XLS"), vec![0u8; 10]).unwrap();
        std::fs::write(dir.path().join("notes.csv"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub.xlsx")).unwrap();

        let files = list_existing_files(dir.path()).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.XLS", "b.xlsx"]);
        assert_eq!(files[1].size, 2048);
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_existing_files(&dir.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn flush_keeps_other_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vacs01.xlsx"), b"x").unwrap();
        std::fs::write(dir.path().join("x06.xls"), b"x").unwrap();
        std::fs::write(dir.path().join("vacs01_Sheet1.csv"), b"x").unwrap();

        assert_eq!(flush_spreadsheets(dir.path()).unwrap(), 2);
        assert!(list_existing_files(dir.path()).unwrap().is_empty());
        assert!(dir.path().join("vacs01_Sheet1.csv").exists());
    }
}

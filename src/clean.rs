//! Cleaning stage: raw sheets in, tidy tables out.
//!
//! The fetcher hands downloaded files to a [`CleaningStage`]; cleaned tables
//! go to a [`StorageSink`]. Independent datasets are cleaned in parallel by
//! [`run_cleaning_jobs`].

use crate::error::DownloaderError;
use crate::links::has_spreadsheet_extension;
use crate::workbook::read_workbook;
use csv::ReaderBuilder;
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;

const PLACEHOLDERS: [&str; 5] = ["", "n/a", "na", "-", "--"];
const INDEX_COLUMN: &str = "unnamed:_0";

/// One sheet as read from the source file, before any cleaning.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSheet {
    pub name: String,
    pub cells: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CleanedTable {
    pub sheet: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub trait CleaningStage: Send + Sync {
    /// Whether this stage can read `path` at all.
    fn supports(&self, path: &Path) -> bool;

    /// Clean every sheet of `path`, using row `header_row` (0-based) as the
    /// header. Fails when every sheet is empty after cleaning.
    fn clean(&self, path: &Path, header_row: usize) -> Result<Vec<CleanedTable>, DownloaderError>;
}

pub trait StorageSink: Send + Sync {
    fn store(&self, source: &str, table: &CleanedTable) -> Result<(), DownloaderError>;
}

/// `Raw Name-Here` -> `raw_name_here`.
pub fn clean_column_name(name: &str) -> String {
    name.trim().to_lowercase().replace([' ', '-'], "_")
}

fn is_placeholder(cell: &str) -> bool {
    PLACEHOLDERS.contains(&cell.to_lowercase().as_str())
}

/// Apply the common rules to one sheet. `None` when nothing survives.
pub fn clean_sheet(sheet: &RawSheet, header_row: usize) -> Option<CleanedTable> {
    let mut rows = sheet.cells.iter().skip(header_row);
    let header = rows.next()?;

    let width = sheet
        .cells
        .iter()
        .skip(header_row)
        .map(Vec::len)
        .max()
        .unwrap_or(0);

    let columns: Vec<String> = (0..width)
        .map(|i| match header.get(i).map(|h| h.trim()) {
            Some(h) if !h.is_empty() => clean_column_name(h),
            _ => clean_column_name(&format!("Unnamed: {}", i)),
        })
        .collect();

    let mut data: Vec<Vec<String>> = rows
        .map(|row| {
            (0..width)
                .map(|i| {
                    let cell = row.get(i).map(|c| c.trim()).unwrap_or("");
                    if is_placeholder(cell) {
                        String::new()
                    } else {
                        cell.to_string()
                    }
                })
                .collect()
        })
        .collect();

    data.retain(|row| row.iter().any(|c| !c.is_empty()));

    let keep: Vec<usize> = (0..width)
        .filter(|&i| data.iter().any(|row| !row[i].is_empty()))
        .filter(|&i| columns[i] != INDEX_COLUMN)
        .collect();

    let columns: Vec<String> = keep.iter().map(|&i| columns[i].clone()).collect();
    let mut seen = HashSet::new();
    let rows: Vec<Vec<String>> = data
        .into_iter()
        .map(|row| keep.iter().map(|&i| row[i].clone()).collect::<Vec<_>>())
        .filter(|row| seen.insert(row.clone()))
        .collect();

    if rows.is_empty() || columns.is_empty() {
        return None;
    }

    Some(CleanedTable {
        sheet: sheet.name.clone(),
        columns,
        rows,
    })
}

/// Reads `.xlsx` workbooks (one sheet per worksheet, named as in the
/// workbook) and delimited exports (`.csv`, `.tsv`) as a single `Sheet1`.
/// Legacy `.xls` files are claimed but rejected, so they show up as errors
/// instead of being skipped.
#[derive(Debug, Default, Clone)]
pub struct CommonRulesCleaner;

impl CommonRulesCleaner {
    pub fn read_sheets(&self, path: &Path) -> Result<Vec<RawSheet>, DownloaderError> {
        let delimiter = match extension(path).as_str() {
            "xlsx" => return read_workbook(path),
            "xls" => {
                return Err(DownloaderError::WorkbookError(format!(
                    "{}: legacy .xls workbooks must be converted to .xlsx first",
                    path.display()
                )))
            }
            "tsv" => b'\t',
            _ => b',',
        };
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_path(path)?;

        let mut cells = Vec::new();
        for record in reader.records() {
            let record = record?;
            cells.push(record.iter().map(str::to_string).collect());
        }

        Ok(vec![RawSheet {
            name: "Sheet1".to_string(),
            cells,
        }])
    }
}

impl CleaningStage for CommonRulesCleaner {
    fn supports(&self, path: &Path) -> bool {
        matches!(extension(path).as_str(), "xlsx" | "xls" | "csv" | "tsv")
    }

    fn clean(&self, path: &Path, header_row: usize) -> Result<Vec<CleanedTable>, DownloaderError> {
        let sheets = self.read_sheets(path)?;
        if sheets.is_empty() {
            return Err(DownloaderError::CleaningError(format!("No sheets found in {}", path.display())));
        }

        let tables: Vec<CleanedTable> = sheets.iter().filter_map(|s| clean_sheet(s, header_row)).collect();
        if tables.is_empty() {
            return Err(DownloaderError::CleaningError(format!(
                "All sheets in {} are empty after cleaning",
                path.display()
            )));
        }
        Ok(tables)
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Writes each table to `<dir>/<source>_<sheet>.csv`.
#[derive(Debug, Clone)]
pub struct CsvDirectorySink {
    dir: PathBuf,
}

impl CsvDirectorySink {
    pub fn new(dir: PathBuf) -> Result<Self, DownloaderError> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, source: &str, sheet: &str) -> PathBuf {
        let safe_sheet = sheet.replace([' ', '/'], "_");
        self.dir.join(format!("{}_{}.csv", source, safe_sheet))
    }
}

impl StorageSink for CsvDirectorySink {
    fn store(&self, source: &str, table: &CleanedTable) -> Result<(), DownloaderError> {
        let path = self.path_for(source, &table.sheet);
        let mut wtr = csv::WriterBuilder::new().from_path(&path)?;
        wtr.write_record(&table.columns)?;
        for row in &table.rows {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
        info!("Saved sheet '{}' to {}", table.sheet, path.display());
        Ok(())
    }
}

/// All files in `input_dir` whose name starts with `prefix`, cleaned with `header_row`.
#[derive(Debug, Clone)]
pub struct CleaningJob {
    pub prefix: String,
    pub input_dir: PathBuf,
    pub header_row: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobReport {
    pub prefix: String,
    pub files: usize,
    pub tables: usize,
    pub errors: Vec<String>,
}

/// The input files one job owns, plus any errors found while choosing them.
struct JobPlan {
    job: CleaningJob,
    paths: Vec<PathBuf>,
    errors: Vec<String>,
}

fn name_starts_with(path: &Path, prefix: &str) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase().starts_with(prefix))
        .unwrap_or(false)
}

/// Assigns input files to jobs. A file matching several prefixes goes to the
/// longest one (the first on a tie), so no file is cleaned twice at once.
/// Spreadsheets the cleaner cannot read are reported, not skipped.
fn plan_jobs(jobs: Vec<CleaningJob>, cleaner: &dyn CleaningStage) -> Vec<JobPlan> {
    let mut plans: Vec<JobPlan> = jobs
        .into_iter()
        .map(|job| {
            let mut plan = JobPlan {
                job,
                paths: Vec::new(),
                errors: Vec::new(),
            };
            let entries = match std::fs::read_dir(&plan.job.input_dir) {
                Ok(entries) => entries,
                Err(e) => {
                    plan.errors.push(format!("Cannot read {}: {}", plan.job.input_dir.display(), e));
                    return plan;
                }
            };

            let prefix = plan.job.prefix.to_lowercase();
            for path in entries.filter_map(|entry| entry.ok().map(|e| e.path())) {
                if !path.is_file() || !name_starts_with(&path, &prefix) {
                    continue;
                }
                if cleaner.supports(&path) {
                    plan.paths.push(path);
                } else if has_spreadsheet_extension(&path.to_string_lossy()) {
                    plan.errors.push(format!("{}: no reader for this file type", path.display()));
                }
            }
            plan.paths.sort();
            plan
        })
        .collect();

    let mut owner: HashMap<PathBuf, usize> = HashMap::new();
    for (i, plan) in plans.iter().enumerate() {
        for path in &plan.paths {
            match owner.get(path) {
                Some(&current) if plans[current].job.prefix.len() >= plan.job.prefix.len() => {}
                _ => {
                    owner.insert(path.clone(), i);
                }
            }
        }
    }

    for (i, plan) in plans.iter_mut().enumerate() {
        plan.paths.retain(|path| {
            let owned = owner.get(path) == Some(&i);
            if !owned {
                debug!("{} left to a more specific prefix than '{}'", path.display(), plan.job.prefix);
            }
            owned
        });
    }
    plans
}

fn run_job(plan: JobPlan, cleaner: &dyn CleaningStage, sink: &dyn StorageSink) -> JobReport {
    let JobPlan { job, paths, errors } = plan;
    let mut report = JobReport {
        prefix: job.prefix.clone(),
        files: paths.len(),
        errors,
        ..JobReport::default()
    };

    for path in paths {
        let source = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        match cleaner.clean(&path, job.header_row) {
            Ok(tables) => {
                for table in &tables {
                    match sink.store(&source, table) {
                        Ok(()) => report.tables += 1,
                        Err(e) => report.errors.push(format!("{}: {}", path.display(), e)),
                    }
                }
            }
            Err(e) => {
                error!("Failed to process {}: {}", path.display(), e);
                report.errors.push(format!("{}: {}", path.display(), e));
            }
        }
    }

    if report.files == 0 && report.errors.is_empty() {
        warn!("No input files for prefix '{}' in {}", job.prefix, job.input_dir.display());
    }
    report
}

/// Run every job on the blocking pool at once and wait for all of them.
/// Reports come back in job order; overlapping prefixes never share a file.
pub async fn run_cleaning_jobs(
    jobs: Vec<CleaningJob>,
    cleaner: Arc<dyn CleaningStage>,
    sink: Arc<dyn StorageSink>,
) -> Vec<JobReport> {
    let mut set = JoinSet::new();
    let prefixes: Vec<String> = jobs.iter().map(|j| j.prefix.clone()).collect();

    for (i, plan) in plan_jobs(jobs, cleaner.as_ref()).into_iter().enumerate() {
        let cleaner = Arc::clone(&cleaner);
        let sink = Arc::clone(&sink);
        set.spawn_blocking(move || (i, run_job(plan, cleaner.as_ref(), sink.as_ref())));
    }

    let mut reports: Vec<Option<JobReport>> = vec![None; prefixes.len()];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((i, report)) => {
                info!(
                    "Cleaning '{}' finished: {} file(s), {} table(s), {} error(s)",
                    report.prefix,
                    report.files,
                    report.tables,
                    report.errors.len()
                );
                reports[i] = Some(report);
            }
            Err(e) => error!("Cleaning task panicked: {}", e),
        }
    }

    reports
        .into_iter()
        .zip(prefixes)
        .map(|(report, prefix)| {
            report.unwrap_or_else(|| JobReport {
                prefix,
                errors: vec!["cleaning task did not complete".to_string()],
                ..JobReport::default()
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::testing::write_xlsx;

    fn sheet(rows: &[&[&str]]) -> RawSheet {
        RawSheet {
            name: "Table 1".to_string(),
            cells: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }

    #[test]
    fn column_names_are_snake_cased() {
        assert_eq!(clean_column_name("  Total Vacancies "), "total_vacancies");
        assert_eq!(clean_column_name("Jan-Mar 2024"), "jan_mar_2024");
        assert_eq!(clean_column_name("Unnamed: 0"), "unnamed:_0");
    }

    #[test]
    fn common_rules() {
        let raw = sheet(&[
            &["Title row", "", "", ""],
            &["", "Period", "Total Vacancies", "Notes"],
            &["1", " Jan-Mar 2024 ", "900", ""],
            &["", "", "", ""],
            &["2", "Apr-Jun 2024", "n/a", "--"],
            &["3", " Jan-Mar 2024", "900", "-"],
            &["4", "Jul-Sep 2024", "850", "NA"],
        ]);
        let table = clean_sheet(&raw, 1).unwrap();

        assert_eq!(table.columns, vec!["period", "total_vacancies"]);
        assert_eq!(
            table.rows,
            vec![
                vec!["Jan-Mar 2024".to_string(), "900".to_string()],
                vec!["Apr-Jun 2024".to_string(), String::new()],
                vec!["Jul-Sep 2024".to_string(), "850".to_string()],
            ]
        );
    }

    #[test]
    fn placeholder_only_sheet_is_empty() {
        let raw = sheet(&[&["a", "b"], &["-", "n/a"], &["", "--"]]);
        assert!(clean_sheet(&raw, 0).is_none());
    }

    #[test]
    fn header_offset_past_end_is_empty() {
        let raw = sheet(&[&["a", "b"]]);
        assert!(clean_sheet(&raw, 5).is_none());
    }

    #[test]
    fn cleaner_reads_csv_and_fails_on_empty() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("vacs01_Table 1.csv");
        std::fs::write(&good, "Period,Value\nJan 2024,10\n").unwrap();
        let empty = dir.path().join("vacs01_empty.csv");
        std::fs::write(&empty, "Period,Value\n,\n").unwrap();

        let cleaner = CommonRulesCleaner;
        let tables = cleaner.clean(&good, 0).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].sheet, "Sheet1");
        assert!(matches!(cleaner.clean(&empty, 0), Err(DownloaderError::CleaningError(_))));
        assert!(cleaner.supports(Path::new("vacs01.XLSX")));
        assert!(!cleaner.supports(Path::new("vacs01.pdf")));
    }

    #[test]
    fn cleaner_reads_every_worksheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vacs01aug2025.xlsx");
        write_xlsx(
            &path,
            &[
                ("Contents", vec![vec![""], vec![""]]),
                (
                    "Table 1",
                    vec![
                        vec!["Vacancies (thousands)"],
                        vec!["", "Period", "Total Vacancies"],
                        vec!["1", "Jan-Mar 2024", "900"],
                        vec!["2", "Apr-Jun 2024", "n/a"],
                    ],
                ),
            ],
        );

        let tables = CommonRulesCleaner.clean(&path, 1).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].sheet, "Table 1");
        assert_eq!(tables[0].columns, vec!["period", "total_vacancies"]);
        assert_eq!(tables[0].rows[1], vec!["Apr-Jun 2024".to_string(), String::new()]);
    }

    #[test]
    fn legacy_xls_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x06.xls");
        std::fs::write(&path, vec![0u8; 2048]).unwrap();
        let err = CommonRulesCleaner.clean(&path, 0).unwrap_err();
        assert!(matches!(err, DownloaderError::WorkbookError(_)));
    }

    #[test]
    fn sink_sanitizes_sheet_names() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvDirectorySink::new(dir.path().join("out")).unwrap();
        let table = CleanedTable {
            sheet: "Table 1/Seasonal".to_string(),
            columns: vec!["period".to_string()],
            rows: vec![vec!["Jan 2024".to_string()]],
        };
        sink.store("vacs01", &table).unwrap();

        let written = std::fs::read_to_string(dir.path().join("out/vacs01_Table_1_Seasonal.csv")).unwrap();
        assert_eq!(written, "period\nJan 2024\n");
    }

    #[tokio::test]
    async fn jobs_run_together_and_report_in_order() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("vacs01_a.csv"), "x,y\n1,2\n").unwrap();
        std::fs::write(input.path().join("vacs01_b.csv"), "x,y\n,\n").unwrap();
        std::fs::write(input.path().join("x06_a.csv"), "Period,Value\nJan,3\n").unwrap();
        std::fs::write(input.path().join("x06_notes.pdf"), b"%PDF").unwrap();

        let jobs = ["x06", "vacs01", "jobs03"]
            .iter()
            .map(|p| CleaningJob {
                prefix: p.to_string(),
                input_dir: input.path().to_path_buf(),
                header_row: 0,
            })
            .collect();
        let sink = Arc::new(CsvDirectorySink::new(output.path().to_path_buf()).unwrap());
        let reports = run_cleaning_jobs(jobs, Arc::new(CommonRulesCleaner), sink).await;

        let prefixes: Vec<_> = reports.iter().map(|r| r.prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["x06", "vacs01", "jobs03"]);
        assert_eq!((reports[0].files, reports[0].tables), (1, 1));
        assert_eq!((reports[1].files, reports[1].tables), (2, 1));
        assert_eq!(reports[1].errors.len(), 1);
        assert_eq!(reports[2].files, 0);
        assert!(output.path().join("x06_a_Sheet1.csv").exists());
    }

    fn job(prefix: &str, dir: &Path) -> CleaningJob {
        CleaningJob {
            prefix: prefix.to_string(),
            input_dir: dir.to_path_buf(),
            header_row: 0,
        }
    }

    #[tokio::test]
    async fn downloaded_workbooks_are_cleaned_per_sheet() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_xlsx(
            &input.path().join("vacs01aug2025.xlsx"),
            &[
                ("Table 1", vec![vec!["Period", "Total"], vec!["Jan 2024", "900"]]),
                ("Table 2", vec![vec!["Industry", "Total"], vec!["Retail", "120"]]),
            ],
        );

        let sink = Arc::new(CsvDirectorySink::new(output.path().to_path_buf()).unwrap());
        let reports = run_cleaning_jobs(vec![job("vacs01", input.path())], Arc::new(CommonRulesCleaner), sink).await;

        assert_eq!(reports[0].files, 1);
        assert_eq!(reports[0].tables, 2);
        assert!(reports[0].errors.is_empty(), "{:?}", reports[0].errors);
        let written = std::fs::read_to_string(output.path().join("vacs01aug2025_Table_2.csv")).unwrap();
        assert_eq!(written, "industry,total\nRetail,120\n");
    }

    #[tokio::test]
    async fn unreadable_spreadsheets_fail_the_job() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("vacs01.xlsx"), b"<html>error page</html>").unwrap();
        std::fs::write(input.path().join("vacs01old.xls"), vec![0u8; 2048]).unwrap();

        let sink = Arc::new(CsvDirectorySink::new(output.path().to_path_buf()).unwrap());
        let reports = run_cleaning_jobs(vec![job("vacs01", input.path())], Arc::new(CommonRulesCleaner), sink).await;

        assert_eq!(reports[0].files, 2);
        assert_eq!(reports[0].tables, 0);
        assert_eq!(reports[0].errors.len(), 2);
    }

    #[tokio::test]
    async fn overlapping_prefixes_never_share_a_file() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("vacs01.csv"), "x\n1\n").unwrap();
        std::fs::write(input.path().join("vacs02.csv"), "x\n2\n").unwrap();

        let sink = Arc::new(CsvDirectorySink::new(output.path().to_path_buf()).unwrap());
        let jobs = vec![job("vacs0", input.path()), job("vacs01", input.path()), job("vacs01", input.path())];
        let reports = run_cleaning_jobs(jobs, Arc::new(CommonRulesCleaner), sink).await;

        let files: Vec<_> = reports.iter().map(|r| r.files).collect();
        assert_eq!(files, vec![1, 1, 0]);
        assert_eq!(reports.iter().map(|r| r.tables).sum::<usize>(), 2);
    }
}

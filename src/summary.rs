use crate::types::{DatasetOutcome, ExistingFile, SessionSummary};
use colored::*;

const ERRORS_PER_DATASET: usize = 3;

fn mb(bytes: u64) -> f64 {
    bytes as f64 / 1_048_576.0
}

fn kb(bytes: u64) -> f64 {
    bytes as f64 / 1024.0
}

pub fn print_summary(summary: &SessionSummary) {
    let stats = &summary.stats;

    println!("\n{}", "=".repeat(60));
    println!("{}", "Download Session Complete".bold());
    println!("{}", "=".repeat(60));

    println!("URLs processed: {}", stats.urls_processed);
    println!("Files found: {}", stats.files_found);
    println!("Files downloaded: {}", stats.files_downloaded.to_string().green());
    if summary.failed_downloads() > 0 {
        println!("Files failed: {}", summary.failed_downloads().to_string().red());
    }
    println!("Total data transferred: {:.2} MB", mb(stats.total_bytes));
    println!("Total duration: {:.2?}", summary.total_duration);
    println!("Errors: {}", stats.errors.len());

    if !summary.datasets.is_empty() {
        println!("\n{}", "Per Dataset Results:".bold());
        for dataset in &summary.datasets {
            print_dataset(dataset);
        }
    }

    if summary.datasets.iter().any(|d| !d.errors.is_empty()) {
        print_hints();
    }
}

fn print_dataset(dataset: &DatasetOutcome) {
    let line = format!(
        "[{}] {}/{} files ({:.1}%, {:.2} MB)",
        dataset.dataset_name,
        dataset.files_downloaded,
        dataset.files_found,
        dataset.success_rate(),
        mb(dataset.bytes_downloaded())
    );
    if dataset.files_found > 0 && dataset.files_downloaded == dataset.files_found {
        println!("  {}", line.green());
    } else if dataset.files_downloaded > 0 {
        println!("  {}", line.yellow());
    } else {
        println!("  {}", line.red());
    }

    for report in dataset.downloads.iter().filter(|d| d.success) {
        println!(
            "    ✓ {} ({:.1} KB in {:.2?})",
            report.filename.green(),
            kb(report.file_size),
            report.duration
        );
    }

    for error in dataset.errors.iter().take(ERRORS_PER_DATASET) {
        println!("    ✗ {}", error.red());
    }
    if dataset.errors.len() > ERRORS_PER_DATASET {
        println!("    ... and {} more errors", dataset.errors.len() - ERRORS_PER_DATASET);
    }
}

fn print_hints() {
    println!("\n{}", "Troubleshooting:".yellow().bold());
    println!("  - Rate limited? Increase --delay-between-files / --delay-between-urls or --retry-delay");
    println!("  - Retry failed datasets individually by passing only their page URL");
    println!("  - Run during off-peak hours when the site is less busy");
}

pub fn print_existing_files(files: &[ExistingFile], limit: usize) {
    if files.is_empty() {
        println!("No spreadsheet files found");
        return;
    }

    println!("Found {} existing file(s):", files.len());
    for file in files.iter().take(limit) {
        println!("  - {} ({:.1} KB)", file.name, kb(file.size));
    }
    if files.len() > limit {
        println!("  ... and {} more files", files.len() - limit);
    }
    let total: u64 = files.iter().map(|f| f.size).sum();
    println!("Total existing size: {:.1} MB", mb(total));
}

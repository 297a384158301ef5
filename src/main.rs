use anyhow::{bail, Context};
use clap::Parser;
use colored::*;
use log::{error, info};
use ons_downloader::clean::{run_cleaning_jobs, CleaningJob, CommonRulesCleaner, CsvDirectorySink};
use ons_downloader::cli::{CleanArgs, Cli, Command, FetchArgs};
use ons_downloader::config::FetcherConfig;
use ons_downloader::data_dir::{flush_spreadsheets, list_existing_files};
use ons_downloader::parser;
use ons_downloader::session::Session;
use ons_downloader::summary::{print_existing_files, print_summary};
use ons_downloader::transport::ReqwestTransport;
use ons_downloader::types::FetchTarget;
use std::path::Path;
use std::sync::Arc;

const DEFAULT_CONFIG_FILE: &str = "ons-downloader.toml";

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Fetch(args) => fetch(args).await,
        Command::Clean(args) => clean(args).await,
        Command::List { dir, limit } => {
            let files = list_existing_files(&dir)?;
            print_existing_files(&files, limit);
            Ok(())
        }
        Command::Flush { dir } => {
            let removed = flush_spreadsheets(&dir)?;
            println!("Deleted {} file(s) from {}", removed, dir.display());
            Ok(())
        }
    }
}

async fn fetch(args: FetchArgs) -> anyhow::Result<()> {
    info!("Starting ONS spreadsheet downloader");

    let mut config = match &args.config {
        Some(path) => FetcherConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            FetcherConfig::load_or_default(Path::new(DEFAULT_CONFIG_FILE))
        }
        None => FetcherConfig::default(),
    };
    args.apply_overrides(&mut config);

    let mut targets: Vec<FetchTarget> = parser::parse_target_urls(&args.urls)?;
    if let Some(path) = &args.input_file {
        match parser::parse_targets(path).await {
            Ok(parsed) => {
                info!("Parsed {} URL(s) from {}", parsed.len(), path.display());
                targets.extend(parsed);
            }
            Err(e) => {
                error!("Failed to parse target file: {}", e);
                eprintln!("{}", "Failed to parse target file".red());
                return Err(e.into());
            }
        }
    }
    if targets.is_empty() {
        bail!("no URLs given: pass page URLs or --input-file");
    }

    let existing = list_existing_files(&args.output_dir)?;
    if !existing.is_empty() {
        info!("{} spreadsheet(s) already in {}", existing.len(), args.output_dir.display());
    }

    let transport = Arc::new(ReqwestTransport::new(&config)?);
    let session = Session::new(transport, config, args.output_dir.clone(), !args.quiet)?;
    let summary = session.run(&targets).await;
    print_summary(&summary);

    let stats = &summary.stats;
    if stats.files_found > 0 && stats.files_downloaded == 0 {
        error!("All {} download(s) failed", stats.files_found);
        bail!("no files were downloaded");
    }
    if summary.failed_downloads() == 0 && stats.errors.is_empty() {
        println!("\n{}", "All downloads completed successfully".green());
    }
    Ok(())
}

async fn clean(args: CleanArgs) -> anyhow::Result<()> {
    let sink = CsvDirectorySink::new(args.output_dir.clone())?;
    let jobs: Vec<CleaningJob> = args
        .prefix
        .iter()
        .map(|prefix| CleaningJob {
            prefix: prefix.clone(),
            input_dir: args.input_dir.clone(),
            header_row: args.header_row,
        })
        .collect();

    let reports = run_cleaning_jobs(jobs, Arc::new(CommonRulesCleaner), Arc::new(sink)).await;

    let mut failures = 0;
    for report in &reports {
        let line = format!("[{}] {} file(s) -> {} table(s)", report.prefix, report.files, report.tables);
        if report.errors.is_empty() {
            println!("{}", line.green());
        } else {
            println!("{}", line.yellow());
            for e in &report.errors {
                println!("  ✗ {}", e.red());
            }
            failures += report.errors.len();
        }
    }

    if failures > 0 {
        bail!("{} file(s) could not be cleaned", failures);
    }
    Ok(())
}

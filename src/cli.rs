use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::FetcherConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan dataset pages and download every spreadsheet they link to
    Fetch(FetchArgs),

    /// Clean downloaded sheet exports into tidy CSV tables
    Clean(CleanArgs),

    /// List spreadsheets already in a directory
    List {
        #[arg(short, long)]
        dir: PathBuf,

        /// Show at most this many files
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Delete every spreadsheet in a directory
    Flush {
        #[arg(short, long)]
        dir: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Dataset page URLs
    pub urls: Vec<String>,

    /// File with one page URL per line
    #[arg(short, long)]
    pub input_file: Option<PathBuf>,

    /// Output directory for downloaded files
    #[arg(short, long)]
    pub output_dir: PathBuf,

    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Seconds between files of one page
    #[arg(long)]
    pub delay_between_files: Option<f64>,

    /// Seconds between pages
    #[arg(long)]
    pub delay_between_urls: Option<f64>,

    /// Retries after the first attempt on 429 or network errors
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Base backoff in seconds
    #[arg(long)]
    pub retry_delay: Option<f64>,

    /// Download rate limit in bytes per second
    #[arg(short = 'r', long)]
    pub rate_limit: Option<u64>,

    /// Site origin for resolving relative links
    #[arg(long)]
    pub base_url: Option<String>,

    /// Hide progress bars
    #[arg(short, long)]
    pub quiet: bool,
}

impl FetchArgs {
    /// Command-line flags take precedence over the config file.
    pub fn apply_overrides(&self, config: &mut FetcherConfig) {
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(delay) = self.delay_between_files {
            config.delay_between_files = delay;
        }
        if let Some(delay) = self.delay_between_urls {
            config.delay_between_urls = delay;
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        if let Some(delay) = self.retry_delay {
            config.retry_delay = delay;
        }
        if let Some(rate) = self.rate_limit {
            config.max_bytes_per_sec = Some(rate);
        }
        if let Some(base) = &self.base_url {
            config.base_url = Some(base.clone());
        }
    }
}

#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Directory holding the sheet exports
    #[arg(short, long)]
    pub input_dir: PathBuf,

    /// Directory for cleaned CSV tables
    #[arg(short, long)]
    pub output_dir: PathBuf,

    /// Dataset filename prefixes, one parallel job each
    #[arg(short, long, required = true, num_args = 1..)]
    pub prefix: Vec<String>,

    /// Zero-based row holding the column headers
    #[arg(long, default_value = "0")]
    pub header_row: usize,
}

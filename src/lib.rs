//! Rate-limited downloader for ONS labour-market spreadsheets.
//!
//! Pages are scanned for spreadsheet links, each file is checked with a HEAD
//! request, streamed to disk and size-verified, with 429s and network errors
//! retried under exponential backoff. Downloaded sheets can then be cleaned
//! into tidy CSV tables.

pub mod clean;
pub mod cli;
pub mod config;
pub mod data_dir;
pub mod downloader;
pub mod error;
pub mod filename;
pub mod links;
pub mod parser;
pub mod retry;
pub mod session;
pub mod summary;
pub mod transport;
pub mod types;
pub mod validate;
pub mod workbook;

//! Document harvest pipeline core library.
//!
//! Discovers documents (filesystem walk, directory monitoring, flat
//! lists, web crawl, search-engine queries, log replay), downloads
//! them under bounded per-host concurrency, extracts structured
//! metadata via format-specific analyzers, and emits everything as a
//! single XML log document.
//!
//! # Architecture
//!
//! The stages are connected by asynchronous fire-and-forget channels
//! and share no work queue; termination is driven by the
//! [`watchdog`]'s debounced idle detection over every stage's
//! [`watchdog::Liveness`] capability.
//!
//! - [`finder`] - discovery strategies producing work items
//! - [`download`] - bounded-concurrency retrieval into local storage
//! - [`analyzer`] - format dispatch and metadata extraction
//! - [`collector`] - XML log assembly, the single output writer
//! - [`watchdog`] - liveness polling and the shutdown sequence
//! - [`pipeline`] - assembly and the run loop
//! - [`config`] - `key = value` run configuration

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod analyzer;
pub mod collector;
pub mod config;
pub mod download;
pub mod finder;
pub mod pipeline;
pub mod watchdog;
pub mod xml;

// Re-export commonly used types
pub use analyzer::{Analyzer, AnalyzerMultiplexer, LanguageGuesser};
pub use collector::{LogCollector, ReportFragment, ReportSink};
pub use config::{
    AnalyzerConfig, Config, ConfigError, DownloaderConfig, FilterSet, FinderConfig,
    TextExtraction,
};
pub use download::{
    Downloader, FakeDownloader, FromLogDownloader, MAX_PARALLEL_DOWNLOADS,
    MAX_PARALLEL_DOWNLOADS_PER_HOST, UrlDownloader,
};
pub use finder::{
    DirectoryMonitor, FileFinderList, FileSystemScan, Finder, FromLogFinder, SearchEngineFinder,
    WebCrawler,
};
pub use pipeline::PipelineError;
pub use watchdog::{COUNTDOWN_INIT, Liveness, Watchdog, WatchdogSignal};

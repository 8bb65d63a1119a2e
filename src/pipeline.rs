//! Pipeline assembly and the run loop.
//!
//! Builds the configured stages, connects them with unbounded
//! channels (finder → downloader → analyzer, everything → log
//! collector), registers every stage's liveness capability with the
//! watchdog, and drives the two-phase shutdown: first warning
//! requests the downloader's aggregate report, last warning closes
//! the log document, quit ends the run.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::analyzer::{Analyzer, AnalyzerMultiplexer, LanguageGuesser};
use crate::collector::LogCollector;
use crate::config::{Config, DownloaderConfig, FinderConfig};
use crate::download::{Downloader, FakeDownloader, FromLogDownloader, UrlDownloader};
use crate::finder::{
    DirectoryMonitor, FileFinderList, FileSystemScan, Finder, FromLogFinder, SearchEngineFinder,
    WebCrawler,
};
use crate::watchdog::{self, Liveness, Watchdog, WatchdogSignal};

/// Fallback cap on crawler page visits when the configuration names
/// none.
const DEFAULT_MAX_VISITED_PAGES: usize = 1024;

/// Errors raised while assembling the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The log output file could not be created.
    #[error("cannot create log output {path}: {source}")]
    LogOutput {
        /// The configured log path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A finder setting did not parse (URL or regex).
    #[error("invalid finder configuration: {detail}")]
    InvalidFinder {
        /// What failed to parse.
        detail: String,
    },
}

/// Runs the configured pipeline to completion with the default
/// watchdog cadence. Returns once the watchdog reaches its terminal
/// state.
///
/// # Errors
///
/// Returns a [`PipelineError`] if assembly fails; per-item failures
/// during the run surface only in the log document.
pub async fn run(config: Config) -> Result<(), PipelineError> {
    run_with_interval(config, watchdog::POLL_INTERVAL).await
}

/// Runs the pipeline with an explicit watchdog polling interval
/// (tests use short intervals).
///
/// # Errors
///
/// Same conditions as [`run`].
pub async fn run_with_interval(
    config: Config,
    poll_interval: Duration,
) -> Result<(), PipelineError> {
    let output = File::create(&config.log_path).map_err(|source| PipelineError::LogOutput {
        path: config.log_path.clone(),
        source,
    })?;
    let (collector, sink) =
        LogCollector::new(BufWriter::new(output)).map_err(|source| PipelineError::LogOutput {
            path: config.log_path.clone(),
            source,
        })?;
    let collector_task = tokio::spawn(collector.run());

    let (found_tx, mut found_rx) = mpsc::unbounded_channel::<Url>();
    let (downloaded_tx, mut downloaded_rx) = mpsc::unbounded_channel::<PathBuf>();

    let mut watchdog = Watchdog::new();
    watchdog.add_stage(Arc::new(sink.clone()) as Arc<dyn Liveness>);

    let language_guesser = Arc::new(LanguageGuesser::new());
    let analyzer = Arc::new(AnalyzerMultiplexer::new(
        config.filters.clone(),
        config.analyzer,
        config.text_extraction,
        config.uncompress_timeout,
        &language_guesser,
        sink.clone(),
    ));
    watchdog.add_stage(Arc::clone(&analyzer) as Arc<dyn Liveness>);

    let downloader: Arc<dyn Downloader> = match &config.downloader {
        Some(DownloaderConfig::Url { file_pattern }) => {
            let downloader = Arc::new(UrlDownloader::new(
                file_pattern.clone(),
                config.num_hits,
                sink.clone(),
                downloaded_tx.clone(),
            ));
            watchdog.add_stage(Arc::clone(&downloader) as Arc<dyn Liveness>);
            downloader
        }
        Some(DownloaderConfig::FromLogFile { log_file }) => {
            let downloader = Arc::new(FromLogDownloader::new(
                log_file.clone(),
                config.filters.clone(),
                sink.clone(),
                downloaded_tx.clone(),
            ));
            watchdog.add_stage(Arc::clone(&downloader) as Arc<dyn Liveness>);
            let replay = Arc::clone(&downloader);
            tokio::spawn(async move {
                replay.start_replay().await;
            });
            downloader
        }
        Some(DownloaderConfig::Fake) | None => {
            // No retrieval configured: local files are handed through
            let downloader = Arc::new(FakeDownloader::new(sink.clone(), downloaded_tx.clone()));
            watchdog.add_stage(Arc::clone(&downloader) as Arc<dyn Liveness>);
            downloader
        }
    };

    let finder: Option<Arc<dyn Finder>> = match &config.finder {
        None => None,
        Some(selection) => Some(build_finder(
            selection,
            &config,
            sink.clone(),
            found_tx.clone(),
            &mut watchdog,
        )?),
    };

    // Event chain consumers: finder hits feed the downloader,
    // stored files feed the analyzer.
    let downloader_for_items = Arc::clone(&downloader);
    let download_task = tokio::spawn(async move {
        while let Some(url) = found_rx.recv().await {
            downloader_for_items.download(url).await;
        }
    });
    let analyzer_for_items = Arc::clone(&analyzer);
    let analysis_task = tokio::spawn(async move {
        while let Some(path) = downloaded_rx.recv().await {
            analyzer_for_items.analyze_file(&path).await;
        }
    });

    let finder_task = finder.map(|finder| {
        let num_hits = config.num_hits;
        tokio::spawn(async move {
            finder.start_search(num_hits).await;
        })
    });

    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
    let watchdog_task = tokio::spawn(watchdog.run(poll_interval, signal_tx));

    info!(log = %config.log_path.display(), "pipeline running");
    while let Some(signal) = signal_rx.recv().await {
        match signal {
            WatchdogSignal::FirstWarning => {
                debug!("requesting aggregate stage reports");
                downloader.final_report().await;
            }
            WatchdogSignal::LastWarning => {
                debug!("closing log document");
                sink.close();
            }
            WatchdogSignal::Quit => break,
        }
    }

    // Make sure the log is flushed even if the signal channel closed
    // without a last warning
    sink.close();
    if let Err(error) = collector_task.await {
        warn!(%error, "log collector task failed");
    }

    watchdog_task.abort();
    download_task.abort();
    analysis_task.abort();
    if let Some(task) = finder_task {
        task.abort();
    }

    info!("pipeline finished");
    Ok(())
}

/// Builds the configured finder and registers its liveness.
fn build_finder(
    selection: &FinderConfig,
    config: &Config,
    sink: crate::collector::ReportSink,
    found_tx: mpsc::UnboundedSender<Url>,
    watchdog: &mut Watchdog,
) -> Result<Arc<dyn Finder>, PipelineError> {
    let finder: Arc<dyn Finder> = match selection {
        FinderConfig::FileSystemScan { base_dir } => {
            let finder = Arc::new(FileSystemScan::new(
                config.filters.clone(),
                base_dir.clone(),
                sink,
                found_tx,
            ));
            watchdog.add_stage(Arc::clone(&finder) as Arc<dyn Liveness>);
            finder
        }
        FinderConfig::DirectoryMonitor {
            base_dir,
            time_limit,
        } => {
            let finder = Arc::new(DirectoryMonitor::new(
                config.filters.clone(),
                base_dir.clone(),
                *time_limit,
                sink,
                found_tx,
            ));
            watchdog.add_stage(Arc::clone(&finder) as Arc<dyn Liveness>);
            finder
        }
        FinderConfig::FileFinderList { list_file } => {
            let finder = Arc::new(FileFinderList::new(list_file.clone(), sink, found_tx));
            watchdog.add_stage(Arc::clone(&finder) as Arc<dyn Liveness>);
            finder
        }
        FinderConfig::FromLogFile { log_file } => {
            let finder = Arc::new(FromLogFinder::new(
                log_file.clone(),
                config.filters.clone(),
                sink,
                found_tx,
            ));
            watchdog.add_stage(Arc::clone(&finder) as Arc<dyn Liveness>);
            finder
        }
        FinderConfig::WebCrawler {
            base_url,
            start_url,
            required_content,
            max_visited_pages,
        } => {
            let base = Url::parse(base_url).map_err(|error| PipelineError::InvalidFinder {
                detail: format!("webcrawler base URL {base_url:?}: {error}"),
            })?;
            let start = match start_url {
                Some(start_url) => {
                    Url::parse(start_url).map_err(|error| PipelineError::InvalidFinder {
                        detail: format!("webcrawler start URL {start_url:?}: {error}"),
                    })?
                }
                None => base.clone(),
            };
            let required = required_content
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|error| PipelineError::InvalidFinder {
                    detail: format!("webcrawler required content pattern: {error}"),
                })?;
            let finder = Arc::new(WebCrawler::new(
                config.filters.clone(),
                base,
                start,
                required,
                max_visited_pages.unwrap_or(DEFAULT_MAX_VISITED_PAGES),
                sink,
                found_tx,
            ));
            watchdog.add_stage(Arc::clone(&finder) as Arc<dyn Liveness>);
            finder
        }
        FinderConfig::SearchEngine {
            url_template,
            query,
        } => {
            let finder = Arc::new(SearchEngineFinder::new(
                config.filters.clone(),
                url_template.clone(),
                query.clone(),
                sink,
                found_tx,
            ));
            watchdog.add_stage(Arc::clone(&finder) as Arc<dyn Liveness>);
            finder
        }
    };
    Ok(finder)
}

//! Retrieval strategies: fetch work items into local storage and hand
//! the resulting paths to the analyzer.
//!
//! # Features
//!
//! - Bounded concurrency with a global ceiling and a smaller per-host
//!   ceiling, backed by a pending queue (no polling; dispatch is
//!   re-entered on completions)
//! - Duplicate work items rejected by canonical URL
//! - Deterministic destination filenames from a configurable pattern
//! - Load-scaled per-request timeouts with abort-and-report semantics

mod fake;
pub mod filename;
mod log_replay;
mod url_downloader;

use async_trait::async_trait;
use url::Url;

use crate::watchdog::Liveness;

pub use fake::FakeDownloader;
pub use log_replay::FromLogDownloader;
pub use url_downloader::{
    MAX_PARALLEL_DOWNLOADS, MAX_PARALLEL_DOWNLOADS_PER_HOST, UrlDownloader,
};

/// A retrieval strategy.
///
/// Failures are reported through the log collector as data; neither
/// method returns an error to the caller.
#[async_trait]
pub trait Downloader: Liveness {
    /// Stage name used to tag report fragments.
    fn name(&self) -> &str;

    /// Accepts one work item. Duplicates (by canonical string) are
    /// rejected silently; everything else is queued for dispatch.
    async fn download(&self, url: Url);

    /// Emits the aggregate run summary. Invoked once by the
    /// watchdog's first warning, not by the downloader itself.
    async fn final_report(&self);
}

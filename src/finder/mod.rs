//! Discovery strategies producing work items for the pipeline.
//!
//! A finder produces a bounded sequence of source locations matching
//! the configured filter, reports each as a hit fragment, delivers it
//! as a typed [`Url`] to the downstream channel, and then goes idle.
//! Finders never block the rest of the pipeline: delivery is
//! fire-and-forget over an unbounded channel.

mod directory_monitor;
mod filesystem_scan;
mod list_file;
mod log_replay;
mod search_engine;
mod web_crawler;

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use url::Url;

use crate::collector::ReportSink;
use crate::watchdog::Liveness;
use crate::xml::XmlNode;

pub use directory_monitor::DirectoryMonitor;
pub use filesystem_scan::FileSystemScan;
pub use list_file::FileFinderList;
pub use log_replay::FromLogFinder;
pub use search_engine::SearchEngineFinder;
pub use web_crawler::WebCrawler;

/// A discovery strategy.
///
/// `start_search` guarantees at most `max_hits` hit events per
/// invocation; there is no guarantee that many matches exist.
#[async_trait]
pub trait Finder: Liveness {
    /// Stage name used to tag report fragments.
    fn name(&self) -> &str;

    /// Starts discovery with the given hit budget.
    async fn start_search(&self, max_hits: usize);
}

/// Reports a hit fragment and delivers the location downstream.
pub(crate) fn emit_hit(sink: &ReportSink, source: &str, found: &UnboundedSender<Url>, url: &Url) {
    let fragment = XmlNode::new("filefinder")
        .attr("event", "hit")
        .attr("href", url.as_str())
        .to_xml();
    sink.report(source, fragment);
    let _ = found.send(url.clone());
}

/// Append-only set of canonical location strings, used by finders to
/// deduplicate work items they have already emitted during the run.
#[derive(Debug, Default)]
pub struct SeenSet {
    inner: Mutex<HashSet<String>>,
}

impl SeenSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a canonical string, returning `true` when it was not
    /// seen before.
    pub fn insert(&self, canonical: &str) -> bool {
        self.inner
            .lock()
            .map(|mut set| set.insert(canonical.to_string()))
            .unwrap_or(false)
    }

    /// Tests membership without inserting.
    #[must_use]
    pub fn contains(&self, canonical: &str) -> bool {
        self.inner
            .lock()
            .map(|set| set.contains(canonical))
            .unwrap_or(false)
    }

    /// Number of distinct locations seen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map(|set| set.len()).unwrap_or(0)
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

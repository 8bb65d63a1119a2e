//! Directory scan with change monitoring.
//!
//! Performs the same breadth-first traversal as the one-shot scan,
//! then keeps watching the root directory until a wall-clock limit.
//! The pack carries no filesystem-notification crate, so change
//! detection polls the root directory's modification time; a detected
//! change arms a short settle timer to let filesystem activity
//! quiesce before re-scanning. Re-scans skip locations already seen
//! during the run.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use super::filesystem_scan::scan_directory_tree;
use super::{Finder, SeenSet, emit_hit};
use crate::collector::ReportSink;
use crate::config::FilterSet;
use crate::watchdog::Liveness;
use crate::xml::XmlNode;

/// Delay after a detected change before re-scanning, letting bursts of
/// filesystem activity settle.
const SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Cadence of the root-directory change poll.
const WATCH_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Watches a directory tree for new matching files until a wall-clock
/// time limit or the hit budget runs out.
pub struct DirectoryMonitor {
    core: Arc<MonitorCore>,
}

struct MonitorCore {
    filters: FilterSet,
    base_dir: PathBuf,
    time_limit: Duration,
    settle_delay: Duration,
    poll_interval: Duration,
    known: SeenSet,
    remaining: AtomicUsize,
    alive: AtomicBool,
    watch_started: AtomicBool,
    sink: ReportSink,
    found: UnboundedSender<Url>,
}

impl DirectoryMonitor {
    /// Creates a monitor over `base_dir` with the given absolute
    /// watching time limit.
    #[must_use]
    pub fn new(
        filters: FilterSet,
        base_dir: PathBuf,
        time_limit: Duration,
        sink: ReportSink,
        found: UnboundedSender<Url>,
    ) -> Self {
        Self::with_timing(
            filters,
            base_dir,
            time_limit,
            SETTLE_DELAY,
            WATCH_POLL_INTERVAL,
            sink,
            found,
        )
    }

    /// Creates a monitor with explicit settle and poll timings (tests
    /// use short timings to keep scenarios fast).
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn with_timing(
        filters: FilterSet,
        base_dir: PathBuf,
        time_limit: Duration,
        settle_delay: Duration,
        poll_interval: Duration,
        sink: ReportSink,
        found: UnboundedSender<Url>,
    ) -> Self {
        Self {
            core: Arc::new(MonitorCore {
                filters,
                base_dir,
                time_limit,
                settle_delay,
                poll_interval,
                known: SeenSet::new(),
                remaining: AtomicUsize::new(0),
                alive: AtomicBool::new(false),
                watch_started: AtomicBool::new(false),
                sink,
                found,
            }),
        }
    }
}

impl Liveness for DirectoryMonitor {
    fn is_alive(&self) -> bool {
        self.core.alive.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Finder for DirectoryMonitor {
    fn name(&self) -> &str {
        "directorymonitor"
    }

    async fn start_search(&self, max_hits: usize) {
        let first_invocation = !self.core.watch_started.swap(true, Ordering::SeqCst);
        self.core.remaining.store(max_hits, Ordering::SeqCst);

        if first_invocation {
            self.core.alive.store(true, Ordering::SeqCst);
            debug!(
                directory = %self.core.base_dir.display(),
                time_limit_secs = self.core.time_limit.as_secs(),
                "starting directory watch"
            );
            tokio::spawn(watch(Arc::clone(&self.core)));
        }

        self.core.scan_once(first_invocation);
    }
}

impl MonitorCore {
    /// One traversal pass; already-known locations are skipped without
    /// consuming budget. Emits a summary on the first pass and on any
    /// pass that produced hits.
    fn scan_once(&self, first_invocation: bool) {
        let budget = self.remaining.load(Ordering::SeqCst);
        if budget == 0 {
            return;
        }

        let hits = scan_directory_tree(&self.base_dir, &self.filters, budget, |url| {
            if self.known.insert(url.as_str()) {
                emit_hit(&self.sink, "directorymonitor", &self.found, &url);
                true
            } else {
                false
            }
        });

        if first_invocation || hits > 0 {
            self.sink.report(
                "directorymonitor",
                XmlNode::new("filesystemscan")
                    .attr("directory", &self.base_dir.display().to_string())
                    .attr("filter", &self.filters.joined())
                    .attr("numresults", &hits.to_string())
                    .to_xml(),
            );
        }

        let left = self.remaining.fetch_sub(hits, Ordering::SeqCst) - hits;
        if left == 0 {
            debug!("hit budget exhausted, stopping directory watch");
            self.alive.store(false, Ordering::SeqCst);
        }
    }

    fn signature(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.base_dir)
            .and_then(|metadata| metadata.modified())
            .ok()
    }
}

/// Polls the root directory for changes until the time limit fires or
/// the budget runs out. The time limit ends liveness permanently, even
/// if later changes occur.
async fn watch(core: Arc<MonitorCore>) {
    let deadline = Instant::now() + core.time_limit;
    let mut last_signature = core.signature();

    loop {
        if !core.alive.load(Ordering::SeqCst) {
            break;
        }
        let now = Instant::now();
        if now >= deadline {
            debug!(
                directory = %core.base_dir.display(),
                "watch time limit reached"
            );
            core.alive.store(false, Ordering::SeqCst);
            break;
        }

        tokio::time::sleep(core.poll_interval.min(deadline - now)).await;

        let signature = core.signature();
        if signature != last_signature {
            tokio::time::sleep(core.settle_delay).await;
            last_signature = core.signature();
            if Instant::now() >= deadline {
                core.alive.store(false, Ordering::SeqCst);
                break;
            }
            core.scan_once(false);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs::{self, File};
    use std::io::Write;
    use std::path::Path;

    use tempfile::TempDir;
    use tokio::sync::mpsc;

    use super::*;

    fn touch(dir: &Path, name: &str) {
        let mut file = File::create(dir.join(name)).unwrap();
        file.write_all(b"x").unwrap();
    }

    fn monitor(
        base: &Path,
        time_limit: Duration,
    ) -> (DirectoryMonitor, mpsc::UnboundedReceiver<Url>) {
        let (_collector, sink) = crate::collector::LogCollector::new(Vec::new()).unwrap();
        let (found_tx, found_rx) = mpsc::unbounded_channel();
        let monitor = DirectoryMonitor::with_timing(
            FilterSet::parse("*.pdf").unwrap(),
            base.to_path_buf(),
            time_limit,
            Duration::from_millis(20),
            Duration::from_millis(10),
            sink,
            found_tx,
        );
        (monitor, found_rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Url>) -> Vec<Url> {
        let mut urls = Vec::new();
        while let Ok(url) = rx.try_recv() {
            urls.push(url);
        }
        urls
    }

    #[tokio::test]
    async fn test_initial_scan_emits_hits_and_stays_alive() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "a.pdf");

        let (monitor, mut rx) = monitor(tmp.path(), Duration::from_secs(30));
        monitor.start_search(10).await;

        assert_eq!(drain(&mut rx).len(), 1);
        assert!(monitor.is_alive());
    }

    #[tokio::test]
    async fn test_rescan_over_unchanged_tree_yields_zero_new_hits() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "a.pdf");
        touch(tmp.path(), "b.pdf");

        let (monitor, mut rx) = monitor(tmp.path(), Duration::from_secs(30));
        monitor.start_search(10).await;
        assert_eq!(drain(&mut rx).len(), 2);

        // Same known-files state, unchanged tree: idempotent
        monitor.start_search(10).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_change_triggers_rescan_after_settle_delay() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "first.pdf");

        let (monitor, mut rx) = monitor(tmp.path(), Duration::from_secs(30));
        monitor.start_search(10).await;
        assert_eq!(drain(&mut rx).len(), 1);

        touch(tmp.path(), "second.pdf");
        tokio::time::sleep(Duration::from_millis(300)).await;

        let urls = drain(&mut rx);
        assert_eq!(urls.len(), 1);
        assert!(urls[0].path().ends_with("second.pdf"));
    }

    #[tokio::test]
    async fn test_time_limit_ends_liveness_permanently() {
        let tmp = TempDir::new().unwrap();

        let (monitor, mut rx) = monitor(tmp.path(), Duration::from_millis(50));
        monitor.start_search(10).await;
        assert!(monitor.is_alive());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!monitor.is_alive());

        // Changes after the deadline are not picked up
        touch(tmp.path(), "late.pdf");
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(drain(&mut rx).is_empty());
        assert!(!monitor.is_alive());
    }

    #[tokio::test]
    async fn test_budget_exhaustion_ends_liveness() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "a.pdf");
        touch(tmp.path(), "b.pdf");

        let (monitor, mut rx) = monitor(tmp.path(), Duration::from_secs(30));
        monitor.start_search(2).await;

        assert_eq!(drain(&mut rx).len(), 2);
        assert!(!monitor.is_alive());
    }

    #[tokio::test]
    async fn test_subdirectories_are_scanned() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("nested")).unwrap();
        touch(&tmp.path().join("nested"), "deep.pdf");

        let (monitor, mut rx) = monitor(tmp.path(), Duration::from_secs(30));
        monitor.start_search(10).await;

        assert_eq!(drain(&mut rx).len(), 1);
    }
}

//! Replay of hits recorded in a prior run's log document.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;
use url::Url;

use super::{Finder, emit_hit};
use crate::collector::ReportSink;
use crate::config::FilterSet;
use crate::watchdog::Liveness;
use crate::xml::{self, XmlNode};

/// Extracts `<filefinder event="hit" href="…"/>` records from a prior
/// log, deduplicates them, and replays up to the requested count.
///
/// Replay order follows set iteration, which is unordered; this is an
/// accepted nondeterminism of the strategy.
pub struct FromLogFinder {
    log_file: PathBuf,
    filters: FilterSet,
    alive: AtomicBool,
    sink: ReportSink,
    found: UnboundedSender<Url>,
}

impl FromLogFinder {
    /// Creates a replay finder over the given log document.
    #[must_use]
    pub fn new(
        log_file: PathBuf,
        filters: FilterSet,
        sink: ReportSink,
        found: UnboundedSender<Url>,
    ) -> Self {
        Self {
            log_file,
            filters,
            alive: AtomicBool::new(true),
            sink,
            found,
        }
    }

    fn collect_hits(&self) -> HashSet<String> {
        let mut locations = HashSet::new();
        let text = match fs::read_to_string(&self.log_file) {
            Ok(text) => text,
            Err(error) => {
                warn!(log_file = %self.log_file.display(), %error, "cannot open prior log file");
                return locations;
            }
        };

        #[allow(clippy::unwrap_used)] // pattern is a literal, compile cannot fail
        let hit_pattern =
            Regex::new(r#"<filefinder\b[^>]* event="hit"[^>]* href="([^"]+)""#).unwrap();
        for capture in hit_pattern.captures_iter(&text) {
            let href = xml::unescape(&capture[1]);
            if self.filters.matches_name(&href) {
                locations.insert(href);
            }
        }

        if locations.is_empty() {
            warn!(log_file = %self.log_file.display(), "no hits found in prior log file");
        }
        locations
    }
}

impl Liveness for FromLogFinder {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Finder for FromLogFinder {
    fn name(&self) -> &str {
        "fromlogfilefilefinder"
    }

    async fn start_search(&self, max_hits: usize) {
        let locations = self.collect_hits();

        self.sink.report(
            self.name(),
            XmlNode::new("filefinder")
                .attr("count", &locations.len().to_string())
                .attr("type", "fromlogfilefilefinder")
                .attr("filter", &self.filters.joined())
                .to_xml(),
        );

        for location in locations.iter().take(max_hits) {
            match Url::parse(location) {
                Ok(url) => emit_hit(&self.sink, self.name(), &self.found, &url),
                Err(_) => {
                    // Hits recorded as bare paths in older logs
                    if let Ok(url) = Url::from_file_path(location) {
                        emit_hit(&self.sink, self.name(), &self.found, &url);
                    } else {
                        warn!(location = %location, "cannot interpret replayed hit");
                    }
                }
            }
        }

        self.alive.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    use super::*;

    const SAMPLE_LOG: &str = r#"<?xml version="1.0" encoding="UTF-8" ?>
<log isodate="2026-08-01T10:00:00Z">
<logitem epoch="1" source="filesystemscan" time="2026-08-01T10:00:01Z">
<filefinder event="hit" href="file:///data/a.pdf" />
</logitem>
<logitem epoch="2" source="filesystemscan" time="2026-08-01T10:00:02Z">
<filefinder event="hit" href="file:///data/b.rtf" />
</logitem>
<logitem epoch="3" source="filesystemscan" time="2026-08-01T10:00:03Z">
<filefinder event="hit" href="file:///data/a.pdf" />
</logitem>
<logitem epoch="4" source="downloader" time="2026-08-01T10:00:04Z">
<download status="success" url="http://example.com/c.pdf" />
</logitem>
</log>
"#;

    fn replay(
        filters: FilterSet,
    ) -> (TempDir, FromLogFinder, mpsc::UnboundedReceiver<Url>) {
        let tmp = TempDir::new().unwrap();
        let log_path = tmp.path().join("old.xml");
        fs::write(&log_path, SAMPLE_LOG).unwrap();
        let (_collector, sink) = crate::collector::LogCollector::new(Vec::new()).unwrap();
        let (found_tx, found_rx) = mpsc::unbounded_channel();
        let finder = FromLogFinder::new(log_path, filters, sink, found_tx);
        (tmp, finder, found_rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Url>) -> Vec<Url> {
        let mut urls = Vec::new();
        while let Ok(url) = rx.try_recv() {
            urls.push(url);
        }
        urls
    }

    #[tokio::test]
    async fn test_replay_deduplicates_repeated_hits() {
        let (_tmp, finder, mut rx) = replay(FilterSet::match_all());
        finder.start_search(10).await;

        // a.pdf appears twice in the log but replays once
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test]
    async fn test_replay_applies_filter_set() {
        let (_tmp, finder, mut rx) = replay(FilterSet::parse("*.pdf").unwrap());
        finder.start_search(10).await;

        let urls = drain(&mut rx);
        assert_eq!(urls.len(), 1);
        assert!(urls[0].path().ends_with("a.pdf"));
    }

    #[tokio::test]
    async fn test_replay_respects_hit_budget() {
        let (_tmp, finder, mut rx) = replay(FilterSet::match_all());
        finder.start_search(1).await;

        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_replay_goes_idle_after_search() {
        let (_tmp, finder, _rx) = replay(FilterSet::match_all());
        assert!(finder.is_alive());
        finder.start_search(10).await;
        assert!(!finder.is_alive());
    }

    #[tokio::test]
    async fn test_replay_missing_log_is_not_fatal() {
        let (_collector, sink) = crate::collector::LogCollector::new(Vec::new()).unwrap();
        let (found_tx, mut found_rx) = mpsc::unbounded_channel();
        let finder = FromLogFinder::new(
            PathBuf::from("/nonexistent/old.xml"),
            FilterSet::match_all(),
            sink,
            found_tx,
        );
        finder.start_search(10).await;

        assert!(drain(&mut found_rx).is_empty());
        assert!(!finder.is_alive());
    }
}

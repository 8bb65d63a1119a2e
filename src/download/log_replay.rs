//! Replay of successful download records from a prior run's log.
//!
//! Feeds the analyzer with already-stored files, skipping discovery
//! and retrieval entirely. Incoming work items are ignored; the
//! replay starts on its own shortly after pipeline startup.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};
use url::Url;

use super::Downloader;
use crate::collector::ReportSink;
use crate::config::FilterSet;
use crate::watchdog::Liveness;
use crate::xml::{self, XmlNode};

/// Delay before the replay starts, giving the rest of the pipeline
/// time to wire up.
const REPLAY_START_DELAY: Duration = Duration::from_millis(500);

/// Replays `<download … status="success" …>` records from a prior log.
pub struct FromLogDownloader {
    log_file: PathBuf,
    filters: FilterSet,
    alive: AtomicBool,
    sink: ReportSink,
    downloaded: UnboundedSender<PathBuf>,
}

impl FromLogDownloader {
    /// Creates a replay downloader over the given log document.
    #[must_use]
    pub fn new(
        log_file: PathBuf,
        filters: FilterSet,
        sink: ReportSink,
        downloaded: UnboundedSender<PathBuf>,
    ) -> Self {
        Self {
            log_file,
            filters,
            alive: AtomicBool::new(true),
            sink,
            downloaded,
        }
    }

    /// Parses the prior log and re-emits every matching stored file.
    /// Spawned once by the pipeline; waits briefly before starting.
    pub async fn start_replay(&self) {
        tokio::time::sleep(REPLAY_START_DELAY).await;

        #[allow(clippy::unwrap_used)] // patterns are literals, compile cannot fail
        let record_pattern =
            Regex::new(r#"<download[^>]* filename="([^"]+)"[^>]* status="success"[^>]* url="([^"]+)""#)
                .unwrap();
        #[allow(clippy::unwrap_used)]
        let engine_results_pattern =
            Regex::new(r#"<searchengine\b[^>]* numresults="([0-9]*)""#).unwrap();

        let mut count = 0usize;
        match fs::read_to_string(&self.log_file) {
            Ok(text) => {
                for line in text.lines() {
                    if let Some(capture) = record_pattern.captures(line) {
                        let filename = xml::unescape(&capture[1]);
                        if self.filters.matches_name(&filename) {
                            count += 1;
                            let _ = self.downloaded.send(PathBuf::from(filename));
                        }
                    } else if let Some(capture) = engine_results_pattern.captures(line) {
                        self.sink.report(
                            self.name(),
                            XmlNode::new("searchengine")
                                .attr("numresults", &capture[1])
                                .to_xml(),
                        );
                    }
                }
                if count == 0 {
                    warn!(log_file = %self.log_file.display(), "no stored files found in prior log");
                }
            }
            Err(error) => {
                warn!(log_file = %self.log_file.display(), %error, "cannot open prior log file");
            }
        }

        self.sink.report(
            self.name(),
            XmlNode::new("downloader")
                .attr("count", &count.to_string())
                .attr("type", "fromlogfiledownloader")
                .attr("filter", &self.filters.joined())
                .to_xml(),
        );
        self.alive.store(false, Ordering::SeqCst);
    }
}

impl Liveness for FromLogDownloader {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downloader for FromLogDownloader {
    fn name(&self) -> &str {
        "fromlogfiledownloader"
    }

    async fn download(&self, url: Url) {
        // Replay ignores discovered work items
        debug!(url = %url, "ignoring work item during log replay");
    }

    async fn final_report(&self) {}
}

//! Local-file pass-through downloader.
//!
//! Used when no real downloader is configured: `file://` work items
//! are handed straight to the analyzer, nothing touches the network.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;
use url::Url;

use super::Downloader;
use crate::collector::ReportSink;
use crate::watchdog::Liveness;
use crate::xml::XmlNode;

/// Hands local files through to the analyzer without retrieval.
pub struct FakeDownloader {
    success_count: AtomicUsize,
    failure_count: AtomicUsize,
    sink: ReportSink,
    downloaded: UnboundedSender<PathBuf>,
}

impl FakeDownloader {
    /// Creates the pass-through downloader.
    #[must_use]
    pub fn new(sink: ReportSink, downloaded: UnboundedSender<PathBuf>) -> Self {
        Self {
            success_count: AtomicUsize::new(0),
            failure_count: AtomicUsize::new(0),
            sink,
            downloaded,
        }
    }
}

impl Liveness for FakeDownloader {
    /// Pass-through is synchronous; there is never outstanding work.
    fn is_alive(&self) -> bool {
        false
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    fn name(&self) -> &str {
        "fakedownloader"
    }

    async fn download(&self, url: Url) {
        if url.scheme() == "file" {
            if let Ok(path) = url.to_file_path() {
                self.sink.report(
                    self.name(),
                    XmlNode::new("download")
                        .attr("filename", &path.display().to_string())
                        .attr("status", "success")
                        .attr("url", url.as_str())
                        .to_xml(),
                );
                self.success_count.fetch_add(1, Ordering::SeqCst);
                let _ = self.downloaded.send(path);
                return;
            }
        }

        warn!(url = %url, "fake downloader can only hand through local files");
        self.sink.report(
            self.name(),
            XmlNode::new("download")
                .attr("message", "cannot-handle-non-local-file")
                .attr("status", "error")
                .attr("url", url.as_str())
                .to_xml(),
        );
        self.failure_count.fetch_add(1, Ordering::SeqCst);
    }

    async fn final_report(&self) {
        self.sink.report(
            self.name(),
            XmlNode::new("download")
                .attr(
                    "count-success",
                    &self.success_count.load(Ordering::SeqCst).to_string(),
                )
                .attr(
                    "count-fail",
                    &self.failure_count.load(Ordering::SeqCst).to_string(),
                )
                .to_xml(),
        );
    }
}

//! HTTP downloader with bounded, per-host-fair concurrency.
//!
//! Work items enter through [`UrlDownloader::download`]; an internal
//! dispatch step starts the next queued request only while the global
//! in-flight count is below its ceiling and the target host's
//! in-flight count is below the (smaller) per-host ceiling. Dispatch
//! is retried re-entrantly on every completion and enqueue — there is
//! no polling loop. All counter read-modify-write sequences and the
//! dispatch decision run under one mutex, because completions arrive
//! on spawned tasks racing the dispatcher.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use dashmap::DashMap;
use reqwest::Client;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};
use url::Url;

use super::filename::{registrable_domain, synthesize_filename};
use super::Downloader;
use crate::collector::ReportSink;
use crate::watchdog::Liveness;
use crate::xml::XmlNode;

/// Global ceiling on concurrently outstanding download requests.
pub const MAX_PARALLEL_DOWNLOADS: usize = 16;

/// Per-hostname ceiling on concurrently outstanding requests.
pub const MAX_PARALLEL_DOWNLOADS_PER_HOST: usize = 4;

/// Base per-request timeout; the effective timeout grows with load.
const BASE_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Additional timeout per concurrently running download.
const REQUEST_TIMEOUT_STEP: Duration = Duration::from_secs(1);

/// Queue and in-flight accounting, guarded by a single mutex.
#[derive(Debug, Default)]
struct DispatchState {
    queue: VecDeque<Url>,
    known: HashSet<String>,
    running: usize,
    per_host: HashMap<String, usize>,
}

struct DownloaderCore {
    client: Client,
    file_pattern: String,
    max_downloads: usize,
    max_parallel: usize,
    max_parallel_per_host: usize,
    state: Mutex<DispatchState>,
    success_count: AtomicUsize,
    failure_count: AtomicUsize,
    domain_count: DashMap<String, u64>,
    sink: ReportSink,
    downloaded: UnboundedSender<PathBuf>,
}

/// Retrieves content for each work item and stores it under a
/// filename synthesized from the configured pattern.
pub struct UrlDownloader {
    core: Arc<DownloaderCore>,
}

impl UrlDownloader {
    /// Creates a downloader with the default concurrency ceilings.
    ///
    /// `max_downloads` caps the number of successful downloads
    /// accepted per run (the hit target).
    #[must_use]
    pub fn new(
        file_pattern: String,
        max_downloads: usize,
        sink: ReportSink,
        downloaded: UnboundedSender<PathBuf>,
    ) -> Self {
        Self::with_limits(
            file_pattern,
            max_downloads,
            MAX_PARALLEL_DOWNLOADS,
            MAX_PARALLEL_DOWNLOADS_PER_HOST,
            sink,
            downloaded,
        )
    }

    /// Creates a downloader with explicit ceilings (tests use small
    /// ones to exercise the queueing discipline).
    #[must_use]
    pub fn with_limits(
        file_pattern: String,
        max_downloads: usize,
        max_parallel: usize,
        max_parallel_per_host: usize,
        sink: ReportSink,
        downloaded: UnboundedSender<PathBuf>,
    ) -> Self {
        Self {
            core: Arc::new(DownloaderCore {
                client: Client::new(),
                file_pattern,
                max_downloads,
                max_parallel,
                max_parallel_per_host,
                state: Mutex::new(DispatchState::default()),
                success_count: AtomicUsize::new(0),
                failure_count: AtomicUsize::new(0),
                domain_count: DashMap::new(),
                sink,
                downloaded,
            }),
        }
    }

    /// Successful downloads so far.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.core.success_count.load(Ordering::SeqCst)
    }

    /// Failed downloads so far (errors and timeouts).
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.core.failure_count.load(Ordering::SeqCst)
    }
}

impl Liveness for UrlDownloader {
    fn is_alive(&self) -> bool {
        self.core
            .state
            .lock()
            .map(|state| state.running > 0 || !state.queue.is_empty())
            .unwrap_or(false)
    }
}

#[async_trait]
impl Downloader for UrlDownloader {
    fn name(&self) -> &str {
        "urldownloader"
    }

    async fn download(&self, url: Url) {
        if url.scheme() != "http" && url.scheme() != "https" {
            warn!(url = %url, scheme = url.scheme(), "untested/unknown protocol/scheme");
            self.core.sink.report(
                self.name(),
                XmlNode::new("download")
                    .attr("message", "Untested/unknown protocol/scheme")
                    .attr("status", "error")
                    .attr("url", url.as_str())
                    .attr("scheme", url.scheme())
                    .to_xml(),
            );
            return;
        }

        if self.core.success_count.load(Ordering::SeqCst) >= self.core.max_downloads {
            debug!(url = %url, max = self.core.max_downloads, "download target reached, ignoring");
            return;
        }

        {
            let Ok(mut state) = self.core.state.lock() else {
                return;
            };
            let canonical = url.to_string();
            if !state.known.insert(canonical) {
                // Duplicate locations are rejected silently
                return;
            }
            state.queue.push_back(url);
        }

        start_next_download(&self.core);
    }

    async fn final_report(&self) {
        let core = &self.core;
        let mut tallies: Vec<(String, u64)> = core
            .domain_count
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        tallies.sort();

        let mut children = String::new();
        for (domain, count) in tallies {
            children.push_str(
                &XmlNode::new("domain-count")
                    .attr("count", &count.to_string())
                    .attr("domain", &domain)
                    .to_xml(),
            );
        }
        let report = XmlNode::new("download")
            .attr(
                "count-success",
                &core.success_count.load(Ordering::SeqCst).to_string(),
            )
            .attr(
                "count-fail",
                &core.failure_count.load(Ordering::SeqCst).to_string(),
            )
            .child_xml("\n")
            .child_xml(&children)
            .to_xml();
        core.sink.report(self.name(), report);
    }
}

/// Pops the queue head when both ceilings allow and spawns its fetch.
/// Called on every enqueue and every completion.
fn start_next_download(core: &Arc<DownloaderCore>) {
    let dispatched = {
        let Ok(mut state) = core.state.lock() else {
            return;
        };
        if state.running >= core.max_parallel {
            None
        } else if let Some(front) = state.queue.front() {
            let host = front.host_str().unwrap_or("").to_string();
            if state.per_host.get(&host).copied().unwrap_or(0) < core.max_parallel_per_host {
                #[allow(clippy::unwrap_used)] // front() was Some under the same lock
                let url = state.queue.pop_front().unwrap();
                state.running += 1;
                *state.per_host.entry(host.clone()).or_insert(0) += 1;
                Some((url, host, state.running, state.queue.len()))
            } else {
                // Head-of-queue host is saturated; retried on the next
                // completion
                None
            }
        } else {
            None
        }
    };

    if let Some((url, host, running, queued)) = dispatched {
        debug!(url = %url, running, queued, "dispatching download");
        let core = Arc::clone(core);
        tokio::spawn(async move {
            fetch_one(&core, url, &host, running).await;
        });
    }
}

/// Runs one request to completion, updates the accounting, reports the
/// outcome, and re-enters the dispatcher.
async fn fetch_one(core: &Arc<DownloaderCore>, url: Url, host: &str, running_at_dispatch: usize) {
    let timeout = BASE_REQUEST_TIMEOUT
        + REQUEST_TIMEOUT_STEP * u32::try_from(running_at_dispatch).unwrap_or(u32::MAX);
    let outcome = tokio::time::timeout(timeout, fetch_payload(&core.client, &url)).await;

    {
        if let Ok(mut state) = core.state.lock() {
            state.running -= 1;
            if let Some(count) = state.per_host.get_mut(host) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    state.per_host.remove(host);
                }
            }
        }
    }

    match outcome {
        Err(_elapsed) => {
            warn!(url = %url, timeout_secs = timeout.as_secs(), "download timed out");
            core.sink.report(
                "urldownloader",
                XmlNode::new("download")
                    .attr("message", "timeout")
                    .attr("status", "error")
                    .attr("url", url.as_str())
                    .to_xml(),
            );
            core.failure_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(Err(detail)) => {
            warn!(url = %url, detail = %detail, "download failed");
            core.sink.report(
                "urldownloader",
                XmlNode::new("download")
                    .attr("detailed", &detail)
                    .attr("message", "download-failed")
                    .attr("status", "error")
                    .attr("url", url.as_str())
                    .to_xml(),
            );
            core.failure_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(Ok(data)) => {
            if store_payload(core, &url, &data) {
                core.success_count.fetch_add(1, Ordering::SeqCst);
            } else {
                core.failure_count.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    start_next_download(core);
}

async fn fetch_payload(client: &Client, url: &Url) -> Result<Vec<u8>, String> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|error| error.to_string())?;
    if !response.status().is_success() {
        return Err(format!("HTTP status {}", response.status()));
    }
    let body = response
        .bytes()
        .await
        .map_err(|error| error.to_string())?;
    Ok(body.to_vec())
}

/// Writes the payload under the synthesized filename and reports the
/// outcome. Returns whether the write counted as a success.
fn store_payload(core: &Arc<DownloaderCore>, url: &Url, data: &[u8]) -> bool {
    let filename = synthesize_filename(&core.file_pattern, url, data, Local::now());
    let path = Path::new(&filename);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(error) = fs::create_dir_all(parent) {
                warn!(directory = %parent.display(), %error, "cannot create directory");
                report_write_failure(core, url, &filename, &error.to_string());
                return false;
            }
        }
    }

    if let Err(error) = fs::write(path, data) {
        warn!(filename = %filename, %error, "cannot write downloaded file");
        report_write_failure(core, url, &filename, &error.to_string());
        return false;
    }

    let domain = registrable_domain(url.host_str().unwrap_or(""));
    if !domain.is_empty() {
        *core.domain_count.entry(domain.clone()).or_insert(0) += 1;
    }

    let mut node = XmlNode::new("download")
        .attr("filename", &filename)
        .attr("status", "success")
        .attr("url", url.as_str());
    if !domain.is_empty() {
        node = node.attr("domain", &domain);
    }
    core.sink.report("urldownloader", node.to_xml());

    debug!(url = %url, filename = %filename, "downloaded");
    let _ = core.downloaded.send(PathBuf::from(filename));
    true
}

fn report_write_failure(core: &Arc<DownloaderCore>, url: &Url, filename: &str, detail: &str) {
    core.sink.report(
        "urldownloader",
        XmlNode::new("download")
            .attr("detailed", detail)
            .attr("filename", filename)
            .attr("message", "cannot-write-file")
            .attr("status", "error")
            .attr("url", url.as_str())
            .to_xml(),
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn downloader(
        pattern: String,
        max_parallel: usize,
        per_host: usize,
    ) -> (UrlDownloader, mpsc::UnboundedReceiver<PathBuf>) {
        let (_collector, sink) = crate::collector::LogCollector::new(Vec::new()).unwrap();
        let (downloaded_tx, downloaded_rx) = mpsc::unbounded_channel();
        let downloader = UrlDownloader::with_limits(
            pattern,
            1000,
            max_parallel,
            per_host,
            sink,
            downloaded_tx,
        );
        (downloader, downloaded_rx)
    }

    async fn wait_for_settle(downloader: &UrlDownloader) {
        for _ in 0..200 {
            if !downloader.is_alive() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("downloader did not settle");
    }

    #[tokio::test]
    async fn test_download_stores_content_under_pattern() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 body".to_vec()))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let pattern = format!("{}/%{{h:8}}", tmp.path().display());
        let (downloader, mut rx) = downloader(pattern, 16, 4);

        let url = Url::parse(&format!("{}/paper.pdf", server.uri())).unwrap();
        downloader.download(url).await;
        wait_for_settle(&downloader).await;

        let stored = rx.try_recv().unwrap();
        assert!(stored.extension().is_some_and(|ext| ext == "pdf"));
        assert_eq!(fs::read(&stored).unwrap(), b"%PDF-1.4 body");
        assert_eq!(downloader.success_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_url_is_fetched_at_most_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF data".to_vec()))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let pattern = format!("{}/%{{h}}", tmp.path().display());
        let (downloader, _rx) = downloader(pattern, 16, 4);

        let url = Url::parse(&format!("{}/same.pdf", server.uri())).unwrap();
        downloader.download(url.clone()).await;
        downloader.download(url.clone()).await;
        downloader.download(url).await;
        wait_for_settle(&downloader).await;

        assert_eq!(server.received_requests().await.unwrap().len(), 1);
        assert_eq!(downloader.success_count(), 1);
    }

    #[tokio::test]
    async fn test_per_host_ceiling_serializes_same_host_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"%PDF x".to_vec())
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let pattern = format!("{}/%{{h:12}}-%{{s}}", tmp.path().display());
        // Global ceiling 2, per-host ceiling 1
        let (downloader, _rx) = downloader(pattern, 2, 1);

        for name in ["a", "b", "c"] {
            let url = Url::parse(&format!("{}/{name}.pdf", server.uri())).unwrap();
            downloader.download(url).await;
        }

        // Within the first response delay only one request may be in
        // flight for the single host
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.received_requests().await.unwrap().len(), 1);

        wait_for_settle(&downloader).await;
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
        assert_eq!(downloader.success_count(), 3);
    }

    #[tokio::test]
    async fn test_global_ceiling_bounds_in_flight_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"%PDF x".to_vec())
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let pattern = format!("{}/%{{h:12}}-%{{s}}", tmp.path().display());
        // Global ceiling 2, generous per-host ceiling
        let (downloader, _rx) = downloader(pattern, 2, 16);

        for index in 0..5 {
            let url = Url::parse(&format!("{}/f{index}.pdf", server.uri())).unwrap();
            downloader.download(url).await;
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.received_requests().await.unwrap().len(), 2);

        wait_for_settle(&downloader).await;
        assert_eq!(downloader.success_count(), 5);
    }

    #[tokio::test]
    async fn test_http_error_is_reported_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let pattern = format!("{}/%{{h}}", tmp.path().display());
        let (downloader, mut rx) = downloader(pattern, 16, 4);

        let url = Url::parse(&format!("{}/missing.pdf", server.uri())).unwrap();
        downloader.download(url).await;
        wait_for_settle(&downloader).await;

        assert_eq!(downloader.failure_count(), 1);
        assert_eq!(downloader.success_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_non_http_scheme_is_rejected_with_error_fragment() {
        let tmp = TempDir::new().unwrap();
        let pattern = format!("{}/%{{h}}", tmp.path().display());
        let (downloader, mut rx) = downloader(pattern, 16, 4);

        let url = Url::parse("ftp://example.com/file.pdf").unwrap();
        downloader.download(url).await;

        assert!(!downloader.is_alive());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_liveness_tracks_outstanding_work() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"%PDF x".to_vec())
                    .set_delay(Duration::from_millis(150)),
            )
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let pattern = format!("{}/%{{h}}", tmp.path().display());
        let (downloader, _rx) = downloader(pattern, 16, 4);
        assert!(!downloader.is_alive());

        let url = Url::parse(&format!("{}/slow.pdf", server.uri())).unwrap();
        downloader.download(url).await;
        assert!(downloader.is_alive());

        wait_for_settle(&downloader).await;
        assert!(!downloader.is_alive());
    }
}

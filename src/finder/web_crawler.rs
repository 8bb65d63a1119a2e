//! Same-host web crawl discovery.
//!
//! Thin by design: link extraction is a regex scan, not an HTML
//! parser. The crawler honors the standard finder contract (hit
//! budget, hit fragments, liveness) and bounds its page visits.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};
use url::Url;

use super::{Finder, SeenSet, emit_hit};
use crate::collector::ReportSink;
use crate::config::FilterSet;
use crate::watchdog::Liveness;
use crate::xml::XmlNode;

/// Per-page fetch timeout.
const PAGE_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Crawls pages under a base URL, emitting links that match the
/// filter set as hits and following same-host HTML links up to a
/// visited-page cap.
pub struct WebCrawler {
    client: Client,
    base_url: Url,
    start_url: Url,
    required_content: Option<Regex>,
    max_visited_pages: usize,
    filters: FilterSet,
    known_hits: SeenSet,
    alive: AtomicBool,
    sink: ReportSink,
    found: UnboundedSender<Url>,
}

impl WebCrawler {
    /// Creates a crawler scoped to `base_url`, starting at
    /// `start_url`.
    ///
    /// `required_content` gates page processing: a fetched page not
    /// matching the pattern contributes neither hits nor further
    /// links.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        filters: FilterSet,
        base_url: Url,
        start_url: Url,
        required_content: Option<Regex>,
        max_visited_pages: usize,
        sink: ReportSink,
        found: UnboundedSender<Url>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url,
            start_url,
            required_content,
            max_visited_pages,
            filters,
            known_hits: SeenSet::new(),
            alive: AtomicBool::new(false),
            sink,
            found,
        }
    }

    async fn fetch_page(&self, page: &Url) -> Option<String> {
        let response = self
            .client
            .get(page.clone())
            .timeout(PAGE_FETCH_TIMEOUT)
            .send()
            .await;
        match response {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(text) => Some(text),
                Err(error) => {
                    warn!(url = %page, %error, "failed to read page body");
                    None
                }
            },
            Ok(response) => {
                warn!(url = %page, status = %response.status(), "page fetch rejected");
                None
            }
            Err(error) => {
                warn!(url = %page, %error, "page fetch failed");
                None
            }
        }
    }
}

impl Liveness for WebCrawler {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Finder for WebCrawler {
    fn name(&self) -> &str {
        "webcrawler"
    }

    async fn start_search(&self, max_hits: usize) {
        self.alive.store(true, Ordering::SeqCst);

        #[allow(clippy::unwrap_used)] // pattern is a literal, compile cannot fail
        let link_pattern = Regex::new(r#"(?i)href\s*=\s*["']([^"'<>]+)["']"#).unwrap();

        let mut queue: VecDeque<Url> = VecDeque::from([self.start_url.clone()]);
        let mut visited: HashSet<String> = HashSet::new();
        let mut hits = 0usize;

        while hits < max_hits {
            let Some(page) = queue.pop_front() else {
                break;
            };
            if visited.len() >= self.max_visited_pages {
                debug!(
                    max_visited_pages = self.max_visited_pages,
                    "visited-page cap reached"
                );
                break;
            }
            if !visited.insert(page.as_str().to_string()) {
                continue;
            }

            let Some(text) = self.fetch_page(&page).await else {
                continue;
            };
            if let Some(required) = &self.required_content {
                if !required.is_match(&text) {
                    debug!(url = %page, "page lacks required content, skipping");
                    continue;
                }
            }

            for capture in link_pattern.captures_iter(&text) {
                let Ok(mut link) = page.join(&capture[1]) else {
                    continue;
                };
                link.set_fragment(None);
                if link.scheme() != "http" && link.scheme() != "https" {
                    continue;
                }

                if self.filters.matches_name(link.path()) {
                    if self.known_hits.insert(link.as_str()) {
                        emit_hit(&self.sink, self.name(), &self.found, &link);
                        hits += 1;
                        if hits >= max_hits {
                            break;
                        }
                    }
                } else if link.host_str() == self.base_url.host_str()
                    && !visited.contains(link.as_str())
                {
                    queue.push_back(link);
                }
            }
        }

        self.sink.report(
            self.name(),
            XmlNode::new("webcrawler")
                .attr("baseurl", self.base_url.as_str())
                .attr("numresults", &hits.to_string())
                .attr("numvisited", &visited.len().to_string())
                .to_xml(),
        );
        self.alive.store(false, Ordering::SeqCst);
    }
}

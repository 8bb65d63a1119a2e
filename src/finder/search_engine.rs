//! Paginated search-engine query discovery.
//!
//! Issues result-page requests from a URL template and extracts
//! candidate links with a regex scan. Result-page layouts differ per
//! engine; the template plus the filter set keep this variant generic
//! and thin.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};
use url::Url;
use url::form_urlencoded;

use super::{Finder, SeenSet, emit_hit};
use crate::collector::ReportSink;
use crate::config::FilterSet;
use crate::watchdog::Liveness;
use crate::xml::XmlNode;

/// Per-request fetch timeout.
const RESULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on result pages fetched per invocation.
const MAX_RESULT_PAGES: usize = 50;

/// Queries a search engine page by page until the hit budget is
/// exhausted or a result page yields nothing new.
pub struct SearchEngineFinder {
    client: Client,
    url_template: String,
    query: String,
    filters: FilterSet,
    known_hits: SeenSet,
    alive: AtomicBool,
    sink: ReportSink,
    found: UnboundedSender<Url>,
}

impl SearchEngineFinder {
    /// Creates a finder from a result-page URL template containing
    /// `{query}` and `{page}` placeholders.
    #[must_use]
    pub fn new(
        filters: FilterSet,
        url_template: String,
        query: String,
        sink: ReportSink,
        found: UnboundedSender<Url>,
    ) -> Self {
        Self {
            client: Client::new(),
            url_template,
            query,
            filters,
            known_hits: SeenSet::new(),
            alive: AtomicBool::new(false),
            sink,
            found,
        }
    }

    fn result_page_url(&self, page: usize) -> Option<Url> {
        // byte_serialize form-encodes spaces as '+'; result page URLs
        // want path-style percent encoding
        let encoded_query = form_urlencoded::byte_serialize(self.query.as_bytes())
            .collect::<String>()
            .replace('+', "%20");
        let address = self
            .url_template
            .replace("{query}", &encoded_query)
            .replace("{page}", &page.to_string());
        match Url::parse(&address) {
            Ok(url) => Some(url),
            Err(error) => {
                warn!(address = %address, %error, "invalid search result page URL");
                None
            }
        }
    }
}

impl Liveness for SearchEngineFinder {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Finder for SearchEngineFinder {
    fn name(&self) -> &str {
        "searchengine"
    }

    async fn start_search(&self, max_hits: usize) {
        self.alive.store(true, Ordering::SeqCst);

        #[allow(clippy::unwrap_used)] // pattern is a literal, compile cannot fail
        let link_pattern = Regex::new(r#"(?i)href\s*=\s*["']([^"'<>]+)["']"#).unwrap();

        let mut hits = 0usize;
        'pages: for page in 0..MAX_RESULT_PAGES {
            if hits >= max_hits {
                break;
            }
            let Some(page_url) = self.result_page_url(page) else {
                break;
            };

            let body = match self
                .client
                .get(page_url.clone())
                .timeout(RESULT_FETCH_TIMEOUT)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    match response.text().await {
                        Ok(text) => text,
                        Err(error) => {
                            warn!(url = %page_url, %error, "failed to read result page");
                            break;
                        }
                    }
                }
                Ok(response) => {
                    warn!(url = %page_url, status = %response.status(), "result page rejected");
                    break;
                }
                Err(error) => {
                    warn!(url = %page_url, %error, "result page fetch failed");
                    break;
                }
            };

            let mut new_on_page = 0usize;
            for capture in link_pattern.captures_iter(&body) {
                let Ok(mut link) = page_url.join(&capture[1]) else {
                    continue;
                };
                link.set_fragment(None);
                if link.scheme() != "http" && link.scheme() != "https" {
                    continue;
                }
                if !self.filters.matches_name(link.path()) {
                    continue;
                }
                if self.known_hits.insert(link.as_str()) {
                    emit_hit(&self.sink, self.name(), &self.found, &link);
                    new_on_page += 1;
                    hits += 1;
                    if hits >= max_hits {
                        break 'pages;
                    }
                }
            }

            // A page with nothing new means the result set is exhausted
            if new_on_page == 0 {
                debug!(page, "no new results, stopping pagination");
                break;
            }
        }

        self.sink.report(
            self.name(),
            XmlNode::new("searchengine")
                .attr("query", &self.query)
                .attr("numresults", &hits.to_string())
                .to_xml(),
        );
        self.alive.store(false, Ordering::SeqCst);
    }
}

//! Flat-list discovery: literal file paths, one per line.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;
use url::Url;

use super::{Finder, emit_hit};
use crate::collector::ReportSink;
use crate::watchdog::Liveness;
use crate::xml::XmlNode;

/// Reads literal paths line-by-line from a list file, emitting only
/// entries that exist as regular files.
pub struct FileFinderList {
    list_file: PathBuf,
    alive: AtomicBool,
    sink: ReportSink,
    found: UnboundedSender<Url>,
}

impl FileFinderList {
    /// Creates a finder over the given list file.
    #[must_use]
    pub fn new(list_file: PathBuf, sink: ReportSink, found: UnboundedSender<Url>) -> Self {
        Self {
            list_file,
            alive: AtomicBool::new(false),
            sink,
            found,
        }
    }
}

impl Liveness for FileFinderList {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Finder for FileFinderList {
    fn name(&self) -> &str {
        "filefinderlist"
    }

    async fn start_search(&self, max_hits: usize) {
        self.alive.store(true, Ordering::SeqCst);

        let mut hits = 0usize;
        match fs::read_to_string(&self.list_file) {
            Ok(text) => {
                for line in text.lines() {
                    if hits >= max_hits {
                        break;
                    }
                    let entry = line.trim();
                    if entry.is_empty() {
                        continue;
                    }
                    let path = Path::new(entry);
                    if path.is_file() {
                        if let Ok(url) = Url::from_file_path(path) {
                            emit_hit(&self.sink, self.name(), &self.found, &url);
                            hits += 1;
                        }
                    } else {
                        warn!(path = entry, "listed file does not exist, skipping");
                    }
                }
            }
            Err(error) => {
                warn!(list_file = %self.list_file.display(), %error, "cannot open list file");
            }
        }

        self.sink.report(
            self.name(),
            XmlNode::new("filefinderlist")
                .attr("listfile", &self.list_file.display().to_string())
                .attr("numresults", &hits.to_string())
                .to_xml(),
        );
        self.alive.store(false, Ordering::SeqCst);
    }
}

//! One-shot breadth-first directory scan.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};
use url::Url;

use super::{Finder, emit_hit};
use crate::collector::ReportSink;
use crate::config::FilterSet;
use crate::watchdog::Liveness;
use crate::xml::XmlNode;

/// Searches a directory tree breadth-first for files matching the
/// filter set, stopping once the hit budget or the tree is exhausted.
pub struct FileSystemScan {
    filters: FilterSet,
    base_dir: PathBuf,
    alive: AtomicBool,
    sink: ReportSink,
    found: UnboundedSender<Url>,
}

impl FileSystemScan {
    /// Creates a scanner rooted at `base_dir`.
    #[must_use]
    pub fn new(
        filters: FilterSet,
        base_dir: PathBuf,
        sink: ReportSink,
        found: UnboundedSender<Url>,
    ) -> Self {
        Self {
            filters,
            base_dir,
            alive: AtomicBool::new(false),
            sink,
            found,
        }
    }
}

impl Liveness for FileSystemScan {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Finder for FileSystemScan {
    fn name(&self) -> &str {
        "filesystemscan"
    }

    async fn start_search(&self, max_hits: usize) {
        self.alive.store(true, Ordering::SeqCst);

        let hits = scan_directory_tree(&self.base_dir, &self.filters, max_hits, |url| {
            emit_hit(&self.sink, self.name(), &self.found, &url);
            true
        });

        self.sink.report(
            self.name(),
            XmlNode::new("filesystemscan")
                .attr("directory", &self.base_dir.display().to_string())
                .attr("filter", &self.filters.joined())
                .attr("numresults", &hits.to_string())
                .to_xml(),
        );
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// Breadth-first traversal shared by the one-shot scan and the
/// directory monitor.
///
/// Directories are visited in queue order; within one directory,
/// entries are processed in case-insensitive lexical order, files
/// before subdirectories. `on_hit` returns whether the location was
/// accepted (a monitor rescan rejects already-known locations without
/// consuming budget). Returns the number of accepted hits.
///
/// A directory that cannot be opened is logged as a warning and
/// skipped, never fatal to the stage.
pub(crate) fn scan_directory_tree(
    base_dir: &Path,
    filters: &FilterSet,
    max_hits: usize,
    mut on_hit: impl FnMut(Url) -> bool,
) -> usize {
    let mut queue: Vec<PathBuf> = vec![base_dir.to_path_buf()];
    let mut hits = 0usize;

    while hits < max_hits && !queue.is_empty() {
        let dir = queue.remove(0);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(error) => {
                warn!(directory = %dir.display(), %error, "cannot open directory, skipping");
                continue;
            }
        };

        let mut files = Vec::new();
        let mut subdirs = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            match entry.file_type() {
                Ok(kind) if kind.is_dir() => subdirs.push(path),
                Ok(kind) if kind.is_file() => files.push(path),
                _ => {}
            }
        }
        sort_lexical(&mut files);
        sort_lexical(&mut subdirs);

        for file in files {
            if !filters.matches_path(&file) {
                continue;
            }
            let Ok(url) = Url::from_file_path(&file) else {
                debug!(path = %file.display(), "skipping non-absolute path");
                continue;
            };
            if on_hit(url) {
                hits += 1;
                if hits >= max_hits {
                    break;
                }
            }
        }

        queue.extend(subdirs);
    }

    hits
}

fn sort_lexical(paths: &mut [PathBuf]) {
    paths.sort_by_key(|path| {
        path.file_name()
            .map(|name| name.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    });
}

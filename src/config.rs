//! Run configuration: a line-oriented `key = value` file read once at
//! startup.
//!
//! The configuration selects exactly one finder, at most one
//! downloader, one analyzer, the filename filter set, the hit budget,
//! and the log output path. Configuration validation is the single
//! synchronous, pre-pipeline failure path in the system: a malformed
//! line or a missing required key aborts startup with a non-zero exit
//! code before any stage runs.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

/// Hit budget used when the configuration does not name one.
pub const DEFAULT_NUM_HITS: usize = 25_000;

/// Default bounded wait for external decompression tools.
pub const DEFAULT_UNCOMPRESS_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors raised while reading or validating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be opened or read.
    #[error("cannot read configuration file {path}: {source}")]
    Io {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A non-comment line without a `key = value` shape.
    #[error("malformed configuration line {line_number}: {line:?}")]
    MalformedLine {
        /// 1-based line number.
        line_number: usize,
        /// The offending line.
        line: String,
    },

    /// `finder:numhits` was present but not a positive integer.
    #[error("invalid hit count {value:?}: must be a positive integer")]
    InvalidNumHits {
        /// The rejected value.
        value: String,
    },

    /// `directorymonitor` value was not `directory,timeout-ms`.
    #[error("invalid directorymonitor value {value:?}: expected <directory>,<timeout-ms>")]
    InvalidDirectoryMonitor {
        /// The rejected value.
        value: String,
    },

    /// No `logcollector` output path was configured.
    #[error("no log collector output path configured")]
    MissingLogCollector,

    /// A filter pattern did not compile.
    #[error("invalid filter pattern: {source}")]
    InvalidFilter {
        /// Underlying regex compilation error.
        #[source]
        source: regex::Error,
    },
}

/// Case-insensitive filename glob filters (`*.pdf|*.odt` style).
///
/// An empty set matches everything, mirroring the behavior of an
/// absent `filter` key.
#[derive(Debug, Clone)]
pub struct FilterSet {
    patterns: Vec<String>,
    regex: Option<Regex>,
}

impl FilterSet {
    /// Builds a filter set from glob patterns.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidFilter`] if the combined pattern
    /// fails to compile.
    pub fn new(patterns: Vec<String>) -> Result<Self, ConfigError> {
        let regex = if patterns.is_empty() {
            None
        } else {
            let alternatives = patterns
                .iter()
                .map(|pattern| glob_to_regex_fragment(pattern))
                .collect::<Vec<_>>()
                .join("|");
            let full = format!("(?i)(^|/)({alternatives})$");
            Some(Regex::new(&full).map_err(|source| ConfigError::InvalidFilter { source })?)
        };
        Ok(Self { patterns, regex })
    }

    /// An empty set matching every filename.
    #[must_use]
    pub fn match_all() -> Self {
        Self {
            patterns: Vec::new(),
            regex: None,
        }
    }

    /// Parses a pipe-separated pattern list, skipping empty entries.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidFilter`] if a pattern fails to
    /// compile.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let patterns = value
            .split('|')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect();
        Self::new(patterns)
    }

    /// Returns whether no patterns are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Tests a bare filename (or URL/path suffix) against the set.
    /// Empty sets match everything.
    #[must_use]
    pub fn matches_name(&self, name: &str) -> bool {
        self.regex.as_ref().is_none_or(|regex| regex.is_match(name))
    }

    /// Tests a path's final component against the set.
    #[must_use]
    pub fn matches_path(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.matches_name(name))
    }

    /// Exact (case-insensitive) membership test for one pattern, used
    /// by the analyzer multiplexer to honor the active filter set.
    #[must_use]
    pub fn contains_pattern(&self, pattern: &str) -> bool {
        self.patterns
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(pattern))
    }

    /// The configured patterns.
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Pipe-joined pattern list for report summaries.
    #[must_use]
    pub fn joined(&self) -> String {
        self.patterns.join("|")
    }
}

fn glob_to_regex_fragment(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '.' => out.push_str("[.]"),
            c if c.is_ascii_alphanumeric() || c == '_' || c == '-' => out.push(c),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out
}

/// Which discovery strategy the run uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinderConfig {
    /// One-shot breadth-first directory scan.
    FileSystemScan {
        /// Root of the traversal.
        base_dir: PathBuf,
    },
    /// Directory scan plus change monitoring until a wall-clock limit.
    DirectoryMonitor {
        /// Root of the traversal and the watch target.
        base_dir: PathBuf,
        /// Absolute watching time limit.
        time_limit: Duration,
    },
    /// Literal file paths, one per line.
    FileFinderList {
        /// The list file.
        list_file: PathBuf,
    },
    /// Replay of hits recorded in a prior run's log.
    FromLogFile {
        /// The prior log document.
        log_file: PathBuf,
    },
    /// Same-host web crawl.
    WebCrawler {
        /// Crawl scope base URL.
        base_url: String,
        /// Optional distinct start page.
        start_url: Option<String>,
        /// Optional content gate: pages not matching are not crawled.
        required_content: Option<String>,
        /// Cap on visited pages; derived from the hit budget when absent.
        max_visited_pages: Option<usize>,
    },
    /// Paginated search-engine queries.
    SearchEngine {
        /// Result page URL template with `{query}` and `{page}` placeholders.
        url_template: String,
        /// The search query.
        query: String,
    },
}

/// Which retrieval strategy the run uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloaderConfig {
    /// HTTP downloads with the given filename pattern.
    Url {
        /// Destination filename template.
        file_pattern: String,
    },
    /// Replay of download records from a prior run's log.
    FromLogFile {
        /// The prior log document.
        log_file: PathBuf,
    },
    /// Local-file pass-through (no network).
    Fake,
}

/// Which analyzer the run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalyzerConfig {
    /// Extension-dispatching multiplexer over all format handlers.
    #[default]
    Multiplexer,
    /// Single-format: PDF only.
    Pdf,
    /// Single-format: RTF only.
    Rtf,
    /// Single-format: ZIP-based containers only.
    Container,
    /// Single-format: legacy compound binaries only.
    CompoundBinary,
}

/// How much text the analyzers extract from document bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextExtraction {
    /// No body text handling.
    #[default]
    None,
    /// Record the text length only.
    Length,
    /// Embed the full text in the report.
    FullText,
    /// Full text plus aspell-based language guessing.
    Aspell,
}

/// Parsed and validated run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Filename filters applied by finders and the analyzer.
    pub filters: FilterSet,
    /// Hit budget per finder invocation and download success cap.
    pub num_hits: usize,
    /// Log collector output path.
    pub log_path: PathBuf,
    /// Selected discovery strategy, if any.
    pub finder: Option<FinderConfig>,
    /// Selected retrieval strategy; defaults to local pass-through.
    pub downloader: Option<DownloaderConfig>,
    /// Selected analyzer.
    pub analyzer: AnalyzerConfig,
    /// Body-text extraction level.
    pub text_extraction: TextExtraction,
    /// Bounded wait for external decompression tools.
    pub uncompress_timeout: Duration,
}

impl Config {
    /// Reads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for unreadable files, malformed
    /// lines, a missing log collector path, or an invalid hit count.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parses configuration text (separated from I/O for testing).
    ///
    /// # Errors
    ///
    /// Same conditions as [`load`](Self::load), minus file I/O.
    #[allow(clippy::too_many_lines)]
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut filters = FilterSet::match_all();
        let mut num_hits = DEFAULT_NUM_HITS;
        let mut log_path: Option<PathBuf> = None;
        let mut finder: Option<FinderConfig> = None;
        let mut downloader: Option<DownloaderConfig> = None;
        let mut analyzer = AnalyzerConfig::default();
        let mut text_extraction = TextExtraction::default();
        let mut uncompress_timeout = DEFAULT_UNCOMPRESS_TIMEOUT;

        // Auxiliary web crawler / search engine keys may appear before
        // or after the line selecting the strategy, so they are
        // collected separately and attached after the scan.
        let mut crawler_base: Option<String> = None;
        let mut crawler_start_url: Option<String> = None;
        let mut crawler_required_content: Option<String> = None;
        let mut crawler_max_visited: Option<usize> = None;
        let mut search_url_template: Option<String> = None;
        let mut search_query: Option<String> = None;

        for (index, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some(separator) = line.find('=') else {
                return Err(ConfigError::MalformedLine {
                    line_number: index + 1,
                    line: raw_line.to_string(),
                });
            };
            let key = line[..separator].trim().to_lowercase();
            let value = line[separator + 1..].trim().to_string();
            if key.is_empty() {
                return Err(ConfigError::MalformedLine {
                    line_number: index + 1,
                    line: raw_line.to_string(),
                });
            }

            match key.as_str() {
                "filter" => {
                    debug!(filter = %value, "configured filename filters");
                    filters = FilterSet::parse(&value)?;
                }
                "finder:numhits" => {
                    num_hits = value
                        .parse::<usize>()
                        .ok()
                        .filter(|count| *count > 0)
                        .ok_or(ConfigError::InvalidNumHits { value })?;
                }
                "logcollector" => {
                    if log_path.is_none() {
                        log_path = Some(PathBuf::from(value));
                    }
                }
                "filesystemscan" => {
                    if finder.is_none() {
                        finder = Some(FinderConfig::FileSystemScan {
                            base_dir: PathBuf::from(value),
                        });
                    }
                }
                "directorymonitor" => {
                    if finder.is_none() {
                        let (dir, timeout_ms) = value
                            .split_once(',')
                            .map(|(dir, timeout)| (dir.trim(), timeout.trim()))
                            .filter(|(dir, timeout)| !dir.is_empty() && !timeout.is_empty())
                            .ok_or_else(|| ConfigError::InvalidDirectoryMonitor {
                                value: value.clone(),
                            })?;
                        let millis = timeout_ms.parse::<u64>().map_err(|_| {
                            ConfigError::InvalidDirectoryMonitor {
                                value: value.clone(),
                            }
                        })?;
                        finder = Some(FinderConfig::DirectoryMonitor {
                            base_dir: PathBuf::from(dir),
                            time_limit: Duration::from_millis(millis),
                        });
                    }
                }
                "filefinderlist" => {
                    if finder.is_none() {
                        finder = Some(FinderConfig::FileFinderList {
                            list_file: PathBuf::from(value),
                        });
                    }
                }
                "fromlogfilefilefinder" => {
                    if finder.is_none() {
                        finder = Some(FinderConfig::FromLogFile {
                            log_file: PathBuf::from(value),
                        });
                    }
                }
                "webcrawler" => {
                    if crawler_base.is_none() {
                        crawler_base = Some(value);
                    }
                }
                "webcrawler:starturl" => crawler_start_url = Some(value),
                "webcrawler:requiredcontent" => crawler_required_content = Some(value),
                "webcrawler:maxvisitedpages" => {
                    crawler_max_visited = value.parse().ok();
                    if crawler_max_visited.is_none() {
                        warn!(value = %value, "ignoring non-numeric webcrawler:maxvisitedpages");
                    }
                }
                "searchengine:urltemplate" => search_url_template = Some(value),
                "searchengine:query" => search_query = Some(value),
                "urldownloader" => {
                    if downloader.is_none() {
                        downloader = Some(DownloaderConfig::Url {
                            file_pattern: value,
                        });
                    }
                }
                "fromlogfiledownloader" => {
                    if downloader.is_none() {
                        downloader = Some(DownloaderConfig::FromLogFile {
                            log_file: PathBuf::from(value),
                        });
                    }
                }
                "fakedownloader" => {
                    if downloader.is_none() {
                        downloader = Some(DownloaderConfig::Fake);
                    }
                }
                "fileanalyzer" => {
                    analyzer = if value.contains("multiplexer") {
                        AnalyzerConfig::Multiplexer
                    } else if value.contains("pdf") {
                        AnalyzerConfig::Pdf
                    } else if value.contains("rtf") {
                        AnalyzerConfig::Rtf
                    } else if value.contains("container") || value.contains("zip") {
                        AnalyzerConfig::Container
                    } else if value.contains("compoundbinary") {
                        AnalyzerConfig::CompoundBinary
                    } else {
                        warn!(value = %value, "unknown fileanalyzer, using multiplexer");
                        AnalyzerConfig::Multiplexer
                    };
                }
                "textextraction" => {
                    text_extraction = match value.to_lowercase().as_str() {
                        "none" => TextExtraction::None,
                        "length" => TextExtraction::Length,
                        "fulltext" => TextExtraction::FullText,
                        "aspell" => TextExtraction::Aspell,
                        other => {
                            warn!(value = other, "invalid textextraction value, keeping default");
                            text_extraction
                        }
                    };
                }
                "uncompresstimeout" => {
                    match value.parse::<u64>() {
                        Ok(secs) if secs > 0 => uncompress_timeout = Duration::from_secs(secs),
                        _ => warn!(value = %value, "ignoring invalid uncompresstimeout"),
                    }
                }
                other => {
                    debug!(key = other, value = %value, "unknown configuration key");
                }
            }
        }

        if finder.is_none() {
            if let Some(base_url) = crawler_base {
                finder = Some(FinderConfig::WebCrawler {
                    base_url,
                    start_url: crawler_start_url,
                    required_content: crawler_required_content,
                    max_visited_pages: crawler_max_visited,
                });
            } else if let (Some(url_template), Some(query)) = (search_url_template, search_query) {
                finder = Some(FinderConfig::SearchEngine {
                    url_template,
                    query,
                });
            }
        }

        let log_path = log_path.ok_or(ConfigError::MissingLogCollector)?;

        Ok(Self {
            filters,
            num_hits,
            log_path,
            finder,
            downloader,
            analyzer,
            text_extraction,
            uncompress_timeout,
        })
    }
}

//! Extension-based dispatch to the format handlers, with
//! compressed-container unwrapping.
//!
//! Nested containers are processed through an explicit work stack
//! instead of recursion: a decompressed payload is pushed as a
//! temporary work item and its scratch file is removed right after
//! its analysis, keeping cleanup a distinct, testable step and the
//! stack depth bounded.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::Analyzer;
use super::formats::{CompoundBinaryAnalyzer, ContainerAnalyzer, PdfAnalyzer, RtfAnalyzer};
use super::language::LanguageGuesser;
use crate::collector::ReportSink;
use crate::config::{AnalyzerConfig, FilterSet, TextExtraction};
use crate::watchdog::Liveness;
use crate::xml::XmlNode;

/// Compression suffixes and the external tools that unwrap them.
const COMPRESSION_TOOLS: [(&str, &str); 4] = [
    (".xz", "unxz"),
    (".gz", "gunzip"),
    (".bz2", "bunzip2"),
    (".lzma", "unlzma"),
];

struct WorkItem {
    path: PathBuf,
    temporary: bool,
}

/// Routes each file to the right format handler by extension, after
/// unwrapping recognized compression suffixes.
pub struct AnalyzerMultiplexer {
    filters: FilterSet,
    formats: AnalyzerConfig,
    pdf: PdfAnalyzer,
    rtf: RtfAnalyzer,
    container: ContainerAnalyzer,
    compound: CompoundBinaryAnalyzer,
    busy: AtomicUsize,
    uncompress_timeout: Duration,
    sink: ReportSink,
}

impl AnalyzerMultiplexer {
    /// Creates a multiplexer holding one handler instance per format.
    ///
    /// `formats` narrows dispatch when a single-format analyzer is
    /// configured; the multiplexer itself is always present.
    #[must_use]
    pub fn new(
        filters: FilterSet,
        formats: AnalyzerConfig,
        text_extraction: TextExtraction,
        uncompress_timeout: Duration,
        language_guesser: &Arc<LanguageGuesser>,
        sink: ReportSink,
    ) -> Self {
        Self {
            pdf: PdfAnalyzer::new(sink.clone(), text_extraction, Arc::clone(language_guesser)),
            rtf: RtfAnalyzer::new(sink.clone(), text_extraction, Arc::clone(language_guesser)),
            container: ContainerAnalyzer::new(sink.clone()),
            compound: CompoundBinaryAnalyzer::new(sink.clone()),
            filters,
            formats,
            busy: AtomicUsize::new(0),
            uncompress_timeout,
            sink,
        }
    }

    fn format_enabled(&self, format: AnalyzerConfig) -> bool {
        self.formats == AnalyzerConfig::Multiplexer || self.formats == format
    }

    /// Dispatches one work item to its handler, honoring the active
    /// filter set.
    async fn dispatch(&self, path: &Path) {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        let Some(extension) = name.rsplit_once('.').map(|(_, extension)| extension) else {
            warn!(path = %path.display(), "file without extension, dropping");
            return;
        };

        let (handler_format, handled) = match extension {
            "pdf" => (AnalyzerConfig::Pdf, true),
            "rtf" => (AnalyzerConfig::Rtf, true),
            "odt" | "ods" | "odp" | "docx" | "pptx" | "xlsx" | "zip" => {
                (AnalyzerConfig::Container, true)
            }
            "doc" | "ppt" | "xls" => (AnalyzerConfig::CompoundBinary, true),
            _ => (AnalyzerConfig::Multiplexer, false),
        };
        if !handled {
            warn!(path = %path.display(), extension, "unsupported file type");
            return;
        }

        if !self.filters.is_empty() && !self.filters.contains_pattern(&format!("*.{extension}")) {
            debug!(path = %path.display(), extension, "skipping unmatched extension");
            return;
        }
        if !self.format_enabled(handler_format) {
            debug!(path = %path.display(), extension, "format not selected for this run");
            return;
        }

        match handler_format {
            AnalyzerConfig::Pdf => self.pdf.analyze(path).await,
            AnalyzerConfig::Rtf => self.rtf.analyze(path).await,
            AnalyzerConfig::Container => self.container.analyze(path).await,
            AnalyzerConfig::CompoundBinary => self.compound.analyze(path).await,
            AnalyzerConfig::Multiplexer => {}
        }
    }

    /// Copies the compressed file to a scratch location, runs the
    /// external decompression tool with a bounded wait, and emits one
    /// `<uncompress>` fragment. Returns the decompressed scratch path
    /// on success. The compressed scratch copy is removed before
    /// returning; the decompressed file is the caller's temporary
    /// work item.
    async fn uncompress(&self, path: &Path, suffix: &str, tool: &str) -> Option<PathBuf> {
        let started = Instant::now();
        let base_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("payload");
        let stem = &base_name[..base_name.len().saturating_sub(suffix.len())];
        let prefix: u64 = rand::random();
        let scratch_dir = std::env::temp_dir();
        let scratch_compressed = scratch_dir.join(format!(".docharvest-{prefix:016x}-{base_name}"));
        let scratch_decompressed = scratch_dir.join(format!(".docharvest-{prefix:016x}-{stem}"));

        let mut success = std::fs::copy(path, &scratch_compressed).is_ok();

        if success {
            success = self
                .run_tool(tool, &scratch_compressed, &scratch_decompressed)
                .await;
        }

        let origin_hash = hash_file(path);
        let destination_hash = if success {
            hash_file(&scratch_decompressed)
        } else {
            String::new()
        };

        let origin = XmlNode::new("origin")
            .attr("sha256", &origin_hash)
            .text(&path.display().to_string())
            .to_xml();
        let destination = XmlNode::new("destination")
            .attr("sha256", &destination_hash)
            .text(&scratch_decompressed.display().to_string())
            .to_xml();
        self.sink.report(
            "fileanalyzermultiplexer",
            XmlNode::new("uncompress")
                .attr("status", if success { "success" } else { "error" })
                .attr("tool", tool)
                .attr(
                    "time",
                    &started.elapsed().as_millis().to_string(),
                )
                .child_xml("\n")
                .child_xml(&origin)
                .child_xml(&destination)
                .to_xml(),
        );

        let _ = std::fs::remove_file(&scratch_compressed);
        if success {
            Some(scratch_decompressed)
        } else {
            let _ = std::fs::remove_file(&scratch_decompressed);
            None
        }
    }

    async fn run_tool(&self, tool: &str, input: &Path, output: &Path) -> bool {
        let Ok(input_file) = std::fs::File::open(input) else {
            return false;
        };
        let Ok(output_file) = std::fs::File::create(output) else {
            return false;
        };

        let child = Command::new(tool)
            .arg("-c")
            .stdin(Stdio::from(input_file))
            .stdout(Stdio::from(output_file))
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        let mut child = match child {
            Ok(child) => child,
            Err(error) => {
                warn!(tool, %error, "cannot start decompression tool");
                return false;
            }
        };

        match tokio::time::timeout(self.uncompress_timeout, child.wait()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(error)) => {
                warn!(tool, %error, "decompression tool I/O error");
                false
            }
            Err(_elapsed) => {
                warn!(
                    tool,
                    timeout_secs = self.uncompress_timeout.as_secs(),
                    "decompression tool timed out"
                );
                let _ = child.kill().await;
                false
            }
        }
    }
}

impl Liveness for AnalyzerMultiplexer {
    fn is_alive(&self) -> bool {
        self.busy.load(Ordering::SeqCst) > 0
            || self.pdf.is_alive()
            || self.rtf.is_alive()
            || self.container.is_alive()
            || self.compound.is_alive()
    }
}

#[async_trait]
impl Analyzer for AnalyzerMultiplexer {
    fn name(&self) -> &str {
        "fileanalyzermultiplexer"
    }

    async fn analyze_file(&self, path: &Path) {
        self.busy.fetch_add(1, Ordering::SeqCst);
        debug!(path = %path.display(), "analyzing file");

        let mut stack = vec![WorkItem {
            path: path.to_path_buf(),
            temporary: false,
        }];

        while let Some(item) = stack.pop() {
            let name = item
                .path
                .file_name()
                .and_then(|name| name.to_str())
                .map(str::to_lowercase)
                .unwrap_or_default();

            let compression = COMPRESSION_TOOLS
                .iter()
                .find(|(suffix, _)| name.ends_with(suffix))
                .copied();
            if let Some((suffix, tool)) = compression {
                if let Some(decompressed) = self.uncompress(&item.path, suffix, tool).await {
                    stack.push(WorkItem {
                        path: decompressed,
                        temporary: true,
                    });
                }
            } else {
                self.dispatch(&item.path).await;
            }

            if item.temporary {
                if let Err(error) = std::fs::remove_file(&item.path) {
                    debug!(path = %item.path.display(), %error, "cannot remove temporary file");
                }
            }
        }

        self.busy.fetch_sub(1, Ordering::SeqCst);
    }
}

fn hash_file(path: &Path) -> String {
    std::fs::read(path)
        .map(|data| format!("{:x}", Sha256::digest(&data)))
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;
    use std::io::{self, Write};
    use std::sync::Mutex;

    use tempfile::TempDir;

    use super::*;
    use crate::collector::LogCollector;

    /// Write adapter sharing its buffer with the test body.
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        multiplexer: AnalyzerMultiplexer,
        buffer: SharedBuffer,
        collector_task: tokio::task::JoinHandle<()>,
        sink: ReportSink,
    }

    fn fixture(filters: FilterSet) -> Fixture {
        let buffer = SharedBuffer::default();
        let (collector, sink) = LogCollector::new(buffer.clone()).unwrap();
        let collector_task = tokio::spawn(collector.run());
        let multiplexer = AnalyzerMultiplexer::new(
            filters,
            AnalyzerConfig::Multiplexer,
            TextExtraction::None,
            Duration::from_secs(30),
            &Arc::new(LanguageGuesser::with_binary("/nonexistent/aspell")),
            sink.clone(),
        );
        Fixture {
            multiplexer,
            buffer,
            collector_task,
            sink,
        }
    }

    impl Fixture {
        async fn finish(self) -> String {
            self.sink.close();
            self.collector_task.await.unwrap();
            self.buffer.contents()
        }
    }

    const SAMPLE_PDF: &[u8] =
        b"%PDF-1.4\n1 0 obj\n<< /Type /Page /MediaBox [0 0 595 842] >>\nendobj\n%%EOF\n";

    #[tokio::test]
    async fn test_pdf_is_dispatched_to_pdf_handler() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("doc.pdf");
        fs::write(&path, SAMPLE_PDF).unwrap();

        let fixture = fixture(FilterSet::match_all());
        fixture.multiplexer.analyze_file(&path).await;

        let log = fixture.finish().await;
        assert!(log.contains("source=\"fileanalyzerpdf\""));
        assert!(log.contains("<fileanalysis "));
    }

    #[tokio::test]
    async fn test_filter_miss_is_skipped_silently() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("doc.pdf");
        fs::write(&path, SAMPLE_PDF).unwrap();

        let fixture = fixture(FilterSet::parse("*.rtf").unwrap());
        fixture.multiplexer.analyze_file(&path).await;

        let log = fixture.finish().await;
        assert!(!log.contains("<fileanalysis "));
    }

    #[tokio::test]
    async fn test_unknown_extension_is_dropped_with_warning_only() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("image.xyz");
        fs::write(&path, b"data").unwrap();

        let fixture = fixture(FilterSet::match_all());
        fixture.multiplexer.analyze_file(&path).await;

        let log = fixture.finish().await;
        assert!(!log.contains("<fileanalysis "));
    }

    #[tokio::test]
    async fn test_compressed_pdf_produces_uncompress_and_analysis_fragments() {
        // Requires a working gzip in the environment; skip when absent
        if std::process::Command::new("gzip").arg("--version").output().is_err() {
            eprintln!("gzip not available, skipping");
            return;
        }

        let tmp = TempDir::new().unwrap();
        let plain = tmp.path().join("doc.pdf");
        fs::write(&plain, SAMPLE_PDF).unwrap();
        let status = std::process::Command::new("gzip")
            .arg(plain.to_str().unwrap())
            .status()
            .unwrap();
        assert!(status.success());
        let compressed = tmp.path().join("doc.pdf.gz");
        assert!(compressed.exists());

        let fixture = fixture(FilterSet::match_all());
        fixture.multiplexer.analyze_file(&compressed).await;
        assert!(!fixture.multiplexer.is_alive());

        let log = fixture.finish().await;
        // Exactly one uncompress fragment and one nested analysis
        assert_eq!(log.matches("<uncompress ").count(), 1);
        assert!(log.contains("status=\"success\""));
        assert_eq!(log.matches("<fileanalysis ").count(), 1);

        // Both temporary artifacts are gone
        let leftovers: Vec<_> = fs::read_dir(std::env::temp_dir())
            .unwrap()
            .flatten()
            .filter(|entry| {
                entry.file_name().to_string_lossy().contains("-doc.pdf")
                    && entry.file_name().to_string_lossy().starts_with(".docharvest-")
            })
            .collect();
        assert!(leftovers.is_empty(), "scratch files left behind: {leftovers:?}");
    }

    #[tokio::test]
    async fn test_failed_decompression_emits_only_error_fragment() {
        let tmp = TempDir::new().unwrap();
        let bogus = tmp.path().join("broken.pdf.gz");
        fs::write(&bogus, b"this is not gzip data").unwrap();

        let fixture = fixture(FilterSet::match_all());
        fixture.multiplexer.analyze_file(&bogus).await;

        let log = fixture.finish().await;
        assert_eq!(log.matches("<uncompress ").count(), 1);
        assert!(log.contains("status=\"error\""));
        assert_eq!(log.matches("<fileanalysis ").count(), 0);
    }

    #[tokio::test]
    async fn test_single_format_selection_narrows_dispatch() {
        let tmp = TempDir::new().unwrap();
        let pdf = tmp.path().join("doc.pdf");
        fs::write(&pdf, SAMPLE_PDF).unwrap();
        let rtf = tmp.path().join("doc.rtf");
        fs::write(&rtf, b"{\\rtf1 hello}").unwrap();

        let buffer = SharedBuffer::default();
        let (collector, sink) = LogCollector::new(buffer.clone()).unwrap();
        let collector_task = tokio::spawn(collector.run());
        let multiplexer = AnalyzerMultiplexer::new(
            FilterSet::match_all(),
            AnalyzerConfig::Rtf,
            TextExtraction::None,
            Duration::from_secs(30),
            &Arc::new(LanguageGuesser::with_binary("/nonexistent/aspell")),
            sink.clone(),
        );

        multiplexer.analyze_file(&pdf).await;
        multiplexer.analyze_file(&rtf).await;

        sink.close();
        collector_task.await.unwrap();
        let log = buffer.contents();
        assert!(!log.contains("source=\"fileanalyzerpdf\""));
        assert!(log.contains("source=\"fileanalyzerrtf\""));
    }
}

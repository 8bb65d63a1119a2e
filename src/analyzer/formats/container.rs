//! ZIP-based container classification (ODF and OpenXML).
//!
//! Content extraction from these containers is delegated to external
//! tooling; this handler verifies the container signature and reports
//! the classified document type.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::analyzer::result::{AnalysisResult, error_fragment};
use crate::collector::ReportSink;
use crate::watchdog::Liveness;

/// Classifies ODF / OpenXML / plain ZIP containers.
pub struct ContainerAnalyzer {
    sink: ReportSink,
    busy: AtomicBool,
}

impl ContainerAnalyzer {
    /// Creates the handler.
    #[must_use]
    pub fn new(sink: ReportSink) -> Self {
        Self {
            sink,
            busy: AtomicBool::new(false),
        }
    }

    /// Analyzes one container file, emitting exactly one fragment.
    pub async fn analyze(&self, path: &Path) {
        self.busy.store(true, Ordering::SeqCst);
        let filename = path.display().to_string();

        let fragment = match std::fs::read(path) {
            Ok(data) if data.len() > 2 && data.starts_with(b"PK") && data[2] < 10 => {
                let mut result = AnalysisResult::new(&filename);
                result.mimetype = Some(mimetype_for(path).to_string());
                result.into_fragment()
            }
            Ok(_) => error_fragment(&filename, "not-a-zip-container"),
            Err(error) => {
                debug!(filename = %filename, %error, "cannot read container");
                error_fragment(&filename, "cannot-open")
            }
        };

        self.sink.report("fileanalyzercontainer", fragment);
        self.busy.store(false, Ordering::SeqCst);
    }
}

impl Liveness for ContainerAnalyzer {
    fn is_alive(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

fn mimetype_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "odt" => "application/vnd.oasis.opendocument.text",
        "ods" => "application/vnd.oasis.opendocument.spreadsheet",
        "odp" => "application/vnd.oasis.opendocument.presentation",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/zip",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn handler() -> ContainerAnalyzer {
        let (_collector, sink) = crate::collector::LogCollector::new(Vec::new()).unwrap();
        ContainerAnalyzer::new(sink)
    }

    #[test]
    fn test_mimetype_classification() {
        assert_eq!(
            mimetype_for(Path::new("a.odt")),
            "application/vnd.oasis.opendocument.text"
        );
        assert_eq!(
            mimetype_for(Path::new("a.DOCX")),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        );
        assert_eq!(mimetype_for(Path::new("a.zip")), "application/zip");
    }

    #[tokio::test]
    async fn test_analyze_zip_signature_returns_to_idle() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("doc.docx");
        fs::write(&path, b"PK\x03\x04rest-of-container").unwrap();

        let handler = handler();
        handler.analyze(&path).await;
        assert!(!handler.is_alive());
    }

    #[tokio::test]
    async fn test_analyze_rejects_non_zip_payload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("doc.odt");
        fs::write(&path, b"plain text").unwrap();

        let handler = handler();
        handler.analyze(&path).await;
        assert!(!handler.is_alive());
    }
}

//! Legacy compound-binary classification (.doc/.ppt/.xls).
//!
//! Decoding the OLE2 structure is delegated to external tooling; this
//! handler verifies the signature and reports the classified type.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::analyzer::result::{AnalysisResult, error_fragment};
use crate::collector::ReportSink;
use crate::watchdog::Liveness;

/// OLE2 compound file signature.
const COMPOUND_MAGIC: [u8; 8] = [0xd0, 0xcf, 0x11, 0xe0, 0xa1, 0xb1, 0x1a, 0xe1];

/// Classifies legacy Microsoft compound-binary documents.
pub struct CompoundBinaryAnalyzer {
    sink: ReportSink,
    busy: AtomicBool,
}

impl CompoundBinaryAnalyzer {
    /// Creates the handler.
    #[must_use]
    pub fn new(sink: ReportSink) -> Self {
        Self {
            sink,
            busy: AtomicBool::new(false),
        }
    }

    /// Analyzes one compound-binary file, emitting exactly one
    /// fragment.
    pub async fn analyze(&self, path: &Path) {
        self.busy.store(true, Ordering::SeqCst);
        let filename = path.display().to_string();

        let fragment = match std::fs::read(path) {
            Ok(data) if data.starts_with(&COMPOUND_MAGIC) => {
                let mut result = AnalysisResult::new(&filename);
                result.mimetype = Some(mimetype_for(path).to_string());
                result.into_fragment()
            }
            Ok(_) => error_fragment(&filename, "not-a-compound-binary"),
            Err(error) => {
                debug!(filename = %filename, %error, "cannot read compound binary");
                error_fragment(&filename, "cannot-open")
            }
        };

        self.sink.report("fileanalyzercompoundbinary", fragment);
        self.busy.store(false, Ordering::SeqCst);
    }
}

impl Liveness for CompoundBinaryAnalyzer {
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
        "ppt" => "application/vnd.ms-powerpoint",
        "xls" => "application/vnd.ms-excel",
        _ => "application/msword",
    }
}

//! File analysis: route local files to format-specific extraction and
//! emit structured report fragments.

mod formats;
pub mod language;
mod multiplexer;
pub mod result;

use std::path::Path;

use async_trait::async_trait;

use crate::watchdog::Liveness;

pub use language::LanguageGuesser;
pub use multiplexer::AnalyzerMultiplexer;
pub use result::{AnalysisResult, error_fragment, evaluate_paper_size};

/// An analysis strategy.
///
/// Failures are reported through the log collector as data; the
/// method never returns an error, and implementations guarantee their
/// liveness flag returns to false afterward even on failure.
#[async_trait]
pub trait Analyzer: Liveness {
    /// Stage name used to tag report fragments.
    fn name(&self) -> &str;

    /// Analyzes one local file.
    async fn analyze_file(&self, path: &Path);
}

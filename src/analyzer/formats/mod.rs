//! Format-specific extraction routines.
//!
//! Handlers are intentionally thin: deep format decoding is the job
//! of external tooling, so each handler verifies the magic signature,
//! scrapes the metadata it can reach with simple scans, and emits one
//! report fragment. A handler that cannot open or parse its input
//! emits a single error fragment and always returns its liveness flag
//! to false afterward, so idleness detection is never blocked by a
//! stuck analyzer.

mod compound;
mod container;
mod pdf;
mod rtf;

pub use compound::CompoundBinaryAnalyzer;
pub use container::ContainerAnalyzer;
pub use pdf::PdfAnalyzer;
pub use rtf::RtfAnalyzer;

/// Collects printable ASCII runs from raw bytes as a crude body-text
/// sample, capped at `max_len` characters.
pub(crate) fn ascii_text_sample(data: &[u8], max_len: usize) -> String {
    let mut sample = String::new();
    let mut run = String::new();
    for &byte in data {
        if byte.is_ascii_graphic() || byte == b' ' {
            run.push(byte as char);
        } else {
            if run.trim().split_whitespace().count() >= 2 && run.len() >= 8 {
                sample.push_str(run.trim());
                sample.push(' ');
                if sample.len() >= max_len {
                    break;
                }
            }
            run.clear();
        }
    }
    sample.truncate(max_len);
    sample.trim().to_string()
}

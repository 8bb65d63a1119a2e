//! PDF metadata extraction.
//!
//! Scrapes the document information dictionary, a page-count
//! estimate, and the first MediaBox with plain byte scans. No object
//! streams are decoded; validation-grade parsing belongs to external
//! tools.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDate;
use regex::Regex;
use tracing::debug;

use super::ascii_text_sample;
use crate::analyzer::language::LanguageGuesser;
use crate::analyzer::result::{AnalysisResult, error_fragment};
use crate::collector::ReportSink;
use crate::config::TextExtraction;
use crate::watchdog::Liveness;

/// Cap on the crude body-text sample used for language guessing.
const TEXT_SAMPLE_LIMIT: usize = 16 * 1024;

/// Extracts metadata from PDF documents.
pub struct PdfAnalyzer {
    sink: ReportSink,
    text_extraction: TextExtraction,
    language_guesser: Arc<LanguageGuesser>,
    busy: AtomicBool,
}

impl PdfAnalyzer {
    /// Creates the handler.
    #[must_use]
    pub fn new(
        sink: ReportSink,
        text_extraction: TextExtraction,
        language_guesser: Arc<LanguageGuesser>,
    ) -> Self {
        Self {
            sink,
            text_extraction,
            language_guesser,
            busy: AtomicBool::new(false),
        }
    }

    /// Analyzes one PDF file, emitting exactly one fragment.
    pub async fn analyze(&self, path: &Path) {
        self.busy.store(true, Ordering::SeqCst);
        let filename = path.display().to_string();

        let fragment = match std::fs::read(path) {
            Ok(data) if data.starts_with(b"%PDF") => self.extract(&filename, &data).await,
            Ok(_) => error_fragment(&filename, "not-a-pdf"),
            Err(error) => {
                debug!(filename = %filename, %error, "cannot read pdf");
                error_fragment(&filename, "cannot-open")
            }
        };

        self.sink.report("fileanalyzerpdf", fragment);
        self.busy.store(false, Ordering::SeqCst);
    }

    async fn extract(&self, filename: &str, data: &[u8]) -> String {
        let mut result = AnalysisResult::new(filename);
        result.mimetype = Some("application/pdf".to_string());
        result.version = pdf_version(data);
        result.title = info_string(data, "Title");
        result.author = info_string(data, "Author");
        result.subject = info_string(data, "Subject");
        result.tool = info_string(data, "Producer").or_else(|| info_string(data, "Creator"));
        result.creation_date = info_string(data, "CreationDate").and_then(|raw| parse_pdf_date(&raw));
        result.modification_date = info_string(data, "ModDate").and_then(|raw| parse_pdf_date(&raw));
        result.num_pages = count_pages(data);
        if let Some((width, height)) = media_box_mm(data) {
            result.paper_width_mm = Some(width);
            result.paper_height_mm = Some(height);
        }

        match self.text_extraction {
            TextExtraction::None => {}
            TextExtraction::Length => {
                result.text_length = Some(ascii_text_sample(data, TEXT_SAMPLE_LIMIT).len());
            }
            TextExtraction::FullText => {
                let sample = ascii_text_sample(data, TEXT_SAMPLE_LIMIT);
                result.text_length = Some(sample.len());
                result.text = Some(sample);
            }
            TextExtraction::Aspell => {
                let sample = ascii_text_sample(data, TEXT_SAMPLE_LIMIT);
                result.text_length = Some(sample.len());
                result.language = self.language_guesser.guess_language(&sample).await;
            }
        }

        result.into_fragment()
    }
}

impl Liveness for PdfAnalyzer {
    fn is_alive(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

fn pdf_version(data: &[u8]) -> Option<String> {
    let header = data.get(..16)?;
    let text = String::from_utf8_lossy(header);
    text.strip_prefix("%PDF-")
        .and_then(|rest| rest.split_whitespace().next())
        .map(|version| version.trim_end_matches(['\r', '\n']).to_string())
}

/// Finds `/Key (literal string)` in the raw bytes, handling escaped
/// parentheses. Hex-encoded strings are not decoded.
fn info_string(data: &[u8], key: &str) -> Option<String> {
    let needle = format!("/{key}");
    let needle = needle.as_bytes();
    let mut search_from = 0usize;

    while let Some(position) = find(data, needle, search_from) {
        let mut index = position + needle.len();
        while data.get(index) == Some(&b' ') {
            index += 1;
        }
        if data.get(index) != Some(&b'(') {
            search_from = position + needle.len();
            continue;
        }
        index += 1;

        let mut value = Vec::new();
        let mut depth = 1usize;
        while let Some(&byte) = data.get(index) {
            match byte {
                b'\\' => {
                    if let Some(&escaped) = data.get(index + 1) {
                        value.push(escaped);
                        index += 2;
                        continue;
                    }
                    index += 1;
                }
                b'(' => {
                    depth += 1;
                    value.push(byte);
                    index += 1;
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    value.push(byte);
                    index += 1;
                }
                _ => {
                    value.push(byte);
                    index += 1;
                }
            }
        }

        let text = String::from_utf8_lossy(&value).trim().to_string();
        if text.is_empty() {
            search_from = index;
            continue;
        }
        return Some(text);
    }
    None
}

fn find(data: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|position| from + position)
}

/// Counts page objects (`/Type /Page`, not `/Pages`).
fn count_pages(data: &[u8]) -> Option<usize> {
    let text = String::from_utf8_lossy(data);
    #[allow(clippy::unwrap_used)] // pattern is a literal, compile cannot fail
    let page_pattern = Regex::new(r"/Type\s*/Page([^s]|$)").unwrap();
    let count = page_pattern.find_iter(&text).count();
    (count > 0).then_some(count)
}

/// Parses the first `/MediaBox [x0 y0 x1 y1]` into millimetres.
fn media_box_mm(data: &[u8]) -> Option<(u32, u32)> {
    let text = String::from_utf8_lossy(data);
    #[allow(clippy::unwrap_used)] // pattern is a literal, compile cannot fail
    let media_box_pattern = Regex::new(
        r"/MediaBox\s*\[\s*([\d.+-]+)\s+([\d.+-]+)\s+([\d.+-]+)\s+([\d.+-]+)\s*\]",
    )
    .unwrap();
    let capture = media_box_pattern.captures(&text)?;
    let x0: f64 = capture[1].parse().ok()?;
    let y0: f64 = capture[2].parse().ok()?;
    let x1: f64 = capture[3].parse().ok()?;
    let y1: f64 = capture[4].parse().ok()?;

    // PDF units are 1/72 inch
    let width_mm = ((x1 - x0).abs() * 25.4 / 72.0).round();
    let height_mm = ((y1 - y0).abs() * 25.4 / 72.0).round();
    if width_mm <= 0.0 || height_mm <= 0.0 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let dimensions = (width_mm as u32, height_mm as u32);
    Some(dimensions)
}

/// Parses a PDF `D:YYYYMMDD…` date.
fn parse_pdf_date(raw: &str) -> Option<NaiveDate> {
    let digits = raw.trim_start_matches("D:");
    if digits.len() < 8 {
        return None;
    }
    let year: i32 = digits.get(0..4)?.parse().ok()?;
    let month: u32 = digits.get(4..6)?.parse().ok()?;
    let day: u32 = digits.get(6..8)?.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    const SAMPLE_PDF: &[u8] = b"%PDF-1.4\n\
1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
2 0 obj\n<< /Type /Pages /Kids [3 0 R 4 0 R] /Count 2 >>\nendobj\n\
3 0 obj\n<< /Type /Page /MediaBox [0 0 595 842] >>\nendobj\n\
4 0 obj\n<< /Type /Page >>\nendobj\n\
5 0 obj\n<< /Title (Harvest Notes) /Author (A\\. Author) /Producer (TestWriter 1.0)\n\
/CreationDate (D:20110930120000Z) >>\nendobj\n\
trailer\n<< /Info 5 0 R >>\n%%EOF\n";

    fn handler() -> PdfAnalyzer {
        let (_collector, sink) = crate::collector::LogCollector::new(Vec::new()).unwrap();
        PdfAnalyzer::new(
            sink,
            TextExtraction::None,
            Arc::new(LanguageGuesser::with_binary("/nonexistent/aspell")),
        )
    }

    // ==================== Scan Helper Tests ====================

    #[test]
    fn test_pdf_version_from_header() {
        assert_eq!(pdf_version(b"%PDF-1.4\nrest"), Some("1.4".to_string()));
        assert_eq!(pdf_version(b"%PDF-1.7"), Some("1.7".to_string()));
    }

    #[test]
    fn test_info_string_simple() {
        assert_eq!(
            info_string(SAMPLE_PDF, "Title"),
            Some("Harvest Notes".to_string())
        );
    }

    #[test]
    fn test_info_string_unescapes_parentheses() {
        let data = br"<< /Title (A \(draft\) title) >>";
        assert_eq!(info_string(data, "Title"), Some("A (draft) title".to_string()));
    }

    #[test]
    fn test_info_string_absent_key() {
        assert_eq!(info_string(SAMPLE_PDF, "Keywords"), None);
    }

    #[test]
    fn test_count_pages_excludes_pages_node() {
        assert_eq!(count_pages(SAMPLE_PDF), Some(2));
    }

    #[test]
    fn test_media_box_a4_in_millimetres() {
        // 595 x 842 points is A4
        assert_eq!(media_box_mm(SAMPLE_PDF), Some((210, 297)));
    }

    #[test]
    fn test_parse_pdf_date() {
        assert_eq!(
            parse_pdf_date("D:20110930120000Z"),
            NaiveDate::from_ymd_opt(2011, 9, 30)
        );
        assert_eq!(parse_pdf_date("D:2011"), None);
    }

    // ==================== Handler Tests ====================

    #[tokio::test]
    async fn test_analyze_populates_fragment() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sample.pdf");
        fs::write(&path, SAMPLE_PDF).unwrap();

        let handler = handler();
        handler.analyze(&path).await;
        assert!(!handler.is_alive());
    }

    #[tokio::test]
    async fn test_analyze_missing_file_returns_to_idle() {
        let handler = handler();
        handler.analyze(Path::new("/nonexistent/x.pdf")).await;
        assert!(!handler.is_alive());
    }

    #[tokio::test]
    async fn test_analyze_non_pdf_payload_returns_to_idle() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fake.pdf");
        fs::write(&path, b"plain text").unwrap();

        let handler = handler();
        handler.analyze(&path).await;
        assert!(!handler.is_alive());
    }
}

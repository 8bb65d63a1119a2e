//! RTF metadata extraction.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDate;
use regex::Regex;
use tracing::debug;

use crate::analyzer::language::LanguageGuesser;
use crate::analyzer::result::{AnalysisResult, error_fragment};
use crate::collector::ReportSink;
use crate::config::TextExtraction;
use crate::watchdog::Liveness;

/// Cap on extracted body text.
const TEXT_LIMIT: usize = 16 * 1024;

/// Extracts metadata from RTF documents.
pub struct RtfAnalyzer {
    sink: ReportSink,
    text_extraction: TextExtraction,
    language_guesser: Arc<LanguageGuesser>,
    busy: AtomicBool,
}

impl RtfAnalyzer {
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

    /// Analyzes one RTF file, emitting exactly one fragment.
    pub async fn analyze(&self, path: &Path) {
        self.busy.store(true, Ordering::SeqCst);
        let filename = path.display().to_string();

        let fragment = match std::fs::read(path) {
            Ok(data) if data.starts_with(b"{\\rtf") => {
                let text = String::from_utf8_lossy(&data).into_owned();
                self.extract(&filename, &text).await
            }
            Ok(_) => error_fragment(&filename, "not-an-rtf"),
            Err(error) => {
                debug!(filename = %filename, %error, "cannot read rtf");
                error_fragment(&filename, "cannot-open")
            }
        };

        self.sink.report("fileanalyzerrtf", fragment);
        self.busy.store(false, Ordering::SeqCst);
    }

    async fn extract(&self, filename: &str, text: &str) -> String {
        let mut result = AnalysisResult::new(filename);
        result.mimetype = Some("text/rtf".to_string());
        result.title = group_text(text, "title");
        result.author = group_text(text, "author");
        result.subject = group_text(text, "subject");
        result.tool = group_text(text, "*\\generator").map(|tool| {
            tool.trim_end_matches(';').to_string()
        });
        result.creation_date = rtf_date(text, "creatim");
        result.modification_date = rtf_date(text, "revtim");
        result.num_pages = page_count(text);

        if let (Some(width), Some(height)) =
            (twips_value(text, "paperw"), twips_value(text, "paperh"))
        {
            result.paper_width_mm = Some(twips_to_mm(width));
            result.paper_height_mm = Some(twips_to_mm(height));
        }

        match self.text_extraction {
            TextExtraction::None => {}
            TextExtraction::Length => {
                result.text_length = Some(body_text(text, TEXT_LIMIT).len());
            }
            TextExtraction::FullText => {
                let body = body_text(text, TEXT_LIMIT);
                result.text_length = Some(body.len());
                result.text = Some(body);
            }
            TextExtraction::Aspell => {
                let body = body_text(text, TEXT_LIMIT);
                result.text_length = Some(body.len());
                result.language = self.language_guesser.guess_language(&body).await;
            }
        }

        result.into_fragment()
    }
}

impl Liveness for RtfAnalyzer {
    fn is_alive(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

/// Extracts the text of a `{\name …}` group.
fn group_text(text: &str, name: &str) -> Option<String> {
    let needle = format!("{{\\{name}");
    let start = text.find(&needle)? + needle.len();
    let rest = &text[start..];
    let end = rest.find('}')?;
    let value = rest[..end].trim().to_string();
    (!value.is_empty()).then_some(value)
}

/// Parses `\name\yrY\moM\dyD` timestamps from the info group.
fn rtf_date(text: &str, name: &str) -> Option<NaiveDate> {
    let pattern = format!(r"\\{name}\\yr(\d+)\\mo(\d+)\\dy(\d+)");
    let capture = Regex::new(&pattern).ok()?.captures(text)?;
    NaiveDate::from_ymd_opt(
        capture[1].parse().ok()?,
        capture[2].parse().ok()?,
        capture[3].parse().ok()?,
    )
}

fn twips_value(text: &str, control: &str) -> Option<u32> {
    let pattern = format!(r"\\{control}(\d+)");
    let capture = Regex::new(&pattern).ok()?.captures(text)?;
    capture[1].parse().ok()
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn twips_to_mm(twips: u32) -> u32 {
    // 1440 twips per inch
    (f64::from(twips) * 25.4 / 1440.0).round() as u32
}

/// Explicit page breaks plus one.
fn page_count(text: &str) -> Option<usize> {
    #[allow(clippy::unwrap_used)] // pattern is a literal, compile cannot fail
    let page_break = Regex::new(r"\\page\b").unwrap();
    let breaks = page_break.find_iter(text).count();
    Some(breaks + 1)
}

/// Strips control words and group braces to recover plain body text.
fn body_text(text: &str, limit: usize) -> String {
    let mut out = String::new();
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                // Skip the control word and its optional numeric argument
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '-' {
                        chars.next();
                    } else {
                        if next == ' ' {
                            chars.next();
                        }
                        break;
                    }
                }
            }
            '{' | '}' => {}
            '\r' | '\n' => {}
            c => {
                out.push(c);
                if out.len() >= limit {
                    break;
                }
            }
        }
    }
    out.trim().to_string()
}

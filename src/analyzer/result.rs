//! Per-file analysis result accumulation.
//!
//! A [`AnalysisResult`] is a transient container populated by one
//! format-specific parse, consumed exactly once to build the
//! `<fileanalysis>` report fragment, then discarded.

use chrono::NaiveDate;

use crate::xml::{XmlNode, escape, format_date};

/// Paper size classes recognized by [`evaluate_paper_size`].
const PAPER_SIZES: [(&str, u32, u32); 3] = [
    ("A4", 210, 297),
    ("Letter", 216, 279),
    ("Legal", 216, 256),
];

/// Tolerance in millimetres when classifying paper sizes.
const PAPER_SIZE_TOLERANCE: u32 = 2;

/// Accumulator for the metadata one format handler extracts from one
/// file.
#[derive(Debug, Default, Clone)]
pub struct AnalysisResult {
    /// Analyzed file path.
    pub filename: String,
    /// Document MIME type.
    pub mimetype: Option<String>,
    /// Format version (e.g. `1.4` for PDF).
    pub version: Option<String>,
    /// Creation date from document metadata.
    pub creation_date: Option<NaiveDate>,
    /// Modification date from document metadata.
    pub modification_date: Option<NaiveDate>,
    /// Document title.
    pub title: Option<String>,
    /// Document author.
    pub author: Option<String>,
    /// Document subject.
    pub subject: Option<String>,
    /// Producing/editing tool signature.
    pub tool: Option<String>,
    /// Number of pages.
    pub num_pages: Option<usize>,
    /// Page width in millimetres.
    pub paper_width_mm: Option<u32>,
    /// Page height in millimetres.
    pub paper_height_mm: Option<u32>,
    /// Guessed body language.
    pub language: Option<String>,
    /// Length of the extracted body text, when measured.
    pub text_length: Option<usize>,
    /// Extracted body text, when full-text extraction is on.
    pub text: Option<String>,
}

impl AnalysisResult {
    /// Creates an empty result for the given file.
    #[must_use]
    pub fn new(filename: &str) -> Self {
        Self {
            filename: filename.to_string(),
            ..Self::default()
        }
    }

    /// Consumes the accumulator into one `<fileanalysis>` fragment.
    #[must_use]
    pub fn into_fragment(self) -> String {
        let mut inner = String::new();

        let mut meta = String::new();
        if let Some(mimetype) = &self.mimetype {
            let mut fileformat = format!("<mimetype>{}</mimetype>\n", escape(mimetype));
            if let Some(version) = &self.version {
                fileformat.push_str(
                    &XmlNode::new("version").text(version).to_xml(),
                );
            }
            meta.push_str(&XmlNode::new("fileformat").child_xml("\n").child_xml(&fileformat).to_xml());
        }
        if let Some(tool) = &self.tool {
            let tool_xml = XmlNode::new("tool")
                .attr("type", "producer")
                .text(tool)
                .to_xml();
            meta.push_str(&XmlNode::new("tools").child_xml("\n").child_xml(&tool_xml).to_xml());
        }
        if !meta.is_empty() {
            inner.push_str(&XmlNode::new("meta").child_xml("\n").child_xml(&meta).to_xml());
        }

        let mut header = String::new();
        if let Some(date) = self.creation_date {
            header.push_str(&format_date(date, "creation"));
        }
        if let Some(date) = self.modification_date {
            header.push_str(&format_date(date, "modification"));
        }
        if let Some(title) = &self.title {
            header.push_str(&XmlNode::new("title").text(title).to_xml());
        }
        if let Some(author) = &self.author {
            header.push_str(&XmlNode::new("author").text(author).to_xml());
        }
        if let Some(subject) = &self.subject {
            header.push_str(&XmlNode::new("subject").text(subject).to_xml());
        }
        if let (Some(width), Some(height)) = (self.paper_width_mm, self.paper_height_mm) {
            header.push_str(&evaluate_paper_size(width, height));
        }
        if !header.is_empty() {
            inner.push_str(&XmlNode::new("header").child_xml("\n").child_xml(&header).to_xml());
        }

        let mut body = XmlNode::new("body");
        if let Some(num_pages) = self.num_pages {
            body = body.attr("numpages", &num_pages.to_string());
        }
        if let Some(text_length) = self.text_length {
            body = body.attr("length", &text_length.to_string());
        }
        let mut body_inner = String::new();
        if let Some(language) = &self.language {
            body_inner.push_str(
                &XmlNode::new("language")
                    .attr("tool", "aspell")
                    .text(language)
                    .to_xml(),
            );
        }
        if let Some(text) = &self.text {
            body_inner.push_str(&XmlNode::new("text").text(text).to_xml());
        }
        if !body_inner.is_empty() {
            body = body.child_xml("\n").child_xml(&body_inner);
        }
        inner.push_str(&body.to_xml());

        XmlNode::new("fileanalysis")
            .attr("filename", &self.filename)
            .attr("status", "ok")
            .child_xml("\n")
            .child_xml(&inner)
            .to_xml()
    }
}

/// Builds an error fragment for a file that could not be analyzed.
#[must_use]
pub fn error_fragment(filename: &str, message: &str) -> String {
    XmlNode::new("fileanalysis")
        .attr("filename", filename)
        .attr("message", message)
        .attr("status", "error")
        .to_xml()
}

/// Classifies page dimensions into a named paper size, allowing a few
/// millimetres of tolerance in either orientation.
#[must_use]
pub fn evaluate_paper_size(width_mm: u32, height_mm: u32) -> String {
    let orientation = if width_mm > height_mm {
        "landscape"
    } else {
        "portrait"
    };
    let node = XmlNode::new("papersize")
        .attr("width", &width_mm.to_string())
        .attr("height", &height_mm.to_string())
        .attr("orientation", orientation);

    let matches = |value: u32, target: u32| value.abs_diff(target) <= PAPER_SIZE_TOLERANCE;
    for (name, short, long) in PAPER_SIZES {
        if (matches(width_mm, short) && matches(height_mm, long))
            || (matches(width_mm, long) && matches(height_mm, short))
        {
            return node.text(name).to_xml();
        }
    }
    node.to_xml()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== into_fragment Tests ====================

    #[test]
    fn test_fragment_carries_header_metadata() {
        let mut result = AnalysisResult::new("/store/paper.pdf");
        result.mimetype = Some("application/pdf".to_string());
        result.version = Some("1.4".to_string());
        result.title = Some("On Harvesting".to_string());
        result.author = Some("A. Author".to_string());
        result.creation_date = NaiveDate::from_ymd_opt(2011, 9, 30);
        result.num_pages = Some(12);

        let fragment = result.into_fragment();
        assert!(fragment.starts_with("<fileanalysis "));
        assert!(fragment.contains("filename=\"/store/paper.pdf\""));
        assert!(fragment.contains("status=\"ok\""));
        assert!(fragment.contains("<mimetype>application/pdf</mimetype>"));
        assert!(fragment.contains("<title>On Harvesting</title>"));
        assert!(fragment.contains("base=\"creation\""));
        assert!(fragment.contains("<body numpages=\"12\" />"));
    }

    #[test]
    fn test_fragment_escapes_metadata_text() {
        let mut result = AnalysisResult::new("/store/a.pdf");
        result.title = Some("Q&A <draft>".to_string());

        let fragment = result.into_fragment();
        assert!(fragment.contains("<title>Q&amp;A &lt;draft&gt;</title>"));
    }

    #[test]
    fn test_fragment_minimal_result_is_wellformed() {
        let fragment = AnalysisResult::new("/store/x.pdf").into_fragment();
        assert!(fragment.contains("<body />"));
        assert!(fragment.ends_with("</fileanalysis>\n"));
    }

    #[test]
    fn test_fragment_language_section() {
        let mut result = AnalysisResult::new("/store/x.pdf");
        result.language = Some("en".to_string());
        let fragment = result.into_fragment();
        assert!(fragment.contains("<language tool=\"aspell\">en</language>"));
    }

    #[test]
    fn test_error_fragment_shape() {
        let fragment = error_fragment("/store/x.pdf", "cannot-open");
        assert!(fragment.contains("status=\"error\""));
        assert!(fragment.contains("message=\"cannot-open\""));
    }

    // ==================== evaluate_paper_size Tests ====================

    #[test]
    fn test_paper_size_a4_portrait() {
        let xml = evaluate_paper_size(210, 297);
        assert!(xml.contains(">A4</papersize>"));
        assert!(xml.contains("orientation=\"portrait\""));
    }

    #[test]
    fn test_paper_size_a4_landscape() {
        let xml = evaluate_paper_size(297, 210);
        assert!(xml.contains(">A4</papersize>"));
        assert!(xml.contains("orientation=\"landscape\""));
    }

    #[test]
    fn test_paper_size_letter_with_tolerance() {
        let xml = evaluate_paper_size(215, 280);
        assert!(xml.contains(">Letter</papersize>"));
    }

    #[test]
    fn test_paper_size_unnamed_dimensions() {
        let xml = evaluate_paper_size(100, 100);
        assert!(!xml.contains("A4"));
        assert!(xml.contains("width=\"100\""));
        assert!(xml.ends_with("/>\n"));
    }
}

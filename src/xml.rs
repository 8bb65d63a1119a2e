//! XML text escaping and report-fragment building.
//!
//! Every stage in the pipeline describes its events as small XML
//! fragments which the log collector concatenates into one document.
//! This module provides the escaping helpers and a tiny node builder
//! so fragments stay well-formed without pulling in a full XML stack.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc};

/// Makes a text XML-safe by rewriting critical symbols such as `<`, `&` or `>`.
#[must_use]
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Rewrites XML entities like `&amp;` back to plain text.
#[must_use]
pub fn unescape(xml: &str) -> String {
    // Longest entities first so "&amp;lt;" decodes in two steps, not one
    xml.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// A single XML element with attributes and optional inner text.
///
/// Attributes are kept in a `BTreeMap` so rendering order is
/// deterministic regardless of insertion order.
#[derive(Debug, Default, Clone)]
pub struct XmlNode {
    name: String,
    attributes: BTreeMap<String, String>,
    text: String,
}

impl XmlNode {
    /// Creates an empty element with the given tag name.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attributes: BTreeMap::new(),
            text: String::new(),
        }
    }

    /// Sets an attribute, escaping the value.
    #[must_use]
    pub fn attr(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), escape(value));
        self
    }

    /// Appends raw inner XML. The caller is responsible for the
    /// well-formedness of nested fragments.
    #[must_use]
    pub fn child_xml(mut self, xml: &str) -> Self {
        self.text.push_str(xml);
        self
    }

    /// Appends escaped inner text.
    #[must_use]
    pub fn text(mut self, text: &str) -> Self {
        self.text.push_str(&escape(text));
        self
    }

    /// Renders the element, self-closing when it has no inner content.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attributes {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(value);
            out.push('"');
        }
        if self.text.is_empty() {
            out.push_str(" />\n");
        } else {
            out.push('>');
            out.push_str(&self.text);
            out.push_str("</");
            out.push_str(&self.name);
            out.push_str(">\n");
        }
        out
    }
}

/// Renders a date as a metadata fragment like
/// `<date base="creation" day="30" epoch="1317333600" month="9" year="2011">2011-09-30</date>`.
#[must_use]
pub fn format_date(date: NaiveDate, base: &str) -> String {
    let epoch = date
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(0);
    XmlNode::new("date")
        .attr("base", base)
        .attr("epoch", &epoch.to_string())
        .attr("year", &date.year().to_string())
        .attr("month", &date.month().to_string())
        .attr("day", &date.day().to_string())
        .text(&date.format("%Y-%m-%d").to_string())
        .to_xml()
}

/// Current time as an ISO-8601 UTC string (second precision).
#[must_use]
pub fn iso_now() -> String {
    iso_timestamp(Utc::now())
}

/// Formats a timestamp as ISO-8601 UTC with second precision.
#[must_use]
pub fn iso_timestamp(when: DateTime<Utc>) -> String {
    when.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== escape/unescape Tests ====================

    #[test]
    fn test_escape_rewrites_critical_symbols() {
        assert_eq!(escape("a<b>&\"c\"'d'"), "a&lt;b&gt;&amp;&quot;c&quot;&apos;d&apos;");
    }

    #[test]
    fn test_escape_leaves_plain_text_alone() {
        assert_eq!(escape("plain text 123"), "plain text 123");
    }

    #[test]
    fn test_unescape_inverts_escape() {
        let original = "file <1> & \"two\"";
        assert_eq!(unescape(&escape(original)), original);
    }

    #[test]
    fn test_unescape_amp_last_avoids_double_decode() {
        // "&amp;lt;" is the escaped form of the literal text "&lt;"
        assert_eq!(unescape("&amp;lt;"), "&lt;");
    }

    // ==================== XmlNode Tests ====================

    #[test]
    fn test_node_self_closing_without_content() {
        let xml = XmlNode::new("download")
            .attr("status", "error")
            .attr("url", "http://example.com/a")
            .to_xml();
        assert_eq!(
            xml,
            "<download status=\"error\" url=\"http://example.com/a\" />\n"
        );
    }

    #[test]
    fn test_node_with_inner_text_is_closed() {
        let xml = XmlNode::new("title").text("On Files & Folders").to_xml();
        assert_eq!(xml, "<title>On Files &amp; Folders</title>\n");
    }

    #[test]
    fn test_node_attribute_values_are_escaped() {
        let xml = XmlNode::new("hit").attr("href", "a&b\"c").to_xml();
        assert!(xml.contains("href=\"a&amp;b&quot;c\""));
    }

    #[test]
    fn test_node_attribute_order_is_deterministic() {
        let a = XmlNode::new("n").attr("z", "1").attr("a", "2").to_xml();
        let b = XmlNode::new("n").attr("a", "2").attr("z", "1").to_xml();
        assert_eq!(a, b);
    }

    // ==================== format_date Tests ====================

    #[test]
    fn test_format_date_renders_iso_body_and_parts() {
        let date = NaiveDate::from_ymd_opt(2011, 9, 30).unwrap();
        let xml = format_date(date, "creation");
        assert!(xml.contains("base=\"creation\""));
        assert!(xml.contains("year=\"2011\""));
        assert!(xml.contains("month=\"9\""));
        assert!(xml.contains("day=\"30\""));
        assert!(xml.contains(">2011-09-30</date>"));
    }

    #[test]
    fn test_iso_timestamp_shape() {
        let ts = iso_now();
        assert_eq!(ts.len(), 20);
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], "T");
    }
}

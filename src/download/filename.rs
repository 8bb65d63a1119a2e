//! Destination filename synthesis for downloaded content.
//!
//! Filenames come from a configurable pattern with placeholders:
//!
//! - `%{h}` / `%{h:N}` — hex SHA-256 of the content (optionally the
//!   first `N` characters)
//! - `%{s}` — the source URL, sanitized to filesystem-safe characters
//! - `%{d}` — the sanitized registrable domain of the source host
//! - `%{D:fmt}` — current date/time in chrono strftime syntax (`%V`
//!   gives the ISO week number, `%j` the day of the year)
//! - `%{x}` — best-guess file extension, inferred from the URL first
//!   and from magic-byte sniffing as a fallback
//!
//! Substitution order is fixed: domain, date/time, hash, source URL,
//! extension last.

use chrono::{DateTime, Local};
use chrono::format::{Item, StrftimeItems};
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::warn;
use url::Url;

/// Extensions whose casing is normalized to lower-case in synthesized
/// filenames.
const KNOWN_EXTENSIONS: [&str; 8] = [
    ".pdf.xz", ".pdf.lzma", ".pdf.gz", ".pdf", ".odt", ".docx", ".doc", ".rtf",
];

/// Second-level labels under which a third host label still belongs to
/// the registrable domain (e.g. `example.co.uk`).
const REGISTRY_SECOND_LEVELS: [&str; 7] = ["ac", "co", "com", "edu", "gov", "net", "org"];

/// Synthesizes the destination filename for one downloaded payload.
#[must_use]
pub fn synthesize_filename(
    pattern: &str,
    url: &Url,
    data: &[u8],
    now: DateTime<Local>,
) -> String {
    let mut filename = pattern.to_string();

    // 1. Domain
    let host = url.host_str().unwrap_or("");
    let domain = registrable_domain(host);
    let replacement = if domain.is_empty() {
        if host.is_empty() {
            "DOMAIN".to_string()
        } else {
            sanitize_host(host)
        }
    } else {
        sanitize_host(&domain)
    };
    filename = filename.replace("%{d}", &replacement);

    // 2. Date/time
    #[allow(clippy::unwrap_used)] // pattern is a literal, compile cannot fail
    let datetime_pattern = Regex::new(r"%\{D:([^}]+)\}").unwrap();
    while let Some(capture) = datetime_pattern.captures(&filename) {
        let format = capture[1].to_string();
        let whole = capture.get(0).map_or("", |m| m.as_str()).to_string();
        let rendered = if StrftimeItems::new(&format).any(|item| matches!(item, Item::Error)) {
            warn!(format = %format, "invalid date/time format in filename pattern");
            "DATETIME".to_string()
        } else {
            now.format(&format).to_string()
        };
        filename = filename.replace(&whole, &rendered);
    }

    // 3. Content hash
    let digest = format!("{:x}", Sha256::digest(data));
    #[allow(clippy::unwrap_used)] // pattern is a literal, compile cannot fail
    let hash_pattern = Regex::new(r"%\{h(?::(\d+))?\}").unwrap();
    while let Some(capture) = hash_pattern.captures(&filename) {
        let whole = capture.get(0).map_or("", |m| m.as_str()).to_string();
        let rendered = match capture.get(1).and_then(|m| m.as_str().parse::<usize>().ok()) {
            Some(length) if length > 0 && length <= digest.len() => digest[..length].to_string(),
            _ => digest.clone(),
        };
        filename = filename.replace(&whole, &rendered);
    }

    // 4. Sanitized source URL
    filename = filename.replace("%{s}", &sanitize_url(url));

    // 5. Extension, inferred last so it can look at the whole name
    let extension = extension_from_url(url).or_else(|| sniff_extension(data, url.as_str()));
    let extension = extension.unwrap_or_default();
    filename = filename.replace("%{x}", &extension);
    if !extension.is_empty() {
        ensure_extension(&mut filename, &extension);
    }

    for known in KNOWN_EXTENSIONS {
        filename = normalize_extension_case(&filename, known);
    }

    if let Some(position) = filename.find("%{") {
        warn!(gap = &filename[position..], "filename pattern gap was not filled");
    }

    filename
}

/// Rewrites a URL into a filesystem-safe token: the query is dropped,
/// non-alphanumeric characters become underscores, and a trailing
/// extension (plus optional compression suffix) gets its dots back.
#[must_use]
pub fn sanitize_url(url: &Url) -> String {
    let without_query = match url.as_str().find('?') {
        Some(position) => &url.as_str()[..position],
        None => url.as_str(),
    };
    let mut token: String = without_query
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();

    #[allow(clippy::unwrap_used)] // patterns are literals, compile cannot fail
    let compression_suffix = Regex::new(r"(?i)_(lzma|xz|gz|bz2)$").unwrap();
    token = compression_suffix.replace(&token, ".$1").into_owned();
    #[allow(clippy::unwrap_used)]
    let extension_suffix =
        Regex::new(r"(?i)_([a-z0-9]{1,4})((?:\.(?:lzma|xz|gz|bz2))?)$").unwrap();
    token = extension_suffix.replace(&token, ".$1$2").into_owned();

    token
}

/// Replaces every character outside `[.0-9a-z-]` in a hostname with
/// `X`.
#[must_use]
pub fn sanitize_host(host: &str) -> String {
    host.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-' {
                c
            } else {
                'X'
            }
        })
        .collect()
}

/// Best-effort registrable domain: the last two host labels, or three
/// when the second-to-last is a well-known registry prefix. IP
/// addresses and single labels are returned unchanged.
#[must_use]
pub fn registrable_domain(host: &str) -> String {
    let host = host.to_lowercase();
    if host.parse::<std::net::IpAddr>().is_ok() {
        return host;
    }
    let labels: Vec<&str> = host.split('.').filter(|label| !label.is_empty()).collect();
    match labels.len() {
        0 => String::new(),
        1 | 2 => labels.join("."),
        _ => {
            let second_level = labels[labels.len() - 2];
            let keep = if REGISTRY_SECOND_LEVELS.contains(&second_level) {
                3
            } else {
                2
            };
            labels[labels.len() - keep..].join(".")
        }
    }
}

/// Extracts an explicit extension (2-4 characters, optionally plus a
/// compression suffix) from the URL path, lower-cased and without the
/// leading dot.
#[must_use]
pub fn extension_from_url(url: &Url) -> Option<String> {
    #[allow(clippy::unwrap_used)] // pattern is a literal, compile cannot fail
    let pattern =
        Regex::new(r"(?i)\.([a-z0-9]{2,4}(?:\.(?:lzma|xz|gz|bz2))?)$").unwrap();
    let last_segment = url.path_segments()?.next_back()?;
    pattern
        .captures(last_segment)
        .map(|capture| capture[1].to_lowercase())
}

/// Guesses an extension from magic-byte prefixes, falling back to
/// well-known markers in the URL itself.
#[must_use]
pub fn sniff_extension(data: &[u8], url: &str) -> Option<String> {
    let url = url.to_lowercase();
    let extension = if data.starts_with(b"%PDF") || url.contains(".pdf") {
        "pdf"
    } else if data.starts_with(b"{\\rtf") || url.contains(".rtf") {
        "rtf"
    } else if url.contains(".odt") {
        "odt"
    } else if url.contains(".ods") {
        "ods"
    } else if url.contains(".odp") {
        "odp"
    } else if url.contains(".docx") {
        "docx"
    } else if url.contains(".pptx") {
        "pptx"
    } else if url.contains(".xlsx") {
        "xlsx"
    } else if url.contains(".doc") {
        "doc"
    } else if url.contains(".ppt") {
        "ppt"
    } else if url.contains(".xls") {
        "xls"
    } else if data.starts_with(&[0xd0, 0xcf, 0x11]) {
        // Legacy compound binary, .doc being the most common carrier
        "doc"
    } else if data.len() > 2 && data.starts_with(b"PK") && data[2] < 10 {
        // ZIP container, could be ODF or OpenXML
        "zip"
    } else {
        return None;
    };
    Some(extension.to_string())
}

/// Appends `.extension` unless the filename already ends with it
/// (case-insensitive).
pub fn ensure_extension(filename: &mut String, extension: &str) {
    if filename.is_empty() || extension.is_empty() {
        return;
    }
    let with_dot = if extension.starts_with('.') {
        extension.to_string()
    } else {
        format!(".{extension}")
    };
    if !filename.to_lowercase().ends_with(&with_dot.to_lowercase()) {
        filename.push_str(&with_dot);
    }
}

fn normalize_extension_case(filename: &str, extension: &str) -> String {
    let lower = filename.to_lowercase();
    if lower.ends_with(extension) && !filename.ends_with(extension) {
        let cut = filename.len() - extension.len();
        format!("{}{}", &filename[..cut], extension)
    } else {
        filename.to_string()
    }
}

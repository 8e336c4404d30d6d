//! Mapping between content-store records and working-copy files.
//!
//! Covers content-type detection by extension, locale namespacing of page
//! file names, page path parsing, asset hashing and the metadata header
//! written at the top of every page file.

use std::collections::HashMap;

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::models::Page;

/// Page content formats that map to text files in the working copy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Markdown,
    Html,
}

impl ContentType {
    /// Classify a relative path by extension. `None` means binary asset.
    pub fn from_path(rel_path: &str) -> Option<Self> {
        let file_name = rel_path.rsplit('/').next().unwrap_or(rel_path);
        let (_, ext) = file_name.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "md" | "markdown" => Some(Self::Markdown),
            "html" | "htm" => Some(Self::Html),
            _ => None,
        }
    }

    /// File extension written for pages of this type.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Html => "html",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Html => "html",
        }
    }

    pub fn from_str_val(s: &str) -> Option<Self> {
        match s {
            "markdown" => Some(Self::Markdown),
            "html" => Some(Self::Html),
            _ => None,
        }
    }
}

/// Locale namespacing policy of the host content store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespacing {
    pub default_locale: String,
    /// Whether the store runs with multiple namespaced locales.
    pub enabled: bool,
}

impl Default for Namespacing {
    fn default() -> Self {
        Self {
            default_locale: "en".to_string(),
            enabled: false,
        }
    }
}

impl Namespacing {
    /// Working-copy file name for a page.
    ///
    /// The locale becomes a leading folder when `always_namespace` is set,
    /// or when namespacing is enabled and the locale is not the default.
    pub fn page_file_name(
        &self,
        path: &str,
        locale: &str,
        content_type: ContentType,
        always_namespace: bool,
    ) -> String {
        let file_name = format!("{}.{}", path, content_type.extension());
        if always_namespace || (self.enabled && self.default_locale != locale) {
            format!("{}/{}", locale, file_name)
        } else {
            file_name
        }
    }
}

/// Locale and store path of a page file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLocation {
    pub locale: String,
    pub path: String,
}

/// Parse a working-copy relative path into a page location.
///
/// Empty, `.` and `..` segments are dropped, a leading locale-code segment
/// selects the locale and the content extension is stripped.
pub fn page_location(rel_path: &str, default_locale: &str) -> PageLocation {
    let mut segments: Vec<&str> = rel_path
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .collect();

    let mut locale = default_locale.to_string();
    if segments.len() > 1 && is_locale_code(segments[0]) {
        locale = segments.remove(0).to_string();
    }

    if let Some(last) = segments.last_mut() {
        if ContentType::from_path(last).is_some() {
            if let Some((stem, _)) = last.rsplit_once('.') {
                *last = stem;
            }
        }
    }

    let path = if segments.is_empty() {
        "home".to_string()
    } else {
        segments.join("/")
    };

    PageLocation { locale, path }
}

/// `xx` or `xx-yy`, ASCII letters only.
fn is_locale_code(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    let letters = |b: &[u8]| b.iter().all(u8::is_ascii_alphabetic);
    match bytes.len() {
        2 => letters(bytes),
        5 => letters(&bytes[..2]) && bytes[2] == b'-' && letters(&bytes[3..]),
        _ => false,
    }
}

/// Content-derived hash used by the store to key assets by path.
pub fn asset_hash(rel_path: &str) -> String {
    hex::encode(Sha1::digest(rel_path.as_bytes()))
}

/// Render a page as a working-copy file: metadata header, blank line, body.
pub fn render_page_file(page: &Page) -> String {
    let meta = [
        ("title", page.title.clone()),
        ("description", page.description.clone()),
        ("published", page.is_published.to_string()),
        (
            "date",
            page.updated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        ),
        ("tags", page.tags.join(", ")),
        ("editor", page.editor_key.clone()),
        (
            "dateCreated",
            page.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        ),
    ];
    let header = meta
        .iter()
        .map(|(k, v)| format!("{}: {}", k, v))
        .collect::<Vec<_>>()
        .join("\n");

    match page.content_type {
        ContentType::Markdown => format!("---\n{}\n---\n\n{}", header, page.content),
        ContentType::Html => format!("<!--\n{}\n-->\n\n{}", header, page.content),
    }
}

/// Split a page file into its metadata header and body.
///
/// Files without a recognizable header yield an empty map and the full text.
pub fn parse_page_file(content_type: ContentType, text: &str) -> (HashMap<String, String>, String) {
    let (open, close) = match content_type {
        ContentType::Markdown => ("---\n", "\n---"),
        ContentType::Html => ("<!--\n", "\n-->"),
    };
    let normalized = text.replace("\r\n", "\n");

    let Some(rest) = normalized.strip_prefix(open) else {
        return (HashMap::new(), normalized);
    };
    let Some(end) = rest.find(close) else {
        return (HashMap::new(), normalized);
    };

    let meta = rest[..end]
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    let body = rest[end + close.len()..].trim_start_matches('\n').to_string();
    (meta, body)
}

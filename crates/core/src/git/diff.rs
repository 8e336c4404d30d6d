//! Parser for `git diff --numstat -M` output.
//!
//! Rename detection is left to git; this module only decodes the three path
//! forms git prints: unchanged `path`, plain `old => new`, and braced
//! `prefix{old => new}suffix`.

use serde::{Deserialize, Serialize};
use tracing::warn;

const ARROW: &str = " => ";

/// Line-count statistics of one diff entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiffStats {
    /// git printed `-` for both counts.
    Binary,
    Text { insertions: u64, deletions: u64 },
}

impl DiffStats {
    /// Lines removed and none inserted.
    pub fn is_pure_deletion(self) -> bool {
        matches!(self, Self::Text { insertions: 0, deletions } if deletions > 0)
    }

    /// No lines inserted or removed.
    pub fn is_unchanged_content(self) -> bool {
        matches!(
            self,
            Self::Text {
                insertions: 0,
                deletions: 0
            }
        )
    }
}

/// One file entry of a numstat diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub old_path: String,
    pub new_path: String,
    pub stats: DiffStats,
}

impl DiffEntry {
    pub fn is_rename(&self) -> bool {
        self.old_path != self.new_path
    }
}

/// Old and new path of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPair {
    pub old_path: String,
    pub new_path: String,
}

impl PathPair {
    fn same(path: &str) -> Self {
        Self {
            old_path: path.to_string(),
            new_path: path.to_string(),
        }
    }
}

/// The path forms git emits in numstat output.
#[derive(Debug, PartialEq, Eq)]
enum PathForm<'a> {
    Unchanged(&'a str),
    Plain {
        old: &'a str,
        new: &'a str,
    },
    Braced {
        prefix: &'a str,
        old: &'a str,
        new: &'a str,
        suffix: &'a str,
    },
    Malformed(&'a str),
}

fn classify(raw: &str) -> PathForm<'_> {
    if !raw.contains(ARROW) {
        return PathForm::Unchanged(raw);
    }

    let Some(open) = raw.find('{') else {
        return match raw.split_once(ARROW) {
            Some((old, new)) if !old.is_empty() && !new.is_empty() => PathForm::Plain { old, new },
            _ => PathForm::Malformed(raw),
        };
    };

    let Some(close) = raw[open..].find('}').map(|i| open + i) else {
        return PathForm::Malformed(raw);
    };
    let Some((old, new)) = raw[open + 1..close].split_once(ARROW) else {
        return PathForm::Malformed(raw);
    };

    PathForm::Braced {
        prefix: &raw[..open],
        old,
        new,
        suffix: &raw[close + 1..],
    }
}

/// Resolve the old and new path of a numstat path column.
///
/// Malformed rename patterns yield the raw string for both paths.
pub fn parse_rename_path(raw: &str) -> PathPair {
    match classify(raw) {
        PathForm::Unchanged(path) | PathForm::Malformed(path) => PathPair::same(path),
        PathForm::Plain { old, new } => PathPair {
            old_path: old.to_string(),
            new_path: new.to_string(),
        },
        PathForm::Braced {
            prefix,
            old,
            new,
            suffix,
        } => PathPair {
            old_path: join_braced(prefix, old, suffix),
            new_path: join_braced(prefix, new, suffix),
        },
    }
}

// `dir/{ => sub}/f` expands to `dir//f` on the empty side.
fn join_braced(prefix: &str, middle: &str, suffix: &str) -> String {
    let mut joined = format!("{}{}{}", prefix, middle, suffix);
    while joined.contains("//") {
        joined = joined.replace("//", "/");
    }
    joined.trim_start_matches('/').to_string()
}

/// Parse the full output of `git diff --numstat`.
pub fn parse_numstat(output: &str) -> Vec<DiffEntry> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut cols = line.splitn(3, '\t');
            let (ins, del, path) = (cols.next()?, cols.next(), cols.next());
            let (Some(del), Some(path)) = (del, path) else {
                warn!(line, "skipping unparseable numstat line");
                return None;
            };

            let stats = if ins == "-" && del == "-" {
                DiffStats::Binary
            } else {
                match (ins.parse(), del.parse()) {
                    (Ok(insertions), Ok(deletions)) => DiffStats::Text {
                        insertions,
                        deletions,
                    },
                    _ => {
                        warn!(line, "skipping numstat line with invalid counts");
                        return None;
                    }
                }
            };

            let paths = parse_rename_path(path);
            Some(DiffEntry {
                old_path: paths.old_path,
                new_path: paths.new_path,
                stats,
            })
        })
        .collect()
}

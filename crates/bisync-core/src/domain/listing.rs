//! Listing snapshots
//!
//! A [`Listing`] is the point-in-time state of one side: an ordered mapping
//! from relative path to size, modification time, optional hash and entry
//! kind. Listings are persisted as UTF-8 text, one header line followed by
//! one sorted line per entry. The text depends only on the entries, so an
//! unchanged listing is rewritten byte for byte:
//!
//! ```text
//! # bisync listing v1
//! - 1024 sha256:9f86d0 2026-10-15T12:00:00.000000000+0000 "docs/a.txt"
//! d 0 - 2026-10-15T12:00:00.000000000+0000 "docs"
//! ```

use std::collections::btree_map;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{ContentHash, RelPath};

/// Timestamp format used in listing files (RFC 3339 with nanoseconds)
pub const LISTING_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9f%z";

/// Parse format; accepts any number of fractional digits
const LISTING_TIME_PARSE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%z";

/// Header prefix written at the top of every listing file
pub const LISTING_HEADER: &str = "# bisync listing v1";

/// Whether an entry is a regular file or a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Dir,
}

impl EntryKind {
    /// The single-character flag used in listing files
    #[must_use]
    pub const fn flag(self) -> char {
        match self {
            EntryKind::File => '-',
            EntryKind::Dir => 'd',
        }
    }

    fn from_flag(flag: &str) -> Option<Self> {
        match flag {
            "-" => Some(EntryKind::File),
            "d" => Some(EntryKind::Dir),
            _ => None,
        }
    }
}

/// Metadata recorded for one path in a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub hash: Option<ContentHash>,
    pub kind: EntryKind,
}

impl ListingEntry {
    /// Creates a file entry without a hash
    #[must_use]
    pub fn file(size: u64, modified: DateTime<Utc>) -> Self {
        Self {
            size,
            modified,
            hash: None,
            kind: EntryKind::File,
        }
    }

    /// Creates a directory entry
    #[must_use]
    pub fn dir(modified: DateTime<Utc>) -> Self {
        Self {
            size: 0,
            modified,
            hash: None,
            kind: EntryKind::Dir,
        }
    }

    /// Attaches a content hash
    #[must_use]
    pub fn with_hash(mut self, hash: ContentHash) -> Self {
        self.hash = Some(hash);
        self
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

/// Ordered snapshot of one side
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    entries: BTreeMap<RelPath, ListingEntry>,
}

impl Listing {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an entry, returning the previous one
    pub fn put(&mut self, path: RelPath, entry: ListingEntry) -> Option<ListingEntry> {
        self.entries.insert(path, entry)
    }

    #[must_use]
    pub fn get(&self, path: &RelPath) -> Option<&ListingEntry> {
        self.entries.get(path)
    }

    pub fn remove(&mut self, path: &RelPath) -> Option<ListingEntry> {
        self.entries.remove(path)
    }

    #[must_use]
    pub fn contains(&self, path: &RelPath) -> bool {
        self.entries.contains_key(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates every entry in path order
    pub fn iter(&self) -> btree_map::Iter<'_, RelPath, ListingEntry> {
        self.entries.iter()
    }

    /// Iterates all paths in order
    pub fn paths(&self) -> btree_map::Keys<'_, RelPath, ListingEntry> {
        self.entries.keys()
    }

    /// Iterates file entries only
    pub fn files(&self) -> impl Iterator<Item = (&RelPath, &ListingEntry)> {
        self.entries.iter().filter(|(_, e)| !e.is_dir())
    }

    /// Iterates directory entries only
    pub fn dirs(&self) -> impl Iterator<Item = (&RelPath, &ListingEntry)> {
        self.entries.iter().filter(|(_, e)| e.is_dir())
    }

    /// Parses the text form of a listing
    ///
    /// Blank lines and lines starting with `#` are ignored. Any other
    /// malformed line, or a path listed twice, is an error.
    pub fn parse(text: &str) -> Result<Self, DomainError> {
        let mut listing = Listing::new();

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }

            let invalid = |reason: &str| DomainError::InvalidListing {
                line: line_no,
                reason: reason.to_string(),
            };

            let mut fields = line.splitn(5, ' ');
            let flag = fields.next().ok_or_else(|| invalid("missing flag"))?;
            let size = fields.next().ok_or_else(|| invalid("missing size"))?;
            let hash = fields.next().ok_or_else(|| invalid("missing hash"))?;
            let modified = fields.next().ok_or_else(|| invalid("missing modtime"))?;
            let quoted = fields.next().ok_or_else(|| invalid("missing path"))?;

            let kind = EntryKind::from_flag(flag)
                .ok_or_else(|| invalid(&format!("unknown flag {flag:?}")))?;
            let size: u64 = size
                .parse()
                .map_err(|_| invalid(&format!("bad size {size:?}")))?;
            let hash = match hash {
                "-" => None,
                other => Some(
                    other
                        .parse::<ContentHash>()
                        .map_err(|e| invalid(&e.to_string()))?,
                ),
            };
            let modified = DateTime::parse_from_str(modified, LISTING_TIME_PARSE_FORMAT)
                .map_err(|e| invalid(&format!("bad modtime {modified:?}: {e}")))?
                .with_timezone(&Utc);
            let path: String = serde_json::from_str(quoted)
                .map_err(|e| invalid(&format!("bad path {quoted}: {e}")))?;
            let path = RelPath::new(path).map_err(|e| invalid(&e.to_string()))?;

            let entry = ListingEntry {
                size,
                modified,
                hash,
                kind,
            };
            if listing.put(path.clone(), entry).is_some() {
                return Err(DomainError::DuplicatePath(path.to_string()));
            }
        }

        Ok(listing)
    }

    /// Renders the text form of the listing
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(64 * (self.entries.len() + 1));
        out.push_str(LISTING_HEADER);
        out.push('\n');

        for (path, entry) in &self.entries {
            let hash = entry
                .hash
                .as_ref()
                .map_or_else(|| "-".to_string(), ToString::to_string);
            // Serializing a String to JSON cannot fail
            let quoted = serde_json::to_string(path.as_str()).unwrap_or_default();
            out.push_str(&format!(
                "{} {} {} {} {}\n",
                entry.kind.flag(),
                entry.size,
                hash,
                entry.modified.format(LISTING_TIME_FORMAT),
                quoted
            ));
        }

        out
    }
}

impl FromIterator<(RelPath, ListingEntry)> for Listing {
    fn from_iter<T: IntoIterator<Item = (RelPath, ListingEntry)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Listing {
    type Item = (RelPath, ListingEntry);
    type IntoIter = btree_map::IntoIter<RelPath, ListingEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a Listing {
    type Item = (&'a RelPath, &'a ListingEntry);
    type IntoIter = btree_map::Iter<'a, RelPath, ListingEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

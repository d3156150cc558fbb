//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for domain values.
//! Each newtype ensures data validity at construction time.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::errors::DomainError;

// ============================================================================
// Side
// ============================================================================

/// One of the two trees being reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Path1,
    Path2,
}

impl Side {
    /// Returns the opposite side
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Side::Path1 => Side::Path2,
            Side::Path2 => Side::Path1,
        }
    }

    /// Human-readable label used in logs ("Path1" / "Path2")
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Side::Path1 => "Path1",
            Side::Path2 => "Path2",
        }
    }

    /// File-name fragment used for listing files ("path1" / "path2")
    #[must_use]
    pub const fn file_tag(self) -> &'static str {
        match self {
            Side::Path1 => "path1",
            Side::Path2 => "path2",
        }
    }
}

impl Display for Side {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// RelPath
// ============================================================================

/// A side-relative path using `/` separators
///
/// Relative paths are the keys of every listing and queue. They are never
/// absolute, never empty and contain no `.` or `..` components, so joining
/// one onto a backend root can never escape that root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelPath(String);

impl RelPath {
    /// Create a new RelPath, validating its components
    pub fn new(path: impl Into<String>) -> Result<Self, DomainError> {
        let path = path.into();

        if path.is_empty() {
            return Err(DomainError::InvalidPath("path is empty".to_string()));
        }
        if path.starts_with('/') {
            return Err(DomainError::InvalidPath(format!(
                "path must be relative: {path}"
            )));
        }
        if path.contains('\0') {
            return Err(DomainError::InvalidPath(format!(
                "path contains NUL byte: {path:?}"
            )));
        }
        for component in path.split('/') {
            if component.is_empty() || component == "." || component == ".." {
                return Err(DomainError::InvalidPath(format!(
                    "invalid component {component:?} in {path}"
                )));
            }
        }

        Ok(Self(path))
    }

    /// Returns the path as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the last component of the path
    #[must_use]
    pub fn file_name(&self) -> &str {
        match self.0.rfind('/') {
            Some(pos) => &self.0[pos + 1..],
            None => &self.0,
        }
    }

    /// Returns the parent directory, or `None` for top-level entries
    #[must_use]
    pub fn parent(&self) -> Option<RelPath> {
        self.0.rfind('/').map(|pos| Self(self.0[..pos].to_string()))
    }

    /// Returns every ancestor directory, nearest first
    #[must_use]
    pub fn ancestors(&self) -> Vec<RelPath> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(dir) = current {
            current = dir.parent();
            out.push(dir);
        }
        out
    }

    /// Number of components (1 for a top-level entry)
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.split('/').count()
    }

    /// Appends a raw suffix to the final component, e.g. `a.txt` + `..path1`
    pub fn with_suffix(&self, suffix: &str) -> Result<RelPath, DomainError> {
        Self::new(format!("{}{}", self.0, suffix))
    }

    /// Joins a child component below this path
    pub fn join(&self, child: &str) -> Result<RelPath, DomainError> {
        Self::new(format!("{}/{}", self.0, child))
    }

    /// Returns true if `self` is strictly below `dir`
    #[must_use]
    pub fn is_inside(&self, dir: &RelPath) -> bool {
        self.0.len() > dir.0.len()
            && self.0.starts_with(dir.as_str())
            && self.0.as_bytes()[dir.0.len()] == b'/'
    }
}

impl Display for RelPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RelPath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RelPath {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RelPath> for String {
    fn from(path: RelPath) -> Self {
        path.0
    }
}

impl AsRef<str> for RelPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// ContentHash
// ============================================================================

/// Name of the SHA-256 hash algorithm as written in listings
pub const SHA256: &str = "sha256";

/// A content digest tagged with the algorithm that produced it
///
/// Rendered as `algorithm:hexdigest`. Two hashes are only comparable when
/// their algorithms match; see [`ContentHash::comparable_with`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash {
    algorithm: String,
    digest: String,
}

impl ContentHash {
    /// Create a new ContentHash from an algorithm name and a hex digest
    pub fn new(
        algorithm: impl Into<String>,
        digest: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let algorithm = algorithm.into();
        let digest = digest.into().to_ascii_lowercase();

        if algorithm.is_empty()
            || !algorithm
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(DomainError::InvalidHash(format!(
                "invalid algorithm name {algorithm:?}"
            )));
        }
        if digest.is_empty() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DomainError::InvalidHash(format!(
                "digest is not hexadecimal: {digest:?}"
            )));
        }

        Ok(Self { algorithm, digest })
    }

    /// Returns the algorithm name (e.g. `sha256`)
    #[must_use]
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Returns the lowercase hex digest
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Returns true if both hashes were produced by the same algorithm
    #[must_use]
    pub fn comparable_with(&self, other: &ContentHash) -> bool {
        self.algorithm == other.algorithm
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.digest)
    }
}

impl FromStr for ContentHash {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, digest) = s
            .split_once(':')
            .ok_or_else(|| DomainError::InvalidHash(format!("missing ':' in {s:?}")))?;
        Self::new(algorithm, digest)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.to_string()
    }
}

// ============================================================================
// SessionName
// ============================================================================

/// Digest bytes appended to a session name (8 hex characters)
const SESSION_DIGEST_BYTES: usize = 4;

/// Deterministic name of a Path1/Path2 pairing
///
/// Derived from both backend identities so repeated runs over the same pair
/// reuse the same listing and lock files. Runs of characters that are unsafe
/// in file names become a single `_` and the two halves are joined by `..`.
/// A short SHA-256 digest of the raw identities is appended so pairs that
/// read the same after replacement (`/x/a_b` and `/x/a/b`) stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionName(String);

impl SessionName {
    /// Builds the session name for a pair of backend identities
    #[must_use]
    pub fn from_identities(path1: &str, path2: &str) -> Self {
        Self(format!(
            "{}..{}-{}",
            Self::canonical(path1),
            Self::canonical(path2),
            Self::digest(path1, path2)
        ))
    }

    fn canonical(identity: &str) -> String {
        let mut replaced = String::with_capacity(identity.len());
        for c in identity.chars() {
            if c.is_alphanumeric() || c == '.' || c == '-' {
                replaced.push(c);
            } else if !replaced.ends_with('_') {
                replaced.push('_');
            }
        }
        let trimmed = replaced.trim_matches('_');
        if trimmed.is_empty() {
            "root".to_string()
        } else {
            trimmed.to_string()
        }
    }

    fn digest(path1: &str, path2: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(path1.as_bytes());
        hasher.update([0u8]);
        hasher.update(path2.as_bytes());
        hasher.finalize()[..SESSION_DIGEST_BYTES]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    /// Returns the name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SessionName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//! Materialized paths
//!
//! A path is a `/`-separated list of segment keys, one per level from the
//! root down. Each key is a base-62 fraction over `0-9A-Za-z` that never ends
//! in `0`, so a new key can always be found strictly between two siblings.
//! `/` sorts below every key digit, which makes plain byte order of paths the
//! preorder (document) order of the nodes they name.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const DIGITS: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const BASE: usize = DIGITS.len();
const ZERO: u8 = b'0';

/// Segment separator
pub const SEPARATOR: char = '/';

/// Errors for malformed keys and paths
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,

    #[error("invalid path segment '{0}'")]
    InvalidKey(String),

    #[error("no key exists between '{lower}' and '{upper}'")]
    Unordered { lower: String, upper: String },
}

fn digit_value(b: u8) -> Option<usize> {
    match b {
        b'0'..=b'9' => Some((b - b'0') as usize),
        b'A'..=b'Z' => Some((b - b'A') as usize + 10),
        b'a'..=b'z' => Some((b - b'a') as usize + 36),
        _ => None,
    }
}

fn validate_key(key: &str) -> Result<(), PathError> {
    let bytes = key.as_bytes();
    let valid = !bytes.is_empty()
        && bytes.iter().all(|&b| digit_value(b).is_some())
        && bytes.last() != Some(&ZERO);
    if valid {
        Ok(())
    } else {
        Err(PathError::InvalidKey(key.to_string()))
    }
}

/// A key sorting strictly between `lower` and `upper`.
///
/// `None` stands for an open end: `key_between(None, None)` is the first key
/// ever handed out, `key_between(Some(last), None)` appends after `last`.
pub fn key_between(lower: Option<&str>, upper: Option<&str>) -> Result<String, PathError> {
    if let Some(lower) = lower {
        validate_key(lower)?;
    }
    if let Some(upper) = upper {
        validate_key(upper)?;
    }
    let lo = lower.unwrap_or("");
    if let Some(hi) = upper {
        if lo >= hi {
            return Err(PathError::Unordered {
                lower: lo.to_string(),
                upper: hi.to_string(),
            });
        }
    }
    Ok(midpoint(lo.as_bytes(), upper.map(str::as_bytes)))
}

// Both inputs are digit strings without trailing zeros and lo < hi.
fn midpoint(lo: &[u8], hi: Option<&[u8]>) -> String {
    if let Some(hi) = hi {
        // Shared prefix, reading past the end of `lo` as zeros.
        let mut n = 0;
        while n < hi.len() && lo.get(n).copied().unwrap_or(ZERO) == hi[n] {
            n += 1;
        }
        if n > 0 {
            let rest = lo.get(n..).unwrap_or(&[]);
            let mut key: String = hi[..n].iter().map(|&b| b as char).collect();
            key.push_str(&midpoint(rest, Some(&hi[n..])));
            return key;
        }
    }

    let lo_digit = lo.first().and_then(|&b| digit_value(b)).unwrap_or(0);
    let hi_digit = hi
        .and_then(|h| h.first())
        .and_then(|&b| digit_value(b))
        .unwrap_or(BASE);

    if hi_digit - lo_digit > 1 {
        return (DIGITS[(lo_digit + hi_digit) / 2] as char).to_string();
    }

    match hi {
        // `hi` truncated to its first digit already sits strictly between.
        Some(h) if h.len() > 1 => (h[0] as char).to_string(),
        _ => {
            let mut key = (DIGITS[lo_digit] as char).to_string();
            key.push_str(&midpoint(lo.get(1..).unwrap_or(&[]), None));
            key
        }
    }
}

/// Position of a node encoded as the keys of all its ancestors and itself
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MaterializedPath(String);

impl MaterializedPath {
    /// A single-segment (root level) path
    pub fn root(key: &str) -> Result<Self, PathError> {
        validate_key(key)?;
        Ok(Self(key.to_string()))
    }

    /// Parse a stored path, validating every segment
    pub fn parse(path: &str) -> Result<Self, PathError> {
        if path.is_empty() {
            return Err(PathError::Empty);
        }
        for key in path.split(SEPARATOR) {
            validate_key(key)?;
        }
        Ok(Self(path.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Levels below the root; a root path has depth 0
    pub fn depth(&self) -> usize {
        self.0.matches(SEPARATOR).count()
    }

    /// The last segment
    pub fn key(&self) -> &str {
        match self.0.rfind(SEPARATOR) {
            Some(i) => &self.0[i + 1..],
            None => &self.0,
        }
    }

    pub fn parent(&self) -> Option<Self> {
        self.0.rfind(SEPARATOR).map(|i| Self(self.0[..i].to_string()))
    }

    pub fn child(&self, key: &str) -> Result<Self, PathError> {
        validate_key(key)?;
        Ok(Self(format!("{}{}{}", self.0, SEPARATOR, key)))
    }

    /// A path at the same level under the same parent
    pub fn sibling(&self, key: &str) -> Result<Self, PathError> {
        match self.parent() {
            Some(parent) => parent.child(key),
            None => Self::root(key),
        }
    }

    /// Strict ancestry, decided by prefix up to a segment boundary
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == SEPARATOR as u8
    }

    /// `self` or one of its ancestors
    pub fn contains(&self, other: &Self) -> bool {
        self == other || self.is_ancestor_of(other)
    }

    /// Every proper ancestor, root first
    pub fn ancestors(&self) -> Vec<Self> {
        self.0
            .match_indices(SEPARATOR)
            .map(|(i, _)| Self(self.0[..i].to_string()))
            .collect()
    }

    /// Exclusive bounds enclosing every descendant path.
    ///
    /// Descendants start with `self/`; `0` is the byte right after `/`, so
    /// `self/ < d < self0` holds for all of them and for nothing else.
    pub fn descendant_bounds(&self) -> (String, String) {
        (format!("{}{}", self.0, SEPARATOR), format!("{}0", self.0))
    }

    /// Replace the `from` prefix with `to`, keeping the relative suffix
    pub fn rebase(&self, from: &Self, to: &Self) -> Option<Self> {
        if from.contains(self) {
            Some(Self(format!("{}{}", to.0, &self.0[from.0.len()..])))
        } else {
            None
        }
    }
}

impl fmt::Display for MaterializedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MaterializedPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MaterializedPath> for String {
    fn from(path: MaterializedPath) -> Self {
        path.0
    }
}

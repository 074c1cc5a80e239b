//! Protocol versions and compatibility ranges.
//!
//! Versions are dotted numbers with one to three components. A
//! [`CompatibilityRange`] uses interval notation: `[1.0,2.0)` includes 1.0 and
//! excludes 2.0, `[1.0,)` has no upper bound, a bare version matches exactly
//! and `*` matches anything.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors produced while parsing versions and ranges.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// The version text is empty or has a non-numeric component.
    #[error("invalid version '{0}'")]
    InvalidVersion(String),

    /// The range text is not valid interval notation.
    #[error("invalid compatibility range '{0}'")]
    InvalidRange(String),
}

/// A protocol version such as `1`, `1.2` or `1.2.3`.
#[derive(Debug, Clone, Copy)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    components: u8,
}

impl Version {
    /// Build a three-component version.
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            components: 3,
        }
    }

    fn key(&self) -> (u64, u64, u64) {
        (self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let text = text.strip_prefix('v').unwrap_or(text);
        let parts: Vec<&str> = text.split('.').collect();
        if text.is_empty() || parts.len() > 3 {
            return Err(VersionError::InvalidVersion(s.to_string()));
        }

        let mut numbers = [0u64; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| VersionError::InvalidVersion(s.to_string()))?;
        }

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            components: parts.len() as u8,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.components {
            1 => write!(f, "{}", self.major),
            2 => write!(f, "{}.{}", self.major, self.minor),
            _ => write!(f, "{}.{}.{}", self.major, self.minor, self.patch),
        }
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Version {}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// One end of a [`CompatibilityRange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Inclusive(Version),
    Exclusive(Version),
    Unbounded,
}

/// The set of requested versions an adapter is willing to serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityRange {
    lower: Bound,
    upper: Bound,
}

impl CompatibilityRange {
    /// A range that accepts every version.
    pub const fn any() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    /// A range that accepts exactly one version.
    pub fn exact(version: Version) -> Self {
        Self {
            lower: Bound::Inclusive(version),
            upper: Bound::Inclusive(version),
        }
    }

    /// `[lower, upper)`, the usual "same major" shape.
    pub fn half_open(lower: Version, upper: Version) -> Self {
        Self {
            lower: Bound::Inclusive(lower),
            upper: Bound::Exclusive(upper),
        }
    }

    /// Whether `version` falls inside the range.
    pub fn contains(&self, version: &Version) -> bool {
        let above = match &self.lower {
            Bound::Inclusive(v) => version >= v,
            Bound::Exclusive(v) => version > v,
            Bound::Unbounded => true,
        };
        let below = match &self.upper {
            Bound::Inclusive(v) => version <= v,
            Bound::Exclusive(v) => version < v,
            Bound::Unbounded => true,
        };
        above && below
    }
}

impl FromStr for CompatibilityRange {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let invalid = || VersionError::InvalidRange(s.to_string());

        if text == "*" {
            return Ok(Self::any());
        }

        let open = text.chars().next().ok_or_else(invalid)?;
        if open != '[' && open != '(' {
            let version = text.parse().map_err(|_| invalid())?;
            return Ok(Self::exact(version));
        }

        let close = text.chars().last().ok_or_else(invalid)?;
        if text.len() < 3 || (close != ']' && close != ')') {
            return Err(invalid());
        }

        let inner = &text[1..text.len() - 1];
        let (low, high) = inner.split_once(',').ok_or_else(invalid)?;
        let (low, high) = (low.trim(), high.trim());

        let lower = if low.is_empty() {
            Bound::Unbounded
        } else {
            let v = low.parse().map_err(|_| invalid())?;
            if open == '[' {
                Bound::Inclusive(v)
            } else {
                Bound::Exclusive(v)
            }
        };
        let upper = if high.is_empty() {
            Bound::Unbounded
        } else {
            let v = high.parse().map_err(|_| invalid())?;
            if close == ']' {
                Bound::Inclusive(v)
            } else {
                Bound::Exclusive(v)
            }
        };

        Ok(Self { lower, upper })
    }
}

impl fmt::Display for CompatibilityRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.lower, &self.upper) {
            (Bound::Unbounded, Bound::Unbounded) => write!(f, "*"),
            (Bound::Inclusive(a), Bound::Inclusive(b)) if a == b => write!(f, "{a}"),
            (lower, upper) => {
                match lower {
                    Bound::Inclusive(v) => write!(f, "[{v},")?,
                    Bound::Exclusive(v) => write!(f, "({v},")?,
                    Bound::Unbounded => write!(f, "(,")?,
                }
                match upper {
                    Bound::Inclusive(v) => write!(f, "{v}]"),
                    Bound::Exclusive(v) => write!(f, "{v})"),
                    Bound::Unbounded => write!(f, ")"),
                }
            }
        }
    }
}

impl Serialize for CompatibilityRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CompatibilityRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

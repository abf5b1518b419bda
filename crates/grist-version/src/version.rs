//! Package versions as ordered integer sequences.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("a version needs at least one component")]
    Empty,

    #[error("invalid version component: {0}")]
    InvalidComponent(String),
}

/// A package version: a non-empty sequence of numeric components compared
/// lexicographically, so `1.2 < 1.2.0 < 1.10`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    components: Vec<u64>,
}

impl Version {
    /// Create a version from its components. Fails on an empty sequence.
    pub fn new(components: Vec<u64>) -> Result<Self, VersionError> {
        if components.is_empty() {
            return Err(VersionError::Empty);
        }
        Ok(Self { components })
    }

    /// The numeric components, most significant first.
    pub fn components(&self) -> &[u64] {
        &self.components
    }

    /// The immediate successor in version order.
    ///
    /// Appending a zero component yields the smallest version strictly
    /// greater than `self`, which lets ranges normalize to half-open
    /// intervals without losing exactness.
    pub fn successor(&self) -> Version {
        let mut components = self.components.clone();
        components.push(0);
        Version { components }
    }

    /// The exclusive upper bound of the major series containing `self`.
    ///
    /// The major series is identified by the first two components (or the
    /// single component for one-part versions): `1.2.3` is bounded by `1.3`,
    /// `4` by `4.1`.
    pub fn major_upper_bound(&self) -> Version {
        let take = self.components.len().min(2);
        let mut components: Vec<u64> = self.components[..take].to_vec();
        if components.len() < 2 {
            components.push(1);
        } else {
            *components.last_mut().unwrap() += 1;
        }
        Version { components }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for component in &self.components {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{component}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(VersionError::Empty);
        }
        let components = s
            .split('.')
            .map(|part| {
                part.parse::<u64>()
                    .map_err(|_| VersionError::InvalidComponent(part.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Version::new(components)
    }
}

impl TryFrom<String> for Version {
    type Error = VersionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> String {
        v.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(v("1.2.3").components(), &[1, 2, 3]);
        assert_eq!(v("0").components(), &[0]);
        assert_eq!(v("1.2.3").to_string(), "1.2.3");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Version>(), Err(VersionError::Empty));
        assert!(matches!(
            "1..2".parse::<Version>(),
            Err(VersionError::InvalidComponent(_))
        ));
        assert!(matches!(
            "1.x".parse::<Version>(),
            Err(VersionError::InvalidComponent(_))
        ));
    }

    #[test]
    fn test_lexicographic_order() {
        assert!(v("1.2") < v("1.2.0"));
        assert!(v("1.2.0") < v("1.10"));
        assert!(v("2") > v("1.9.9"));
        assert_eq!(v("1.2.3"), v("1.2.3"));
    }

    #[test]
    fn test_successor_is_immediate() {
        let version = v("1.2");
        let next = version.successor();
        assert_eq!(next, v("1.2.0"));
        assert!(version < next);
        // Nothing fits between a version and its successor.
        assert!(v("1.2.0.0") > next);
    }

    #[test]
    fn test_major_upper_bound() {
        assert_eq!(v("1.2.3").major_upper_bound(), v("1.3"));
        assert_eq!(v("1.2").major_upper_bound(), v("1.3"));
        assert_eq!(v("4").major_upper_bound(), v("4.1"));
    }
}

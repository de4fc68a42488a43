//! Build version and compatibility.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GameError, Result};

/// Build identification exchanged during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Build type: `official`, `custom`, `bleeding-edge`.
    pub kind: String,
    /// Release modifier, e.g. `alpha` or `release`.
    pub modifier: String,
    /// Major version.
    pub number: i32,
    /// Build number. `-1` for custom builds.
    pub build: i32,
    /// Hotfix revision. Does not affect compatibility.
    pub revision: i32,
}

impl Version {
    /// The version this crate was built as.
    #[must_use]
    pub fn current() -> Self {
        Self::parse(include_str!("../version.properties")).unwrap_or_else(|_| Self::custom())
    }

    /// A custom build that only talks to itself.
    #[must_use]
    pub fn custom() -> Self {
        Self {
            kind: "custom".into(),
            modifier: String::new(),
            number: 0,
            build: -1,
            revision: 0,
        }
    }

    /// Parse `key=value` properties text.
    ///
    /// `build` may carry a revision (`43.2`). An unparsable build becomes
    /// `-1`.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::DataParseError`] if `type` or `number` is
    /// missing or `number` is not an integer.
    pub fn parse(properties: &str) -> Result<Self> {
        let map: HashMap<&str, &str> = properties
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim(), value.trim()))
            .collect();

        let missing = |key: &str| GameError::DataParseError {
            path: "version.properties".into(),
            message: format!("missing or invalid '{key}'"),
        };

        let kind = map.get("type").ok_or_else(|| missing("type"))?.to_string();
        let number = map
            .get("number")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| missing("number"))?;
        let modifier = map.get("modifier").copied().unwrap_or_default().to_string();

        let raw_build = map.get("build").copied().unwrap_or_default();
        let (build, revision) = match raw_build.split_once('.') {
            Some((build, revision)) => match (build.parse::<i32>(), revision.parse::<i32>()) {
                (Ok(build), Ok(revision)) => (build, revision),
                _ => (-1, 0),
            },
            None => (raw_build.parse::<i32>().unwrap_or(-1), 0),
        };

        Ok(Self {
            kind,
            modifier,
            number,
            build,
            revision,
        })
    }

    /// Whether two builds can play together. Revisions are ignored.
    #[must_use]
    pub fn compatible(&self, other: &Self) -> bool {
        self.number == other.number && self.build == other.build
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.number)?;
        if !self.modifier.is_empty() {
            write!(f, " {}", self.modifier)?;
        }
        if self.build < 0 {
            write!(f, " build custom")
        } else if self.revision > 0 {
            write!(f, " build {}.{}", self.build, self.revision)
        } else {
            write!(f, " build {}", self.build)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_build_with_revision() {
        let version = Version::parse("type=official\nnumber=4\nmodifier=alpha\nbuild=43.2\n").unwrap();
        assert_eq!(version.number, 4);
        assert_eq!(version.build, 43);
        assert_eq!(version.revision, 2);
        assert_eq!(version.to_string(), "official 4 alpha build 43.2");
    }

    #[test]
    fn test_unparsable_build_is_custom() {
        let version = Version::parse("type=custom\nnumber=4\nbuild=abc").unwrap();
        assert_eq!(version.build, -1);
        let version = Version::parse("type=custom\nnumber=4\nbuild=43.x").unwrap();
        assert_eq!(version.build, -1);
    }

    #[test]
    fn test_missing_number_rejected() {
        assert!(Version::parse("type=official\nbuild=3").is_err());
    }

    #[test]
    fn test_revision_ignored_for_compatibility() {
        let a = Version::parse("type=official\nnumber=4\nbuild=43.1").unwrap();
        let b = Version::parse("type=official\nnumber=4\nbuild=43.2").unwrap();
        let c = Version::parse("type=official\nnumber=4\nbuild=44").unwrap();
        assert!(a.compatible(&b));
        assert!(!a.compatible(&c));
    }

    #[test]
    fn test_current_parses() {
        assert!(Version::current().number > 0);
    }
}

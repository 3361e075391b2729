//! Release version parsing and ordering.
//!
//! Hosts report their software release as free text such as `"hostd v2.1.0"` or
//! `"v2.2.0-beta.1"`. [`parse_release`] strips the application name and parses the
//! remainder into a [`SemVer`], which orders stable builds above pre-releases of the
//! same number.
//!
//! # Examples
//! ```rust
//! use hostcheck::version::{parse_release, SemVer};
//!
//! let latest: SemVer = "v1.6.0".parse().unwrap();
//! let reported = parse_release("hostd v1.5.0").unwrap();
//! assert!(reported < latest);
//! assert_eq!(reported.to_string(), "v1.5.0");
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("empty version string")]
    Empty,
    #[error("invalid version format: {0}")]
    Format(String),
    #[error("invalid {component} version: {value}")]
    Component {
        component: &'static str,
        value: String,
    },
}

/// A `vMAJOR.MINOR.PATCH[-SUFFIX]` release version.
///
/// Two versions with the same numbers compare equal unless exactly one of them carries
/// a suffix, in which case the one without a suffix is greater.
#[derive(Debug, Clone, Default)]
pub struct SemVer {
    major: u8,
    minor: u8,
    patch: u8,
    suffix: String,
}

impl SemVer {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
            suffix: String::new(),
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn major(&self) -> u8 {
        self.major
    }

    pub fn minor(&self) -> u8 {
        self.minor
    }

    pub fn patch(&self) -> u8 {
        self.patch
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn is_prerelease(&self) -> bool {
        !self.suffix.is_empty()
    }
}

/// Parses a release string, dropping a leading application name token if present.
pub fn parse_release(text: &str) -> Result<SemVer, VersionError> {
    let mut fields = text.split_whitespace();
    match (fields.next(), fields.next()) {
        (Some(_app), Some(version)) => version.parse(),
        _ => text.parse(),
    }
}

fn parse_component(component: &'static str, value: &str) -> Result<u8, VersionError> {
    let invalid = || VersionError::Component {
        component,
        value: value.to_string(),
    };
    // u8::from_str accepts a leading '+'
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    value.parse().map_err(|_| invalid())
}

impl FromStr for SemVer {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(VersionError::Empty);
        }
        let rest = s
            .strip_prefix('v')
            .ok_or_else(|| VersionError::Format(s.to_string()))?;

        let (numbers, suffix) = rest.split_once('-').unwrap_or((rest, ""));
        let parts: Vec<&str> = numbers.split('.').collect();
        let [major, minor, patch] = parts.as_slice() else {
            return Err(VersionError::Format(numbers.to_string()));
        };

        Ok(Self {
            major: parse_component("major", major)?,
            minor: parse_component("minor", minor)?,
            patch: parse_component("patch", patch)?,
            suffix: suffix.to_string(),
        })
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.suffix.is_empty() {
            write!(f, "-{}", self.suffix)?;
        }
        Ok(())
    }
}

impl Ord for SemVer {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (self.suffix.is_empty(), other.suffix.is_empty()) {
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                _ => Ordering::Equal,
            })
    }
}

impl PartialOrd for SemVer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SemVer {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SemVer {}

impl Serialize for SemVer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SemVer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

mod tests;

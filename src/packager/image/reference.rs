//! Target image reference parsing.
//!
//! Accepted grammar: a repository name made of lowercase alphanumeric
//! components separated by `.`, `_`, `__` or runs of `-`, with components
//! joined by `/`, optionally followed by `:tag`. Registry hosts with ports are
//! not accepted; pushing is out of scope. A missing tag means `latest`.

use regex::Regex;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::LazyLock;

use crate::packager::error::{Error, Result};

/// Maximum length of the repository name part
const MAX_NAME_LEN: usize = 255;

/// Tag used when the reference has none
pub const DEFAULT_TAG: &str = "latest";

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*)*$")
        .expect("repository name pattern is a valid regex")
});

static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("tag pattern is a valid regex")
});

/// Validated `name:tag` image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    name: String,
    tag: String,
}

impl ImageReference {
    /// Parses and validates a reference.
    pub fn parse(reference: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        if reference.is_empty() {
            return Err(invalid("reference is empty"));
        }

        let (name, tag) = match reference.split_once(':') {
            Some((name, tag)) => (name, tag),
            None => (reference, DEFAULT_TAG),
        };

        if name.is_empty() {
            return Err(invalid("repository name is empty"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(invalid("repository name is longer than 255 characters"));
        }
        if !NAME_PATTERN.is_match(name) {
            return Err(invalid(
                "repository name must be lowercase alphanumerics separated by `.`, `_`, `-` or `/`",
            ));
        }
        if !TAG_PATTERN.is_match(tag) {
            return Err(invalid(
                "tag must be 1-128 characters of alphanumerics, `_`, `.` or `-`, not starting with `.` or `-`",
            ));
        }

        Ok(Self {
            name: name.to_string(),
            tag: tag.to_string(),
        })
    }

    /// Repository name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tag
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// File-name-safe stem, e.g. `team/my_model:1.0` → `team_my_model_1.0`.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.name.replace('/', "_"), self.tag)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

impl std::str::FromStr for ImageReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ImageReference {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

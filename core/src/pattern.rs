use crate::{Error, Result};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// A literal path filter. A pattern matches a path when they are equal, or
/// when the pattern is a prefix ending at a path separator (a directory
/// match). Globs are not part of the pattern language and are rejected up
/// front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
}

impl Pattern {
    pub fn new(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::Config("empty path pattern".to_string()));
        }
        if raw.contains('*') || raw.contains('?') {
            return Err(Error::Config(format!(
                "glob patterns are not supported: {raw:?} (use a literal path prefix)"
            )));
        }
        // A trailing separator means the same as the bare directory path.
        let raw = raw.strip_suffix('/').filter(|s| !s.is_empty()).unwrap_or(raw);
        Ok(Self {
            raw: raw.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        path == self.raw
            || (path.starts_with(&self.raw)
                && path.as_bytes().get(self.raw.len()) == Some(&b'/'))
    }
}

impl FromStr for Pattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Pattern::new(s)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

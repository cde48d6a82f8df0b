//! Structural cache keys.
//!
//! A `CacheKey` names one logical remote resource instance: a resource name
//! plus an ordered tuple of primitive parts. Two keys are the same
//! subscription exactly when they compare equal. The inner representation is
//! private, so a key cannot be mutated once built.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator used by the `Display` rendering.
const SEPARATOR: char = ':';

/// One primitive component of a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{}", value),
            Self::Int(value) => write!(f, "{}", value),
            Self::Str(value) => f.write_str(value),
        }
    }
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&String> for KeyPart {
    fn from(value: &String) -> Self {
        Self::Str(value.clone())
    }
}

impl From<i64> for KeyPart {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for KeyPart {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<bool> for KeyPart {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Identity of one cached remote resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    inner: KeyInner,
}

/// Private inner struct - keys are only built through `CacheKey::new`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
struct KeyInner {
    resource: String,
    parts: Vec<KeyPart>,
}

impl CacheKey {
    /// Create a key for a resource with no parameters.
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            inner: KeyInner {
                resource: resource.into(),
                parts: Vec::new(),
            },
        }
    }

    /// Return a new key with one more parameter appended.
    pub fn with(mut self, part: impl Into<KeyPart>) -> Self {
        self.inner.parts.push(part.into());
        self
    }

    /// The resource name (first component).
    pub fn resource(&self) -> &str {
        &self.inner.resource
    }

    /// The ordered parameters following the resource name.
    pub fn parts(&self) -> &[KeyPart] {
        &self.inner.parts
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.resource)?;
        for part in &self.inner.parts {
            write!(f, "{}{}", SEPARATOR, part)?;
        }
        Ok(())
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

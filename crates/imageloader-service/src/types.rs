//! Identifiers shared between the coordinator and its callers.
//!
//! Callers only ever hold these values, never references into the coordinator's
//! internal maps.

use std::fmt;
use std::sync::Arc;

use url::Url;
use uuid::Uuid;

/// An opaque identifier for a remote resource.
///
/// In practice this is a normalized URL, but the coordinator treats it as an opaque
/// string: two keys are equal iff they denote the same resource. Interpreting the key
/// is up to the [`Transfer`](crate::download::Transfer) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(Arc<str>);

impl ResourceKey {
    /// Creates a key from its raw string form, without any normalization.
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    /// Parses and normalizes a URL into a key.
    ///
    /// Scheme and host casing as well as default ports are normalized, so equivalent
    /// spellings of the same URL produce equal keys.
    pub fn parse_url(url: &str) -> Result<Self, url::ParseError> {
        Url::parse(url).map(Self::from)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Url> for ResourceKey {
    fn from(url: Url) -> Self {
        Self(url.as_str().into())
    }
}

impl From<&str> for ResourceKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A unique token identifying one in-flight fetch attempt.
///
/// Handles are random 128-bit identifiers and are never reused, not even for repeated
/// fetches of the same key. Their only use is [`cancel`](crate::coordinator::CacheCoordinator::cancel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestHandle(Uuid);

impl RequestHandle {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_hyphenated())
    }
}

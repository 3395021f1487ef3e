//! Fetching, decoding and caching of remote images.
//!
//! The [`CacheCoordinator`] is the entry point: it answers fetches from a bounded in-memory
//! cache, starts transfers for misses, and delivers exactly one outcome per fetch to the
//! caller's callback. [`ViewBindings`] builds on it to cancel superseded fetches of reused
//! views.

#[macro_use]
pub mod metrics;

pub mod bindings;
pub mod caching;
pub mod config;
pub mod coordinator;
pub mod decode;
pub mod download;
pub mod logging;
pub mod types;
pub mod utils;


pub use bindings::ViewBindings;
pub use caching::{FetchError, FetchResult, ResourceCache};
pub use coordinator::CacheCoordinator;
pub use decode::{Decode, ImageDecoder};
pub use types::{RequestHandle, ResourceKey};

/// A coordinator for images in any of the supported formats.
pub type ImageCoordinator = CacheCoordinator<ImageDecoder>;

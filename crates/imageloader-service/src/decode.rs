//! Turning downloaded payloads into values.

use std::sync::Arc;

use image::DynamicImage;

/// A decode primitive.
///
/// Decoding runs on the blocking thread pool, so implementations may be CPU intensive.
pub trait Decode: Send + Sync + 'static {
    /// The decoded value, which is cached and handed to callers.
    ///
    /// This is cloned for every cache hit, so it should be cheap to clone.
    type Value: Clone + Send + Sync + 'static;

    type Error: std::error::Error + Send + Sync + 'static;

    fn decode(&self, payload: &[u8]) -> Result<Self::Value, Self::Error>;
}

/// Decodes PNG, JPEG, GIF and WebP images.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDecoder;

impl Decode for ImageDecoder {
    type Value = Arc<DynamicImage>;
    type Error = image::ImageError;

    fn decode(&self, payload: &[u8]) -> Result<Self::Value, Self::Error> {
        image::load_from_memory(payload).map(Arc::new)
    }
}

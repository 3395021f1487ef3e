//! The network side of the coordinator.
//!
//! A [`Transfer`] turns a [`ResourceKey`] into a future that performs the actual transfer.
//! Starting a transfer may fail synchronously, in which case no fetch is ever registered.
//! Once started, every transfer ends with exactly one [`TransferOutcome`].
//!
//! Dropping a transfer future aborts the transfer. This is how cancellation reaches the
//! network layer.

use std::error::Error;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use thiserror::Error;

use crate::types::ResourceKey;

mod http;

pub use self::http::HttpTransfer;

/// The raw result of a transfer, before decoding.
#[derive(Debug)]
pub enum TransferOutcome {
    /// The transfer completed and yielded a payload.
    Payload(Bytes),
    /// The transfer failed.
    Failed(TransferError),
    /// The transfer completed without an error, but also without a payload.
    Empty,
}

/// An error reported by a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// The transfer was cancelled.
    #[error("transfer cancelled")]
    Cancelled,
    /// The remote did not respond in time.
    #[error("download timed out after {0:?}")]
    Timeout(Duration),
    /// The remote responded with a non-successful status code.
    #[error("unexpected status code {0}")]
    Status(u16),
    /// The payload is larger than the configured limit.
    #[error("payload exceeds the maximum size of {0} bytes")]
    PayloadTooLarge(u64),
    /// The transfer failed due to another problem, like connection loss or DNS resolution.
    ///
    /// The attached string contains the root cause.
    #[error("download failed: {0}")]
    Network(String),
}

impl TransferError {
    /// Creates a [`TransferError::Network`] from the root cause of `error`.
    pub fn network(mut error: &dyn Error) -> Self {
        while let Some(src) = error.source() {
            error = src;
        }

        let mut error_string = error.to_string();

        if error_string.contains("certificate verify failed") {
            error_string = "certificate verify failed".to_string();
        }

        Self::Network(error_string)
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(error: reqwest::Error) -> Self {
        Self::network(&error)
    }
}

/// An error that prevents a transfer from being started at all.
///
/// This is reported synchronously from
/// [`CacheCoordinator::fetch`](crate::coordinator::CacheCoordinator::fetch).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    /// The key does not denote a location the transfer understands.
    #[error("invalid resource key `{key}`: {reason}")]
    InvalidKey { key: String, reason: String },
    /// The key uses a scheme the transfer does not support.
    #[error("unsupported scheme `{0}`")]
    UnsupportedScheme(String),
    /// The request could not be constructed.
    #[error("failed to build request: {0}")]
    Request(String),
}

/// A network-transfer primitive.
pub trait Transfer: Send + Sync + 'static {
    /// Prepares a transfer for the resource at `key`.
    ///
    /// The returned future performs the transfer when polled and aborts it when dropped.
    fn start(&self, key: &ResourceKey) -> Result<BoxFuture<'static, TransferOutcome>, StartError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("outer")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn test_network_error_uses_root_cause() {
        let err = Outer(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert_eq!(
            TransferError::network(&err),
            TransferError::Network("connection refused".into())
        );
    }
}

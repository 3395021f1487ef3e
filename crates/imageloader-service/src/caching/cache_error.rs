use thiserror::Error;

use crate::download::TransferError;

/// The terminal failure of one fetch attempt.
///
/// This is only ever delivered through the completion callback of
/// [`CacheCoordinator::fetch`](crate::coordinator::CacheCoordinator::fetch), never returned
/// across the cache boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The fetch was cancelled before it produced an outcome, either explicitly or
    /// because it ran into its timeout.
    #[error("the operation was cancelled")]
    Cancelled,
    /// The transfer itself failed.
    #[error("an error occurred during image loading")]
    TransportError(#[source] TransferError),
    /// The transfer succeeded, but did not yield a usable payload.
    #[error("an error occurred during image loading, no image data found")]
    DecodeError,
}

impl FetchError {
    /// A more detailed explanation of why the fetch failed.
    pub fn failure_reason(&self) -> String {
        match self {
            Self::Cancelled => "operation was cancelled during the image loading transfer".into(),
            Self::TransportError(err) => format!("could not load image: {err}"),
            Self::DecodeError => "could not decode image data (no data found)".into(),
        }
    }

    /// The tag value used for metrics and logs.
    pub(crate) fn status(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::TransportError(_) => "transporterror",
            Self::DecodeError => "decodeerror",
        }
    }
}

impl From<TransferError> for FetchError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Cancelled => Self::Cancelled,
            err => Self::TransportError(err),
        }
    }
}

/// The outcome handed to a completion callback.
pub type FetchResult<T> = Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_transfer_is_not_a_transport_error() {
        assert_eq!(
            FetchError::from(TransferError::Cancelled),
            FetchError::Cancelled
        );
        assert_eq!(
            FetchError::from(TransferError::Status(503)),
            FetchError::TransportError(TransferError::Status(503))
        );
    }

    #[test]
    fn test_failure_reasons() {
        let err = FetchError::TransportError(TransferError::Network("connection refused".into()));
        insta::assert_snapshot!(err, @"an error occurred during image loading");
        insta::assert_snapshot!(err.failure_reason(), @"could not load image: download failed: connection refused");
        insta::assert_snapshot!(FetchError::DecodeError.failure_reason(), @"could not decode image data (no data found)");
    }
}

use std::time::Duration;

use reqwest::redirect;

use crate::config::DownloadTimeouts;

/// Creates a [`reqwest::Client`] with the provided timeouts.
///
/// * `timeouts.connect` bounds establishing a connection. The overall duration of a fetch is
///   bounded by the coordinator instead, which cancels fetches exceeding
///   [`max_download`](DownloadTimeouts::max_download).
/// * Follows up to 10 redirects.
pub fn create_client(timeouts: &DownloadTimeouts) -> reqwest::Client {
    reqwest::ClientBuilder::new()
        .gzip(true)
        .connect_timeout(timeouts.connect)
        .pool_idle_timeout(Duration::from_secs(30))
        .redirect(redirect::Policy::limited(10))
        .build()
        .unwrap_or_else(|err| {
            tracing::error!(
                error = &err as &dyn std::error::Error,
                "failed to build configured http client, using defaults"
            );
            reqwest::Client::new()
        })
}

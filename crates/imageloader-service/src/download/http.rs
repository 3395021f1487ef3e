//! Support to download from HTTP sources.

use bytes::BytesMut;
use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::{Client, Url, header};

use crate::config::{Config, DownloadTimeouts};
use crate::types::ResourceKey;

use super::{StartError, Transfer, TransferError, TransferOutcome};

/// A [`Transfer`] that downloads `http` and `https` URLs.
#[derive(Debug, Clone)]
pub struct HttpTransfer {
    client: Client,
    timeouts: DownloadTimeouts,
    user_agent: String,
    max_payload_size: u64,
}

impl HttpTransfer {
    pub fn new(
        client: Client,
        timeouts: DownloadTimeouts,
        user_agent: impl Into<String>,
        max_payload_size: u64,
    ) -> Self {
        Self {
            client,
            timeouts,
            user_agent: user_agent.into(),
            max_payload_size,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let client = crate::utils::http::create_client(&config.timeouts);
        Self::new(
            client,
            config.timeouts,
            config.user_agent.clone(),
            config.max_payload_size,
        )
    }
}

impl Transfer for HttpTransfer {
    fn start(&self, key: &ResourceKey) -> Result<BoxFuture<'static, TransferOutcome>, StartError> {
        let url = Url::parse(key.as_str()).map_err(|err| StartError::InvalidKey {
            key: key.to_string(),
            reason: err.to_string(),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(StartError::UnsupportedScheme(url.scheme().to_owned()));
        }

        let request = self
            .client
            .get(url)
            .header(header::USER_AGENT, &self.user_agent)
            .build()
            .map_err(|err| StartError::Request(err.to_string()))?;

        let job = download(
            self.client.clone(),
            request,
            self.timeouts,
            self.max_payload_size,
        );
        Ok(job.boxed())
    }
}

/// Executes `request` and collects the response body.
async fn download(
    client: Client,
    request: reqwest::Request,
    timeouts: DownloadTimeouts,
    max_payload_size: u64,
) -> TransferOutcome {
    let url = request.url().clone();
    tracing::debug!("Fetching resource from `{}`", url);

    let response = match tokio::time::timeout(timeouts.head, client.execute(request)).await {
        Err(_) => return TransferOutcome::Failed(TransferError::Timeout(timeouts.head)),
        // The client only carries a connect timeout.
        Ok(Err(err)) if err.is_timeout() => {
            return TransferOutcome::Failed(TransferError::Timeout(timeouts.connect));
        }
        Ok(Err(err)) => return TransferOutcome::Failed(err.into()),
        Ok(Ok(response)) => response,
    };

    let status = response.status();
    if !status.is_success() {
        tracing::debug!("Unexpected status code from `{url}`: {status}");
        return TransferOutcome::Failed(TransferError::Status(status.as_u16()));
    }

    if response
        .content_length()
        .is_some_and(|len| len > max_payload_size)
    {
        tracing::debug!("Payload of `{url}` exceeds {max_payload_size} bytes");
        return TransferOutcome::Failed(TransferError::PayloadTooLarge(max_payload_size));
    }

    match read_body(response, max_payload_size).await {
        Ok(payload) if payload.is_empty() => TransferOutcome::Empty,
        Ok(payload) => {
            tracing::debug!("Resource `{}` fetched successfully", url);
            metric!(histogram("download.size") = payload.len() as u64);
            TransferOutcome::Payload(payload.freeze())
        }
        Err(err) => {
            tracing::debug!("Resource `{}` fetching failed: {}", url, err);
            TransferOutcome::Failed(err)
        }
    }
}

/// Reads the whole response body, enforcing `max_payload_size`.
async fn read_body(
    mut response: reqwest::Response,
    max_payload_size: u64,
) -> Result<BytesMut, TransferError> {
    let mut payload = BytesMut::new();
    while let Some(chunk) = response.chunk().await? {
        if (payload.len() + chunk.len()) as u64 > max_payload_size {
            return Err(TransferError::PayloadTooLarge(max_payload_size));
        }
        payload.extend_from_slice(&chunk);
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer() -> HttpTransfer {
        HttpTransfer::from_config(&Config::default())
    }

    async fn fetch(server: &imageloader_test::Server, path: &str) -> TransferOutcome {
        let key = ResourceKey::from(server.url(path));
        transfer().start(&key).unwrap().await
    }

    #[tokio::test]
    async fn test_download_image() {
        imageloader_test::setup();

        let server = imageloader_test::Server::new();
        let outcome = fetch(&server, "/images/ok.png").await;

        let TransferOutcome::Payload(payload) = outcome else {
            panic!("unexpected outcome: {outcome:?}");
        };
        let (width, height) = imageloader_test::IMAGE_SIZE;
        assert_eq!(payload, imageloader_test::png_bytes(width, height));
    }

    #[tokio::test]
    async fn test_download_empty() {
        imageloader_test::setup();

        let server = imageloader_test::Server::new();
        let outcome = fetch(&server, "/empty/nothing.png").await;

        assert!(matches!(outcome, TransferOutcome::Empty));
    }

    #[tokio::test]
    async fn test_download_status() {
        imageloader_test::setup();

        let server = imageloader_test::Server::new();
        let outcome = fetch(&server, "/respond_statuscode/404/missing.png").await;

        assert!(matches!(
            outcome,
            TransferOutcome::Failed(TransferError::Status(404))
        ));
    }

    #[tokio::test]
    async fn test_payload_too_large() {
        imageloader_test::setup();

        let server = imageloader_test::Server::new();
        let key = ResourceKey::from(server.url("/garbage_data/0123456789"));
        let transfer = HttpTransfer::new(
            Client::new(),
            Default::default(),
            "imageloader-test",
            4,
        );
        let outcome = transfer.start(&key).unwrap().await;

        assert!(matches!(
            outcome,
            TransferOutcome::Failed(TransferError::PayloadTooLarge(4))
        ));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        imageloader_test::setup();

        // Bind and immediately release a port, so nothing is listening on it.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let key = ResourceKey::new(format!("http://127.0.0.1:{port}/images/ok.png"));

        let outcome = transfer().start(&key).unwrap().await;

        assert!(matches!(
            outcome,
            TransferOutcome::Failed(TransferError::Network(_))
        ));
    }

    #[test]
    fn test_start_rejects_invalid_keys() {
        let transfer = transfer();

        let err = transfer.start(&ResourceKey::new("not a url")).err().unwrap();
        assert!(matches!(err, StartError::InvalidKey { .. }));

        let err = transfer
            .start(&ResourceKey::new("ftp://example.com/a.png"))
            .err().unwrap();
        assert_eq!(err, StartError::UnsupportedScheme("ftp".into()));
    }
}

use std::time::Duration;

use imageloader_service::{FetchError, ResourceKey};
use tokio::sync::oneshot;

use crate::{Server, load, setup_coordinator};

#[tokio::test]
async fn test_cancel_slow_download() {
    let server = Server::new();
    let coordinator = setup_coordinator(|_| {});
    let key = ResourceKey::from(server.url("/delay/5s/images/logo.png"));

    let (tx, rx) = oneshot::channel();
    let handle = coordinator
        .fetch(key.clone(), move |result| {
            tx.send(result).ok();
        })
        .unwrap()
        .unwrap();
    assert!(coordinator.is_in_flight(handle));

    tokio::time::sleep(Duration::from_millis(50)).await;
    coordinator.cancel(handle);

    assert_eq!(rx.await.unwrap().unwrap_err(), FetchError::Cancelled);
    assert!(!coordinator.is_in_flight(handle));
    assert!(coordinator.cache().get(&key).is_none());
}

#[tokio::test]
async fn test_download_timeout_cancels() {
    let server = Server::new();
    let coordinator = setup_coordinator(|config| {
        config.timeouts.max_download = Duration::from_millis(100);
    });
    let key = ResourceKey::from(server.url("/delay/5s/images/logo.png"));

    let (_, result) = load(&coordinator, key).await;
    assert_eq!(result.unwrap_err(), FetchError::Cancelled);
    assert_eq!(coordinator.in_flight_count(), 0);
}

#[tokio::test]
async fn test_cancel_after_completion_is_noop() {
    let server = Server::new();
    let coordinator = setup_coordinator(|_| {});
    let key = ResourceKey::from(server.url("/images/logo.png"));

    let (tx, rx) = oneshot::channel();
    let handle = coordinator
        .fetch(key.clone(), move |result| {
            tx.send(result).ok();
        })
        .unwrap()
        .unwrap();

    rx.await.unwrap().unwrap();
    coordinator.cancel(handle);

    assert!(coordinator.cache().get(&key).is_some());
}

use image::GenericImageView;
use imageloader_service::download::{StartError, TransferError};
use imageloader_service::{FetchError, ResourceKey};
use tokio::sync::mpsc;

use crate::{IMAGE_SIZE, Server, load, setup_coordinator};

#[tokio::test]
async fn test_load_and_cache_image() {
    let server = Server::new();
    let coordinator = setup_coordinator(|_| {});
    let key = ResourceKey::from(server.url("/images/logo.png"));

    let (cached, result) = load(&coordinator, key.clone()).await;
    assert!(!cached);
    assert_eq!(result.unwrap().dimensions(), IMAGE_SIZE);
    assert_eq!(server.accesses(), 1);

    let entry = coordinator.cache().get(&key).unwrap();
    let expected = imageloader_test::png_bytes(IMAGE_SIZE.0, IMAGE_SIZE.1);
    assert_eq!(entry.cost() as usize, expected.len());

    let (cached, result) = load(&coordinator, key).await;
    assert!(cached);
    assert_eq!(result.unwrap().dimensions(), IMAGE_SIZE);
    assert_eq!(server.accesses(), 0);
}

#[tokio::test]
async fn test_equivalent_urls_share_entry() {
    let server = Server::new();
    let coordinator = setup_coordinator(|_| {});

    let url = server.url("/images/logo.png");
    let spelled = url.as_str().replace("http://", "HTTP://");

    let (_, result) = load(&coordinator, ResourceKey::from(url)).await;
    result.unwrap();

    let (cached, _) = load(&coordinator, ResourceKey::parse_url(&spelled).unwrap()).await;
    assert!(cached);
    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_empty_response() {
    let server = Server::new();
    let coordinator = setup_coordinator(|_| {});
    let key = ResourceKey::from(server.url("/empty/logo.png"));

    let (_, result) = load(&coordinator, key.clone()).await;
    assert_eq!(result.unwrap_err(), FetchError::DecodeError);
    assert!(coordinator.cache().get(&key).is_none());
}

#[tokio::test]
async fn test_garbage_response() {
    let server = Server::new();
    let coordinator = setup_coordinator(|_| {});
    let key = ResourceKey::from(server.url("/garbage_data/not-a-png"));

    let (_, result) = load(&coordinator, key.clone()).await;
    assert_eq!(result.unwrap_err(), FetchError::DecodeError);
    assert!(coordinator.cache().get(&key).is_none());

    // Failures are not cached, the next fetch downloads again.
    let (cached, _) = load(&coordinator, key).await;
    assert!(!cached);
    assert_eq!(server.accesses(), 2);
}

#[tokio::test]
async fn test_server_error() {
    let server = Server::new();
    let coordinator = setup_coordinator(|_| {});
    let key = ResourceKey::from(server.url("/respond_statuscode/500/logo.png"));

    let (_, result) = load(&coordinator, key).await;
    let err = result.unwrap_err();
    assert_eq!(err, FetchError::TransportError(TransferError::Status(500)));
    insta::assert_snapshot!(err.failure_reason(), @"could not load image: unexpected status code 500");
}

#[tokio::test]
async fn test_follows_redirects() {
    let server = Server::new();
    let coordinator = setup_coordinator(|_| {});
    let key = ResourceKey::from(server.url("/redirect/images/logo.png"));

    let (_, result) = load(&coordinator, key).await;
    assert_eq!(result.unwrap().dimensions(), IMAGE_SIZE);
}

#[tokio::test]
async fn test_unsupported_scheme() {
    let coordinator = setup_coordinator(|_| {});
    let key = ResourceKey::new("ftp://example.com/logo.png");

    let err = coordinator.fetch(key, |_| {}).unwrap_err();
    assert_eq!(err, StartError::UnsupportedScheme("ftp".into()));
    assert_eq!(coordinator.in_flight_count(), 0);
}

#[tokio::test]
async fn test_eviction_respects_capacity() {
    let server = Server::new();
    let image_size = imageloader_test::png_bytes(IMAGE_SIZE.0, IMAGE_SIZE.1).len() as u64;
    let coordinator = setup_coordinator(|config| {
        config.cache.capacity = image_size * 2;
    });

    for i in 0..5 {
        let key = ResourceKey::from(server.url(&format!("/images/{i}.png")));
        let (_, result) = load(&coordinator, key).await;
        result.unwrap();
        assert!(coordinator.cache().weighted_size() <= image_size * 2);
    }
    assert!(coordinator.cache().entry_count() <= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_loads() {
    let server = Server::new();
    let coordinator = setup_coordinator(|_| {});

    let (tx, mut rx) = mpsc::unbounded_channel();
    for i in 0..100 {
        let tx = tx.clone();
        let key = ResourceKey::from(server.url(&format!("/images/{i}.png")));
        coordinator
            .fetch(key, move |result| {
                tx.send(result).ok();
            })
            .unwrap();
    }
    drop(tx);

    let mut completed = 0;
    while let Some(result) = rx.recv().await {
        assert_eq!(result.unwrap().dimensions(), IMAGE_SIZE);
        completed += 1;
    }

    assert_eq!(completed, 100);
    assert_eq!(server.accesses(), 100);
    assert_eq!(coordinator.in_flight_count(), 0);
    assert_eq!(coordinator.cache().entry_count(), 100);
}

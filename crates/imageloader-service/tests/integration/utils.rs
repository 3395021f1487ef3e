use std::sync::Arc;

use image::DynamicImage;
use imageloader_service::config::Config;
use imageloader_service::{FetchResult, ImageCoordinator, ResourceKey};
use imageloader_test as test;
use tokio::sync::oneshot;

pub use test::{IMAGE_SIZE, Server};

/// Setup tests and create a coordinator downloading over HTTP.
///
/// The `update_config` closure can modify any default configuration if needed before the
/// coordinator is created.
pub fn setup_coordinator(update_config: impl FnOnce(&mut Config)) -> Arc<ImageCoordinator> {
    test::setup();

    let mut config = Config::default();
    update_config(&mut config);

    let handle = tokio::runtime::Handle::current();
    Arc::new(ImageCoordinator::from_config(&config, handle))
}

pub type ImageResult = FetchResult<Arc<DynamicImage>>;

/// Fetches `key` and waits for its outcome.
///
/// Returns whether the fetch was answered from the cache, along with its outcome.
pub async fn load(coordinator: &ImageCoordinator, key: ResourceKey) -> (bool, ImageResult) {
    let (tx, rx) = oneshot::channel();
    let handle = coordinator
        .fetch(key, move |result| {
            tx.send(result).ok();
        })
        .unwrap();
    (handle.is_none(), rx.await.unwrap())
}

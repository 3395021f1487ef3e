//! The cache and in-flight request coordinator.
//!
//! [`CacheCoordinator::fetch`] answers from the [`ResourceCache`] when possible. Otherwise it
//! starts a [`Transfer`], registers it under a fresh [`RequestHandle`], and spawns a task that
//! drives the transfer, decodes the payload, and delivers exactly one outcome to the
//! caller's callback.
//!
//! The terminal outcome of a fetch is fixed at the moment its handle is removed from the
//! in-flight map. Both natural completion and [`CacheCoordinator::cancel`] remove the handle
//! under the same lock, so whichever gets there first decides: a cancel that removes the
//! handle turns any later result into [`FetchError::Cancelled`], and a cancel arriving after
//! completion finds nothing to do.
//!
//! ### Metrics
//!
//! - `coordinator.fetch`: All fetches, tagged with `cache` (`hit` or `miss`).
//! - `coordinator.outcome`: Terminal outcomes of misses, tagged with `status`.
//! - `coordinator.cancel`: Cancellations of tracked fetches.
//! - `coordinator.in_flight`: A gauge of tracked fetches.
//! - `coordinator.fetch.duration`: Time from start to terminal outcome of a miss.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::caching::{FetchError, FetchResult, ResourceCache};
use crate::config::Config;
use crate::decode::Decode;
use crate::download::{HttpTransfer, StartError, Transfer, TransferError, TransferOutcome};
use crate::types::{RequestHandle, ResourceKey};

type Callback<V> = Box<dyn FnOnce(FetchResult<V>) + Send + 'static>;

type InFlightMap = Arc<Mutex<HashMap<RequestHandle, CancellationToken>>>;

fn lock(in_flight: &InFlightMap) -> MutexGuard<'_, HashMap<RequestHandle, CancellationToken>> {
    // The map is only ever mutated by single `insert`/`remove` calls, it cannot be left in
    // an inconsistent state by a panic.
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fetches, decodes and caches remote resources.
///
/// The coordinator is explicitly constructed and owned by the application, typically behind
/// an `Arc`. All fetches are spawned onto the runtime passed at construction.
pub struct CacheCoordinator<D: Decode> {
    cache: ResourceCache<D::Value>,
    in_flight: InFlightMap,
    transfer: Arc<dyn Transfer>,
    decoder: Arc<D>,
    runtime: tokio::runtime::Handle,
    max_download: Duration,
}

impl<D: Decode> fmt::Debug for CacheCoordinator<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheCoordinator")
            .field("cache", &self.cache)
            .field("in_flight", &self.in_flight_count())
            .field("max_download", &self.max_download)
            .finish()
    }
}

impl<D: Decode + Default> CacheCoordinator<D> {
    /// Creates a coordinator downloading over HTTP, configured by `config`.
    pub fn from_config(config: &Config, runtime: tokio::runtime::Handle) -> Self {
        Self::new(
            ResourceCache::new(&config.cache),
            Arc::new(HttpTransfer::from_config(config)),
            D::default(),
            runtime,
            config.timeouts.max_download,
        )
    }
}

impl<D: Decode> CacheCoordinator<D> {
    /// Creates a coordinator from its parts.
    ///
    /// Fetches that do not reach a terminal outcome within `max_download` are cancelled.
    pub fn new(
        cache: ResourceCache<D::Value>,
        transfer: Arc<dyn Transfer>,
        decoder: D,
        runtime: tokio::runtime::Handle,
        max_download: Duration,
    ) -> Self {
        Self {
            cache,
            in_flight: Default::default(),
            transfer,
            decoder: Arc::new(decoder),
            runtime,
            max_download,
        }
    }

    /// Fetches the resource at `key`.
    ///
    /// On a cache hit, `on_complete` is invoked before this returns, and no handle is
    /// returned. Otherwise a transfer is started and its handle returned immediately;
    /// `on_complete` is later invoked exactly once, from a worker of the runtime.
    ///
    /// Concurrent misses for the same key are not coalesced, each starts its own transfer.
    ///
    /// Returns an error if the transfer could not be started. In that case nothing is
    /// tracked and `on_complete` is dropped without being invoked.
    pub fn fetch<F>(
        &self,
        key: ResourceKey,
        on_complete: F,
    ) -> Result<Option<RequestHandle>, StartError>
    where
        F: FnOnce(FetchResult<D::Value>) + Send + 'static,
    {
        if let Some(entry) = self.cache.get(&key) {
            metric!(counter("coordinator.fetch") += 1, "cache" => "hit");
            tracing::trace!(%key, "cache hit");
            on_complete(Ok(entry.into_value()));
            return Ok(None);
        }
        metric!(counter("coordinator.fetch") += 1, "cache" => "miss");

        let transfer = self.transfer.start(&key).map_err(|err| {
            tracing::debug!(%key, error = &err as &dyn std::error::Error, "could not start transfer");
            err
        })?;

        let handle = RequestHandle::new();
        let token = CancellationToken::new();
        {
            let mut in_flight = lock(&self.in_flight);
            in_flight.insert(handle, token.clone());
            metric!(gauge("coordinator.in_flight") = in_flight.len() as u64);
        }

        let completion = Completion {
            handle,
            key: key.clone(),
            in_flight: Arc::clone(&self.in_flight),
            cache: self.cache.clone(),
            callback: Some(Box::new(on_complete)),
        };

        let span = tracing::debug_span!("fetch", %key, %handle);
        let job = run(
            transfer,
            token,
            self.max_download,
            Arc::clone(&self.decoder),
            completion,
        );
        self.runtime.spawn(job.instrument(span));

        tracing::debug!(%key, %handle, "started fetch");
        Ok(Some(handle))
    }

    /// Cancels the fetch tracked under `handle`.
    ///
    /// This never invokes the fetch's callback itself; the fetch delivers
    /// [`FetchError::Cancelled`] on its own once it observes the cancellation. Unknown or
    /// already completed handles are ignored.
    pub fn cancel(&self, handle: RequestHandle) {
        let token = {
            let mut in_flight = lock(&self.in_flight);
            let token = in_flight.remove(&handle);
            metric!(gauge("coordinator.in_flight") = in_flight.len() as u64);
            token
        };

        if let Some(token) = token {
            token.cancel();
            metric!(counter("coordinator.cancel") += 1);
            tracing::debug!(%handle, "cancelled fetch");
        }
    }

    /// Whether the fetch tracked under `handle` has not reached its terminal outcome yet.
    pub fn is_in_flight(&self, handle: RequestHandle) -> bool {
        lock(&self.in_flight).contains_key(&handle)
    }

    /// The number of fetches that have not reached their terminal outcome yet.
    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    pub fn cache(&self) -> &ResourceCache<D::Value> {
        &self.cache
    }
}

/// Drives one fetch attempt to its terminal outcome.
async fn run<D: Decode>(
    transfer: BoxFuture<'static, TransferOutcome>,
    token: CancellationToken,
    max_download: Duration,
    decoder: Arc<D>,
    completion: Completion<D::Value>,
) {
    let start = Instant::now();

    // Dropping the transfer future aborts the transfer.
    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => TransferOutcome::Failed(TransferError::Cancelled),
        outcome = tokio::time::timeout(max_download, transfer) => match outcome {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::debug!("fetch timed out after {max_download:?}");
                TransferOutcome::Failed(TransferError::Cancelled)
            }
        },
    };

    let result = match outcome {
        TransferOutcome::Payload(payload) if !payload.is_empty() => {
            let cost = payload.len() as u64;
            let decoded = tokio::task::spawn_blocking(move || decoder.decode(&payload)).await;
            match decoded {
                Ok(Ok(value)) => Ok((value, cost)),
                Ok(Err(err)) => {
                    tracing::warn!(error = &err as &dyn std::error::Error, "failed to decode payload");
                    Err(FetchError::DecodeError)
                }
                Err(err) => {
                    tracing::error!(error = &err as &dyn std::error::Error, "decoder panicked");
                    Err(FetchError::DecodeError)
                }
            }
        }
        TransferOutcome::Payload(_) | TransferOutcome::Empty => Err(FetchError::DecodeError),
        TransferOutcome::Failed(err) => Err(err.into()),
    };

    completion.complete(result);
    metric!(timer("coordinator.fetch.duration") = start.elapsed());
}

/// The terminal step of a fetch attempt.
///
/// Retires the handle and invokes the callback exactly once. If the fetch task is dropped
/// before reaching its terminal outcome (for instance because the runtime shuts down), the
/// fetch is completed as cancelled on drop.
struct Completion<V: Clone + Send + Sync + 'static> {
    handle: RequestHandle,
    key: ResourceKey,
    in_flight: InFlightMap,
    cache: ResourceCache<V>,
    callback: Option<Callback<V>>,
}

impl<V: Clone + Send + Sync + 'static> Completion<V> {
    fn complete(mut self, result: FetchResult<(V, u64)>) {
        if let Some(callback) = self.callback.take() {
            callback(self.settle(result));
        }
    }

    /// Retires the handle and fixes the terminal outcome.
    fn settle(&self, result: FetchResult<(V, u64)>) -> FetchResult<V> {
        let tracked = {
            let mut in_flight = lock(&self.in_flight);
            let tracked = in_flight.remove(&self.handle).is_some();
            metric!(gauge("coordinator.in_flight") = in_flight.len() as u64);
            tracked
        };

        // An untracked handle means `cancel` got to it first.
        let result = match result {
            _ if !tracked => Err(FetchError::Cancelled),
            Ok((value, cost)) => {
                self.cache.put(self.key.clone(), value.clone(), cost);
                Ok(value)
            }
            Err(err) => Err(err),
        };

        let status = match &result {
            Ok(_) => "success",
            Err(err) => err.status(),
        };
        metric!(counter("coordinator.outcome") += 1, "status" => status);
        tracing::debug!(key = %self.key, handle = %self.handle, status, "fetch completed");

        result
    }
}

impl<V: Clone + Send + Sync + 'static> Drop for Completion<V> {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(self.settle(Err(FetchError::Cancelled)));
        }
    }
}

//! Binds presentation-side views to their outstanding fetch.
//!
//! A view (a table cell, an image widget, ...) shows at most one resource at a time. When it
//! is reused for another resource, the fetch for the previous one is no longer wanted and is
//! cancelled by [`ViewBindings::load`].

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use crate::caching::FetchResult;
use crate::coordinator::CacheCoordinator;
use crate::decode::Decode;
use crate::download::StartError;
use crate::types::{RequestHandle, ResourceKey};

type BindingMap<V> = Arc<Mutex<HashMap<V, RequestHandle>>>;

fn lock<V>(bindings: &BindingMap<V>) -> MutexGuard<'_, HashMap<V, RequestHandle>> {
    bindings.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tracks the outstanding fetch of every view.
pub struct ViewBindings<V, D: Decode> {
    coordinator: Arc<CacheCoordinator<D>>,
    bindings: BindingMap<V>,
}

impl<V, D: Decode> fmt::Debug for ViewBindings<V, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewBindings")
            .field("coordinator", &self.coordinator)
            .field("bound", &lock(&self.bindings).len())
            .finish()
    }
}

impl<V, D> ViewBindings<V, D>
where
    V: Eq + Hash + Clone + Send + 'static,
    D: Decode,
{
    pub fn new(coordinator: Arc<CacheCoordinator<D>>) -> Self {
        Self {
            coordinator,
            bindings: Default::default(),
        }
    }

    /// Loads `key` for `view`, replacing whatever the view was loading before.
    ///
    /// The previous fetch of `view`, if any, is cancelled and delivers
    /// [`FetchError::Cancelled`](crate::caching::FetchError::Cancelled) to its own callback.
    /// The binding is dropped once the new fetch completes.
    pub fn load<F>(&self, view: V, key: ResourceKey, on_complete: F) -> Result<(), StartError>
    where
        F: FnOnce(FetchResult<D::Value>) + Send + 'static,
    {
        self.cancel(&view);

        // The fetch may complete on a worker before `fetch` even returns its handle. `done`
        // keeps the handle from being bound after that, `slot` lets the callback unbind it.
        let done = Arc::new(AtomicBool::new(false));
        let slot = Arc::new(OnceLock::new());

        let callback = {
            let done = Arc::clone(&done);
            let slot = Arc::clone(&slot);
            let bindings = Arc::clone(&self.bindings);
            let view = view.clone();
            move |result| {
                done.store(true, Ordering::SeqCst);
                if let Some(handle) = slot.get() {
                    let mut bindings = lock(&bindings);
                    if bindings.get(&view) == Some(handle) {
                        bindings.remove(&view);
                    }
                }
                on_complete(result);
            }
        };

        let Some(handle) = self.coordinator.fetch(key, callback)? else {
            return Ok(());
        };
        slot.set(handle).ok();

        let displaced = {
            let mut bindings = lock(&self.bindings);
            if done.load(Ordering::SeqCst) {
                return Ok(());
            }
            bindings.insert(view, handle)
        };

        // A concurrent `load` for the same view lost the race.
        if let Some(displaced) = displaced {
            self.coordinator.cancel(displaced);
        }
        Ok(())
    }

    /// Cancels and forgets the outstanding fetch of `view`.
    pub fn cancel(&self, view: &V) {
        let handle = lock(&self.bindings).remove(view);
        if let Some(handle) = handle {
            tracing::trace!(%handle, "cancelling fetch of rebound view");
            self.coordinator.cancel(handle);
        }
    }

    /// Cancels the outstanding fetches of all views.
    pub fn cancel_all(&self) {
        let handles: Vec<_> = lock(&self.bindings).drain().map(|(_, h)| h).collect();
        for handle in handles {
            self.coordinator.cancel(handle);
        }
    }

    /// The handle of the outstanding fetch of `view`.
    pub fn bound(&self, view: &V) -> Option<RequestHandle> {
        lock(&self.bindings).get(view).copied()
    }

    /// The number of views with an outstanding fetch.
    pub fn len(&self) -> usize {
        lock(&self.bindings).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.bindings).is_empty()
    }

    pub fn coordinator(&self) -> &Arc<CacheCoordinator<D>> {
        &self.coordinator
    }
}

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::CallbackError;

pub type CallbackId = u64;

type Settlement<T> = Result<T, CallbackError>;
pub type OnCancel = Box<dyn FnOnce() + Send>;

/// The resolve/reject/on-cancel triple of one outstanding request.
///
/// Clones share one settlement: whichever of resolve, reject or cancel runs
/// first settles the request, later calls return false.
pub struct Callbacks<T> {
    sender: Arc<Mutex<Option<oneshot::Sender<Settlement<T>>>>>,
    on_cancel: Arc<Mutex<Option<OnCancel>>>,
}

impl<T> Clone for Callbacks<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            on_cancel: self.on_cancel.clone(),
        }
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Awaiting side of [`Callbacks`]
pub struct CallbackReceiver<T> {
    receiver: oneshot::Receiver<Settlement<T>>,
}

impl<T> Callbacks<T> {
    pub fn channel() -> (Self, CallbackReceiver<T>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                sender: Arc::new(Mutex::new(Some(sender))),
                on_cancel: Arc::new(Mutex::new(None)),
            },
            CallbackReceiver { receiver },
        )
    }

    pub fn with_on_cancel(self, on_cancel: impl FnOnce() + Send + 'static) -> Self {
        *lock(&self.on_cancel) = Some(Box::new(on_cancel));
        self
    }

    fn settle(&self, settlement: Settlement<T>) -> bool {
        let Some(sender) = lock(&self.sender).take() else {
            return false;
        };
        sender.send(settlement).is_ok()
    }

    pub fn is_settled(&self) -> bool {
        lock(&self.sender).is_none()
    }

    /// Returns false when already settled or the waiter is gone
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn reject(&self, reason: impl Into<String>) -> bool {
        self.settle(Err(CallbackError::Rejected(reason.into())))
    }

    /// Run the cancel hook, then settle with [`CallbackError::Cancelled`]
    pub fn cancel(&self) -> bool {
        if self.is_settled() {
            return false;
        }
        let on_cancel = lock(&self.on_cancel).take();
        if let Some(on_cancel) = on_cancel {
            on_cancel();
        }
        self.settle(Err(CallbackError::Cancelled))
    }
}

impl<T> fmt::Debug for Callbacks<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("settled", &self.is_settled())
            .field("on_cancel", &lock(&self.on_cancel).is_some())
            .finish()
    }
}

impl<T> CallbackReceiver<T> {
    pub async fn wait(self) -> Result<T, CallbackError> {
        self.receiver.await.unwrap_or(Err(CallbackError::Dropped))
    }
}

/// Correlates requests that complete somewhere else, typically after a
/// navigation hop to another view, with the code waiting for them.
///
/// Owned by one controller; nothing is process-global. [`get_callbacks`]
/// leaves the entry in place; it is removed by [`cleanup_callbacks`], or when
/// settled through the registry's own `resolve`/`reject`/`cancel`.
///
/// [`get_callbacks`]: CallbackRegistry::get_callbacks
///
/// [`cleanup_callbacks`]: CallbackRegistry::cleanup_callbacks
pub struct CallbackRegistry<T> {
    next_id: AtomicU64,
    entries: Arc<Mutex<HashMap<CallbackId, Callbacks<T>>>>,
}

impl<T> Default for CallbackRegistry<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> CallbackRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CallbackId, Callbacks<T>>> {
        lock(&self.entries)
    }

    /// Strictly increasing for the lifetime of the registry
    pub fn generate_callback_id(&self) -> CallbackId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn store_callbacks(&self, id: CallbackId, callbacks: Callbacks<T>) {
        debug!(callback_id = id, "callbacks stored");
        if self.entries().insert(id, callbacks).is_some() {
            debug!(callback_id = id, "replaced callbacks under reused id");
        }
    }

    /// Handle on the callbacks stored under `id`; the entry stays until
    /// [`cleanup_callbacks`](Self::cleanup_callbacks)
    pub fn get_callbacks(&self, id: CallbackId) -> Option<Callbacks<T>> {
        self.entries().get(&id).cloned()
    }

    /// Drop the entry. Unsettled waiters see `Dropped` once the last
    /// handle is gone. Returns whether an entry was present.
    pub fn cleanup_callbacks(&self, id: CallbackId) -> bool {
        let removed = self.entries().remove(&id).is_some();
        if removed {
            debug!(callback_id = id, "callbacks cleaned up");
        }
        removed
    }

    /// Generate an id, store fresh callbacks under it and hand back the waiter
    pub fn register(&self, on_cancel: Option<OnCancel>) -> (CallbackId, CallbackReceiver<T>) {
        let id = self.generate_callback_id();
        let (callbacks, receiver) = Callbacks::channel();
        *lock(&callbacks.on_cancel) = on_cancel;
        self.store_callbacks(id, callbacks);
        (id, receiver)
    }

    fn take(&self, id: CallbackId) -> Result<Callbacks<T>, CallbackError> {
        self.entries().remove(&id).ok_or(CallbackError::UnknownId(id))
    }

    pub fn resolve(&self, id: CallbackId, value: T) -> Result<(), CallbackError> {
        let delivered = self.take(id)?.resolve(value);
        debug!(callback_id = id, delivered, "callback resolved");
        Ok(())
    }

    pub fn reject(&self, id: CallbackId, reason: impl Into<String>) -> Result<(), CallbackError> {
        let delivered = self.take(id)?.reject(reason);
        debug!(callback_id = id, delivered, "callback rejected");
        Ok(())
    }

    pub fn cancel(&self, id: CallbackId) -> Result<(), CallbackError> {
        let delivered = self.take(id)?.cancel();
        debug!(callback_id = id, delivered, "callback cancelled");
        Ok(())
    }

    /// Cancel everything outstanding, e.g. when the controller disconnects
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Callbacks<T>> = self.entries().drain().map(|(_, c)| c).collect();
        let count = drained.len();
        for callbacks in drained {
            callbacks.cancel();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

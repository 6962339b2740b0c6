//! Listener registry: synchronous delivery of a request's outcome.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::request::Outcome;

/// A subscriber interested in a request's outcome.
///
/// Listeners run synchronously on whichever task delivers the outcome, so they
/// should be quick. Any closure `Fn(&Outcome<T>)` is a listener.
pub trait Listener<T>: Send + Sync {
    fn on_outcome(&self, outcome: &Outcome<T>);
}

impl<T, F> Listener<T> for F
where
    F: Fn(&Outcome<T>) + Send + Sync,
{
    fn on_outcome(&self, outcome: &Outcome<T>) {
        self(outcome)
    }
}

/// Ordered set of listeners, compared by `Arc` identity.
///
/// `notify_all` snapshots the registered listeners and then re-checks each one
/// under the lock just before calling it: a listener removed while a
/// notification is in progress is skipped if it has not been called yet, and a
/// listener added during a notification waits for the next one. The lock is
/// never held while a listener runs.
pub struct ListenerRegistry<T> {
    listeners: Mutex<Vec<Arc<dyn Listener<T>>>>,
}

impl<T> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener. Adding the same `Arc` twice keeps one registration.
    pub fn add(&self, listener: Arc<dyn Listener<T>>) {
        let mut listeners = self.listeners.lock();
        if !listeners.iter().any(|l| same_listener(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Unregister a listener. Returns whether it was registered.
    pub fn remove(&self, listener: &Arc<dyn Listener<T>>) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    /// Call every registered listener once, in registration order.
    pub fn notify_all(&self, outcome: &Outcome<T>) {
        let snapshot = self.listeners.lock().clone();

        for listener in snapshot {
            let still_registered = self
                .listeners
                .lock()
                .iter()
                .any(|l| same_listener(l, &listener));
            if still_registered {
                listener.on_outcome(outcome);
            }
        }
    }

    pub fn clear(&self) {
        self.listeners.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }
}

impl<T> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn same_listener<T>(a: &Arc<dyn Listener<T>>, b: &Arc<dyn Listener<T>>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Listener that forwards the first outcome it sees into a oneshot channel.
pub struct OneshotListener<T> {
    sender: Mutex<Option<oneshot::Sender<Outcome<T>>>>,
}

impl<T: Clone + Send + Sync> Listener<T> for OneshotListener<T> {
    fn on_outcome(&self, outcome: &Outcome<T>) {
        if let Some(sender) = self.sender.lock().take() {
            // Receiver may have been dropped
            let _ = sender.send(outcome.clone());
        }
    }
}

/// Create a listener whose outcome can be awaited.
///
/// # Example
/// ```ignore
/// let (listener, outcome) = volley::listener::oneshot();
/// request.add_listener(listener);
/// request.execute()?;
/// let outcome = outcome.await?;
/// ```
pub fn oneshot<T: Clone + Send + Sync + 'static>()
-> (Arc<dyn Listener<T>>, oneshot::Receiver<Outcome<T>>) {
    let (tx, rx) = oneshot::channel();
    let listener = Arc::new(OneshotListener {
        sender: Mutex::new(Some(tx)),
    });
    (listener, rx)
}

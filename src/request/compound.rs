//! Compound request: fan out to child requests, fan in their outcomes.
//!
//! ```text
//! CompoundRequest::execute()
//!     ├─> child 0 .execute() ──(task)──> outcome ──┐
//!     ├─> child 1 .execute() ──(task)──> outcome ──┼─> Fanin::child_finished(i)
//!     └─> child n .execute() ──(task)──> outcome ──┘        │
//!                                                 slot[i] set once, remaining -= 1
//!                                                            │ (1 -> 0, exactly one caller)
//!                                                   combine(&statuses) ─> notify_all
//! ```
//!
//! # Policies
//!
//! - Every child outcome counts toward completion, including failures and
//!   cancellations. The combine strategy sees each child's [`ChildStatus`] and
//!   decides whether a partial result is acceptable;
//!   [`ChildStatus::check_all`] gives fail-on-first-failure behaviour.
//! - A cancelled child still counts, so the compound can complete from its
//!   other children. If the compound itself was cancelled, completion delivers
//!   [`Outcome::Cancelled`] without running the combine strategy.
//! - A child whose `execute()` fails synchronously is recorded with that error
//!   (or its existing outcome, if it already had one).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use metrics::counter;
use parking_lot::Mutex;

use crate::error::{Result, VolleyError};
use crate::listener::{Listener, ListenerRegistry};

use super::types::{Outcome, Request, RequestId, RequestState};

/// How one child request finished, as seen by the combine strategy.
#[derive(Debug, Clone)]
pub enum ChildStatus {
    Completed,
    Failed(Arc<VolleyError>),
    Cancelled,
}

impl ChildStatus {
    fn from_outcome<U>(outcome: &Outcome<U>) -> Self {
        match outcome {
            Outcome::Completed(_) => ChildStatus::Completed,
            Outcome::Failed(error) => ChildStatus::Failed(error.clone()),
            Outcome::Cancelled => ChildStatus::Cancelled,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ChildStatus::Completed)
    }

    /// Succeeds only if every child completed. Otherwise reports the first
    /// child, in registration order, that did not.
    pub fn check_all(statuses: &[ChildStatus]) -> Result<()> {
        for (index, status) in statuses.iter().enumerate() {
            match status {
                ChildStatus::Completed => {}
                ChildStatus::Failed(error) => {
                    return Err(VolleyError::Composition(format!(
                        "child request {index} failed: {error}"
                    )));
                }
                ChildStatus::Cancelled => {
                    return Err(VolleyError::Composition(format!(
                        "child request {index} was cancelled"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Strategy that combines the children's delivered results into one value.
///
/// Typed child results are read from the child requests themselves (usually
/// captured by the closure); `statuses` is indexed in registration order.
pub type CombineFn<T> = Arc<dyn Fn(&[ChildStatus]) -> Result<T> + Send + Sync>;

/// A request composed of child requests of any output type.
///
/// # Example
/// ```ignore
/// let quote = Arc::new(SoapRequest::new(requester.clone(), quote_call, parse_quote));
/// let news = Arc::new(SoapRequest::new(requester.clone(), news_call, parse_news));
///
/// let summary = {
///     let (quote, news) = (quote.clone(), news.clone());
///     CompoundRequest::new(move |statuses: &[ChildStatus]| {
///         ChildStatus::check_all(statuses)?;
///         Ok(Summary { quote: quote.value(), news: news.value() })
///     })
/// };
/// summary.add_request(quote)?;
/// summary.add_request(news)?;
/// summary.add_listener(listener);
/// summary.execute()?;
/// ```
pub struct CompoundRequest<T> {
    children: Mutex<Vec<Arc<dyn Child>>>,
    fanin: Arc<Fanin<T>>,
}

/// Completion bookkeeping shared with the per-child observers.
struct Fanin<T> {
    id: RequestId,
    state: Mutex<RequestState>,
    remaining: AtomicUsize,
    statuses: OnceLock<Vec<OnceLock<ChildStatus>>>,
    cancelled: AtomicBool,
    combine: CombineFn<T>,
    registry: ListenerRegistry<T>,
    outcome: OnceLock<Arc<Outcome<T>>>,
}

impl<T: Send + Sync + 'static> CompoundRequest<T> {
    pub fn new<F>(combine: F) -> Self
    where
        F: Fn(&[ChildStatus]) -> Result<T> + Send + Sync + 'static,
    {
        Self::with_combine(Arc::new(combine))
    }

    pub fn with_combine(combine: CombineFn<T>) -> Self {
        Self {
            children: Mutex::new(Vec::new()),
            fanin: Arc::new(Fanin {
                id: RequestId::new(),
                state: Mutex::new(RequestState::Idle),
                remaining: AtomicUsize::new(0),
                statuses: OnceLock::new(),
                cancelled: AtomicBool::new(false),
                combine,
                registry: ListenerRegistry::new(),
                outcome: OnceLock::new(),
            }),
        }
    }

    /// Add a child request. Only allowed before `execute()`.
    ///
    /// # Errors
    /// `InvalidState` once the compound has left `Idle`; `Composition` if the
    /// same request (by `Arc` identity) was already added.
    pub fn add_request<R>(&self, request: Arc<R>) -> Result<()>
    where
        R: Request + ?Sized + 'static,
    {
        let state = self.fanin.state.lock();
        if *state != RequestState::Idle {
            return Err(VolleyError::InvalidState(format!(
                "cannot add a child to compound request {}: it is {}",
                self.fanin.id, *state
            )));
        }

        let child = TypedChild(request);
        let mut children = self.children.lock();
        if children.iter().any(|c| c.addr() == child.addr()) {
            return Err(VolleyError::Composition(format!(
                "request {} is already a child of compound request {}",
                child.0.id(),
                self.fanin.id
            )));
        }
        children.push(Arc::new(child));
        Ok(())
    }

    /// Number of child requests.
    pub fn len(&self) -> usize {
        self.children.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.lock().is_empty()
    }

    /// Children that have not reported an outcome yet. Zero before `execute()`.
    pub fn remaining(&self) -> usize {
        self.fanin.remaining.load(Ordering::Acquire)
    }

    /// Status of each child, in registration order; `None` for children still
    /// running or when the compound has not been executed.
    pub fn statuses(&self) -> Vec<Option<ChildStatus>> {
        match self.fanin.statuses.get() {
            Some(slots) => slots.iter().map(|slot| slot.get().cloned()).collect(),
            None => vec![None; self.len()],
        }
    }

    /// The aggregate value, if the compound completed.
    pub fn value(&self) -> Option<T>
    where
        T: Clone,
    {
        self.fanin
            .outcome
            .get()
            .and_then(|outcome| outcome.value().cloned())
    }
}

impl<T: Send + Sync + 'static> Fanin<T> {
    fn child_finished(&self, index: usize, status: ChildStatus) {
        let Some(slots) = self.statuses.get() else {
            return;
        };
        let Some(slot) = slots.get(index) else {
            return;
        };
        if slot.set(status).is_err() {
            tracing::trace!(request_id = %self.id, child = index, "Ignoring repeated child completion");
            return;
        }

        let previous = self.remaining.fetch_sub(1, Ordering::AcqRel);
        tracing::debug!(
            request_id = %self.id,
            child = index,
            remaining = previous - 1,
            "Child request finished"
        );

        if previous == 1 {
            self.complete(slots);
        }
    }

    /// Runs once, on whichever task delivered the last child outcome.
    fn complete(&self, slots: &[OnceLock<ChildStatus>]) {
        let statuses: Vec<ChildStatus> = slots
            .iter()
            .filter_map(|slot| slot.get().cloned())
            .collect();

        let outcome = if self.cancelled.load(Ordering::Acquire) {
            Outcome::Cancelled
        } else {
            match (self.combine)(&statuses) {
                Ok(value) => Outcome::Completed(value),
                Err(e) => {
                    tracing::warn!(request_id = %self.id, error = %e, "Combining child results failed");
                    Outcome::Failed(Arc::new(e))
                }
            }
        };

        let outcome = Arc::new(outcome);
        if self.outcome.set(outcome.clone()).is_err() {
            return;
        }
        *self.state.lock() = outcome.state();

        counter!("volley_requests_total", "kind" => "compound", "outcome" => outcome.state().as_str())
            .increment(1);
        tracing::info!(
            request_id = %self.id,
            children = statuses.len(),
            failed = statuses.iter().filter(|s| !s.is_completed()).count(),
            outcome = %outcome.state(),
            "Compound request finished"
        );

        self.registry.notify_all(&outcome);
        self.registry.clear();
    }
}

impl<T: Send + Sync + 'static> Request for CompoundRequest<T> {
    type Output = T;

    fn id(&self) -> RequestId {
        self.fanin.id
    }

    fn execute(&self) -> Result<()> {
        let children = {
            let mut state = self.fanin.state.lock();
            if *state != RequestState::Idle {
                return Err(VolleyError::InvalidState(format!(
                    "compound request {} cannot execute: it is {}",
                    self.fanin.id, *state
                )));
            }

            let children = self.children.lock().clone();
            if children.is_empty() {
                return Err(VolleyError::Composition(format!(
                    "compound request {} requires at least one request",
                    self.fanin.id
                )));
            }

            self.fanin.remaining.store(children.len(), Ordering::Release);
            let slots = (0..children.len()).map(|_| OnceLock::new()).collect();
            if self.fanin.statuses.set(slots).is_err() {
                return Err(VolleyError::InvalidState(format!(
                    "compound request {} was already executed",
                    self.fanin.id
                )));
            }
            *state = RequestState::Executing;
            children
        };

        tracing::debug!(
            request_id = %self.fanin.id,
            children = children.len(),
            "Executing compound request"
        );

        let sink: Arc<dyn CompletionSink> = self.fanin.clone();
        for (index, child) in children.iter().enumerate() {
            child.attach(index, sink.clone());
            if let Err(e) = child.execute() {
                tracing::warn!(
                    request_id = %self.fanin.id,
                    child = index,
                    error = %e,
                    "Child request failed to start"
                );
                let status = child
                    .status()
                    .unwrap_or_else(|| ChildStatus::Failed(Arc::new(e)));
                self.fanin.child_finished(index, status);
            }
        }

        Ok(())
    }

    fn cancel(&self) {
        let children = self.children.lock().clone();
        {
            let mut state = self.fanin.state.lock();
            match *state {
                RequestState::Idle => *state = RequestState::Cancelled,
                RequestState::Executing => self.fanin.cancelled.store(true, Ordering::Release),
                _ => {}
            }
        }

        tracing::debug!(
            request_id = %self.fanin.id,
            children = children.len(),
            "Cancelling compound request"
        );
        for child in &children {
            child.cancel();
        }
    }

    fn add_listener(&self, listener: Arc<dyn Listener<T>>) {
        if self.fanin.outcome.get().is_none() {
            self.fanin.registry.add(listener);
        }
    }

    fn remove_listener(&self, listener: &Arc<dyn Listener<T>>) -> bool {
        self.fanin.registry.remove(listener)
    }

    fn state(&self) -> RequestState {
        *self.fanin.state.lock()
    }

    fn outcome(&self) -> Option<Arc<Outcome<T>>> {
        self.fanin.outcome.get().cloned()
    }
}

/// Receives child outcomes, independent of the compound's output type.
trait CompletionSink: Send + Sync {
    fn child_finished(&self, index: usize, status: ChildStatus);
}

impl<T: Send + Sync + 'static> CompletionSink for Fanin<T> {
    fn child_finished(&self, index: usize, status: ChildStatus) {
        Fanin::child_finished(self, index, status)
    }
}

/// Listener registered on child `index`.
struct ChildObserver {
    index: usize,
    sink: Arc<dyn CompletionSink>,
}

impl<U> Listener<U> for ChildObserver {
    fn on_outcome(&self, outcome: &Outcome<U>) {
        self.sink
            .child_finished(self.index, ChildStatus::from_outcome(outcome));
    }
}

/// A child request with its output type erased.
trait Child: Send + Sync {
    fn attach(&self, index: usize, sink: Arc<dyn CompletionSink>);
    fn execute(&self) -> Result<()>;
    fn cancel(&self);
    fn status(&self) -> Option<ChildStatus>;
    /// Address of the wrapped request, for identity checks.
    fn addr(&self) -> *const ();
}

struct TypedChild<R: ?Sized>(Arc<R>);

impl<R: Request + ?Sized + 'static> Child for TypedChild<R> {
    fn attach(&self, index: usize, sink: Arc<dyn CompletionSink>) {
        self.0.add_listener(Arc::new(ChildObserver { index, sink }));
    }

    fn execute(&self) -> Result<()> {
        self.0.execute()
    }

    fn cancel(&self) {
        self.0.cancel()
    }

    fn status(&self) -> Option<ChildStatus> {
        match self.0.outcome() {
            Some(outcome) => Some(ChildStatus::from_outcome(outcome.as_ref())),
            None if self.0.state() == RequestState::Cancelled => Some(ChildStatus::Cancelled),
            None => None,
        }
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }
}

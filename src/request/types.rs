//! Core request types: identifiers, lifecycle state, outcomes and the `Request` trait.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::error::{Result, VolleyError};
use crate::http::HttpResponse;
use crate::listener::Listener;

/// Unique identifier for a request, used to correlate log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        RequestId(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Display only first 8 characters for readability in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        RequestId(uuid)
    }
}

/// Lifecycle state of a request.
///
/// ```text
/// Idle ──execute()──> Executing ──> Completed | Failed | Cancelled
///   └──cancel()──> Cancelled
/// ```
///
/// A request executes at most once; every state other than `Idle` rejects
/// `execute()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    Idle,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::Failed | RequestState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Idle => "idle",
            RequestState::Executing => "executing",
            RequestState::Completed => "completed",
            RequestState::Failed => "failed",
            RequestState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single terminal outcome a request reports to its listeners.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    /// The request produced a value.
    Completed(T),
    /// Transport, encoding, parse or aggregation failure.
    Failed(Arc<VolleyError>),
    /// The request was cancelled before producing a value.
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Arc<VolleyError>> {
        match self {
            Outcome::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    /// The terminal state this outcome corresponds to.
    pub fn state(&self) -> RequestState {
        match self {
            Outcome::Completed(_) => RequestState::Completed,
            Outcome::Failed(_) => RequestState::Failed,
            Outcome::Cancelled => RequestState::Cancelled,
        }
    }
}

/// Something that can be executed, cancelled and observed.
///
/// Implementations deliver exactly one [`Outcome`] to their listeners, on
/// whichever task finishes the work. Listeners added after the outcome was
/// delivered are not called; read [`Request::outcome`] instead.
pub trait Request: Send + Sync {
    /// Value produced on success.
    type Output: Send + Sync + 'static;

    fn id(&self) -> RequestId;

    /// Begin work. Returns once the work has been started, not finished.
    ///
    /// # Errors
    /// `InvalidState` if the request is not idle or no tokio runtime is
    /// available; compound requests also fail with `Composition` when empty.
    fn execute(&self) -> Result<()>;

    /// Best-effort abort. Never fails; a no-op on terminal requests.
    fn cancel(&self);

    fn add_listener(&self, listener: Arc<dyn Listener<Self::Output>>);

    /// Returns whether the listener was registered.
    fn remove_listener(&self, listener: &Arc<dyn Listener<Self::Output>>) -> bool;

    fn state(&self) -> RequestState;

    /// The delivered outcome, once there is one.
    fn outcome(&self) -> Option<Arc<Outcome<Self::Output>>>;
}

/// External collaborator that turns a raw SOAP response into a typed value.
///
/// The parser takes ownership of the response and must consume it. Any
/// closure `Fn(HttpResponse) -> anyhow::Result<T>` is a parser.
pub trait ResponseParser<T>: Send + Sync {
    fn parse(&self, response: HttpResponse) -> anyhow::Result<T>;
}

impl<T, F> ResponseParser<T> for F
where
    F: Fn(HttpResponse) -> anyhow::Result<T> + Send + Sync,
{
    fn parse(&self, response: HttpResponse) -> anyhow::Result<T> {
        self(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_display_is_short() {
        let id = RequestId::new();
        assert_eq!(id.to_string().len(), 8);
        assert!(id.0.to_string().starts_with(&id.to_string()));
    }

    #[test]
    fn test_outcome_accessors() {
        let completed: Outcome<u8> = Outcome::Completed(4);
        assert_eq!(completed.value(), Some(&4));
        assert_eq!(completed.state(), RequestState::Completed);

        let failed: Outcome<u8> =
            Outcome::Failed(Arc::new(VolleyError::Encoding("bad".to_string())));
        assert!(failed.is_failed());
        assert!(failed.value().is_none());
        assert!(failed.error().is_some());
        assert_eq!(failed.state(), RequestState::Failed);

        assert!(Outcome::<u8>::Cancelled.state().is_terminal());
        assert!(!RequestState::Executing.is_terminal());
    }

    #[test]
    fn test_closure_parser() {
        let parser = |response: HttpResponse| -> anyhow::Result<usize> { Ok(response.body.len()) };
        let parsed = parser.parse(HttpResponse::new(200, "abcd")).unwrap();
        assert_eq!(parsed, 4);
    }
}

//! Leaf request: one SOAP call, parsed by an external parser.

use std::sync::{Arc, OnceLock};

use metrics::counter;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::envelope::Envelope;
use crate::error::{Result, VolleyError};
use crate::http::HttpClient;
use crate::listener::{Listener, ListenerRegistry};
use crate::transport::SoapRequester;

use super::types::{Outcome, Request, RequestId, RequestState, ResponseParser};

/// What to send for one SOAP call.
///
/// The target URL is not parsed here. A malformed URL or an unregistered
/// scheme is reported when the request runs, as a transport error delivered
/// through [`Outcome::Failed`] before any network I/O.
#[derive(Clone)]
pub struct SoapCall {
    pub target_url: String,
    pub soap_action: Option<String>,
    pub envelope: Arc<dyn Envelope>,
}

impl SoapCall {
    pub fn new(target_url: impl Into<String>, envelope: impl Envelope + 'static) -> Self {
        Self {
            target_url: target_url.into(),
            soap_action: None,
            envelope: Arc::new(envelope),
        }
    }

    pub fn with_soap_action(mut self, soap_action: impl Into<String>) -> Self {
        self.soap_action = Some(soap_action.into());
        self
    }
}

/// A request that performs exactly one SOAP call.
///
/// `execute()` spawns the call on the current tokio runtime. The raw response is
/// handed to the parser and the parsed value is reported as
/// [`Outcome::Completed`]; transport, encoding and parse failures are reported
/// as [`Outcome::Failed`].
///
/// # Example
/// ```ignore
/// let call = SoapCall::new("https://soap.example.com/quotes", envelope)
///     .with_soap_action("urn:GetQuote");
/// let request = SoapRequest::new(requester.clone(), call, parse_quote);
/// let (listener, outcome) = volley::listener::oneshot();
/// request.add_listener(listener);
/// request.execute()?;
/// println!("{:?}", outcome.await?);
/// ```
pub struct SoapRequest<T, H: HttpClient> {
    inner: Arc<Inner<T, H>>,
}

struct Inner<T, H: HttpClient> {
    id: RequestId,
    requester: Arc<SoapRequester<H>>,
    call: SoapCall,
    parser: Arc<dyn ResponseParser<T>>,
    registry: ListenerRegistry<T>,
    state: Mutex<RequestState>,
    cancel_token: CancellationToken,
    outcome: OnceLock<Arc<Outcome<T>>>,
}

impl<T, H> SoapRequest<T, H>
where
    T: Send + Sync + 'static,
    H: HttpClient + 'static,
{
    pub fn new(
        requester: Arc<SoapRequester<H>>,
        call: SoapCall,
        parser: impl ResponseParser<T> + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: RequestId::new(),
                requester,
                call,
                parser: Arc::new(parser),
                registry: ListenerRegistry::new(),
                state: Mutex::new(RequestState::Idle),
                cancel_token: CancellationToken::new(),
                outcome: OnceLock::new(),
            }),
        }
    }

    pub fn call(&self) -> &SoapCall {
        &self.inner.call
    }

    /// The parsed value, if the request completed.
    pub fn value(&self) -> Option<T>
    where
        T: Clone,
    {
        self.inner
            .outcome
            .get()
            .and_then(|outcome| outcome.value().cloned())
    }
}

impl<T, H> Inner<T, H>
where
    T: Send + Sync + 'static,
    H: HttpClient + 'static,
{
    async fn run(self: Arc<Self>) {
        tracing::debug!(
            request_id = %self.id,
            url = %self.call.target_url,
            "Executing SOAP request"
        );

        let result = tokio::select! {
            // Checked first, so a request cancelled before its first poll never posts
            biased;
            // cancel() has already reported the outcome
            _ = self.cancel_token.cancelled() => return,
            result = self.call_and_parse() => result,
        };

        let outcome = match result {
            Ok(value) => Outcome::Completed(value),
            Err(e) => {
                tracing::warn!(request_id = %self.id, error = %e, "SOAP request failed");
                Outcome::Failed(Arc::new(e))
            }
        };
        self.finish(outcome);
    }

    async fn call_and_parse(&self) -> Result<T> {
        let response = self
            .requester
            .execute(
                self.call.envelope.as_ref(),
                &self.call.target_url,
                self.call.soap_action.as_deref(),
            )
            .await?;

        self.parser.parse(response).map_err(VolleyError::Parse)
    }

    /// Deliver `outcome` unless one was already delivered.
    fn finish(&self, outcome: Outcome<T>) {
        let outcome = Arc::new(outcome);
        if self.outcome.set(outcome.clone()).is_err() {
            return;
        }
        *self.state.lock() = outcome.state();

        counter!("volley_requests_total", "kind" => "soap", "outcome" => outcome.state().as_str())
            .increment(1);
        tracing::info!(
            request_id = %self.id,
            outcome = %outcome.state(),
            listeners = self.registry.len(),
            "SOAP request finished"
        );

        self.registry.notify_all(&outcome);
        // No further outcomes will be delivered
        self.registry.clear();
    }
}

impl<T, H> Request for SoapRequest<T, H>
where
    T: Send + Sync + 'static,
    H: HttpClient + 'static,
{
    type Output = T;

    fn id(&self) -> RequestId {
        self.inner.id
    }

    fn execute(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        if *state != RequestState::Idle {
            return Err(VolleyError::InvalidState(format!(
                "request {} cannot execute: it is {}",
                self.inner.id, *state
            )));
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            VolleyError::InvalidState("executing a request requires a tokio runtime".to_string())
        })?;

        *state = RequestState::Executing;
        // The state lock is held until the task is spawned, so the task cannot
        // finish before the request is marked Executing.
        runtime.spawn(self.inner.clone().run());
        Ok(())
    }

    fn cancel(&self) {
        let live = !self.inner.state.lock().is_terminal();
        self.inner.cancel_token.cancel();
        if live {
            tracing::debug!(request_id = %self.inner.id, "Cancelling SOAP request");
            self.inner.finish(Outcome::Cancelled);
        }
    }

    fn add_listener(&self, listener: Arc<dyn Listener<T>>) {
        if self.inner.outcome.get().is_none() {
            self.inner.registry.add(listener);
        }
    }

    fn remove_listener(&self, listener: &Arc<dyn Listener<T>>) -> bool {
        self.inner.registry.remove(listener)
    }

    fn state(&self) -> RequestState {
        *self.inner.state.lock()
    }

    fn outcome(&self) -> Option<Arc<Outcome<T>>> {
        self.inner.outcome.get().cloned()
    }
}

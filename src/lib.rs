//! SOAP-over-HTTP client requests with fan-out/fan-in orchestration.
//!
//! A [`SoapRequest`] performs one SOAP call through a [`SoapRequester`] and hands
//! the raw response to an external parser. A [`CompoundRequest`] executes several
//! child requests concurrently and notifies its listeners exactly once, with a
//! value combined from all of the children, when the last child finishes.

pub mod envelope;
pub mod error;
pub mod http;
pub mod listener;
pub mod request;
pub mod transport;

// Re-export commonly used types
pub use envelope::{Envelope, SoapEnvelope, SoapVersion};
pub use error::{Result, VolleyError};
pub use http::{HttpClient, HttpResponse, MockHttpClient, ReqwestHttpClient};
pub use listener::{Listener, ListenerRegistry};
pub use request::*;
pub use transport::{SoapRequester, TransportConfig};

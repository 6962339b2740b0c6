//! Requests: the common abstraction, the SOAP leaf and the compound fan-in.

pub mod compound;
pub mod soap;
pub mod types;

pub use compound::{ChildStatus, CombineFn, CompoundRequest};
pub use soap::{SoapCall, SoapRequest};
pub use types::{Outcome, Request, RequestId, RequestState, ResponseParser};

//! # Steward Approval
//!
//! Everything between "this operation needs k of n stewards to agree" and
//! a terminal verdict: the wire codec and its leak-prevention policy
//! ([`message`]), the roster and threshold policy seam ([`registry`]), the
//! per-operation state machine ([`session`]), and the conductor that wires
//! them to cards, relays, and guards ([`orchestrator`]).

pub mod error;
pub mod message;
pub mod orchestrator;
pub mod registry;
pub mod session;

pub use error::ApprovalError;
pub use message::{
    decode_request, decode_response, encode_request, encode_response, response_signing_digest,
    ApprovalRequest, ApprovalResponse, CodecError, Decision, TransitPolicy,
};
pub use orchestrator::{AuthorizationResult, Orchestrator, SessionHandle};
pub use registry::{StaticRegistry, StewardProfile, StewardRegistry};
pub use session::{ApprovalSession, RecordOutcome, SessionSnapshot, SessionStatus};

mod canonical;
mod envelope;
mod replay;
pub mod request;
mod verify;

pub use canonical::{canonical_digest, canonical_string, canonicalize};
pub use envelope::{build, Envelope, EnvelopeBuilder, Settlement, UnsignedEnvelope, NATP_VERSION};
pub use replay::{ReplayError, ReplayGuard, DEFAULT_REPLAY_WINDOW};
pub use request::{RequestRejection, RequestVerifier, VerifiedRequest};
pub use verify::{verify, verify_value, verify_with_pem};

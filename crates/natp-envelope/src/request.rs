use ed25519_dalek::VerifyingKey;
use natp_types::{AgentId, NatpError, Timestamp};
use serde_json::Value;
use std::collections::HashSet;
use tracing::warn;

use crate::envelope::Envelope;
use crate::replay::{ReplayError, ReplayGuard};
use crate::verify::{parse_envelope, verify};

pub const SIGNATURE_HEADER: &str = "x-agent-signature";
pub const AGENT_ID_HEADER: &str = "x-agent-id";
pub const API_KEY_HEADER: &str = "x-api-key";

/// Why an incoming request was refused.
#[derive(Debug, thiserror::Error)]
pub enum RequestRejection {
    #[error("missing {0} header")]
    MissingHeader(&'static str),
    #[error(transparent)]
    Malformed(#[from] NatpError),
    #[error("{0} header does not match the envelope")]
    HeaderMismatch(&'static str),
    #[error("invalid signature for agent {0}")]
    InvalidSignature(AgentId),
    #[error("intent {0:?} is not allowed")]
    IntentNotAllowed(Option<String>),
    #[error(transparent)]
    Replay(#[from] ReplayError),
}

impl RequestRejection {
    /// HTTP status a server should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            RequestRejection::MissingHeader(_) | RequestRejection::Malformed(_) => 400,
            RequestRejection::HeaderMismatch(_) | RequestRejection::InvalidSignature(_) => 401,
            RequestRejection::IntentNotAllowed(_) => 403,
            RequestRejection::Replay(_) => 409,
        }
    }
}

/// A request whose envelope verified against the sender's key.
#[derive(Clone, Debug)]
pub struct VerifiedRequest {
    pub agent_id: AgentId,
    pub envelope: Envelope,
}

impl VerifiedRequest {
    /// `payload.intent`, when present.
    pub fn intent(&self) -> Option<&str> {
        intent_of(self.envelope.payload())
    }
}

/// Checks incoming requests: headers, signature, optional intent allow-list
/// and optional replay protection.
#[derive(Clone, Default)]
pub struct RequestVerifier {
    allowed_intents: Option<HashSet<String>>,
    replay_guard: Option<ReplayGuard>,
}

impl RequestVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allowed_intents<I, S>(mut self, intents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_intents = Some(intents.into_iter().map(Into::into).collect());
        self
    }

    pub fn replay_guard(mut self, guard: ReplayGuard) -> Self {
        self.replay_guard = Some(guard);
        self
    }

    /// Verify a request using the wall clock for replay checks.
    pub fn verify<'h, H>(
        &self,
        headers: H,
        body: &[u8],
        sender_key: &VerifyingKey,
    ) -> Result<VerifiedRequest, RequestRejection>
    where
        H: IntoIterator<Item = (&'h str, &'h str)>,
    {
        self.verify_at(headers, body, sender_key, chrono::Utc::now().timestamp())
    }

    /// Verify a request as of `now` (unix seconds).
    ///
    /// Header names are matched case-insensitively. The `X-Agent-Signature`
    /// header must equal the envelope's signature and `X-Agent-ID` its sender.
    pub fn verify_at<'h, H>(
        &self,
        headers: H,
        body: &[u8],
        sender_key: &VerifyingKey,
        now: Timestamp,
    ) -> Result<VerifiedRequest, RequestRejection>
    where
        H: IntoIterator<Item = (&'h str, &'h str)>,
    {
        let mut signature_header = None;
        let mut agent_id_header = None;
        for (name, value) in headers {
            if name.eq_ignore_ascii_case(SIGNATURE_HEADER) {
                signature_header = Some(value);
            } else if name.eq_ignore_ascii_case(AGENT_ID_HEADER) {
                agent_id_header = Some(value);
            }
        }
        let signature_header =
            signature_header.ok_or(RequestRejection::MissingHeader(SIGNATURE_HEADER))?;
        let agent_id_header =
            agent_id_header.ok_or(RequestRejection::MissingHeader(AGENT_ID_HEADER))?;

        let value: Value = serde_json::from_slice(body)
            .map_err(|e| NatpError::Verification(format!("body is not JSON: {e}")))?;
        let envelope = parse_envelope(&value)?;

        if envelope.signature() != signature_header {
            return Err(RequestRejection::HeaderMismatch(SIGNATURE_HEADER));
        }
        if envelope.sender().to_hex() != agent_id_header.to_ascii_lowercase() {
            return Err(RequestRejection::HeaderMismatch(AGENT_ID_HEADER));
        }

        if !verify(&envelope, sender_key)? {
            warn!(agent_id = %envelope.sender(), "rejecting request with invalid signature");
            return Err(RequestRejection::InvalidSignature(envelope.sender().clone()));
        }

        if let Some(allowed) = &self.allowed_intents {
            let intent = intent_of(envelope.payload());
            if !intent.is_some_and(|i| allowed.contains(i)) {
                return Err(RequestRejection::IntentNotAllowed(intent.map(str::to_string)));
            }
        }

        if let Some(guard) = &self.replay_guard {
            guard.check_and_record(
                &envelope.sender().to_hex(),
                envelope.nonce(),
                envelope.timestamp(),
                now,
            )?;
        }

        Ok(VerifiedRequest {
            agent_id: envelope.sender().clone(),
            envelope,
        })
    }
}

fn intent_of(payload: &Value) -> Option<&str> {
    payload
        .get("intent")
        .or_else(|| payload.get("data").and_then(|d| d.get("intent")))
        .and_then(Value::as_str)
}

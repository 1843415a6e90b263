use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use natp_identity::Identity;
use natp_types::{AgentId, NatpError, Priority, Timestamp};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::canonical::{canonical_digest, canonicalize};

/// Protocol version stamped on every envelope.
pub const NATP_VERSION: &str = "0.1.0";

/// Economic metadata for a transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub amount: f64,
    pub currency: String,
    pub facilitation_fee: f64,
}

impl Default for Settlement {
    fn default() -> Self {
        Self {
            amount: 0.0,
            currency: "USD".to_string(),
            facilitation_fee: 0.0,
        }
    }
}

/// A signed NATP envelope.
///
/// Read-only once signed. A new transaction needs a new envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub(crate) natp_version: String,
    pub(crate) sender: AgentId,
    /// SPKI PEM of the sender's public key, for self-authenticating verification.
    pub(crate) sender_public_key: String,
    pub(crate) recipient_contract: String,
    pub(crate) payload: Value,
    pub(crate) priority: Priority,
    #[serde(default)]
    pub(crate) settlement: Settlement,
    pub(crate) timestamp: Timestamp,
    pub(crate) nonce: String,
    /// Base64 Ed25519 signature over the canonical form of every other field.
    pub(crate) signature: String,
}

/// The envelope fields without the signature: exactly what gets signed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnsignedEnvelope {
    pub natp_version: String,
    pub sender: AgentId,
    pub sender_public_key: String,
    pub recipient_contract: String,
    pub payload: Value,
    pub priority: Priority,
    pub settlement: Settlement,
    pub timestamp: Timestamp,
    pub nonce: String,
}

impl UnsignedEnvelope {
    /// Canonical bytes of the unsigned envelope.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, NatpError> {
        Ok(canonicalize(&self.to_value()?))
    }

    fn to_value(&self) -> Result<Value, NatpError> {
        serde_json::to_value(self).map_err(|e| NatpError::Serialization(e.to_string()))
    }
}

impl Envelope {
    pub fn natp_version(&self) -> &str {
        &self.natp_version
    }

    pub fn sender(&self) -> &AgentId {
        &self.sender
    }

    pub fn sender_public_key(&self) -> &str {
        &self.sender_public_key
    }

    pub fn recipient_contract(&self) -> &str {
        &self.recipient_contract
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn settlement(&self) -> &Settlement {
        &self.settlement
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Base64-encoded signature, as carried on the wire.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Extract the signable (unsigned) portion of this envelope.
    pub fn unsigned(&self) -> UnsignedEnvelope {
        UnsignedEnvelope {
            natp_version: self.natp_version.clone(),
            sender: self.sender.clone(),
            sender_public_key: self.sender_public_key.clone(),
            recipient_contract: self.recipient_contract.clone(),
            payload: self.payload.clone(),
            priority: self.priority,
            settlement: self.settlement.clone(),
            timestamp: self.timestamp,
            nonce: self.nonce.clone(),
        }
    }

    /// Canonical bytes of everything except the signature.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, NatpError> {
        self.unsigned().canonical_bytes()
    }

    /// SHA-256 of the canonical unsigned form, hex-encoded.
    pub fn digest(&self) -> Result<String, NatpError> {
        Ok(hex::encode(canonical_digest(&self.unsigned().to_value()?)))
    }

    /// Decode the signature, failing structurally if it is not 64 base64 bytes.
    pub fn signature_bytes(&self) -> Result<[u8; 64], NatpError> {
        let bytes = BASE64
            .decode(self.signature.as_bytes())
            .map_err(|_| NatpError::Verification("signature is not valid base64".into()))?;
        bytes.try_into().map_err(|b: Vec<u8>| {
            NatpError::Verification(format!("signature must be 64 bytes, got {}", b.len()))
        })
    }
}

/// Builder for constructing and signing envelopes.
pub struct EnvelopeBuilder {
    recipient_contract: String,
    payload: Value,
    priority: Priority,
    settlement: Settlement,
    timestamp: Option<Timestamp>,
    nonce: Option<String>,
}

impl EnvelopeBuilder {
    pub fn new(recipient_contract: impl Into<String>, payload: Value) -> Self {
        Self {
            recipient_contract: recipient_contract.into(),
            payload,
            priority: Priority::Normal,
            settlement: Settlement::default(),
            timestamp: None,
            nonce: None,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn settlement(mut self, settlement: Settlement) -> Self {
        self.settlement = settlement;
        self
    }

    /// Pin the timestamp instead of reading the clock.
    pub fn timestamp(mut self, ts: Timestamp) -> Self {
        self.timestamp = Some(ts);
        self
    }

    /// Pin the nonce instead of drawing a random one.
    pub fn nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    /// Sign and produce the final envelope.
    pub fn sign(self, identity: &Identity) -> Result<Envelope, NatpError> {
        if self.recipient_contract.trim().is_empty() {
            return Err(NatpError::Validation("recipient contract is empty".into()));
        }
        if !self.settlement.amount.is_finite() || !self.settlement.facilitation_fee.is_finite() {
            return Err(NatpError::Validation("settlement amounts must be finite".into()));
        }

        let unsigned = UnsignedEnvelope {
            natp_version: NATP_VERSION.to_string(),
            sender: identity.agent_id(),
            sender_public_key: identity.public_key_pem().to_string(),
            recipient_contract: self.recipient_contract,
            payload: self.payload,
            priority: self.priority,
            settlement: self.settlement,
            timestamp: self
                .timestamp
                .unwrap_or_else(|| chrono::Utc::now().timestamp()),
            nonce: self.nonce.unwrap_or_else(random_nonce),
        };

        let canonical = unsigned.canonical_bytes()?;
        let signature = identity.sign(&canonical);
        debug!(
            sender = %unsigned.sender,
            recipient = %unsigned.recipient_contract,
            priority = %unsigned.priority,
            nonce = %unsigned.nonce,
            "envelope signed"
        );

        Ok(Envelope {
            natp_version: unsigned.natp_version,
            sender: unsigned.sender,
            sender_public_key: unsigned.sender_public_key,
            recipient_contract: unsigned.recipient_contract,
            payload: unsigned.payload,
            priority: unsigned.priority,
            settlement: unsigned.settlement,
            timestamp: unsigned.timestamp,
            nonce: unsigned.nonce,
            signature: BASE64.encode(signature.to_bytes()),
        })
    }
}

/// Build and sign an envelope from a priority given as text.
///
/// The priority is validated before anything is signed.
pub fn build(
    identity: &Identity,
    recipient_contract: &str,
    payload: Value,
    priority: &str,
) -> Result<Envelope, NatpError> {
    let priority: Priority = priority.parse()?;
    EnvelopeBuilder::new(recipient_contract, payload)
        .priority(priority)
        .sign(identity)
}

/// 128 random bits, hex-encoded.
fn random_nonce() -> String {
    let nonce_bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(nonce_bytes)
}

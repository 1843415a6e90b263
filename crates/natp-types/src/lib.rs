use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Agent identity: SHA-256 of the agent's raw Ed25519 public key.
///
/// Only ever derived from a public key or parsed from the wire. Receivers
/// re-derive it from the claimed key before trusting a parsed one.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(#[serde(with = "hex_bytes")] [u8; 32]);

impl AgentId {
    pub fn from_public_key(pubkey_bytes: &[u8; 32]) -> Self {
        let hash = Sha256::digest(pubkey_bytes);
        Self(hash.into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex, the form carried in envelopes and headers.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgentId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Unix epoch timestamp in seconds.
pub type Timestamp = i64;

/// Priority lane of an envelope.
///
/// Lanes modulate retry aggressiveness on the sending side; they are not a
/// network-level queue. Ordering follows aggressiveness: `Normal < High < Critical`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::Normal, Priority::High, Priority::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsing is exact and case-sensitive: `"HIGH"` and `"urgent"` are both rejected.
impl FromStr for Priority {
    type Err = NatpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(NatpError::Validation(format!(
                "invalid priority {other:?}, expected one of normal|high|critical"
            ))),
        }
    }
}

/// How far a failed call got before it failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryStage {
    /// Failed locally (keys, validation, resolution, config); nothing went on the wire.
    NeverSent,
    /// The endpoint answered with a non-retryable error.
    Rejected,
    /// Sent, but no acknowledgement within the retry budget.
    Unacknowledged,
    /// Aborted by the caller.
    Cancelled,
}

/// Common error types.
#[derive(Debug, thiserror::Error)]
pub enum NatpError {
    #[error("key load failed: {0}")]
    KeyLoad(String),
    #[error("invalid identity: {0}")]
    Identity(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("resolution failed: {0}")]
    Resolution(String),
    #[error("malformed envelope: {0}")]
    Verification(String),
    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        last_status: Option<u16>,
        last_error: String,
    },
    #[error("call cancelled")]
    Cancelled,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl NatpError {
    pub fn stage(&self) -> DeliveryStage {
        match self {
            NatpError::Rejected { .. } | NatpError::Transport(_) => DeliveryStage::Rejected,
            NatpError::Exhausted { .. } => DeliveryStage::Unacknowledged,
            NatpError::Cancelled => DeliveryStage::Cancelled,
            NatpError::KeyLoad(_)
            | NatpError::Identity(_)
            | NatpError::Validation(_)
            | NatpError::Resolution(_)
            | NatpError::Verification(_)
            | NatpError::Config(_)
            | NatpError::Serialization(_) => DeliveryStage::NeverSent,
        }
    }
}

/// Serde helper for fixed-size byte arrays as hex strings.
mod hex_bytes {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn agent_id_is_sha256_of_public_key() {
        let pubkey = [42u8; 32];
        let id = AgentId::from_public_key(&pubkey);
        let expected = hex::encode(Sha256::digest(pubkey));
        assert_eq!(id.to_hex(), expected);
        assert_eq!(id.to_hex(), id.to_hex().to_lowercase());
    }

    #[test]
    fn agent_id_hex_roundtrip() {
        let id = AgentId::from_public_key(&[7u8; 32]);
        let id2 = AgentId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, id2);
    }

    #[test]
    fn agent_id_rejects_short_hex() {
        assert!(AgentId::from_hex("abcd").is_err());
    }

    #[test]
    fn agent_id_serializes_as_hex_string() {
        let id = AgentId::from_public_key(&[99u8; 32]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let id2: AgentId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, id2);
    }

    #[test]
    fn priority_parses_closed_set() {
        assert_eq!("normal".parse::<Priority>().unwrap(), Priority::Normal);
        assert_eq!("high".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!("critical".parse::<Priority>().unwrap(), Priority::Critical);
        for bad in ["urgent", "low", "Critical", "HIGH", "1", ""] {
            let err = bad.parse::<Priority>().unwrap_err();
            assert!(matches!(err, NatpError::Validation(_)), "{bad} accepted");
        }
    }

    #[test]
    fn priority_rejected_at_deserialization() {
        let ok: Priority = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(ok, Priority::Critical);
        assert!(serde_json::from_str::<Priority>("\"urgent\"").is_err());
    }

    #[test]
    fn priority_ordering_follows_aggressiveness() {
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Critical);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn error_stages() {
        assert_eq!(
            NatpError::Validation("x".into()).stage(),
            DeliveryStage::NeverSent
        );
        assert_eq!(
            NatpError::Resolution("x".into()).stage(),
            DeliveryStage::NeverSent
        );
        assert_eq!(
            NatpError::Rejected { status: 400, body: String::new() }.stage(),
            DeliveryStage::Rejected
        );
        assert_eq!(
            NatpError::Exhausted { attempts: 3, last_status: Some(503), last_error: String::new() }
                .stage(),
            DeliveryStage::Unacknowledged
        );
        assert_eq!(NatpError::Cancelled.stage(), DeliveryStage::Cancelled);
    }

    proptest! {
        #[test]
        fn flipping_any_public_key_bit_changes_agent_id(
            key in prop::array::uniform32(any::<u8>()),
            bit in 0usize..256,
        ) {
            let mut flipped = key;
            flipped[bit / 8] ^= 1 << (bit % 8);
            prop_assert_eq!(AgentId::from_public_key(&key), AgentId::from_public_key(&key));
            prop_assert_ne!(AgentId::from_public_key(&key), AgentId::from_public_key(&flipped));
        }
    }
}

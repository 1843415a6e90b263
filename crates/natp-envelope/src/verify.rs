use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use natp_identity::public_key_from_pem;
use natp_types::{AgentId, NatpError};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::envelope::{Envelope, NATP_VERSION};

/// Verify an envelope against the public key its sender claims.
///
/// `Ok(false)` is a negative answer: bad signature, or a sender id or embedded
/// key that does not belong to `claimed_public_key`. `Err(Verification)` means
/// the envelope is structurally malformed and could not be checked at all.
pub fn verify(envelope: &Envelope, claimed_public_key: &VerifyingKey) -> Result<bool, NatpError> {
    if envelope.natp_version() != NATP_VERSION {
        return Err(NatpError::Verification(format!(
            "unsupported natp_version {:?}, expected {NATP_VERSION}",
            envelope.natp_version()
        )));
    }
    let signature = Signature::from_bytes(&envelope.signature_bytes()?);
    let canonical = envelope.canonical_bytes()?;

    let expected_sender = AgentId::from_public_key(&claimed_public_key.to_bytes());
    if &expected_sender != envelope.sender() {
        debug!(
            sender = %envelope.sender(),
            expected = %expected_sender,
            "sender does not match claimed key"
        );
        return Ok(false);
    }

    match public_key_from_pem(envelope.sender_public_key()) {
        Ok(embedded) if embedded == *claimed_public_key => {}
        _ => {
            debug!(sender = %envelope.sender(), "embedded public key does not match claimed key");
            return Ok(false);
        }
    }

    Ok(claimed_public_key.verify(&canonical, &signature).is_ok())
}

/// [`verify`] with the claimed key given as SPKI PEM.
pub fn verify_with_pem(envelope: &Envelope, claimed_public_key_pem: &str) -> Result<bool, NatpError> {
    let key = public_key_from_pem(claimed_public_key_pem)
        .map_err(|e| NatpError::Verification(format!("claimed public key: {e}")))?;
    verify(envelope, &key)
}

/// Parse an envelope from loosely typed JSON and verify it.
///
/// Missing fields, wrong types and unknown priorities fail with `Verification`.
pub fn verify_value(value: &Value, claimed_public_key: &VerifyingKey) -> Result<bool, NatpError> {
    let envelope = parse_envelope(value)?;
    verify(&envelope, claimed_public_key)
}

pub(crate) fn parse_envelope(value: &Value) -> Result<Envelope, NatpError> {
    Envelope::deserialize(value).map_err(|e| NatpError::Verification(e.to_string()))
}

impl Envelope {
    /// Verify against `claimed_public_key`. See [`verify`].
    pub fn verify(&self, claimed_public_key: &VerifyingKey) -> Result<bool, NatpError> {
        verify(self, claimed_public_key)
    }

    /// Self-authenticating verification using the key embedded in the envelope.
    ///
    /// Proves only that the envelope is internally consistent; callers that
    /// know who the sender should be must use [`Envelope::verify`] instead.
    pub fn verify_self(&self) -> Result<bool, NatpError> {
        let embedded = public_key_from_pem(self.sender_public_key())
            .map_err(|e| NatpError::Verification(format!("sender_public_key: {e}")))?;
        verify(self, &embedded)
    }
}

use natp_types::{AgentId, NatpError};
use serde::{Deserialize, Serialize};

use crate::Identity;

pub const MANIFEST_VERSION: &str = "1.0.0";
pub const MANIFEST_PROTOCOL: &str = "natp";

/// Registration document an agent publishes to the trust directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentManifest {
    pub name: String,
    pub agent_id: AgentId,
    /// SPKI PEM of the agent's Ed25519 public key.
    pub public_key: String,
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub description: String,
    pub version: String,
    pub protocol: String,
}

impl AgentManifest {
    pub fn to_json_pretty(&self) -> Result<String, NatpError> {
        serde_json::to_string_pretty(self).map_err(|e| NatpError::Serialization(e.to_string()))
    }

    /// Check that `agent_id` is the one derived from `public_key`.
    pub fn is_self_consistent(&self) -> bool {
        crate::agent_id_from_pem(&self.public_key)
            .map(|derived| derived == self.agent_id)
            .unwrap_or(false)
    }
}

impl Identity {
    /// Build the manifest for registering this identity as a service.
    pub fn manifest(
        &self,
        name: impl Into<String>,
        endpoint: impl Into<String>,
        capabilities: Vec<String>,
        description: impl Into<String>,
    ) -> AgentManifest {
        AgentManifest {
            name: name.into(),
            agent_id: self.agent_id(),
            public_key: self.public_key_pem().to_string(),
            endpoint: endpoint.into(),
            capabilities,
            description: description.into(),
            version: MANIFEST_VERSION.to_string(),
            protocol: MANIFEST_PROTOCOL.to_string(),
        }
    }
}

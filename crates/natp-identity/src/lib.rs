mod identity;
mod manifest;
mod provider;

pub use identity::{agent_id_from_pem, public_key_from_bytes, public_key_from_pem, Identity};
pub use manifest::{AgentManifest, MANIFEST_PROTOCOL, MANIFEST_VERSION};
pub use provider::{
    EnvVarProvider, EphemeralProvider, KeyMaterialProvider, KeySource, LocalFileProvider,
    PrivateKeyBytes, DEFAULT_KEY_ENV_VAR,
};

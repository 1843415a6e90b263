mod client;
pub mod config;
mod directory;
pub mod well_known;

pub use client::{NatpClient, Transaction, TransactionResponse};
pub use config::ClientConfig;
pub use directory::{Directory, HttpDirectory, ServiceDescriptor, StaticDirectory};
pub use well_known::{well_known_router, write_manifest_file, ManifestCache, WELL_KNOWN_PATH};

pub use natp_envelope::{Envelope, RequestVerifier, Settlement, VerifiedRequest};
pub use natp_identity::{
    EnvVarProvider, EphemeralProvider, Identity, KeyMaterialProvider, KeySource, LocalFileProvider,
};
pub use natp_transport::{CancellationToken, RetryConfig};
pub use natp_types::{AgentId, DeliveryStage, NatpError, Priority};

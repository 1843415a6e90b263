use base64::Engine;
use ed25519_dalek::pkcs8::DecodePrivateKey;
use ed25519_dalek::SigningKey;
use natp_types::NatpError;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Raw private key bytes: a 32-byte Ed25519 seed, or a 64-byte seed || public key.
pub type PrivateKeyBytes = Zeroizing<Vec<u8>>;

/// Default environment variable read by [`EnvVarProvider`].
pub const DEFAULT_KEY_ENV_VAR: &str = "AGENT_PRIVATE_KEY";

/// Trait for sources of private key material.
///
/// Implementations must not log or otherwise leak the bytes they return.
pub trait KeyMaterialProvider: Send + Sync {
    /// Load the raw private key bytes.
    fn load(&self) -> Result<PrivateKeyBytes, NatpError>;

    /// A short, secret-free description of the source, for logs.
    fn describe(&self) -> String;
}

/// Loads a PKCS#8 PEM-encoded Ed25519 private key from a file.
#[derive(Clone, Debug)]
pub struct LocalFileProvider {
    path: PathBuf,
}

impl LocalFileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyMaterialProvider for LocalFileProvider {
    fn load(&self) -> Result<PrivateKeyBytes, NatpError> {
        let pem = Zeroizing::new(std::fs::read_to_string(&self.path).map_err(|e| {
            NatpError::KeyLoad(format!("cannot read {}: {e}", self.path.display()))
        })?);
        seed_from_pem(&pem).map_err(|e| {
            NatpError::KeyLoad(format!("{} is not an Ed25519 PEM key: {e}", self.path.display()))
        })
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

/// Loads key material from an environment variable.
///
/// Accepts a PKCS#8 PEM (with literal `\n` sequences allowed in place of
/// newlines), or raw key bytes encoded as hex or standard base64.
#[derive(Clone, Debug)]
pub struct EnvVarProvider {
    var: String,
}

impl EnvVarProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvVarProvider {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_ENV_VAR)
    }
}

impl KeyMaterialProvider for EnvVarProvider {
    fn load(&self) -> Result<PrivateKeyBytes, NatpError> {
        let raw = Zeroizing::new(std::env::var(&self.var).map_err(|_| {
            NatpError::KeyLoad(format!("environment variable {} is not set", self.var))
        })?);
        let value = Zeroizing::new(raw.trim().replace("\\n", "\n"));
        if value.is_empty() {
            return Err(NatpError::KeyLoad(format!(
                "environment variable {} is empty",
                self.var
            )));
        }

        if value.starts_with("-----BEGIN") {
            return seed_from_pem(&value).map_err(|e| {
                NatpError::KeyLoad(format!("{} holds an invalid PEM key: {e}", self.var))
            });
        }

        if let Ok(bytes) = hex::decode(value.as_str()) {
            return Ok(Zeroizing::new(bytes));
        }
        base64::engine::general_purpose::STANDARD
            .decode(value.as_bytes())
            .map(Zeroizing::new)
            .map_err(|_| {
                NatpError::KeyLoad(format!(
                    "{} is neither PEM, hex nor base64 key material",
                    self.var
                ))
            })
    }

    fn describe(&self) -> String {
        format!("env:{}", self.var)
    }
}

/// Generates a fresh keypair in memory. Never touches durable storage.
#[derive(Clone, Copy, Debug, Default)]
pub struct EphemeralProvider;

impl KeyMaterialProvider for EphemeralProvider {
    fn load(&self) -> Result<PrivateKeyBytes, NatpError> {
        let mut csprng = rand::thread_rng();
        let signing_key = SigningKey::generate(&mut csprng);
        Ok(Zeroizing::new(signing_key.to_bytes().to_vec()))
    }

    fn describe(&self) -> String {
        "ephemeral".to_string()
    }
}

/// Closed set of built-in key sources, for callers that pick one from configuration.
#[derive(Clone, Debug)]
pub enum KeySource {
    LocalFile(PathBuf),
    Environment(String),
    Ephemeral,
}

impl KeyMaterialProvider for KeySource {
    fn load(&self) -> Result<PrivateKeyBytes, NatpError> {
        match self {
            KeySource::LocalFile(path) => LocalFileProvider::new(path.clone()).load(),
            KeySource::Environment(var) => EnvVarProvider::new(var.clone()).load(),
            KeySource::Ephemeral => EphemeralProvider.load(),
        }
    }

    fn describe(&self) -> String {
        match self {
            KeySource::LocalFile(path) => format!("file:{}", path.display()),
            KeySource::Environment(var) => format!("env:{var}"),
            KeySource::Ephemeral => EphemeralProvider.describe(),
        }
    }
}

fn seed_from_pem(pem: &str) -> Result<PrivateKeyBytes, ed25519_dalek::pkcs8::Error> {
    let signing_key = SigningKey::from_pkcs8_pem(pem.trim())?;
    Ok(Zeroizing::new(signing_key.to_bytes().to_vec()))
}

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use natp_identity::AgentManifest;
use natp_types::{AgentId, NatpError};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::directory::HttpDirectory;

/// Where agents publish their manifest for discovery.
pub const WELL_KNOWN_PATH: &str = "/.well-known/agent.json";

pub const DEFAULT_MANIFEST_TTL: Duration = Duration::from_secs(300);

/// An agent's directory manifest, refetched at most once per `ttl`.
pub struct ManifestCache {
    directory: HttpDirectory,
    agent_id: AgentId,
    ttl: Duration,
    cached: Mutex<Option<(AgentManifest, Instant)>>,
}

impl ManifestCache {
    pub fn new(directory: HttpDirectory, agent_id: AgentId) -> Self {
        Self {
            directory,
            agent_id,
            ttl: DEFAULT_MANIFEST_TTL,
            cached: Mutex::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// The cached manifest while it is fresh, otherwise a new directory fetch.
    ///
    /// A failed fetch leaves any previous entry untouched.
    pub async fn get(&self) -> Result<AgentManifest, NatpError> {
        if let Some((manifest, fetched_at)) = self.cached.lock().as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(manifest.clone());
            }
        }

        let manifest = self.directory.agent_manifest(&self.agent_id).await?;
        debug!(agent_id = %self.agent_id, "manifest refreshed");
        *self.cached.lock() = Some((manifest.clone(), Instant::now()));
        Ok(manifest)
    }
}

/// Router serving `GET /.well-known/agent.json` from `cache`.
///
/// Merge it into the agent's own router. Directory failures answer 502.
pub fn well_known_router(cache: Arc<ManifestCache>) -> Router {
    Router::new()
        .route(WELL_KNOWN_PATH, get(serve_manifest))
        .with_state(cache)
}

async fn serve_manifest(State(cache): State<Arc<ManifestCache>>) -> Response {
    match cache.get().await {
        Ok(manifest) => Json(manifest).into_response(),
        Err(e) => {
            warn!(agent_id = %cache.agent_id(), error = %e, "manifest unavailable");
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

/// Fetch the manifest and write it as indented JSON to `path`, creating
/// parent directories. Returns the path written.
pub async fn write_manifest_file(
    directory: &HttpDirectory,
    agent_id: &AgentId,
    path: impl AsRef<Path>,
) -> Result<PathBuf, NatpError> {
    let path = path.as_ref().to_path_buf();
    let manifest = directory.agent_manifest(agent_id).await?;
    let json = manifest.to_json_pretty()?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| NatpError::Config(format!("create {}: {e}", parent.display())))?;
    }
    tokio::fs::write(&path, json)
        .await
        .map_err(|e| NatpError::Config(format!("write {}: {e}", path.display())))?;

    info!(%agent_id, path = %path.display(), "manifest written");
    Ok(path)
}

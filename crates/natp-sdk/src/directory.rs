use futures::future::BoxFuture;
use natp_identity::AgentManifest;
use natp_types::{AgentId, NatpError};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Maps a service contract id to the endpoint that accepts its envelopes.
///
/// Failures are `Resolution` errors and are never retried.
pub trait Directory: Send + Sync {
    fn resolve<'a>(&'a self, service_contract: &'a str) -> BoxFuture<'a, Result<String, NatpError>>;
}

/// Fixed contract → endpoint table.
#[derive(Clone, Debug, Default)]
pub struct StaticDirectory {
    endpoints: HashMap<String, String>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, service_contract: impl Into<String>, endpoint: impl Into<String>) -> Self {
        self.endpoints.insert(service_contract.into(), endpoint.into());
        self
    }
}

impl Directory for StaticDirectory {
    fn resolve<'a>(&'a self, service_contract: &'a str) -> BoxFuture<'a, Result<String, NatpError>> {
        let found = self
            .endpoints
            .get(service_contract)
            .cloned()
            .ok_or_else(|| NatpError::Resolution(format!("unknown service contract {service_contract:?}")));
        Box::pin(async move { found })
    }
}

/// Service entry as listed by the trust directory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub service_id: String,
    #[serde(default)]
    pub service_type: Option<String>,
    /// Where envelopes for this service go. Absent when the orchestrator routes them.
    #[serde(default, alias = "endpoint_url")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub provider_agent_id: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct AgentRecord {
    public_key: String,
}

/// Trust directory over HTTP.
///
/// Services without their own endpoint resolve to the orchestrator's
/// transact URL, which routes by `recipient_contract`.
#[derive(Clone)]
pub struct HttpDirectory {
    http: reqwest::Client,
    base_url: String,
    fallback_endpoint: String,
}

impl HttpDirectory {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, fallback_endpoint: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            fallback_endpoint: fallback_endpoint.into(),
        }
    }

    /// `GET /api/v1/services/{id}`.
    pub async fn service(&self, service_contract: &str) -> Result<ServiceDescriptor, NatpError> {
        let url = self.url(&["api", "v1", "services", service_contract])?;
        self.get_json(url, service_contract).await
    }

    /// `GET /api/v1/services/search?service_type=`.
    pub async fn discover(&self, service_type: &str) -> Result<Vec<ServiceDescriptor>, NatpError> {
        let url = self.url(&["api", "v1", "services", "search"])?;
        let resp = self
            .http
            .get(url)
            .query(&[("service_type", service_type)])
            .send()
            .await
            .map_err(|e| NatpError::Resolution(format!("discovery: {e}")))?;
        if !resp.status().is_success() {
            return Err(NatpError::Resolution(format!(
                "discovery returned {}",
                resp.status()
            )));
        }
        let services: Vec<ServiceDescriptor> = resp
            .json()
            .await
            .map_err(|e| NatpError::Serialization(format!("discovery response: {e}")))?;
        debug!(service_type, found = services.len(), "discovered services");
        Ok(services)
    }

    /// SPKI PEM public key the directory holds for `agent_id`.
    pub async fn agent_public_key(&self, agent_id: &AgentId) -> Result<String, NatpError> {
        let id = agent_id.to_hex();
        let url = self.url(&["api", "v1", "agents", &id])?;
        let record: AgentRecord = self.get_json(url, &id).await?;
        Ok(record.public_key)
    }

    pub async fn agent_manifest(&self, agent_id: &AgentId) -> Result<AgentManifest, NatpError> {
        let id = agent_id.to_hex();
        let url = self.url(&["api", "v1", "agents", &id, "manifest"])?;
        self.get_json(url, &id).await
    }

    /// Directory URL with each of `segments` appended as one percent-encoded
    /// path segment, so ids can never add segments or a query.
    fn url(&self, segments: &[&str]) -> Result<Url, NatpError> {
        if let Some(bad) = segments
            .iter()
            .find(|s| s.trim().is_empty() || **s == "." || **s == "..")
        {
            return Err(NatpError::Resolution(format!("invalid directory id {bad:?}")));
        }
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| NatpError::Config(format!("directory url {:?}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| NatpError::Config(format!("directory url {:?} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url, what: &str) -> Result<T, NatpError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| NatpError::Resolution(format!("directory unreachable: {e}")))?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(NatpError::Resolution(format!("{what:?} not found in directory"))),
            status if !status.is_success() => Err(NatpError::Resolution(format!(
                "directory returned {status} for {what:?}"
            ))),
            _ => resp
                .json()
                .await
                .map_err(|e| NatpError::Resolution(format!("malformed directory entry for {what:?}: {e}"))),
        }
    }
}

impl Directory for HttpDirectory {
    fn resolve<'a>(&'a self, service_contract: &'a str) -> BoxFuture<'a, Result<String, NatpError>> {
        Box::pin(async move {
            let descriptor = self.service(service_contract).await?;
            let endpoint = descriptor
                .endpoint
                .unwrap_or_else(|| self.fallback_endpoint.clone());
            debug!(service_contract, %endpoint, "resolved");
            Ok(endpoint)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_directory_resolves_known_contracts() {
        let dir = StaticDirectory::new().with("svc-booking", "http://booking/transact");
        assert_eq!(dir.resolve("svc-booking").await.unwrap(), "http://booking/transact");
        assert!(matches!(
            dir.resolve("svc-unknown").await,
            Err(NatpError::Resolution(_))
        ));
    }

    #[test]
    fn descriptor_accepts_endpoint_alias_and_extras() {
        let d: ServiceDescriptor = serde_json::from_str(
            r#"{"service_id": "svc-1", "endpoint_url": "http://x/t", "price": 3}"#,
        )
        .unwrap();
        assert_eq!(d.endpoint.as_deref(), Some("http://x/t"));
        assert_eq!(d.extra.get("price"), Some(&serde_json::json!(3)));

        let d: ServiceDescriptor = serde_json::from_str(r#"{"service_id": "svc-2"}"#).unwrap();
        assert_eq!(d.endpoint, None);
    }

    fn http_directory(base: &str) -> HttpDirectory {
        HttpDirectory::new(reqwest::Client::new(), base, "http://orchestrator.test/v1/a2a/transact")
    }

    #[test]
    fn ids_are_encoded_as_a_single_path_segment() {
        let dir = http_directory("http://dir.test/");
        let url = dir.url(&["api", "v1", "services", "svc-booking?x=1"]).unwrap();
        assert_eq!(url.as_str(), "http://dir.test/api/v1/services/svc-booking%3Fx=1");
        assert_eq!(url.query(), None);

        let url = dir.url(&["api", "v1", "services", "a/b#frag"]).unwrap();
        assert_eq!(url.as_str(), "http://dir.test/api/v1/services/a%2Fb%23frag");
        assert_eq!(url.fragment(), None);

        let nested = http_directory("http://dir.test/registry");
        let url = nested.url(&["api", "v1", "services", "svc-1"]).unwrap();
        assert_eq!(url.as_str(), "http://dir.test/registry/api/v1/services/svc-1");
    }

    #[tokio::test]
    async fn dot_and_empty_ids_are_refused_before_any_request() {
        let dir = http_directory("http://dir.test");
        for id in ["", " ", ".", ".."] {
            assert!(
                matches!(dir.service(id).await, Err(NatpError::Resolution(_))),
                "{id:?} should not resolve"
            );
        }
    }
}

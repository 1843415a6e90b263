use ed25519_dalek::VerifyingKey;
use natp_envelope::request::{AGENT_ID_HEADER, API_KEY_HEADER, SIGNATURE_HEADER};
use natp_envelope::{Envelope, EnvelopeBuilder, Settlement};
use natp_identity::{public_key_from_pem, AgentManifest, Identity};
use natp_transport::{
    CancellationToken, DispatchRequest, HttpTransport, JitterSource, RetryEngine, Sleeper, Transport,
};
use natp_types::{AgentId, NatpError, Priority};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::directory::{Directory, HttpDirectory, ServiceDescriptor};

/// Success body returned by the orchestrator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub status: String,
    #[serde(default, alias = "tx_id")]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl TransactionResponse {
    /// Parse a 2xx body. Only a JSON object is an acknowledgement.
    fn from_body(status: u16, body: &[u8]) -> Result<Self, NatpError> {
        let unexpected = |e: String| NatpError::Transport(format!("unexpected response body ({status}): {e}"));
        let value: Value = serde_json::from_slice(body).map_err(|e| unexpected(e.to_string()))?;
        if !value.is_object() {
            return Err(unexpected(format!("expected a JSON object, got {value}")));
        }
        serde_json::from_value(value).map_err(|e| unexpected(e.to_string()))
    }
}

/// The interface agents use to transact over NATP.
///
/// Cheap to share: concurrent calls hold no state in common beyond the
/// read-only identity.
pub struct NatpClient {
    identity: Identity,
    config: ClientConfig,
    http_directory: HttpDirectory,
    directory: Arc<dyn Directory>,
    engine: RetryEngine,
}

impl NatpClient {
    /// Validate `config` and build a client over HTTP.
    pub fn new(identity: Identity, config: ClientConfig) -> Result<Self, NatpError> {
        config.validate()?;

        let derived = identity.agent_id();
        if let Some(claimed) = config.agent_id.as_deref() {
            if !claimed.eq_ignore_ascii_case(&derived.to_hex()) {
                warn!(
                    claimed,
                    agent_id = %derived,
                    "configured agent_id does not match the key; using the derived id"
                );
            }
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| NatpError::Config(format!("http client: {e}")))?;
        let http_directory = HttpDirectory::new(http.clone(), config.directory_base(), config.transact_url());
        let engine = RetryEngine::new(Arc::new(HttpTransport::with_client(http)), config.retry.clone());

        info!(agent_id = %derived, directory = %config.directory_url, "client ready");
        Ok(Self {
            identity,
            directory: Arc::new(http_directory.clone()),
            http_directory,
            config,
            engine,
        })
    }

    pub fn with_directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = directory;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.engine = self.engine.with_transport(transport);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.engine = self.engine.with_sleeper(sleeper);
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.engine = self.engine.with_jitter(jitter);
        self
    }

    /// Always derived from the identity's public key.
    pub fn agent_id(&self) -> AgentId {
        self.identity.agent_id()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The trust directory this client was configured with, whatever
    /// [`NatpClient::with_directory`] resolves through.
    pub fn http_directory(&self) -> &HttpDirectory {
        &self.http_directory
    }

    /// Resolve, sign and deliver `payload` to `service_contract`.
    pub async fn transact(
        &self,
        service_contract: &str,
        payload: Value,
        priority: Priority,
    ) -> Result<TransactionResponse, NatpError> {
        self.transaction(service_contract, payload)
            .priority(priority)
            .send()
            .await
    }

    /// Start a transaction with more options than [`NatpClient::transact`].
    pub fn transaction<'a>(&'a self, service_contract: &'a str, payload: Value) -> Transaction<'a> {
        Transaction {
            client: self,
            service_contract,
            payload,
            priority: Priority::default(),
            settlement: None,
            cancel: None,
        }
    }

    /// Search the directory for services of `service_type`.
    pub async fn discover(&self, service_type: &str) -> Result<Vec<ServiceDescriptor>, NatpError> {
        self.http_directory.discover(service_type).await
    }

    /// Fetch `agent_id`'s public key from the directory.
    ///
    /// The key is only returned if it derives to `agent_id`.
    pub async fn agent_public_key(&self, agent_id: &AgentId) -> Result<VerifyingKey, NatpError> {
        let pem = self.http_directory.agent_public_key(agent_id).await?;
        let key = public_key_from_pem(&pem)?;
        if AgentId::from_public_key(&key.to_bytes()) != *agent_id {
            return Err(NatpError::Resolution(format!(
                "directory key for {agent_id} derives to a different agent id"
            )));
        }
        Ok(key)
    }

    pub async fn agent_manifest(&self, agent_id: &AgentId) -> Result<AgentManifest, NatpError> {
        self.http_directory.agent_manifest(agent_id).await
    }

    fn dispatch_request(&self, endpoint: String, envelope: &Envelope) -> Result<DispatchRequest, NatpError> {
        let body = serde_json::to_vec(envelope).map_err(|e| NatpError::Serialization(e.to_string()))?;
        let mut request = DispatchRequest::new(endpoint, body)
            .header(SIGNATURE_HEADER, envelope.signature())
            .header(AGENT_ID_HEADER, envelope.sender().to_hex());
        if let Some(key) = &self.config.api_key {
            request = request.header(API_KEY_HEADER, key.as_str());
        }
        Ok(request)
    }
}

/// A pending transaction. Built by [`NatpClient::transaction`].
pub struct Transaction<'a> {
    client: &'a NatpClient,
    service_contract: &'a str,
    payload: Value,
    priority: Priority,
    settlement: Option<Settlement>,
    cancel: Option<CancellationToken>,
}

impl<'a> Transaction<'a> {
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn settlement(mut self, settlement: Settlement) -> Self {
        self.settlement = Some(settlement);
        self
    }

    /// Abort the call, including any pending backoff, when `token` is cancelled.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub async fn send(self) -> Result<TransactionResponse, NatpError> {
        let client = self.client;
        let cancel = self.cancel.unwrap_or_default();

        let endpoint = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(NatpError::Cancelled),
            resolved = client.directory.resolve(self.service_contract) => resolved?,
        };

        let mut builder = EnvelopeBuilder::new(self.service_contract, self.payload).priority(self.priority);
        if let Some(settlement) = self.settlement {
            builder = builder.settlement(settlement);
        }
        let envelope = builder.sign(&client.identity)?;
        let request = client.dispatch_request(endpoint, &envelope)?;

        let response = client.engine.dispatch(&request, self.priority, &cancel).await?;
        let parsed = TransactionResponse::from_body(response.status, &response.body)?;

        info!(
            agent_id = %envelope.sender(),
            service_contract = self.service_contract,
            priority = %self.priority,
            status = %parsed.status,
            transaction_id = parsed.transaction_id.as_deref().unwrap_or("-"),
            "transaction completed"
        );
        Ok(parsed)
    }
}

use futures::future::BoxFuture;
use natp_types::NatpError;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use std::time::Duration;

use crate::transport::{parse_retry_after, DispatchRequest, Transport, TransportFailure, TransportResponse};

/// JSON-over-HTTP POST transport backed by `reqwest`.
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, NatpError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| NatpError::Config(format!("http client: {e}")))?;
        Ok(Self { http })
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.http
    }

    async fn post(&self, request: &DispatchRequest) -> Result<TransportResponse, TransportFailure> {
        let mut builder = self
            .http
            .post(&request.url)
            .header(CONTENT_TYPE, "application/json")
            .body(request.body.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportFailure::Network(format!("reading body: {e}")))?;

        Ok(TransportResponse {
            status,
            body: body.to_vec(),
            retry_after,
        })
    }
}

impl Transport for HttpTransport {
    fn send<'a>(
        &'a self,
        request: &'a DispatchRequest,
    ) -> BoxFuture<'a, Result<TransportResponse, TransportFailure>> {
        Box::pin(self.post(request))
    }
}

fn classify(err: reqwest::Error) -> TransportFailure {
    if err.is_builder() {
        TransportFailure::Invalid(err.to_string())
    } else {
        TransportFailure::Network(err.to_string())
    }
}

use futures::future::BoxFuture;
use rand::Rng;
use std::time::Duration;

/// One outbound request, ready to be sent unchanged on every attempt.
#[derive(Clone, Debug)]
pub struct DispatchRequest {
    pub url: String,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl DispatchRequest {
    pub fn new(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            url: url.into(),
            body,
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Whatever status the server answered with. Classification is the engine's job.
#[derive(Clone, Debug)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// Parsed `Retry-After` header, when the server sent one.
    pub retry_after: Option<Duration>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// The request never produced a response.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportFailure {
    /// Connection, DNS, timeout or a broken body. Transient.
    #[error("network error: {0}")]
    Network(String),
    /// The request could not be built at all. Retrying will not help.
    #[error("invalid request: {0}")]
    Invalid(String),
}

/// Sends a request once. Implementations must not retry on their own.
pub trait Transport: Send + Sync {
    fn send<'a>(
        &'a self,
        request: &'a DispatchRequest,
    ) -> BoxFuture<'a, Result<TransportResponse, TransportFailure>>;
}

/// Source of backoff waits.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Source of jitter fractions in `[0, 1)`.
pub trait JitterSource: Send + Sync {
    fn fraction(&self) -> f64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn fraction(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Always the same fraction.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn fraction(&self) -> f64 {
        self.0
    }
}

/// Parse a `Retry-After` value given in delta-seconds.
///
/// HTTP-date values are not supported and yield `None`.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

use natp_types::{NatpError, Priority};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::policy::{Decision, RetryConfig};
use crate::transport::{
    DispatchRequest, JitterSource, RandomJitter, Sleeper, TokioSleeper, Transport, TransportFailure,
    TransportResponse,
};

/// Last transient failure seen by a call.
#[derive(Clone, Debug, PartialEq)]
pub enum AttemptFailure {
    Status { status: u16, body: String },
    Network(String),
}

impl AttemptFailure {
    pub fn status(&self) -> Option<u16> {
        match self {
            AttemptFailure::Status { status, .. } => Some(*status),
            AttemptFailure::Network(_) => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            AttemptFailure::Status { status, body } if body.is_empty() => format!("HTTP {status}"),
            AttemptFailure::Status { status, body } => format!("HTTP {status}: {body}"),
            AttemptFailure::Network(e) => e.clone(),
        }
    }
}

/// State of one logical call. `attempt` is the 0-based index of the current
/// or just-failed attempt.
#[derive(Debug)]
pub enum CallState {
    Attempting { attempt: u32 },
    Backoff { attempt: u32, delay: Duration, last: AttemptFailure },
    Succeeded(TransportResponse),
    FailedFatal(NatpError),
    FailedExhausted { attempts: u32, last: AttemptFailure },
    Cancelled { attempts: u32 },
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CallState::Attempting { .. } | CallState::Backoff { .. })
    }
}

/// Runs a request through [`CallState`] until it reaches a terminal state.
///
/// Identical bytes are re-sent on every attempt; nothing is re-signed.
#[derive(Clone)]
pub struct RetryEngine {
    transport: Arc<dyn Transport>,
    config: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
    jitter: Arc<dyn JitterSource>,
}

impl RetryEngine {
    pub fn new(transport: Arc<dyn Transport>, config: RetryConfig) -> Self {
        Self {
            transport,
            config,
            sleeper: Arc::new(TokioSleeper),
            jitter: Arc::new(RandomJitter),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Send `request` with retries according to `priority`'s lane.
    ///
    /// Returns the first 2xx response. A non-retryable status fails with
    /// `Rejected`, an exhausted budget with `Exhausted` and a triggered
    /// `cancel` with `Cancelled`.
    pub async fn dispatch(
        &self,
        request: &DispatchRequest,
        priority: Priority,
        cancel: &CancellationToken,
    ) -> Result<TransportResponse, NatpError> {
        let mut state = if cancel.is_cancelled() {
            CallState::Cancelled { attempts: 0 }
        } else {
            CallState::Attempting { attempt: 0 }
        };

        loop {
            state = match state {
                CallState::Attempting { attempt } => {
                    debug!(url = %request.url, attempt, %priority, "sending");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => CallState::Cancelled { attempts: attempt + 1 },
                        outcome = self.transport.send(request) => {
                            self.after_attempt(priority, attempt, outcome)
                        }
                    }
                }
                CallState::Backoff {
                    attempt,
                    delay,
                    last,
                } => {
                    warn!(
                        url = %request.url,
                        attempt,
                        %priority,
                        delay_ms = delay.as_millis() as u64,
                        error = %last.describe(),
                        "attempt failed, backing off"
                    );
                    self.leave_backoff(attempt, delay, cancel).await
                }
                CallState::Succeeded(response) => {
                    debug!(url = %request.url, status = response.status, "delivered");
                    return Ok(response);
                }
                CallState::FailedFatal(err) => {
                    warn!(url = %request.url, error = %err, "request rejected");
                    return Err(err);
                }
                CallState::FailedExhausted { attempts, last } => {
                    warn!(url = %request.url, attempts, %priority, "retry budget exhausted");
                    return Err(NatpError::Exhausted {
                        attempts,
                        last_status: last.status(),
                        last_error: last.describe(),
                    });
                }
                CallState::Cancelled { attempts } => {
                    info!(url = %request.url, attempts, "call cancelled");
                    return Err(NatpError::Cancelled);
                }
            };
        }
    }

    /// Classify the outcome of attempt `attempt` into the next state.
    pub fn after_attempt(
        &self,
        priority: Priority,
        attempt: u32,
        outcome: Result<TransportResponse, TransportFailure>,
    ) -> CallState {
        let (failure, retry_after) = match outcome {
            Ok(response) if response.is_success() => return CallState::Succeeded(response),
            Ok(response) if self.config.is_retryable_status(response.status) => (
                AttemptFailure::Status {
                    status: response.status,
                    body: response.body_text(),
                },
                response.retry_after,
            ),
            Ok(response) => {
                return CallState::FailedFatal(NatpError::Rejected {
                    status: response.status,
                    body: response.body_text(),
                })
            }
            Err(TransportFailure::Network(e)) => (AttemptFailure::Network(e), None),
            Err(TransportFailure::Invalid(e)) => {
                return CallState::FailedFatal(NatpError::Config(format!("invalid request: {e}")))
            }
        };

        match self
            .config
            .decide(priority, attempt, retry_after, self.jitter.fraction())
        {
            Decision::Retry(delay) => CallState::Backoff {
                attempt,
                delay,
                last: failure,
            },
            Decision::GiveUp => CallState::FailedExhausted {
                attempts: attempt + 1,
                last: failure,
            },
        }
    }

    async fn leave_backoff(&self, attempt: u32, delay: Duration, cancel: &CancellationToken) -> CallState {
        let cancelled = CallState::Cancelled {
            attempts: attempt + 1,
        };
        if cancel.is_cancelled() {
            return cancelled;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => cancelled,
            _ = self.sleeper.sleep(delay) => {
                if cancel.is_cancelled() {
                    cancelled
                } else {
                    CallState::Attempting { attempt: attempt + 1 }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FixedJitter;
    use futures::future::BoxFuture;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    type Outcome = Result<TransportResponse, TransportFailure>;

    fn status(code: u16) -> Outcome {
        Ok(TransportResponse {
            status: code,
            body: Vec::new(),
            retry_after: None,
        })
    }

    fn status_after(code: u16, secs: u64) -> Outcome {
        Ok(TransportResponse {
            status: code,
            body: Vec::new(),
            retry_after: Some(Duration::from_secs(secs)),
        })
    }

    /// Plays back scripted outcomes, repeating the last one once exhausted.
    struct Scripted {
        script: Mutex<VecDeque<Outcome>>,
        last: Outcome,
        calls: AtomicU32,
        bodies: Mutex<Vec<Vec<u8>>>,
    }

    impl Scripted {
        fn new(script: Vec<Outcome>) -> Arc<Self> {
            let last = script.last().cloned().unwrap_or_else(|| status(200));
            Arc::new(Self {
                script: Mutex::new(script.into()),
                last,
                calls: AtomicU32::new(0),
                bodies: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Transport for Scripted {
        fn send<'a>(&'a self, request: &'a DispatchRequest) -> BoxFuture<'a, Outcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bodies.lock().push(request.body.clone());
            let next = self.script.lock().pop_front().unwrap_or_else(|| self.last.clone());
            Box::pin(async move { next })
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
            self.slept.lock().push(duration);
            Box::pin(async {})
        }
    }

    /// Cancels the token as soon as backoff starts, then never wakes.
    struct CancellingSleeper(CancellationToken);

    impl Sleeper for CancellingSleeper {
        fn sleep(&self, _: Duration) -> BoxFuture<'static, ()> {
            self.0.cancel();
            Box::pin(futures::future::pending())
        }
    }

    fn config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            jitter_ratio: 0.0,
            ..RetryConfig::default()
        }
    }

    fn engine(transport: Arc<Scripted>, config: RetryConfig) -> (RetryEngine, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::default());
        let engine = RetryEngine::new(transport, config)
            .with_sleeper(sleeper.clone())
            .with_jitter(Arc::new(FixedJitter(0.0)));
        (engine, sleeper)
    }

    fn request() -> DispatchRequest {
        DispatchRequest::new("http://orchestrator/v1/a2a/transact", b"{\"signed\":true}".to_vec())
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let transport = Scripted::new(vec![status(503), status(503), status(503), status(200)]);
        let (engine, sleeper) = engine(transport.clone(), config(3));

        let response = engine
            .dispatch(&request(), Priority::Normal, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(transport.calls(), 4);
        assert_eq!(
            *sleeper.slept.lock(),
            [100, 200, 400].map(Duration::from_millis).to_vec()
        );
    }

    #[tokio::test]
    async fn resends_identical_bytes() {
        let transport = Scripted::new(vec![status(502), status(200)]);
        let (engine, _) = engine(transport.clone(), config(3));
        engine
            .dispatch(&request(), Priority::Normal, &CancellationToken::new())
            .await
            .unwrap();
        let bodies = transport.bodies.lock();
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[0], bodies[1]);
    }

    #[tokio::test]
    async fn exhausts_after_max_retries_plus_one() {
        let transport = Scripted::new(vec![status(503)]);
        let (engine, sleeper) = engine(transport.clone(), config(2));

        let err = engine
            .dispatch(&request(), Priority::Normal, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(transport.calls(), 3);
        assert_eq!(sleeper.slept.lock().len(), 2);
        match err {
            NatpError::Exhausted {
                attempts,
                last_status,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_status, Some(503));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_retryable_status_is_fatal() {
        let transport = Scripted::new(vec![Ok(TransportResponse {
            status: 400,
            body: b"bad envelope".to_vec(),
            retry_after: None,
        })]);
        let (engine, sleeper) = engine(transport.clone(), config(3));

        let err = engine
            .dispatch(&request(), Priority::Critical, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(transport.calls(), 1);
        assert!(sleeper.slept.lock().is_empty());
        match err {
            NatpError::Rejected { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "bad envelope");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn network_errors_are_retried() {
        let transport = Scripted::new(vec![
            Err(TransportFailure::Network("connection refused".into())),
            status(200),
        ]);
        let (engine, _) = engine(transport.clone(), config(1));
        let response = engine
            .dispatch(&request(), Priority::Normal, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn invalid_request_is_not_retried() {
        let transport = Scripted::new(vec![Err(TransportFailure::Invalid("bad url".into()))]);
        let (engine, _) = engine(transport.clone(), config(3));
        let err = engine
            .dispatch(&request(), Priority::Normal, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NatpError::Config(_)));
        assert_eq!(err.stage(), natp_types::DeliveryStage::NeverSent);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn honours_retry_after() {
        let transport = Scripted::new(vec![status_after(429, 5), status(200)]);
        let (engine, sleeper) = engine(transport.clone(), config(3));
        engine
            .dispatch(&request(), Priority::Critical, &CancellationToken::new())
            .await
            .unwrap();
        let slept = sleeper.slept.lock();
        assert_eq!(slept.len(), 1);
        assert!(slept[0] >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn critical_gets_at_least_normal_attempts() {
        let mut attempts = Vec::new();
        for priority in Priority::ALL {
            let transport = Scripted::new(vec![status(500)]);
            let (engine, _) = engine(transport.clone(), config(2));
            let err = engine
                .dispatch(&request(), priority, &CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(err, NatpError::Exhausted { .. }));
            attempts.push(transport.calls());
        }
        assert_eq!(attempts, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn cancel_during_backoff_stops_attempts() {
        let token = CancellationToken::new();
        let transport = Scripted::new(vec![status(503), status(200)]);
        let engine = RetryEngine::new(transport.clone(), config(3))
            .with_sleeper(Arc::new(CancellingSleeper(token.clone())));

        let err = engine
            .dispatch(&request(), Priority::Normal, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, NatpError::Cancelled));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn cancel_interrupts_real_sleep() {
        let token = CancellationToken::new();
        let transport = Scripted::new(vec![status(503)]);
        let engine = RetryEngine::new(
            transport.clone(),
            RetryConfig {
                base_delay: Duration::from_secs(30),
                max_delay: Duration::from_secs(60),
                ..config(3)
            },
        );

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let err = engine
            .dispatch(&request(), Priority::Normal, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, NatpError::Cancelled));
        assert_eq!(transport.calls(), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn already_cancelled_sends_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let transport = Scripted::new(vec![status(200)]);
        let (engine, _) = engine(transport.clone(), config(3));
        let err = engine
            .dispatch(&request(), Priority::Normal, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, NatpError::Cancelled));
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn classification() {
        let transport = Scripted::new(vec![]);
        let (engine, _) = engine(transport, config(1));

        assert!(matches!(
            engine.after_attempt(Priority::Normal, 0, status(201)),
            CallState::Succeeded(_)
        ));
        assert!(matches!(
            engine.after_attempt(Priority::Normal, 0, status(504)),
            CallState::Backoff { attempt: 0, .. }
        ));
        assert!(matches!(
            engine.after_attempt(Priority::Normal, 1, status(504)),
            CallState::FailedExhausted { attempts: 2, .. }
        ));
        assert!(matches!(
            engine.after_attempt(Priority::Normal, 0, status(404)),
            CallState::FailedFatal(NatpError::Rejected { status: 404, .. })
        ));
        assert!(!CallState::Attempting { attempt: 0 }.is_terminal());
        assert!(CallState::Cancelled { attempts: 0 }.is_terminal());
    }
}

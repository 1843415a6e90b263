mod engine;
mod http;
mod policy;
mod transport;

pub use engine::{AttemptFailure, CallState, RetryEngine};
pub use http::HttpTransport;
pub use policy::{Decision, LaneConfig, PriorityLanes, RetryConfig};
pub use transport::{
    parse_retry_after, DispatchRequest, FixedJitter, JitterSource, RandomJitter, Sleeper, TokioSleeper,
    Transport, TransportFailure, TransportResponse,
};
pub use tokio_util::sync::CancellationToken;

use natp_types::{NatpError, Priority};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-priority tuning of the retry policy.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LaneConfig {
    /// Scales `max_retries` (rounded up).
    pub retry_multiplier: f64,
    /// Scales `base_delay`; below 1.0 retries sooner.
    pub delay_multiplier: f64,
}

impl LaneConfig {
    pub const fn new(retry_multiplier: f64, delay_multiplier: f64) -> Self {
        Self {
            retry_multiplier,
            delay_multiplier,
        }
    }
}

/// Lane tuning for each priority.
///
/// Must be monotonic: a higher priority never gets fewer retries or a longer
/// base delay than a lower one. [`RetryConfig::validate`] enforces this.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityLanes {
    pub normal: LaneConfig,
    pub high: LaneConfig,
    pub critical: LaneConfig,
}

impl Default for PriorityLanes {
    fn default() -> Self {
        Self {
            normal: LaneConfig::new(1.0, 1.0),
            high: LaneConfig::new(1.5, 0.75),
            critical: LaneConfig::new(2.0, 0.5),
        }
    }
}

impl PriorityLanes {
    pub fn lane(&self, priority: Priority) -> &LaneConfig {
        match priority {
            Priority::Normal => &self.normal,
            Priority::High => &self.high,
            Priority::Critical => &self.critical,
        }
    }
}

/// Retry/backoff configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt, for the normal lane.
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Cap on the computed exponential delay (before jitter).
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Jitter added on top of the capped delay, as a fraction of it.
    pub jitter_ratio: f64,
    /// Longest server `Retry-After` hint that will be honoured; longer hints give up.
    #[serde(with = "humantime_serde")]
    pub max_retry_after: Duration,
    /// HTTP statuses treated as transient.
    pub retryable_statuses: Vec<u16>,
    pub lanes: PriorityLanes,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.1,
            max_retry_after: Duration::from_secs(300),
            retryable_statuses: vec![429, 500, 502, 503, 504],
            lanes: PriorityLanes::default(),
        }
    }
}

/// Outcome of the policy for one failed attempt.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Decision {
    Retry(Duration),
    GiveUp,
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), NatpError> {
        if self.base_delay > self.max_delay {
            return Err(NatpError::Config(format!(
                "base_delay {:?} exceeds max_delay {:?}",
                self.base_delay, self.max_delay
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(NatpError::Config(format!(
                "jitter_ratio must be within 0..=1, got {}",
                self.jitter_ratio
            )));
        }
        for priority in Priority::ALL {
            let lane = self.lanes.lane(priority);
            let valid = |m: f64| m.is_finite() && m > 0.0;
            if !valid(lane.retry_multiplier) || !valid(lane.delay_multiplier) {
                return Err(NatpError::Config(format!(
                    "{priority} lane multipliers must be positive and finite"
                )));
            }
        }
        let lanes = [&self.lanes.normal, &self.lanes.high, &self.lanes.critical];
        for pair in lanes.windows(2) {
            let (lower, higher) = (pair[0], pair[1]);
            if higher.retry_multiplier < lower.retry_multiplier
                || higher.delay_multiplier > lower.delay_multiplier
            {
                return Err(NatpError::Config(
                    "priority lanes must be monotonic: higher priority needs >= retries and <= delay"
                        .into(),
                ));
            }
        }
        Ok(())
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Retries allowed after the first attempt for `priority`.
    pub fn max_retries_for(&self, priority: Priority) -> u32 {
        let scaled = f64::from(self.max_retries) * self.lanes.lane(priority).retry_multiplier;
        // Shave float noise so 10 * 1.1 is 11, not 12.
        (scaled * (1.0 - 1e-12)).ceil().min(f64::from(u32::MAX)) as u32
    }

    /// Total attempts allowed for `priority`, first attempt included.
    pub fn max_attempts_for(&self, priority: Priority) -> u32 {
        self.max_retries_for(priority).saturating_add(1)
    }

    pub fn base_delay_for(&self, priority: Priority) -> Duration {
        self.base_delay
            .mul_f64(self.lanes.lane(priority).delay_multiplier)
    }

    /// `min(max_delay, base * 2^attempt_index) + jitter`, where jitter is
    /// `jitter_fraction * jitter_ratio` of the capped delay.
    pub fn backoff_delay(&self, priority: Priority, attempt_index: u32, jitter_fraction: f64) -> Duration {
        let base = self.base_delay_for(priority).as_secs_f64();
        let exponential = base * 2f64.powi(attempt_index.min(62) as i32);
        let capped = exponential.min(self.max_delay.as_secs_f64());
        let jitter = capped * self.jitter_ratio * jitter_fraction.clamp(0.0, 1.0);
        Duration::from_secs_f64(capped + jitter)
    }

    /// Decide what follows the failure of attempt `attempt_index` (0-based).
    ///
    /// A server hint takes precedence over the computed delay, so the next
    /// attempt never comes sooner than instructed.
    pub fn decide(
        &self,
        priority: Priority,
        attempt_index: u32,
        retry_after: Option<Duration>,
        jitter_fraction: f64,
    ) -> Decision {
        if attempt_index >= self.max_retries_for(priority) {
            return Decision::GiveUp;
        }
        match retry_after {
            Some(hint) if hint > self.max_retry_after => Decision::GiveUp,
            Some(hint) => Decision::Retry(hint),
            None => Decision::Retry(self.backoff_delay(priority, attempt_index, jitter_fraction)),
        }
    }

    /// Upper bound on time a call may spend waiting: attempts × max delay.
    pub fn retry_budget(&self, priority: Priority) -> Duration {
        self.max_delay
            .saturating_mul(self.max_attempts_for(priority))
    }
}

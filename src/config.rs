//! Pool configuration.
//!
//! Every timing knob the pools use lives here so that tests can shrink the
//! cadence and pin the jitter seed.
//!
//! # Environment Variables
//!
//! - `FORKPOOL_HEARTBEAT` - `true`/`false`, parent heartbeat vs silent blocking reap
//! - `FORKPOOL_POLL_INTERVAL_MS` - sleep between empty reap polls
//! - `FORKPOOL_HEARTBEAT_EVERY` - empty polls between progress lines
//! - `FORKPOOL_JITTER_MS` - worker start jitter, `min-max` or a single value
//! - `FORKPOOL_FORK_BACKOFF_MS` - pause after a failed fork
//! - `FORKPOOL_SEED` - seed for the jitter generator

use std::str::FromStr;
use std::time::Duration;

/// What to do when fork failures shrink the effective cap to zero while
/// work is still queued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CapacityPolicy {
    /// Log and exit the parent process with status 1.
    #[default]
    Terminate,
    /// Return [`crate::PoolError::CapacityExhausted`] from `run`.
    ReturnError,
}

impl FromStr for CapacityPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "terminate" | "exit" => Ok(Self::Terminate),
            "error" | "return-error" => Ok(Self::ReturnError),
            _ => Err(format!(
                "Unknown capacity policy: '{}'. Valid options: terminate, error",
                s
            )),
        }
    }
}

/// Uniform start delay applied by each worker before running its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jitter {
    pub min: Duration,
    pub max: Duration,
}

impl Jitter {
    /// Range from `min` to `max`, swapped if given in the wrong order.
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// No delay at all.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// True when workers start without any delay.
    pub fn is_none(&self) -> bool {
        self.max.is_zero()
    }
}

impl FromStr for Jitter {
    type Err = String;

    /// Parses `"200-1000"` or `"250"` (milliseconds).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_ms = |part: &str| {
            part.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| format!("Invalid jitter '{}'. Expected MIN-MAX in milliseconds", s))
        };
        match s.split_once('-') {
            Some((lo, hi)) => Ok(Self::new(parse_ms(lo)?, parse_ms(hi)?)),
            None => {
                let fixed = parse_ms(s)?;
                Ok(Self::new(fixed, fixed))
            }
        }
    }
}

/// Pool configuration.
///
/// Use a preset, adjust with the builder methods, and hand it to
/// `with_config` on either pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Poll and emit progress lines while reaping (default: true).
    /// When false the fixed pool blocks silently on each worker.
    pub heartbeat: bool,
    /// Sleep between non-blocking reap attempts that found nothing.
    pub poll_interval: Duration,
    /// Number of empty polls between progress lines.
    pub heartbeat_every: u32,
    /// Per-worker start delay range.
    pub jitter: Jitter,
    /// Pause after a failed fork before the next attempt.
    pub fork_backoff: Duration,
    /// Seed for the jitter generator (None = from OS entropy).
    pub seed: Option<u64>,
    /// Behaviour once fork failures leave no capacity.
    pub capacity_policy: CapacityPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::for_fixed()
    }
}

impl PoolConfig {
    /// Preset for [`crate::FixedTaskPool`]: 10ms polls, a progress line
    /// roughly every second.
    pub fn for_fixed() -> Self {
        Self {
            heartbeat: true,
            poll_interval: Duration::from_millis(10),
            heartbeat_every: 100,
            jitter: Jitter::new(Duration::from_millis(200), Duration::from_millis(1000)),
            fork_backoff: Duration::from_millis(100),
            seed: None,
            capacity_policy: CapacityPolicy::Terminate,
        }
    }

    /// Preset for [`crate::ParameterizedTaskPool`]: 100ms polls, a progress
    /// line roughly every five seconds.
    pub fn for_parameterized() -> Self {
        Self {
            heartbeat: true,
            poll_interval: Duration::from_millis(100),
            heartbeat_every: 50,
            jitter: Jitter::new(Duration::from_millis(100), Duration::from_millis(500)),
            fork_backoff: Duration::from_millis(100),
            seed: None,
            capacity_policy: CapacityPolicy::Terminate,
        }
    }

    /// Choose between polling with progress lines and silent blocking reaps.
    pub fn with_heartbeat(mut self, enabled: bool) -> Self {
        self.heartbeat = enabled;
        self
    }

    /// Set the sleep between empty reap polls.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the number of empty polls between progress lines (minimum 1).
    pub fn with_heartbeat_every(mut self, polls: u32) -> Self {
        self.heartbeat_every = polls.max(1);
        self
    }

    /// Set the worker start jitter range.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the pause after a failed fork.
    pub fn with_fork_backoff(mut self, backoff: Duration) -> Self {
        self.fork_backoff = backoff;
        self
    }

    /// Pin the jitter generator to a seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set what happens once fork failures leave no capacity.
    pub fn with_capacity_policy(mut self, policy: CapacityPolicy) -> Self {
        self.capacity_policy = policy;
        self
    }

    /// Apply `FORKPOOL_*` environment overrides. Unparseable values are
    /// ignored with a warning.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("FORKPOOL_HEARTBEAT") {
            match parse_bool(&v) {
                Some(b) => self.heartbeat = b,
                None => warn_ignored("FORKPOOL_HEARTBEAT", &v),
            }
        }

        if let Some(v) = lookup("FORKPOOL_POLL_INTERVAL_MS") {
            match v.trim().parse::<u64>() {
                Ok(ms) => self.poll_interval = Duration::from_millis(ms),
                Err(_) => warn_ignored("FORKPOOL_POLL_INTERVAL_MS", &v),
            }
        }

        if let Some(v) = lookup("FORKPOOL_HEARTBEAT_EVERY") {
            match v.trim().parse::<u32>() {
                Ok(n) => self.heartbeat_every = n.max(1),
                Err(_) => warn_ignored("FORKPOOL_HEARTBEAT_EVERY", &v),
            }
        }

        if let Some(v) = lookup("FORKPOOL_JITTER_MS") {
            match v.parse::<Jitter>() {
                Ok(j) => self.jitter = j,
                Err(_) => warn_ignored("FORKPOOL_JITTER_MS", &v),
            }
        }

        if let Some(v) = lookup("FORKPOOL_FORK_BACKOFF_MS") {
            match v.trim().parse::<u64>() {
                Ok(ms) => self.fork_backoff = Duration::from_millis(ms),
                Err(_) => warn_ignored("FORKPOOL_FORK_BACKOFF_MS", &v),
            }
        }

        if let Some(v) = lookup("FORKPOOL_SEED") {
            match v.trim().parse::<u64>() {
                Ok(seed) => self.seed = Some(seed),
                Err(_) => warn_ignored("FORKPOOL_SEED", &v),
            }
        }

        self
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn warn_ignored(key: &str, value: &str) {
    tracing::warn!(key, value, "Ignoring unparseable environment override");
}

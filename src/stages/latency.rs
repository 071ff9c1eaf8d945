//! latency.rs
//! Injected processing delay.
//!
//! Delays are log-normal (location 1.5, scale 1.7, in log-milliseconds) capped
//! at 150 ms: most samples land at a few milliseconds, a long tail reaches the cap.
//! Sampling is inverse-transform: a uniform draw from the owned generator pushed
//! through the log-normal inverse CDF.
//!
//! The generator sits behind a mutex so every worker can sample from the same
//! model. It is owned by the model, never process-global: `seeded` gives a
//! reproducible sequence, `from_entropy` seeds once from the OS.

use log::debug;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng};
use spin_sleep::{SpinSleeper, SpinStrategy};
use statrs::distribution::{ContinuousCDF, LogNormal};
use std::time::Duration;

use crate::error::{GraphError, Result};

pub const DEFAULT_LOCATION: f64 = 1.5;
pub const DEFAULT_SCALE: f64 = 1.7;
pub const MAX_LATENCY_MS: f64 = 150.0;

pub struct LatencyModel {
    dist: LogNormal,
    cap_ms: f64,
    rng: Mutex<StdRng>,
    sleeper: SpinSleeper,
}

impl LatencyModel {
    /// Default parameters, generator seeded from the OS.
    pub fn from_entropy() -> Result<Self> {
        Self::with_params(DEFAULT_LOCATION, DEFAULT_SCALE, MAX_LATENCY_MS, None)
    }

    /// Default parameters, deterministic generator.
    pub fn seeded(seed: u64) -> Result<Self> {
        Self::with_params(DEFAULT_LOCATION, DEFAULT_SCALE, MAX_LATENCY_MS, Some(seed))
    }

    /// A model that never delays.
    pub fn disabled() -> Result<Self> {
        Self::with_params(DEFAULT_LOCATION, DEFAULT_SCALE, 0.0, Some(0))
    }

    /// `cap_ms` of zero disables injection.
    pub fn with_params(location: f64, scale: f64, cap_ms: f64, seed: Option<u64>) -> Result<Self> {
        if !cap_ms.is_finite() || cap_ms < 0.0 {
            return Err(GraphError::InvalidLatency(format!(
                "cap must be a non-negative number of milliseconds, got {}",
                cap_ms
            )));
        }
        let dist = LogNormal::new(location, scale)
            .map_err(|e| GraphError::InvalidLatency(e.to_string()))?;
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        debug!(
            "[latency] lognormal(location={}, scale={}) cap={}ms seed={:?}",
            location, scale, cap_ms, seed
        );
        Ok(Self {
            dist,
            cap_ms,
            rng: Mutex::new(rng),
            sleeper: SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread),
        })
    }

    pub fn cap(&self) -> Duration {
        Duration::from_secs_f64(self.cap_ms / 1_000.0)
    }

    pub fn is_disabled(&self) -> bool {
        self.cap_ms == 0.0
    }

    /// Draws one delay in `[0, cap]`.
    pub fn sample(&self) -> Duration {
        if self.is_disabled() {
            return Duration::ZERO;
        }
        // Open interval keeps the inverse CDF finite.
        let u: f64 = self.rng.lock().random_range(f64::EPSILON..1.0);
        let ms = self.dist.inverse_cdf(u);
        if ms.is_nan() {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(ms.clamp(0.0, self.cap_ms) / 1_000.0)
    }

    /// Samples a delay and blocks the calling thread for it. Returns the delay.
    pub fn spend(&self) -> Duration {
        let delay = self.sample();
        if !delay.is_zero() {
            self.sleeper.sleep(delay);
        }
        delay
    }
}

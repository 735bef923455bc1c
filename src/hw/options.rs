use std::fmt;
use std::time::Duration;

use bon::Builder;
use tokio_util::sync::CancellationToken;

use crate::adapters::AdapterRegistry;
use crate::gatt::LiveDataCallback;
use crate::measurement::{UserProfile, WeightUnit};

/// Every timing constant of a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder)]
pub struct SessionTimeouts {
    #[builder(default = Duration::from_secs(10))]
    pub power_on: Duration,
    #[builder(default = Duration::from_secs(120))]
    pub discovery: Duration,
    /// Bound on a single connect attempt.
    #[builder(default = Duration::from_secs(10))]
    pub connect: Duration,
    #[builder(default = Duration::from_secs(30))]
    pub service_discovery: Duration,
    /// Pause between stopping discovery and connecting; some radios cannot
    /// switch straight from scanning to connecting.
    #[builder(default = Duration::from_secs(1))]
    pub settle: Duration,
    #[builder(default = Duration::from_millis(500))]
    pub poll_interval: Duration,
    /// Discovery logs a heartbeat every this many polls.
    #[builder(default = 10)]
    pub heartbeat_every: u32,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Connect retry schedule and backend escalation thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    #[builder(default = 5)]
    pub max_retries: u32,
    #[builder(default = Duration::from_millis(1_000))]
    pub base_delay: Duration,
    /// Added to the delay for every failed attempt so far.
    #[builder(default = Duration::from_millis(500))]
    pub delay_step: Duration,
    /// btleplug restarts the scan cycle from this many failures on.
    #[builder(default = 3)]
    pub restart_scan_after: u32,
    /// BlueZ drops the cached device from this many failures on.
    #[builder(default = 2)]
    pub remove_device_after: u32,
    /// Pause after BlueZ recovery steps.
    #[builder(default = Duration::from_secs(2))]
    pub quiesce: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Total connect attempts, the initial one included.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before the attempt following failed attempt number `attempt`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay + self.delay_step * attempt
    }

    /// Returns whether the next attempt is the last one.
    #[must_use]
    pub fn next_is_final(&self, failures: u32) -> bool {
        failures + 1 == self.attempts()
    }
}

/// Options for one `scan_and_read` session.
#[derive(Builder)]
pub struct ScanOptions {
    /// Pins discovery to one hardware address; the adapter is then chosen
    /// after service discovery.
    #[builder(into)]
    pub target_mac: Option<String>,
    #[builder(default)]
    pub adapters: AdapterRegistry,
    pub profile: UserProfile,
    #[builder(default)]
    pub weight_unit: WeightUnit,
    pub on_live_data: Option<LiveDataCallback>,
    /// Aborts discovery, retries and streaming when cancelled.
    #[builder(default)]
    pub cancel: CancellationToken,
    #[builder(default)]
    pub timeouts: SessionTimeouts,
    #[builder(default)]
    pub retry: RetryPolicy,
}

impl fmt::Debug for ScanOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanOptions")
            .field("target_mac", &self.target_mac)
            .field("adapters", &self.adapters.names().collect::<Vec<_>>())
            .field("profile", &self.profile)
            .field("weight_unit", &self.weight_unit)
            .field("timeouts", &self.timeouts)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

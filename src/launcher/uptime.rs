//! Uptime reporting.
//!
//! Emits a `monotonic_counter.uptime` sample as a `tracing` event on a
//! crossbeam `tick` channel, picked up by an OpenTelemetry metrics layer
//! when one is installed and otherwise visible at TRACE level.

use crossbeam::channel::{never, tick, Receiver};
use duration_str::deserialize_duration;
use serde::Deserialize;
use std::time::{Duration, Instant, SystemTime, SystemTimeError};
use tracing::trace;

const DEFAULT_UPTIME_REPORT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct UptimeReportConfig {
    pub enabled: bool,
    #[serde(deserialize_with = "deserialize_duration")]
    pub interval: Duration,
}

impl Default for UptimeReportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: DEFAULT_UPTIME_REPORT_INTERVAL,
        }
    }
}

/// Reports the time elapsed since it was created.
pub struct UptimeReporter {
    start_time: SystemTime,
}

impl Default for UptimeReporter {
    fn default() -> Self {
        Self {
            start_time: SystemTime::now(),
        }
    }
}

impl UptimeReporter {
    /// Builds a reporter and its ticker. A disabled config yields a channel
    /// that never fires, so the caller's select loop needs no special case.
    pub fn new_with_ticker(
        config: &UptimeReportConfig,
        start_time: Option<SystemTime>,
    ) -> (Self, Receiver<Instant>) {
        let reporter = start_time
            .map(|start_time| Self { start_time })
            .unwrap_or_default();
        let ticker = if config.enabled {
            let _ = reporter.report();
            tick(config.interval)
        } else {
            never()
        };
        (reporter, ticker)
    }

    /// Emits the uptime as a monotonic counter sample. Propagates clock
    /// anomalies so the caller decides how loud to be about them.
    pub fn report(&self) -> Result<(), SystemTimeError> {
        self.start_time
            .elapsed()
            .map(|uptime| trace!(monotonic_counter.uptime = uptime.as_secs_f64()))
    }
}

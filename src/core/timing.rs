//! Device-to-host clock correlation
//!
//! Samples pair a device-reported timestamp with the host clock at capture
//! time. The drift between them is rendered with full nanosecond precision;
//! a drift of more than a day would not fit the fixed display field, so it
//! renders as a literal overflow marker instead.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;

/// Rendered in place of a numeric drift that exceeds one day
pub const DRIFT_OVERFLOW: &str = "> 1 day";

/// Drift magnitudes above this many seconds overflow the display field
const DRIFT_MAX_SECS: i64 = 86_400;

/// One clock-correlation sample, last-value-wins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOffsetSample {
    /// Timestamp reported by the device's internal clock
    pub device_clock: DateTime<Utc>,
    /// Host clock at the moment the device timestamp was captured
    pub system_clock: DateTime<Utc>,
}

impl TimeOffsetSample {
    /// Signed drift: device clock minus system clock
    pub fn drift(&self) -> Duration {
        self.device_clock.signed_duration_since(self.system_clock)
    }

    /// Drift formatted for the fixed display field
    pub fn drift_str(&self) -> String {
        format_drift(self.drift())
    }
}

/// Format a signed drift as `secs.nnnnnnnnn`, or the overflow marker when
/// the magnitude exceeds one day.
pub fn format_drift(drift: Duration) -> String {
    let nanos = match drift.num_nanoseconds() {
        Some(n) => n,
        // Magnitude beyond i64 nanoseconds is far past a day anyway
        None => return DRIFT_OVERFLOW.to_string(),
    };
    if nanos.abs() > DRIFT_MAX_SECS * 1_000_000_000 {
        return DRIFT_OVERFLOW.to_string();
    }
    let secs = nanos / 1_000_000_000;
    let frac = (nanos % 1_000_000_000).unsigned_abs();
    let sign = if nanos < 0 { "-" } else { "" };
    format!("{}{}.{:09}", sign, secs.abs(), frac)
}

/// Wire form of a clock-correlation status sub-packet
///
/// Network sessions relay these as JSON; a payload that fails to parse or
/// carries an unrepresentable timestamp is discarded with a warning.
#[derive(Debug, Deserialize)]
pub struct OffsetPayload {
    /// Device clock, whole seconds
    pub real_sec: i64,
    /// Device clock, nanoseconds part
    pub real_nsec: u32,
    /// System clock, whole seconds
    pub clock_sec: i64,
    /// System clock, nanoseconds part
    pub clock_nsec: u32,
}

impl OffsetPayload {
    /// Convert to a sample, rejecting unrepresentable timestamps
    pub fn into_sample(self) -> Option<TimeOffsetSample> {
        let device_clock = Utc.timestamp_opt(self.real_sec, self.real_nsec).single()?;
        let system_clock = Utc.timestamp_opt(self.clock_sec, self.clock_nsec).single()?;
        Some(TimeOffsetSample {
            device_clock,
            system_clock,
        })
    }
}

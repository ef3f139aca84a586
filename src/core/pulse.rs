//! Hardware pulse-timing side channel
//!
//! A dedicated thread blocks on the pulse source and publishes each event
//! through the report hub: a full-width bar line for the scroll pane and log
//! stream, plus a clock-correlation sample into the single-slot mailbox. The
//! monitor loop consumes both opportunistically, once per iteration.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DurationRound, TimeDelta, Utc};
use tracing::{debug, warn};

use super::report::ReportHub;
use super::timing::TimeOffsetSample;

/// Scroll-pane marker for one pulse event
pub const PULSE_BAR: &str = "------------------------------------- PULSE \
                             -------------------------------------";

/// Source of hardware pulse events
pub trait PulseSampler: Send {
    /// Block up to `bound` for the next asserted pulse edge.
    ///
    /// `Ok(Some(_))` carries the correlation sample for the edge, `Ok(None)`
    /// means the bound expired quietly.
    fn wait_pulse(&mut self, bound: Duration) -> io::Result<Option<TimeOffsetSample>>;
}

/// Pulse source backed by the carrier-detect line of a serial device
///
/// The pulse marks a whole second on the device clock, so the sample pairs
/// the host receive time with that time rounded to the nearest second.
pub struct CarrierPulseSampler {
    port: Box<dyn serialport::SerialPort>,
    asserted: bool,
}

impl CarrierPulseSampler {
    /// Open a second handle on the device purely for line monitoring
    pub fn open(path: &str) -> Result<Self, serialport::Error> {
        let port = serialport::new(path, 9600)
            .timeout(Duration::from_millis(100))
            .open()?;
        Ok(Self {
            port,
            asserted: false,
        })
    }
}

impl PulseSampler for CarrierPulseSampler {
    fn wait_pulse(&mut self, bound: Duration) -> io::Result<Option<TimeOffsetSample>> {
        let step = Duration::from_millis(20);
        let mut waited = Duration::ZERO;
        while waited < bound {
            let high = self
                .port
                .read_carrier_detect()
                .map_err(io::Error::other)?;
            if high && !self.asserted {
                self.asserted = true;
                let now = Utc::now();
                let top = now
                    .duration_round(TimeDelta::seconds(1))
                    .unwrap_or(now);
                return Ok(Some(TimeOffsetSample {
                    device_clock: top,
                    system_clock: now,
                }));
            }
            self.asserted = high;
            thread::sleep(step);
            waited += step;
        }
        Ok(None)
    }
}

/// Owner of the pulse-capture thread
pub struct PulseMonitor {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PulseMonitor {
    /// Spawn the capture thread over the given sampler
    pub fn start(mut sampler: Box<dyn PulseSampler>, reports: ReportHub) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("pulse".to_string())
            .spawn(move || {
                while !thread_stop.load(Ordering::SeqCst) {
                    match sampler.wait_pulse(Duration::from_millis(200)) {
                        Ok(Some(sample)) => {
                            debug!(drift = %sample.drift_str(), "pulse edge");
                            reports.publish_sample(sample);
                            reports.push_line(PULSE_BAR);
                            if let Err(err) =
                                reports.log_packet(format!("{}\n", PULSE_BAR).as_bytes())
                            {
                                warn!(%err, "pulse log write failed");
                            }
                        }
                        Ok(None) => {}
                        Err(err) => {
                            warn!(%err, "pulse source failed, stopping capture");
                            break;
                        }
                    }
                }
            })
            .ok();
        Self { stop, handle }
    }

    /// Stop the capture thread and wait for it; later calls are no-ops
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PulseMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

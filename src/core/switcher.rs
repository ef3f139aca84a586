//! Protocol-type switching state machine
//!
//! Tracks which driver the device is speaking and which monitor object owns
//! the device pane. Display switches follow packet receipt; they never change
//! the detected device driver by themselves. A sticky driver (binary
//! protocols that also emit text) keeps its claim on the device while the
//! display drops to the text monitor.

use std::io::Write;

use thiserror::Error;
use tracing::debug;

use super::registry::{MonitorCaps, MonitorRegistry, NameMatch, PacketMonitor, PrivateCommand};
use super::session::{DriverId, Packet, PacketKind};
use super::surface::Surface;

/// Non-fatal outcome of a switch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchReport {
    /// Nothing to do; active monitor kept
    Unchanged,
    /// No registered monitor renders the target driver; state kept
    NoMatch(String),
    /// Terminal cannot fit the target monitor's pane; state kept
    TooSmall(String),
    /// Monitor replaced; panes reallocated
    Switched,
}

/// Fatal switch failure: the display is unusable afterwards
#[derive(Error, Debug)]
#[error("monitor initialization failed for {driver}")]
pub struct SwitchFatal {
    /// Driver whose monitor failed to initialize
    pub driver: DriverId,
}

struct ActiveMonitor {
    driver: DriverId,
    caps: MonitorCaps,
    monitor: Box<dyn PacketMonitor>,
}

/// Switching state: detected driver, active display monitor, sticky fallback
#[derive(Default)]
pub struct TypeSwitcher {
    active: Option<ActiveMonitor>,
    detected: Option<DriverId>,
    fallback: Option<DriverId>,
    last_kind: Option<PacketKind>,
}

impl TypeSwitcher {
    /// Fresh switcher with nothing detected
    pub fn new() -> Self {
        Self::default()
    }

    /// Driver currently owning the display, if any
    pub fn active_driver(&self) -> Option<DriverId> {
        self.active.as_ref().map(|a| a.driver)
    }

    /// Driver the device is believed to be speaking
    pub fn detected_driver(&self) -> Option<DriverId> {
        self.detected
    }

    /// Sticky fallback remembered across a drop to text mode
    pub fn fallback(&self) -> Option<DriverId> {
        self.fallback
    }

    /// Kind of the most recently observed packet
    pub fn last_kind(&self) -> Option<PacketKind> {
        self.last_kind
    }

    /// Remember (or forget) the sticky fallback
    pub fn set_fallback(&mut self, driver: Option<DriverId>) {
        self.fallback = driver;
    }

    /// Driver that should execute a link-control operation: the fallback
    /// when it implements the hook, else the detected driver.
    pub fn control_target(
        &self,
        has_hook: fn(&super::session::DriverInfo) -> bool,
    ) -> Option<DriverId> {
        match self.fallback {
            Some(fb) if has_hook(&fb.info()) => Some(fb),
            _ => self.detected,
        }
    }

    /// Feed one classified packet; may replace the active monitor.
    ///
    /// The detected driver follows the packet kind, except that a text
    /// packet never displaces a sticky driver. Display switching is
    /// triggered only when the observed kind differs from the last one, and
    /// a rejected switch still records the observation so the complaint is
    /// not repeated per packet.
    pub fn on_packet<W: Write>(
        &mut self,
        kind: PacketKind,
        registry: &MonitorRegistry,
        surface: Option<&mut Surface<W>>,
    ) -> Result<SwitchReport, SwitchFatal> {
        let changed = self.last_kind != Some(kind);
        self.last_kind = Some(kind);
        if !changed {
            return Ok(SwitchReport::Unchanged);
        }

        let sticky_holds = kind == PacketKind::Nmea
            && self.detected.map(|d| d.info().sticky).unwrap_or(false);
        if !sticky_holds {
            if let Some(driver) = DriverId::for_packet(kind) {
                self.detected = Some(driver);
            }
        }

        let display_target = if sticky_holds {
            DriverId::Nmea0183
        } else {
            match self.detected {
                Some(d) => d,
                None => return Ok(SwitchReport::Unchanged),
            }
        };
        self.switch_to(display_target, registry, surface)
    }

    /// Force a display switch regardless of traffic (the `t` command)
    pub fn force<W: Write>(
        &mut self,
        fragment: &str,
        registry: &MonitorRegistry,
        surface: Option<&mut Surface<W>>,
    ) -> Result<SwitchReport, SwitchFatal> {
        match registry.match_name(fragment) {
            NameMatch::Unique(d) => {
                let driver = d.driver;
                let report = self.switch_to(driver, registry, surface)?;
                // A forced switch also retargets the device driver
                if report == SwitchReport::Switched {
                    self.detected = Some(driver);
                }
                Ok(report)
            }
            NameMatch::Ambiguous => Ok(SwitchReport::NoMatch(format!(
                "Multiple driver type names match '{}'",
                fragment
            ))),
            NameMatch::None => Ok(SwitchReport::NoMatch(format!(
                "No driver type name matches '{}'",
                fragment
            ))),
        }
    }

    fn switch_to<W: Write>(
        &mut self,
        target: DriverId,
        registry: &MonitorRegistry,
        surface: Option<&mut Surface<W>>,
    ) -> Result<SwitchReport, SwitchFatal> {
        if self.active_driver() == Some(target) {
            return Ok(SwitchReport::Unchanged);
        }

        let descriptor = match registry.lookup(target) {
            Some(d) => d,
            None => {
                return Ok(SwitchReport::NoMatch(format!(
                    "No monitor matches {}",
                    target
                )))
            }
        };

        if let Some(surface) = &surface {
            if !surface.layout().fits(descriptor.min_rows, descriptor.min_cols) {
                return Ok(SwitchReport::TooSmall(format!(
                    "{} requires {}x{} terminal",
                    descriptor.name(),
                    descriptor.min_rows + 1,
                    descriptor.min_cols
                )));
            }
        }

        debug!(from = ?self.active_driver(), to = %target, "switching monitor type");

        if let Some(mut old) = self.active.take() {
            if old.caps.wrap {
                old.monitor.wrap();
            }
        }

        let mut monitor = (descriptor.factory)();
        let caps = descriptor.caps;

        if let Some(surface) = surface {
            surface
                .resize_device_pane(descriptor.min_rows)
                .map_err(|_| SwitchFatal { driver: target })?;
            surface.clear_all();
            if descriptor.min_rows > 0 {
                let pane = surface
                    .device_pane()
                    .ok_or(SwitchFatal { driver: target })?;
                if !caps.initialize || !monitor.initialize(pane) {
                    return Err(SwitchFatal { driver: target });
                }
            }
        }

        self.active = Some(ActiveMonitor {
            driver: target,
            caps,
            monitor,
        });
        Ok(SwitchReport::Switched)
    }

    /// Run the active monitor's update hook for a consumed packet
    pub fn update<W: Write>(&mut self, surface: &mut Surface<W>, packet: &Packet) {
        if let Some(active) = self.active.as_mut() {
            if active.caps.update {
                if let Some(pane) = surface.device_pane() {
                    active.monitor.update(pane, packet);
                }
            }
        }
    }

    /// Redraw the active monitor's pane skeleton after a repaint request
    pub fn repaint<W: Write>(&mut self, surface: &mut Surface<W>) {
        if let Some(active) = self.active.as_mut() {
            if active.caps.initialize {
                if let Some(pane) = surface.device_pane() {
                    let _ = active.monitor.initialize(pane);
                }
            }
        }
    }

    /// Offer a completed command line to the active monitor's private hook
    pub fn private_command(&mut self, line: &str) -> PrivateCommand {
        match self.active.as_mut() {
            Some(active) if active.caps.command => active.monitor.command(line),
            _ => PrivateCommand::Unknown,
        }
    }
}

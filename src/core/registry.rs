//! Monitor registry and capability descriptors
//!
//! Each protocol driver that can own the device pane registers one immutable
//! descriptor: its name, the minimum pane it needs, and which hooks its
//! monitor object actually implements. The registry is populated once at
//! startup and only read afterwards.

use super::session::{DriverId, Packet};
use super::surface::DevicePane;

/// Result of offering a completed command line to a monitor's private hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivateCommand {
    /// The monitor handled the line; skip the generic grammar
    Consumed,
    /// The monitor asks the whole program to terminate
    Terminate,
    /// Not a private command; fall through to the generic grammar
    Unknown,
}

/// Hook set a monitor object implements, as explicit booleans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorCaps {
    /// Draws the device pane skeleton on switch-in
    pub initialize: bool,
    /// Refreshes the device pane per consumed packet
    pub update: bool,
    /// Accepts private command lines
    pub command: bool,
    /// Tears down on switch-out
    pub wrap: bool,
}

impl MonitorCaps {
    /// A monitor implementing no hooks at all
    pub const NONE: MonitorCaps = MonitorCaps {
        initialize: false,
        update: false,
        command: false,
        wrap: false,
    };
}

/// Rendering object bound to the device pane while its protocol is active
///
/// Default bodies are inert; the descriptor's [`MonitorCaps`] records which
/// hooks a given monitor really has, so the framework never has to guess.
pub trait PacketMonitor {
    /// Draw the static pane skeleton. Returning false aborts the switch.
    fn initialize(&mut self, pane: &mut dyn DevicePane) -> bool {
        let _ = pane;
        true
    }

    /// Refresh pane fields from a consumed packet
    fn update(&mut self, pane: &mut dyn DevicePane, packet: &Packet) {
        let _ = (pane, packet);
    }

    /// Offer a completed operator line before the generic grammar sees it
    fn command(&mut self, line: &str) -> PrivateCommand {
        let _ = line;
        PrivateCommand::Unknown
    }

    /// Release anything held before the pane is torn down
    fn wrap(&mut self) {}
}

/// Immutable registration record for one protocol monitor
pub struct MonitorDescriptor {
    /// Driver this monitor renders for
    pub driver: DriverId,
    /// Minimum device pane rows; 0 means no device pane at all
    pub min_rows: u16,
    /// Minimum terminal columns
    pub min_cols: u16,
    /// Which hooks the factory's monitors implement
    pub caps: MonitorCaps,
    /// Builds a fresh monitor instance on switch-in
    pub factory: fn() -> Box<dyn PacketMonitor>,
}

impl MonitorDescriptor {
    /// Display name of the driver this descriptor renders
    pub fn name(&self) -> &'static str {
        self.driver.info().name
    }
}

/// Outcome of a substring lookup for the `t` command and `--type`
pub enum NameMatch<'a> {
    /// Exactly one descriptor matched
    Unique(&'a MonitorDescriptor),
    /// More than one descriptor matched the substring
    Ambiguous,
    /// Nothing matched
    None,
}

/// Read-only table of registered monitor descriptors
pub struct MonitorRegistry {
    entries: Vec<MonitorDescriptor>,
}

impl MonitorRegistry {
    /// Registry holding the built-in monitors
    pub fn builtin() -> Self {
        Self::from_descriptors(super::monitors::builtin_descriptors())
    }

    /// Registry over an explicit descriptor set, for embedders shipping
    /// their own monitors
    pub fn from_descriptors(entries: Vec<MonitorDescriptor>) -> Self {
        Self { entries }
    }

    /// Descriptor registered for a driver, if any
    pub fn lookup(&self, driver: DriverId) -> Option<&MonitorDescriptor> {
        self.entries.iter().find(|d| d.driver == driver)
    }

    /// Case-insensitive substring match over descriptor names
    pub fn match_name(&self, fragment: &str) -> NameMatch<'_> {
        let needle = fragment.to_ascii_lowercase();
        let mut hits = self
            .entries
            .iter()
            .filter(|d| d.name().to_ascii_lowercase().contains(&needle));
        match (hits.next(), hits.next()) {
            (Some(d), None) => NameMatch::Unique(d),
            (Some(_), Some(_)) => NameMatch::Ambiguous,
            (None, _) => NameMatch::None,
        }
    }

    /// All descriptors in registration order
    pub fn iter(&self) -> impl Iterator<Item = &MonitorDescriptor> {
        self.entries.iter()
    }

    /// Tabular report for `--list`: one row per descriptor with the command
    /// letters its driver supports, `+` marking a private command hook.
    pub fn list_report(&self) -> String {
        let mut out = String::from("Driver       Commands\n");
        for d in self.iter() {
            let info = d.driver.info();
            let mut letters = String::from("ilqtX");
            if info.has_rate {
                letters.push('c');
            }
            if info.has_mode {
                letters.push('n');
            }
            if info.has_speed {
                letters.push('s');
            }
            if info.has_control {
                letters.push('x');
            }
            if d.caps.command {
                letters.push('+');
            }
            out.push_str(&format!("{:<12} {}\n", d.name(), letters));
        }
        out
    }
}

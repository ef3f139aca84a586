//! Operator command line and dispatcher
//!
//! Keystrokes accumulate in a fixed-capacity buffer with immediate echo; a
//! completed line runs through the single-letter grammar. Commands that
//! reconfigure the device are only legal on a direct serial link and pick
//! their executing driver through the sticky fallback, so a device parked in
//! text mode still honors the richer driver's switchers.

use std::io::Write;

use tracing::warn;

use super::dump::hex_unpack;
use super::registry::{MonitorRegistry, PrivateCommand};
use super::report::ReportHub;
use super::session::{DeviceSession, DriverId, Parity, SessionError, TransportKind};
use super::surface::Surface;
use super::switcher::{SwitchFatal, SwitchReport, TypeSwitcher};

/// Maximum bytes a command line may hold
pub const COMMAND_CAPACITY: usize = 80;

/// What a fed keystroke did to the buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Buffer updated (or keystroke ignored); keep collecting
    Pending,
    /// Operator asked for a full repaint
    Repaint,
    /// A non-empty line was completed; the buffer is already cleared
    Completed(String),
}

/// Fixed-capacity line editor for the command pane
#[derive(Debug, Default)]
pub struct CommandLine {
    buf: String,
}

impl CommandLine {
    /// Empty command line
    pub fn new() -> Self {
        Self::default()
    }

    /// Current buffer contents, for echoing
    pub fn echo(&self) -> &str {
        &self.buf
    }

    /// Feed one keystroke byte
    pub fn feed(&mut self, byte: u8) -> FeedOutcome {
        match byte {
            // Ctrl-L
            0x0c => FeedOutcome::Repaint,
            b'\r' | b'\n' => {
                if self.buf.is_empty() {
                    FeedOutcome::Pending
                } else {
                    FeedOutcome::Completed(std::mem::take(&mut self.buf))
                }
            }
            // backspace and DEL
            0x08 | 0x7f => {
                self.buf.pop();
                FeedOutcome::Pending
            }
            0x20..=0x7e => {
                if self.buf.len() < COMMAND_CAPACITY {
                    self.buf.push(byte as char);
                }
                FeedOutcome::Pending
            }
            _ => FeedOutcome::Pending,
        }
    }
}

/// Whether the loop keeps running after a dispatched command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Keep accepting commands
    Continue,
    /// Operator or monitor asked to stop
    Quit,
}

/// Borrowed collaborators a dispatched command may touch
pub struct CommandEnv<'a, W: Write, S: DeviceSession + ?Sized> {
    /// Active device session
    pub session: &'a mut S,
    /// Switching state, including the sticky fallback
    pub switcher: &'a mut TypeSwitcher,
    /// Registered monitors
    pub registry: &'a MonitorRegistry,
    /// Log stream and side-channel lines
    pub reports: &'a ReportHub,
    /// Display, absent in headless mode
    pub surface: Option<&'a mut Surface<W>>,
}

impl<W: Write, S: DeviceSession + ?Sized> CommandEnv<'_, W, S> {
    fn serial(&self) -> bool {
        self.session.link().transport == TransportKind::Serial
    }

    fn complain(&mut self, message: &str) {
        match self.surface.as_deref_mut() {
            Some(surface) => surface.complain(message),
            None => eprintln!("{}", message),
        }
    }

    /// Bold `>>>` line into the scroll pane and the log stream
    fn announce(&mut self, text: &str) {
        if let Some(surface) = self.surface.as_deref_mut() {
            surface.append_scroll(&format!(">>>{}", text));
        }
        if let Err(err) = self.reports.log_announce(text) {
            warn!(%err, "log announcement failed");
        }
    }

    /// Detected driver, or a complaint when there is none yet
    fn require_driver(&mut self) -> Option<DriverId> {
        let driver = self.switcher.detected_driver();
        if driver.is_none() {
            self.complain("No device type detected yet");
        }
        driver
    }

    fn require_serial(&mut self) -> bool {
        if self.serial() {
            true
        } else {
            self.complain("Only available in low-level mode.");
            false
        }
    }
}

/// True when the argument carries no digit at all, meaning "toggle"
fn is_toggle(arg: &str) -> bool {
    !arg.chars().any(|c| c.is_ascii_digit())
}

/// Run one completed command line through the grammar.
///
/// The line is first offered to the active monitor's private hook (serial
/// mode only); a consumed or terminate result bypasses the generic grammar.
/// Only a fatal display failure during a forced type switch propagates as an
/// error; every other failure is a complaint.
pub async fn dispatch<W: Write, S: DeviceSession + ?Sized>(
    env: &mut CommandEnv<'_, W, S>,
    line: &str,
) -> Result<DispatchOutcome, SwitchFatal> {
    if env.serial() {
        match env.switcher.private_command(line) {
            PrivateCommand::Consumed => return Ok(DispatchOutcome::Continue),
            PrivateCommand::Terminate => return Ok(DispatchOutcome::Quit),
            PrivateCommand::Unknown => {}
        }
    }

    let mut chars = line.chars();
    let letter = match chars.next() {
        Some(c) => c,
        None => return Ok(DispatchOutcome::Continue),
    };
    let arg = chars.as_str().trim_start();

    match letter {
        'c' => {
            if env.require_driver().is_none() || !env.require_serial() {
                return Ok(DispatchOutcome::Continue);
            }
            let rate: f64 = arg.parse().unwrap_or(0.0);
            let target = match env.switcher.control_target(|i| i.has_rate) {
                Some(t) => t,
                None => return Ok(DispatchOutcome::Continue),
            };
            if !target.info().has_rate {
                env.complain(&format!("Device type {} has no rate switcher", target));
            } else {
                match env.session.rate_switch(target, rate).await {
                    Ok(()) => env.announce("[Rate switcher called.]"),
                    Err(SessionError::BadParameter(_)) => env.complain("Rate not supported."),
                    Err(err) => env.complain(&format!("Rate switch failed: {}", err)),
                }
            }
        }

        'i' => {
            if env.require_driver().is_none() || !env.require_serial() {
                return Ok(DispatchOutcome::Continue);
            }
            let enable = if is_toggle(arg) {
                !env.session.probing()
            } else {
                arg.parse::<u32>().unwrap_or(0) != 0
            };
            env.session.set_probing(enable);
            env.announce(if enable {
                "[probing enabled]"
            } else {
                "[probing disabled]"
            });
        }

        'l' => {
            if env.reports.close_log() {
                if let Some(surface) = env.surface.as_deref_mut() {
                    surface.append_scroll(">>> Logging off");
                }
            } else if !arg.is_empty() {
                let path = std::path::PathBuf::from(arg);
                let note = match env.reports.open_log(&path, true) {
                    Ok(()) => format!(">>> Logging to {}", arg),
                    Err(_) => format!(">>> Logging to {} failed", arg),
                };
                if let Some(surface) = env.surface.as_deref_mut() {
                    surface.append_scroll(&note);
                }
            }
        }

        'n' => {
            // No digit in the argument means flip away from the current mode
            let mode = if is_toggle(arg) {
                match env.switcher.last_kind() {
                    Some(kind) if kind.is_textual() => 1,
                    _ => 0,
                }
            } else {
                arg.parse::<u32>().unwrap_or(0)
            };
            if env.require_driver().is_none() || !env.require_serial() {
                return Ok(DispatchOutcome::Continue);
            }
            let target = match env.switcher.control_target(|i| i.has_mode) {
                Some(t) => t,
                None => return Ok(DispatchOutcome::Continue),
            };
            if !target.info().has_mode {
                env.complain(&format!("Device type {} has no mode switcher", target));
            } else {
                env.announce(&format!("[Mode switcher to mode {}]", mode));
                match env.session.mode_switch(target, mode).await {
                    Ok(()) => {
                        // The detected type drops to text when the device
                        // resyncs; remember who to restore on the way back.
                        if mode == 0 {
                            env.switcher.set_fallback(Some(target));
                        }
                    }
                    Err(err) => env.complain(&format!("Mode switch failed: {}", err)),
                }
            }
        }

        'q' => return Ok(DispatchOutcome::Quit),

        's' => {
            if env.require_driver().is_none() || !env.require_serial() {
                return Ok(DispatchOutcome::Continue);
            }
            let link = env.session.link();
            let mut parity = link.parity;
            let mut stopbits = link.stopbits;
            if let Some((_, frame)) = arg.split_once(':') {
                let mut bytes = frame.chars();
                match bytes.next() {
                    Some('7') | Some('8') => {}
                    _ => {
                        env.complain("No support for that word length.");
                        return Ok(DispatchOutcome::Continue);
                    }
                }
                parity = match bytes.next().and_then(Parity::from_letter) {
                    Some(p) => p,
                    None => {
                        env.complain("Unknown parity setting.");
                        return Ok(DispatchOutcome::Continue);
                    }
                };
                stopbits = match bytes.next() {
                    Some('1') => 1,
                    Some('2') => 2,
                    _ => {
                        env.complain("Stop bits must be 1 or 2.");
                        return Ok(DispatchOutcome::Continue);
                    }
                };
            }
            let speed: u32 = arg
                .split(':')
                .next()
                .unwrap_or("")
                .trim()
                .parse()
                .unwrap_or(0);
            let target = match env.switcher.control_target(|i| i.has_speed) {
                Some(t) => t,
                None => return Ok(DispatchOutcome::Continue),
            };
            if !target.info().has_speed {
                env.complain(&format!("Device type {} has no speed switcher", target));
            } else {
                match env.session.speed_switch(target, speed, parity, stopbits).await {
                    Ok(()) => env.announce("[Speed switcher called.]"),
                    Err(SessionError::BadParameter(_)) => {
                        env.complain("Speed/mode combination not supported.")
                    }
                    Err(err) => env.complain(&format!("Speed switch failed: {}", err)),
                }
            }
        }

        't' => {
            if !env.require_serial() {
                return Ok(DispatchOutcome::Continue);
            }
            if !arg.is_empty() {
                let report = env
                    .switcher
                    .force(arg, env.registry, env.surface.as_deref_mut())?;
                if let SwitchReport::NoMatch(msg) | SwitchReport::TooSmall(msg) = report {
                    env.complain(&msg);
                }
            }
        }

        'x' => {
            if env.require_driver().is_none() || !env.require_serial() {
                return Ok(DispatchOutcome::Continue);
            }
            match hex_unpack(arg) {
                Err(err) => env.complain(&format!("{}", err)),
                Ok(payload) => {
                    let driver = match env.switcher.detected_driver() {
                        Some(d) => d,
                        None => return Ok(DispatchOutcome::Continue),
                    };
                    if !driver.info().has_control {
                        env.complain(&format!(
                            "Device type {} has no control-send method.",
                            driver
                        ));
                    } else if env.session.control_send(driver, &payload).await.is_err() {
                        env.complain("Control send failed.");
                    }
                }
            }
        }

        'X' => {
            if !env.require_serial() {
                return Ok(DispatchOutcome::Continue);
            }
            match hex_unpack(arg) {
                Err(err) => env.complain(&format!("{}", err)),
                Ok(payload) => {
                    if env.session.raw_send(&payload).await.is_err() {
                        env.complain("Raw send failed.");
                    }
                }
            }
        }

        other => env.complain(&format!("Unknown command '{}'", other)),
    }

    Ok(DispatchOutcome::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_accumulates_and_completes() {
        let mut line = CommandLine::new();
        for b in b"s 9600" {
            assert_eq!(line.feed(*b), FeedOutcome::Pending);
        }
        assert_eq!(line.echo(), "s 9600");
        assert_eq!(
            line.feed(b'\r'),
            FeedOutcome::Completed("s 9600".to_string())
        );
        assert_eq!(line.echo(), "");
    }

    #[test]
    fn test_backspace_never_underflows() {
        let mut line = CommandLine::new();
        assert_eq!(line.feed(0x08), FeedOutcome::Pending);
        assert_eq!(line.feed(0x7f), FeedOutcome::Pending);
        line.feed(b'q');
        line.feed(0x08);
        assert_eq!(line.echo(), "");
    }

    #[test]
    fn test_empty_completion_is_noop() {
        let mut line = CommandLine::new();
        assert_eq!(line.feed(b'\n'), FeedOutcome::Pending);
        assert_eq!(line.feed(b'\r'), FeedOutcome::Pending);
    }

    #[test]
    fn test_capacity_bounded() {
        let mut line = CommandLine::new();
        for _ in 0..200 {
            line.feed(b'x');
        }
        assert_eq!(line.echo().len(), COMMAND_CAPACITY);
    }

    #[test]
    fn test_ctrl_l_requests_repaint() {
        let mut line = CommandLine::new();
        line.feed(b'n');
        assert_eq!(line.feed(0x0c), FeedOutcome::Repaint);
        // The buffer survives a repaint
        assert_eq!(line.echo(), "n");
    }

    #[test]
    fn test_toggle_rule_scans_whole_argument() {
        assert!(is_toggle(""));
        assert!(is_toggle("   "));
        assert!(is_toggle("on"));
        assert!(!is_toggle("1"));
        assert!(!is_toggle("   0"));
        // A digit buried late in the argument still counts
        assert!(!is_toggle("mode 1"));
    }
}

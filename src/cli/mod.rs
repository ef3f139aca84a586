//! CLI Module
//!
//! Provides command-line interface functionality including:
//! - Argument parsing for the monitor binary
//! - Target source parsing (serial device vs network relay)
//! - Exit codes for automation

pub mod exit_codes;

pub use exit_codes::{exit_code_description, ExitCodes};

use clap::Parser;

/// Default relay port when the target names only a server
pub const DEFAULT_PORT: &str = "2947";

/// Real-time monitor for wire-protocol devices
#[derive(Parser, Debug)]
#[command(name = "wiremon", version, about, disable_help_flag = false)]
pub struct Cli {
    /// Set debug level
    #[arg(short = 'D', long = "debug", value_name = "DEBUGLEVEL", default_value_t = 0)]
    pub debug: u8,

    /// List known device types, then exit
    #[arg(short = 'L', long = "list")]
    pub list: bool,

    /// Log raw packet bytes to FILE
    #[arg(short = 'l', long = "logfile", value_name = "FILE")]
    pub logfile: Option<std::path::PathBuf>,

    /// No display. Data only.
    #[arg(short = 'a', long = "nocurses")]
    pub nocurses: bool,

    /// Force a textual watch subscription
    #[arg(short = 'n', long = "nmea")]
    pub nmea: bool,

    /// Start with the monitor whose name contains TYPE
    #[arg(short = 't', long = "type", value_name = "TYPE")]
    pub type_fragment: Option<String>,

    /// server[:port[:device]] or a /dev device path
    pub target: Option<String>,
}

/// Where the monitored bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Local serial device
    Serial {
        /// Device node path
        path: String,
    },
    /// Network relay
    Network {
        /// Endpoint as `tcp://server:port`
        endpoint: String,
        /// Optional remote device filter
        device: Option<String>,
    },
}

impl Source {
    /// Parse the positional target.
    ///
    /// Anything starting with `/` is a local device path, taken verbatim.
    /// Everything else reads as `server[:port[:device]]`; a missing target
    /// means the local relay on the default port.
    pub fn parse(target: Option<&str>) -> Source {
        let target = match target {
            Some(t) if !t.is_empty() => t,
            _ => {
                return Source::Network {
                    endpoint: format!("tcp://localhost:{}", DEFAULT_PORT),
                    device: None,
                }
            }
        };
        if target.starts_with('/') {
            return Source::Serial {
                path: target.to_string(),
            };
        }
        let mut parts = target.splitn(3, ':');
        let server = parts.next().unwrap_or("localhost");
        let port = match parts.next() {
            Some(p) if !p.is_empty() => p,
            _ => DEFAULT_PORT,
        };
        let device = parts.next().filter(|d| !d.is_empty()).map(str::to_string);
        Source::Network {
            endpoint: format!("tcp://{}:{}", server, port),
            device,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_path() {
        assert_eq!(
            Source::parse(Some("/dev/ttyUSB0")),
            Source::Serial {
                path: "/dev/ttyUSB0".to_string()
            }
        );
    }

    #[test]
    fn test_server_and_port() {
        assert_eq!(
            Source::parse(Some("localhost:2947")),
            Source::Network {
                endpoint: "tcp://localhost:2947".to_string(),
                device: None
            }
        );
    }

    #[test]
    fn test_server_port_device() {
        assert_eq!(
            Source::parse(Some("gpsbox:2947:/dev/ttyACM0")),
            Source::Network {
                endpoint: "tcp://gpsbox:2947".to_string(),
                device: Some("/dev/ttyACM0".to_string())
            }
        );
    }

    #[test]
    fn test_slash_prefix_wins_over_colon() {
        // Looks like server:port but the slash marks it as a device path
        assert_eq!(
            Source::parse(Some("/dev:dd")),
            Source::Serial {
                path: "/dev:dd".to_string()
            }
        );
    }

    #[test]
    fn test_defaults() {
        assert_eq!(
            Source::parse(None),
            Source::Network {
                endpoint: "tcp://localhost:2947".to_string(),
                device: None
            }
        );
        assert_eq!(
            Source::parse(Some("remotehost")),
            Source::Network {
                endpoint: "tcp://remotehost:2947".to_string(),
                device: None
            }
        );
    }

    #[test]
    fn test_clap_surface() {
        use clap::CommandFactory;
        Cli::command().debug_assert();

        let cli = Cli::parse_from(["wiremon", "-a", "-n", "-t", "blox", "/dev/ttyUSB0"]);
        assert!(cli.nocurses);
        assert!(cli.nmea);
        assert_eq!(cli.type_fragment.as_deref(), Some("blox"));
        assert_eq!(cli.target.as_deref(), Some("/dev/ttyUSB0"));
    }
}

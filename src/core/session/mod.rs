//! Device session boundary
//!
//! The monitor core never touches a file descriptor directly. Everything it
//! needs from the transport layer is behind [`DeviceSession`]: bounded
//! readiness waits, batched non-blocking packet polls, link-parameter
//! switching, and raw/control injection. The concrete serial/TCP session
//! lives in [`wire`].

pub mod wire;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Classified framing of one received packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// `$`-prefixed checksummed text sentence
    Nmea,
    /// u-blox binary frame (`0xb5 0x62` sync)
    Ublox,
    /// Line-oriented JSON status report
    Json,
    /// Recognized as a frame but matching no known protocol
    Unknown,
}

impl PacketKind {
    /// Textual packets get trailing CR/LF suppression in dumps
    pub fn is_textual(self) -> bool {
        matches!(self, PacketKind::Nmea | PacketKind::Json)
    }
}

/// One framed packet with its raw bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Detected framing
    pub kind: PacketKind,
    /// Verbatim wire bytes including framing
    pub bytes: Bytes,
}

/// Identity of a protocol driver the registry can host a monitor for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverId {
    /// Generic text sentences
    Nmea0183,
    /// u-blox binary protocol
    Ublox,
    /// JSON status passthrough
    JsonPassthrough,
}

/// Static per-driver facts consulted by the switcher and dispatcher
#[derive(Debug, Clone, Copy)]
pub struct DriverInfo {
    /// Display name, also the `t` command match target
    pub name: &'static str,
    /// Remembered as the sticky fallback when the device drops to text mode
    pub sticky: bool,
    /// Driver knows how to request a line speed change
    pub has_speed: bool,
    /// Driver knows how to flip between binary and text mode
    pub has_mode: bool,
    /// Driver knows how to change the reporting cycle
    pub has_rate: bool,
    /// Driver accepts checksummed control packets
    pub has_control: bool,
}

impl DriverId {
    /// Static facts for this driver
    pub fn info(self) -> DriverInfo {
        match self {
            DriverId::Nmea0183 => DriverInfo {
                name: "NMEA0183",
                sticky: false,
                has_speed: false,
                has_mode: false,
                has_rate: false,
                has_control: false,
            },
            DriverId::Ublox => DriverInfo {
                name: "u-blox",
                sticky: true,
                has_speed: true,
                has_mode: true,
                has_rate: true,
                has_control: true,
            },
            DriverId::JsonPassthrough => DriverInfo {
                name: "JSON",
                sticky: false,
                has_speed: false,
                has_mode: false,
                has_rate: false,
                has_control: false,
            },
        }
    }

    /// Driver whose monitor consumes a packet of this kind
    pub fn for_packet(kind: PacketKind) -> Option<DriverId> {
        match kind {
            PacketKind::Nmea => Some(DriverId::Nmea0183),
            PacketKind::Ublox => Some(DriverId::Ublox),
            PacketKind::Json => Some(DriverId::JsonPassthrough),
            PacketKind::Unknown => None,
        }
    }
}

impl fmt::Display for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.info().name)
    }
}

/// Parity setting on a serial link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    /// No parity bit
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

impl Parity {
    /// Single-letter form used in prompts and `s` command arguments
    pub fn letter(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        }
    }

    /// Parse the single-letter form
    pub fn from_letter(c: char) -> Option<Self> {
        match c {
            'N' | 'n' => Some(Parity::None),
            'E' | 'e' => Some(Parity::Even),
            'O' | 'o' => Some(Parity::Odd),
            _ => None,
        }
    }
}

/// Transport flavor of the active session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Local serial device
    Serial,
    /// Network relay connection
    Network,
}

/// Snapshot of the link parameters for prompt rendering
#[derive(Debug, Clone)]
pub struct LinkState {
    /// Serial or network
    pub transport: TransportKind,
    /// Device path or `server:port` endpoint
    pub path: String,
    /// Remote device filter on a network session, if any
    pub device: Option<String>,
    /// Line speed in baud (serial only)
    pub speed: u32,
    /// Parity (serial only)
    pub parity: Parity,
    /// Stop bits, 1 or 2 (serial only)
    pub stopbits: u32,
}

impl LinkState {
    /// Prompt text: `path speed wordlen parity stopbits` for serial links,
    /// `path[:device]` for network links. Word length renders as
    /// `9 - stopbits`.
    pub fn prompt(&self) -> String {
        match self.transport {
            TransportKind::Serial => format!(
                "{} {} {}{}{}",
                self.path,
                self.speed,
                9 - self.stopbits,
                self.parity.letter(),
                self.stopbits
            ),
            TransportKind::Network => match &self.device {
                Some(dev) => format!("{}:{}", self.path, dev),
                None => self.path.clone(),
            },
        }
    }
}

/// Outcome of the bounded readiness wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwaitStatus {
    /// Device bytes are waiting
    Ready,
    /// Bound expired with nothing to read
    TimedOut,
}

/// Outcome of one non-blocking packet poll
#[derive(Debug)]
pub enum DevicePoll {
    /// A complete packet was framed
    Packet(Packet),
    /// No complete packet buffered yet
    Pending,
    /// Zero-length read: the device went away
    Empty,
    /// Transport error
    Error(SessionError),
}

/// Transport and link-control failures
#[derive(Error, Debug)]
pub enum SessionError {
    /// Underlying I/O failed
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Serial port enumeration or reconfiguration failed
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),
    /// The active driver has no implementation for this operation
    #[error("operation not supported by {0}")]
    NotSupported(&'static str),
    /// Operation requires a local serial link
    #[error("operation requires a direct serial connection")]
    NotSerial,
    /// Rejected link parameter
    #[error("unsupported link parameter: {0}")]
    BadParameter(String),
}

/// Boundary trait between the monitor core and the transport layer
#[async_trait(?Send)]
pub trait DeviceSession {
    /// Open the transport. Activation never probes or reconfigures the
    /// device; the session starts read-only.
    async fn activate(&mut self) -> Result<(), SessionError>;

    /// Wait up to `bound` for device bytes. Returns immediately when a
    /// complete packet is already buffered.
    async fn wait_readable(&mut self, bound: Duration) -> Result<AwaitStatus, SessionError>;

    /// Non-blocking framed read
    fn poll(&mut self) -> DevicePoll;

    /// Current link parameters
    fn link(&self) -> LinkState;

    /// Is subtype probing enabled? Probing leaves the session writable
    /// between commands so drivers may reconfigure the device.
    fn probing(&self) -> bool;

    /// Enable or disable subtype probing; enabling restarts the probe
    /// sequence from the beginning.
    fn set_probing(&mut self, enabled: bool);

    /// Ask the given driver to retune the line speed, then match locally
    async fn speed_switch(
        &mut self,
        driver: DriverId,
        speed: u32,
        parity: Parity,
        stopbits: u32,
    ) -> Result<(), SessionError>;

    /// Ask the given driver to flip protocol mode (0 = text, 1 = binary)
    async fn mode_switch(&mut self, driver: DriverId, mode: u32) -> Result<(), SessionError>;

    /// Ask the given driver to change the reporting cycle in seconds
    async fn rate_switch(&mut self, driver: DriverId, rate: f64) -> Result<(), SessionError>;

    /// Frame `payload` as a control packet for the given driver and send it
    async fn control_send(
        &mut self,
        driver: DriverId,
        payload: &[u8],
    ) -> Result<usize, SessionError>;

    /// Send bytes to the device exactly as given
    async fn raw_send(&mut self, data: &[u8]) -> Result<usize, SessionError>;

    /// Close the transport; later calls are no-ops
    async fn close(&mut self);
}

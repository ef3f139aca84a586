//! Concrete serial and network device session
//!
//! Bytes accumulate in an internal buffer during the bounded readiness wait;
//! framing happens afterwards without further I/O, so a poll never blocks.
//! The session starts read-only. Link-control operations drop the guard just
//! long enough to emit their command and raise it again on every exit path.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use serialport::SerialPort;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, trace};

use super::{
    AwaitStatus, DevicePoll, DeviceSession, DriverId, LinkState, Packet, PacketKind, Parity,
    SessionError, TransportKind,
};

/// Settle time between a switch command and reusing the line
const SWITCH_SETTLE: Duration = Duration::from_millis(50);

/// A run of unclassifiable bytes is flushed as one Unknown packet once it
/// grows past this.
const GARBAGE_FLUSH: usize = 512;

/// Longest plausible binary payload; bigger means a corrupt length field
const MAX_BINARY_PAYLOAD: usize = 2048;

/// Subscription strings sent to a network relay on activation
fn watch_request(textual: bool, device: Option<&str>) -> String {
    let kind = if textual {
        "\"nmea\":true"
    } else {
        "\"raw\":2"
    };
    match device {
        Some(dev) => format!("?WATCH={{{},\"pps\":true,\"device\":\"{}\"}}\r\n", kind, dev),
        None => format!("?WATCH={{{},\"pps\":true}}\r\n", kind),
    }
}

/// Classify the start of `buf`. Returns the packet kind and total frame
/// length when a complete frame is buffered.
fn classify(buf: &[u8]) -> Option<(PacketKind, usize)> {
    if buf.is_empty() {
        return None;
    }
    match buf[0] {
        0xb5 => {
            if buf.len() < 2 {
                return None;
            }
            if buf[1] != 0x62 {
                return skip_garbage(buf);
            }
            if buf.len() < 6 {
                return None;
            }
            let len = u16::from_le_bytes([buf[4], buf[5]]) as usize;
            if len > MAX_BINARY_PAYLOAD {
                return skip_garbage(&buf[..1]).or(Some((PacketKind::Unknown, 1)));
            }
            let total = 6 + len + 2;
            if buf.len() < total {
                return None;
            }
            Some((PacketKind::Ublox, total))
        }
        b'$' => buf
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| (PacketKind::Nmea, i + 1)),
        b'{' => buf
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| (PacketKind::Json, i + 1)),
        _ => skip_garbage(buf),
    }
}

/// Group leading junk into one Unknown frame ending at the next sync byte
fn skip_garbage(buf: &[u8]) -> Option<(PacketKind, usize)> {
    let sync = buf
        .iter()
        .skip(1)
        .position(|&b| b == 0xb5 || b == b'$' || b == b'{')
        .map(|i| i + 1);
    match sync {
        Some(i) => Some((PacketKind::Unknown, i)),
        None if buf.len() >= GARBAGE_FLUSH => Some((PacketKind::Unknown, buf.len())),
        None => None,
    }
}

/// Fletcher checksum over a u-blox frame body (class through payload)
fn ubx_checksum(body: &[u8]) -> (u8, u8) {
    let mut ck_a: u8 = 0;
    let mut ck_b: u8 = 0;
    for &b in body {
        ck_a = ck_a.wrapping_add(b);
        ck_b = ck_b.wrapping_add(ck_a);
    }
    (ck_a, ck_b)
}

/// Frame class, id and payload into a complete u-blox packet
fn ubx_frame(class: u8, id: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8 + payload.len());
    frame.extend_from_slice(&[0xb5, 0x62, class, id]);
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(payload);
    let (ck_a, ck_b) = ubx_checksum(&frame[2..]);
    frame.push(ck_a);
    frame.push(ck_b);
    frame
}

/// CFG-PRT payload for UART 1: frame shape, speed, and protocol masks
fn ubx_cfg_prt(speed: u32, parity: Parity, stopbits: u32, binary_out: bool) -> Vec<u8> {
    let mut mode: u32 = 0x0c0; // 8 data bits
    mode |= match parity {
        Parity::None => 0x800,
        Parity::Even => 0x000,
        Parity::Odd => 0x200,
    };
    if stopbits == 2 {
        mode |= 0x2000;
    }
    let out_proto: u16 = if binary_out { 0x01 } else { 0x02 };

    let mut payload = vec![0u8; 20];
    payload[0] = 1; // port id
    payload[4..8].copy_from_slice(&mode.to_le_bytes());
    payload[8..12].copy_from_slice(&speed.to_le_bytes());
    // accept both protocols inbound
    payload[12..14].copy_from_slice(&0x03u16.to_le_bytes());
    payload[14..16].copy_from_slice(&out_proto.to_le_bytes());
    payload
}

enum Inner {
    Serial(SerialStream),
    Tcp(TcpStream),
}

/// The one concrete [`DeviceSession`]
pub struct WireSession {
    inner: Option<Inner>,
    buf: BytesMut,
    eof: bool,
    pending_error: Option<std::io::Error>,
    transport: TransportKind,
    path: String,
    device: Option<String>,
    textual_watch: bool,
    speed: u32,
    parity: Parity,
    stopbits: u32,
    probing: bool,
    readonly: bool,
}

impl WireSession {
    /// Session over a local serial device
    pub fn serial(path: &str, speed: u32) -> Self {
        Self {
            inner: None,
            buf: BytesMut::with_capacity(4096),
            eof: false,
            pending_error: None,
            transport: TransportKind::Serial,
            path: path.to_string(),
            device: None,
            textual_watch: false,
            speed,
            parity: Parity::None,
            stopbits: 1,
            probing: false,
            readonly: true,
        }
    }

    /// Session over a network relay
    pub fn network(endpoint: &str, device: Option<&str>, textual_watch: bool) -> Self {
        Self {
            inner: None,
            buf: BytesMut::with_capacity(4096),
            eof: false,
            pending_error: None,
            transport: TransportKind::Network,
            path: endpoint.to_string(),
            device: device.map(str::to_string),
            textual_watch,
            speed: 0,
            parity: Parity::None,
            stopbits: 1,
            probing: false,
            readonly: true,
        }
    }

    fn parity_of(parity: Parity) -> serialport::Parity {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Even => serialport::Parity::Even,
            Parity::Odd => serialport::Parity::Odd,
        }
    }

    fn stopbits_of(stopbits: u32) -> serialport::StopBits {
        if stopbits == 2 {
            serialport::StopBits::Two
        } else {
            serialport::StopBits::One
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), SessionError> {
        match self.inner.as_mut() {
            Some(Inner::Serial(port)) => {
                port.write_all(data).await?;
                port.flush().await?;
            }
            Some(Inner::Tcp(stream)) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
            None => {
                return Err(SessionError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "session not activated",
                )))
            }
        }
        Ok(())
    }

    fn check_driver(
        driver: DriverId,
        has_hook: fn(&super::DriverInfo) -> bool,
    ) -> Result<(), SessionError> {
        if has_hook(&driver.info()) {
            Ok(())
        } else {
            Err(SessionError::NotSupported(driver.info().name))
        }
    }

    /// Send a driver command with the readonly guard dropped around it
    async fn guarded_send(&mut self, frame: &[u8]) -> Result<(), SessionError> {
        self.readonly = false;
        let result = self.write_all(frame).await;
        self.readonly = !self.probing;
        result
    }
}

#[async_trait(?Send)]
impl DeviceSession for WireSession {
    async fn activate(&mut self) -> Result<(), SessionError> {
        match self.transport {
            TransportKind::Serial => {
                let mut port = tokio_serial::new(&self.path, self.speed)
                    .parity(Self::parity_of(self.parity))
                    .stop_bits(Self::stopbits_of(self.stopbits))
                    .timeout(Duration::from_millis(100))
                    .open_native_async()?;
                #[cfg(unix)]
                port.set_exclusive(false)?;
                info!(path = %self.path, speed = self.speed, "serial session open");
                self.inner = Some(Inner::Serial(port));
            }
            TransportKind::Network => {
                let endpoint = self.path.trim_start_matches("tcp://").to_string();
                let stream = TcpStream::connect(&endpoint).await?;
                info!(endpoint = %endpoint, "network session open");
                self.inner = Some(Inner::Tcp(stream));
                let watch = watch_request(self.textual_watch, self.device.as_deref());
                self.write_all(watch.as_bytes()).await?;
            }
        }
        Ok(())
    }

    async fn wait_readable(&mut self, bound: Duration) -> Result<AwaitStatus, SessionError> {
        if classify(&self.buf).is_some() || self.eof || self.pending_error.is_some() {
            return Ok(AwaitStatus::Ready);
        }
        let inner = self.inner.as_mut().ok_or_else(|| {
            SessionError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "session not activated",
            ))
        })?;
        let buf = &mut self.buf;
        let read = async {
            match inner {
                Inner::Serial(port) => port.read_buf(buf).await,
                Inner::Tcp(stream) => stream.read_buf(buf).await,
            }
        };
        match tokio::time::timeout(bound, read).await {
            Err(_) => Ok(AwaitStatus::TimedOut),
            Ok(Ok(0)) => {
                self.eof = true;
                Ok(AwaitStatus::Ready)
            }
            Ok(Ok(n)) => {
                trace!(bytes = n, "device bytes buffered");
                Ok(AwaitStatus::Ready)
            }
            Ok(Err(err)) => {
                self.pending_error = Some(err);
                Ok(AwaitStatus::Ready)
            }
        }
    }

    fn poll(&mut self) -> DevicePoll {
        if let Some((kind, total)) = classify(&self.buf) {
            let bytes = self.buf.copy_to_bytes(total);
            return DevicePoll::Packet(Packet { kind, bytes });
        }
        if let Some(err) = self.pending_error.take() {
            return DevicePoll::Error(SessionError::Io(err));
        }
        if self.eof {
            return DevicePoll::Empty;
        }
        DevicePoll::Pending
    }

    fn link(&self) -> LinkState {
        LinkState {
            transport: self.transport,
            path: self.path.clone(),
            device: self.device.clone(),
            speed: self.speed,
            parity: self.parity,
            stopbits: self.stopbits,
        }
    }

    fn probing(&self) -> bool {
        self.probing
    }

    fn set_probing(&mut self, enabled: bool) {
        self.probing = enabled;
        self.readonly = !enabled;
        if enabled {
            // Restart framing so the probe sequence sees a clean stream
            self.buf.clear();
        }
    }

    async fn speed_switch(
        &mut self,
        driver: DriverId,
        speed: u32,
        parity: Parity,
        stopbits: u32,
    ) -> Result<(), SessionError> {
        if self.transport != TransportKind::Serial {
            return Err(SessionError::NotSerial);
        }
        Self::check_driver(driver, |i| i.has_speed)?;
        const SUPPORTED: [u32; 8] = [4800, 9600, 19200, 38400, 57600, 115200, 230400, 460800];
        if !SUPPORTED.contains(&speed) {
            return Err(SessionError::BadParameter(format!("{} baud", speed)));
        }

        let payload = ubx_cfg_prt(speed, parity, stopbits, true);
        let frame = ubx_frame(0x06, 0x00, &payload);
        self.guarded_send(&frame).await?;

        // Let the command register at the device before trashing the UART
        tokio::time::sleep(SWITCH_SETTLE).await;

        if let Some(Inner::Serial(port)) = self.inner.as_mut() {
            port.set_baud_rate(speed)?;
            port.set_parity(Self::parity_of(parity))?;
            port.set_stop_bits(Self::stopbits_of(stopbits))?;
        }
        self.speed = speed;
        self.parity = parity;
        self.stopbits = stopbits;
        debug!(speed, "local line speed matched");
        Ok(())
    }

    async fn mode_switch(&mut self, driver: DriverId, mode: u32) -> Result<(), SessionError> {
        if self.transport != TransportKind::Serial {
            return Err(SessionError::NotSerial);
        }
        Self::check_driver(driver, |i| i.has_mode)?;
        let payload = ubx_cfg_prt(self.speed, self.parity, self.stopbits, mode != 0);
        let frame = ubx_frame(0x06, 0x00, &payload);
        self.guarded_send(&frame).await?;
        tokio::time::sleep(SWITCH_SETTLE).await;
        Ok(())
    }

    async fn rate_switch(&mut self, driver: DriverId, rate: f64) -> Result<(), SessionError> {
        if self.transport != TransportKind::Serial {
            return Err(SessionError::NotSerial);
        }
        Self::check_driver(driver, |i| i.has_rate)?;
        if !(0.25..=65.0).contains(&rate) {
            return Err(SessionError::BadParameter(format!("{} s cycle", rate)));
        }
        let meas_ms = (rate * 1000.0) as u16;
        let mut payload = vec![0u8; 6];
        payload[0..2].copy_from_slice(&meas_ms.to_le_bytes());
        payload[2..4].copy_from_slice(&1u16.to_le_bytes());
        let frame = ubx_frame(0x06, 0x08, &payload);
        self.guarded_send(&frame).await
    }

    async fn control_send(
        &mut self,
        driver: DriverId,
        payload: &[u8],
    ) -> Result<usize, SessionError> {
        if self.transport != TransportKind::Serial {
            return Err(SessionError::NotSerial);
        }
        Self::check_driver(driver, |i| i.has_control)?;
        if payload.len() < 2 {
            return Err(SessionError::BadParameter(
                "control packet needs class and id bytes".to_string(),
            ));
        }
        let frame = ubx_frame(payload[0], payload[1], &payload[2..]);
        let sent = frame.len();
        self.guarded_send(&frame).await?;
        Ok(sent)
    }

    async fn raw_send(&mut self, data: &[u8]) -> Result<usize, SessionError> {
        self.write_all(data).await?;
        Ok(data.len())
    }

    async fn close(&mut self) {
        if let Some(inner) = self.inner.take() {
            if let Inner::Tcp(mut stream) = inner {
                let _ = stream.shutdown().await;
            }
            debug!(path = %self.path, "session closed");
        }
    }
}

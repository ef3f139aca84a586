//! Phase-structured monitor loop
//!
//! Each iteration runs AWAIT, INGEST, INPUT in that order, observing the
//! cancel token between phases so termination is never delayed past the
//! phase that noticed it. AWAIT multiplexes the device and the keyboard
//! under a two second bound; INGEST drains every complete frame the buffer
//! holds; INPUT feeds at most one keyboard event into the command machinery.

use std::io::Write;

use futures::StreamExt;
use tracing::warn;

use super::cancel::{CancelToken, TerminationCode};
use super::command::{dispatch, CommandEnv, CommandLine, DispatchOutcome, FeedOutcome};
use super::dump::cond_hexdump;
use super::registry::MonitorRegistry;
use super::report::ReportHub;
use super::session::{AwaitStatus, DevicePoll, DeviceSession, Packet, PacketKind};
use super::surface::Surface;
use super::switcher::{SwitchReport, TypeSwitcher};
use super::timing::{OffsetPayload, TimeOffsetSample};

/// Bound on one readiness wait
pub const AWAIT_BOUND: std::time::Duration = std::time::Duration::from_secs(2);

/// Output bytes one scroll-pane dump may occupy
const DUMP_CAP: usize = 512;

/// One keyboard-side wakeup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// Single keystroke byte for the command-line editor
    Key(u8),
    /// Whole line collected by the headless cooked reader
    Line(String),
}

enum Wake {
    Device(AwaitStatus),
    Input(InputEvent),
}

/// Owner of everything the monitor loop touches
pub struct MonitorRuntime<W: Write> {
    session: Box<dyn DeviceSession>,
    registry: MonitorRegistry,
    switcher: TypeSwitcher,
    reports: ReportHub,
    cancel: CancelToken,
    surface: Option<Surface<W>>,
    command: CommandLine,
    time_offset: Option<TimeOffsetSample>,
    keys_done: bool,
}

impl<W: Write> MonitorRuntime<W> {
    /// Assemble a runtime; `surface` is `None` in headless mode
    pub fn new(
        session: Box<dyn DeviceSession>,
        registry: MonitorRegistry,
        reports: ReportHub,
        cancel: CancelToken,
        surface: Option<Surface<W>>,
    ) -> Self {
        Self {
            session,
            registry,
            switcher: TypeSwitcher::new(),
            reports,
            cancel,
            surface,
            command: CommandLine::new(),
            time_offset: None,
            keys_done: false,
        }
    }

    /// Switching state, for startup forcing
    pub fn switcher_mut(&mut self) -> &mut TypeSwitcher {
        &mut self.switcher
    }

    /// Registered monitors
    pub fn registry(&self) -> &MonitorRegistry {
        &self.registry
    }

    /// Display surface, if running one
    pub fn surface_mut(&mut self) -> Option<&mut Surface<W>> {
        self.surface.as_mut()
    }

    /// Latest clock-correlation sample seen by the loop
    pub fn time_offset(&self) -> Option<TimeOffsetSample> {
        self.time_offset
    }

    /// Force the starting monitor type from a name fragment
    pub fn force_type(&mut self, fragment: &str) -> Result<SwitchReport, super::switcher::SwitchFatal> {
        self.switcher
            .force(fragment, &self.registry, self.surface.as_mut())
    }

    /// Close the device session; safe to call after the loop returns
    pub async fn shutdown(&mut self) {
        self.session.close().await;
    }

    /// Run until cancelled; returns the termination code.
    ///
    /// The session stays open on return so the caller controls teardown
    /// order.
    pub async fn run(
        &mut self,
        keys: &mut (impl futures::Stream<Item = InputEvent> + Unpin),
    ) -> TerminationCode {
        loop {
            if let Some(code) = self.cancel.get() {
                return code;
            }

            // AWAIT
            let wake = if self.keys_done {
                match self.session.wait_readable(AWAIT_BOUND).await {
                    Ok(status) => Wake::Device(status),
                    Err(err) => {
                        warn!(%err, "readiness wait failed");
                        self.cancel.cancel(TerminationCode::IoWaitFailed);
                        continue;
                    }
                }
            } else {
                tokio::select! {
                    status = self.session.wait_readable(AWAIT_BOUND) => match status {
                        Ok(status) => Wake::Device(status),
                        Err(err) => {
                            warn!(%err, "readiness wait failed");
                            self.cancel.cancel(TerminationCode::IoWaitFailed);
                            continue;
                        }
                    },
                    event = keys.next() => match event {
                        Some(event) => Wake::Input(event),
                        None => {
                            self.keys_done = true;
                            continue;
                        }
                    },
                }
            };
            if let Some(code) = self.cancel.get() {
                return code;
            }

            // INGEST: drain every complete frame already buffered
            loop {
                match self.session.poll() {
                    DevicePoll::Packet(packet) => {
                        if let Err(code) = self.ingest(packet) {
                            self.cancel.cancel(code);
                            break;
                        }
                    }
                    DevicePoll::Pending => break,
                    DevicePoll::Empty => {
                        self.cancel.cancel(TerminationCode::EmptyRead);
                        break;
                    }
                    DevicePoll::Error(err) => {
                        warn!(%err, "device read failed");
                        self.cancel.cancel(TerminationCode::ReadError);
                        break;
                    }
                }
            }
            self.poll_side_channel();
            if let Some(code) = self.cancel.get() {
                return code;
            }

            // INPUT
            if let Wake::Input(event) = wake {
                if let Err(code) = self.handle_input(event).await {
                    self.cancel.cancel(code);
                }
            }
            self.refresh();
            if let Some(code) = self.cancel.get() {
                return code;
            }
        }
    }

    /// Classify, switch, render, and log one packet
    fn ingest(&mut self, packet: Packet) -> Result<(), TerminationCode> {
        if packet.kind == PacketKind::Json
            && packet.bytes.starts_with(b"{\"class\":\"TOFF\"")
        {
            self.ingest_time_offset(&packet);
            return Ok(());
        }

        match self
            .switcher
            .on_packet(packet.kind, &self.registry, self.surface.as_mut())
        {
            Ok(SwitchReport::NoMatch(msg)) | Ok(SwitchReport::TooSmall(msg)) => {
                self.complain(&msg);
            }
            Ok(_) => {}
            Err(err) => {
                warn!(%err, "fatal monitor switch");
                return Err(TerminationCode::SwitchFailed);
            }
        }

        if let Some(surface) = self.surface.as_mut() {
            self.switcher.update(surface, &packet);
        }

        let dump = format!(
            "({}) {}",
            packet.bytes.len(),
            cond_hexdump(&packet.bytes, DUMP_CAP, packet.kind.is_textual())
        );
        match self.surface.as_mut() {
            Some(surface) => surface.append_scroll(&dump),
            None => println!("{}", dump),
        }

        if let Err(err) = self.reports.log_packet(&packet.bytes) {
            warn!(%err, "packet log write failed");
            self.complain(&format!("Log write failed: {}", err));
        }
        Ok(())
    }

    /// A TOFF status sub-packet updates the mailbox instead of the panes
    fn ingest_time_offset(&mut self, packet: &Packet) {
        let payload: OffsetPayload = match serde_json::from_slice(&packet.bytes) {
            Ok(p) => p,
            Err(err) => {
                warn!(%err, "malformed clock-correlation payload");
                self.complain("Ill-formed TOFF packet");
                return;
            }
        };
        if self.surface.is_none() {
            eprintln!(
                "TOFF={}.{:09} real={}.{:09}",
                payload.clock_sec, payload.clock_nsec, payload.real_sec, payload.real_nsec
            );
        }
        match payload.into_sample() {
            Some(sample) => self.reports.publish_sample(sample),
            None => warn!("clock-correlation payload out of range, dropped"),
        }
    }

    /// Drain pulse bars and take one mailbox reading
    fn poll_side_channel(&mut self) {
        for line in self.reports.drain_lines() {
            match self.surface.as_mut() {
                Some(surface) => surface.append_scroll(&line),
                None => println!("{}", line),
            }
        }
        self.time_offset = self.reports.latest_sample();
    }

    async fn handle_input(&mut self, event: InputEvent) -> Result<(), TerminationCode> {
        match event {
            InputEvent::Key(byte) => match self.command.feed(byte) {
                FeedOutcome::Pending => Ok(()),
                FeedOutcome::Repaint => {
                    if let Some(surface) = self.surface.as_mut() {
                        surface.clear_all();
                        self.switcher.repaint(surface);
                    }
                    Ok(())
                }
                FeedOutcome::Completed(line) => self.dispatch_line(&line).await,
            },
            InputEvent::Line(line) => self.dispatch_line(line.trim_end()).await,
        }
    }

    async fn dispatch_line(&mut self, line: &str) -> Result<(), TerminationCode> {
        let mut env = CommandEnv {
            session: &mut *self.session,
            switcher: &mut self.switcher,
            registry: &self.registry,
            reports: &self.reports,
            surface: self.surface.as_mut(),
        };
        match dispatch(&mut env, line).await {
            Ok(DispatchOutcome::Continue) => Ok(()),
            Ok(DispatchOutcome::Quit) => {
                self.cancel.cancel(TerminationCode::Quit);
                Ok(())
            }
            Err(err) => {
                warn!(%err, "fatal monitor switch");
                Err(TerminationCode::SwitchFailed)
            }
        }
    }

    fn complain(&mut self, message: &str) {
        match self.surface.as_mut() {
            Some(surface) => surface.complain(message),
            None => eprintln!("{}", message),
        }
    }

    /// Refresh the status and command panes and push one physical update
    fn refresh(&mut self) {
        let link = self.session.link();
        let type_name = self
            .switcher
            .active_driver()
            .map(|d| d.info().name)
            .unwrap_or("Unknown device");
        let fallback = self.switcher.fallback().map(|d| d.info().name);
        let echo = self.command.echo().to_string();
        if let Some(surface) = self.surface.as_mut() {
            surface.write_status(&link.prompt());
            surface.write_command_prompt(type_name, fallback, &echo);
            if let Err(err) = surface.flush() {
                warn!(%err, "display refresh failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::{
        AwaitStatus, DriverId, LinkState, Parity, SessionError, TransportKind,
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Session scripted entirely in memory
    struct ScriptedSession {
        polls: VecDeque<DevicePoll>,
        open: bool,
        closes: Arc<AtomicU32>,
        probing: bool,
    }

    impl ScriptedSession {
        fn new(polls: Vec<DevicePoll>) -> Self {
            Self::with_close_counter(polls, Arc::default())
        }

        fn with_close_counter(polls: Vec<DevicePoll>, closes: Arc<AtomicU32>) -> Self {
            Self {
                polls: polls.into(),
                open: true,
                closes,
                probing: false,
            }
        }
    }

    #[async_trait(?Send)]
    impl DeviceSession for ScriptedSession {
        async fn activate(&mut self) -> Result<(), SessionError> {
            Ok(())
        }

        async fn wait_readable(&mut self, bound: Duration) -> Result<AwaitStatus, SessionError> {
            if self.polls.is_empty() {
                tokio::time::sleep(bound).await;
                Ok(AwaitStatus::TimedOut)
            } else {
                Ok(AwaitStatus::Ready)
            }
        }

        fn poll(&mut self) -> DevicePoll {
            self.polls.pop_front().unwrap_or(DevicePoll::Pending)
        }

        fn link(&self) -> LinkState {
            LinkState {
                transport: TransportKind::Serial,
                path: "/dev/ttyUSB0".to_string(),
                device: None,
                speed: 9600,
                parity: Parity::None,
                stopbits: 1,
            }
        }

        fn probing(&self) -> bool {
            self.probing
        }

        fn set_probing(&mut self, enabled: bool) {
            self.probing = enabled;
        }

        async fn speed_switch(
            &mut self,
            _driver: DriverId,
            _speed: u32,
            _parity: Parity,
            _stopbits: u32,
        ) -> Result<(), SessionError> {
            Ok(())
        }

        async fn mode_switch(&mut self, _driver: DriverId, _mode: u32) -> Result<(), SessionError> {
            Ok(())
        }

        async fn rate_switch(&mut self, _driver: DriverId, _rate: f64) -> Result<(), SessionError> {
            Ok(())
        }

        async fn control_send(
            &mut self,
            _driver: DriverId,
            payload: &[u8],
        ) -> Result<usize, SessionError> {
            Ok(payload.len())
        }

        async fn raw_send(&mut self, data: &[u8]) -> Result<usize, SessionError> {
            Ok(data.len())
        }

        async fn close(&mut self) {
            if self.open {
                self.open = false;
                self.closes.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Sink whose rendered bytes stay inspectable after the surface moves
    #[derive(Clone, Default)]
    struct SharedSink(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn nmea_packet() -> DevicePoll {
        DevicePoll::Packet(Packet {
            kind: PacketKind::Nmea,
            bytes: Bytes::from_static(b"$GPGGA,123519,4807.038,N*47\r\n"),
        })
    }

    fn runtime(
        polls: Vec<DevicePoll>,
        surface: bool,
    ) -> (MonitorRuntime<Vec<u8>>, CancelToken, ReportHub) {
        let cancel = CancelToken::new();
        let reports = ReportHub::new();
        let surface = if surface {
            Some(Surface::new(Vec::new(), 24, 80).unwrap())
        } else {
            None
        };
        let runtime = MonitorRuntime::new(
            Box::new(ScriptedSession::new(polls)),
            MonitorRegistry::builtin(),
            reports.clone(),
            cancel.clone(),
            surface,
        );
        (runtime, cancel, reports)
    }

    #[tokio::test]
    async fn test_quit_command_terminates() {
        let (mut runtime, _, _) = runtime(vec![nmea_packet()], true);
        let keys: Vec<InputEvent> = b"q\r".iter().map(|&b| InputEvent::Key(b)).collect();
        let mut keys = futures::stream::iter(keys);

        let code = runtime.run(&mut keys).await;
        assert_eq!(code, TerminationCode::Quit);
    }

    #[tokio::test]
    async fn test_empty_read_is_fatal() {
        let (mut runtime, _, _) = runtime(vec![nmea_packet(), DevicePoll::Empty], true);
        let mut keys = futures::stream::iter(Vec::<InputEvent>::new());

        let code = runtime.run(&mut keys).await;
        assert_eq!(code, TerminationCode::EmptyRead);
    }

    #[tokio::test]
    async fn test_signal_beats_quit() {
        let (mut runtime, cancel, _) = runtime(vec![], true);
        cancel.cancel(TerminationCode::Signal);
        let keys: Vec<InputEvent> = b"q\r".iter().map(|&b| InputEvent::Key(b)).collect();
        let mut keys = futures::stream::iter(keys);

        let code = runtime.run(&mut keys).await;
        assert_eq!(code, TerminationCode::Signal);
    }

    #[tokio::test]
    async fn test_packets_switch_and_dump() {
        let (mut runtime, _, _) = runtime(vec![nmea_packet(), DevicePoll::Empty], true);
        let mut keys = futures::stream::iter(Vec::<InputEvent>::new());
        runtime.run(&mut keys).await;

        assert_eq!(
            runtime.switcher_mut().active_driver(),
            Some(DriverId::Nmea0183)
        );
        let surface = runtime.surface_mut().unwrap();
        surface.flush().unwrap();
    }

    #[tokio::test]
    async fn test_toff_packet_feeds_mailbox_not_scroll() {
        let toff = DevicePoll::Packet(Packet {
            kind: PacketKind::Json,
            bytes: Bytes::from_static(
                b"{\"class\":\"TOFF\",\"real_sec\":100,\"real_nsec\":0,\
                  \"clock_sec\":99,\"clock_nsec\":500000000}\n",
            ),
        });
        let (mut runtime, _, reports) = runtime(vec![toff, DevicePoll::Empty], true);
        let mut keys = futures::stream::iter(Vec::<InputEvent>::new());
        runtime.run(&mut keys).await;

        let sample = reports.latest_sample().unwrap();
        assert_eq!(sample.drift_str(), "0.500000000");
        assert_eq!(runtime.time_offset().unwrap(), sample);
        // No monitor switch happened for the status sub-packet
        assert_eq!(runtime.switcher_mut().active_driver(), None);
    }

    #[tokio::test]
    async fn test_complaint_rendered_despite_refresh() {
        let sink = SharedSink::default();
        let surface = Surface::new(sink.clone(), 24, 80).unwrap();
        let mut runtime = MonitorRuntime::new(
            Box::new(ScriptedSession::new(vec![])),
            MonitorRegistry::builtin(),
            ReportHub::new(),
            CancelToken::new(),
            Some(surface),
        );
        let keys: Vec<InputEvent> = b"z\rq\r".iter().map(|&b| InputEvent::Key(b)).collect();
        let mut keys = futures::stream::iter(keys);

        let code = runtime.run(&mut keys).await;
        assert_eq!(code, TerminationCode::Quit);
        // The prompt rewrite at end of iteration must not clobber it
        let rendered = String::from_utf8_lossy(&sink.0.lock()).into_owned();
        assert!(rendered.contains("Unknown command 'z'"));
    }

    #[tokio::test]
    async fn test_failed_initialize_is_switch_failure() {
        use crate::core::registry::{MonitorCaps, MonitorDescriptor, PacketMonitor};
        use crate::core::surface::DevicePane;

        struct FailingMonitor;
        impl PacketMonitor for FailingMonitor {
            fn initialize(&mut self, _pane: &mut dyn DevicePane) -> bool {
                false
            }
        }

        let registry = MonitorRegistry::from_descriptors(vec![MonitorDescriptor {
            driver: DriverId::Ublox,
            min_rows: 4,
            min_cols: 80,
            caps: MonitorCaps {
                initialize: true,
                update: false,
                command: false,
                wrap: false,
            },
            factory: || Box::new(FailingMonitor),
        }]);
        let ubx = DevicePoll::Packet(Packet {
            kind: PacketKind::Ublox,
            bytes: Bytes::from_static(&[0xb5, 0x62, 0x01, 0x06, 0x00, 0x00, 0x07, 0x16]),
        });
        let mut runtime = MonitorRuntime::new(
            Box::new(ScriptedSession::new(vec![ubx])),
            registry,
            ReportHub::new(),
            CancelToken::new(),
            Some(Surface::new(Vec::new(), 24, 80).unwrap()),
        );
        let mut keys = futures::stream::iter(Vec::<InputEvent>::new());

        let code = runtime.run(&mut keys).await;
        assert_eq!(code, TerminationCode::SwitchFailed);
    }

    #[tokio::test]
    async fn test_quit_and_signal_close_once() {
        let closes = Arc::new(AtomicU32::new(0));
        let dir = tempfile::tempdir().unwrap();
        let reports = ReportHub::new();
        reports
            .open_log(&dir.path().join("capture.log"), false)
            .unwrap();
        let cancel = CancelToken::new();
        let mut runtime = MonitorRuntime::new(
            Box::new(ScriptedSession::with_close_counter(
                vec![],
                Arc::clone(&closes),
            )),
            MonitorRegistry::builtin(),
            reports.clone(),
            cancel.clone(),
            Some(Surface::new(Vec::new(), 24, 80).unwrap()),
        );
        // Interrupt lands while the operator's quit is still in flight
        cancel.cancel(TerminationCode::Signal);
        let keys: Vec<InputEvent> = b"q\r".iter().map(|&b| InputEvent::Key(b)).collect();
        let mut keys = futures::stream::iter(keys);
        let code = runtime.run(&mut keys).await;
        assert_eq!(code, TerminationCode::Signal);

        runtime.shutdown().await;
        runtime.shutdown().await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(reports.close_log());
        assert!(!reports.close_log());
    }

    #[tokio::test]
    async fn test_headless_line_dispatch() {
        let (mut runtime, _, _) = runtime(vec![], false);
        let mut keys = futures::stream::iter(vec![InputEvent::Line("q\n".to_string())]);

        let code = runtime.run(&mut keys).await;
        assert_eq!(code, TerminationCode::Quit);
    }
}

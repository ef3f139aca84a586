//! Wiremon - real-time wire-protocol device monitor
//!
//! Watches framed traffic from a serial device or a network relay, decodes
//! it live in a four-pane terminal display, and lets the operator drive the
//! link with single-letter commands.

use std::io::{BufRead, Read, Write};
use std::process::ExitCode;

use clap::Parser;
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::{execute, terminal};
use futures::StreamExt;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use wiremon_core::cli::{Cli, ExitCodes, Source};
use wiremon_core::core::pulse::{CarrierPulseSampler, PulseMonitor};
use wiremon_core::core::registry::NameMatch;
use wiremon_core::core::switcher::SwitchReport;
use wiremon_core::{
    CancelToken, DeviceSession, InputEvent, MonitorRegistry, MonitorRuntime, ReportHub, Surface,
    TerminationCode, WireSession,
};

fn init_tracing(debug_level: u8) {
    let default = match debug_level {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Translate one terminal event into a command keystroke
fn key_byte(event: &KeyEvent) -> Option<u8> {
    if event.kind != KeyEventKind::Press {
        return None;
    }
    match event.code {
        KeyCode::Char(c) if event.modifiers.contains(KeyModifiers::CONTROL) => match c {
            'l' => Some(0x0c),
            _ => None,
        },
        KeyCode::Char(c) if c.is_ascii() => Some(c as u8),
        KeyCode::Enter => Some(b'\r'),
        KeyCode::Backspace => Some(0x08),
        _ => None,
    }
}

/// Cooked line input for headless mode: a single raw keystroke wakes a
/// buffered read of the rest of the line, then the terminal drops back to
/// raw after a short pause.
fn spawn_headless_reader(
    prompt: String,
    tx: futures::channel::mpsc::UnboundedSender<InputEvent>,
) {
    std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            let mut wake = [0u8; 1];
            loop {
                let _ = terminal::enable_raw_mode();
                let n = std::io::stdin().read(&mut wake).unwrap_or(0);
                let _ = terminal::disable_raw_mode();
                if n != 1 {
                    break;
                }
                print!("wiremon: {}> {}", prompt, wake[0] as char);
                let _ = std::io::stdout().flush();
                let mut rest = String::new();
                if std::io::stdin().lock().read_line(&mut rest).is_err() {
                    break;
                }
                let line = format!("{}{}", wake[0] as char, rest);
                if tx.unbounded_send(InputEvent::Line(line)).is_err() {
                    break;
                }
                std::thread::sleep(std::time::Duration::from_secs(2));
            }
        })
        .ok();
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            use clap::error::ErrorKind;
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCodes::SUCCESS,
                _ => ExitCodes::ERROR,
            };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    init_tracing(cli.debug);

    let registry = MonitorRegistry::builtin();
    if cli.list {
        print!("{}", registry.list_report());
        return ExitCode::from(ExitCodes::SUCCESS);
    }

    // Resolve the starting type before touching the device
    if let Some(fragment) = cli.type_fragment.as_deref() {
        match registry.match_name(fragment) {
            NameMatch::Unique(_) => {}
            NameMatch::Ambiguous => {
                eprintln!("wiremon: multiple device types match '{}'", fragment);
                return ExitCode::from(ExitCodes::ERROR);
            }
            NameMatch::None => {
                eprintln!("wiremon: no device type matches '{}'", fragment);
                return ExitCode::from(ExitCodes::ERROR);
            }
        }
    }

    let reports = ReportHub::new();
    if let Some(path) = cli.logfile.as_deref() {
        if let Err(err) = reports.open_log(path, false) {
            eprintln!("wiremon: can't open logfile {}: {}", path.display(), err);
            return ExitCode::from(ExitCodes::ERROR);
        }
    }

    let source = Source::parse(cli.target.as_deref());
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        if let Err(err) = ctrlc::set_handler(move || cancel.cancel(TerminationCode::Signal)) {
            warn!(%err, "signal handler installation failed");
        }
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("wiremon: runtime startup failed: {}", err);
            return ExitCode::from(ExitCodes::ERROR);
        }
    };

    match runtime.block_on(run_monitor(cli, source, registry, reports, cancel)) {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(code) => ExitCode::from(code),
    }
}

async fn run_monitor(
    cli: Cli,
    source: Source,
    registry: MonitorRegistry,
    reports: ReportHub,
    cancel: CancelToken,
) -> Result<(), u8> {
    let mut session: Box<dyn DeviceSession> = match &source {
        Source::Serial { path } => Box::new(WireSession::serial(path, 9600)),
        Source::Network { endpoint, device } => Box::new(WireSession::network(
            endpoint,
            device.as_deref(),
            cli.nmea,
        )),
    };
    if let Err(err) = session.activate().await {
        eprintln!("wiremon: activation failed: {}", err);
        return Err(ExitCodes::ERROR);
    }
    let link = session.link();
    info!(prompt = %link.prompt(), "session activated");

    // Pulse capture only makes sense on a line we own
    let mut pulse = match &source {
        Source::Serial { path } => match CarrierPulseSampler::open(path) {
            Ok(sampler) => Some(PulseMonitor::start(Box::new(sampler), reports.clone())),
            Err(err) => {
                debug!(%err, "no pulse source on this line");
                None
            }
        },
        Source::Network { .. } => None,
    };

    let display = !cli.nocurses;
    let display_failed = TerminationCode::DisplayInit
        .explanation()
        .unwrap_or("display failed");
    let surface = if display {
        if terminal::enable_raw_mode().is_err() {
            eprintln!("{}", display_failed);
            return Err(ExitCodes::ERROR);
        }
        let _ = execute!(std::io::stdout(), terminal::EnterAlternateScreen);
        let (cols, rows) = terminal::size().unwrap_or((80, 24));
        match Surface::new(std::io::stdout(), rows, cols) {
            Ok(surface) => Some(surface),
            Err(err) => {
                restore_terminal();
                eprintln!("{}: {}", display_failed, err);
                return Err(ExitCodes::ERROR);
            }
        }
    } else {
        println!("wiremon: {}", link.prompt());
        None
    };

    let mut runtime = MonitorRuntime::new(session, registry, reports.clone(), cancel.clone(), surface);

    if let Some(fragment) = cli.type_fragment.as_deref() {
        match runtime.force_type(fragment) {
            Ok(SwitchReport::Switched) | Ok(SwitchReport::Unchanged) => {}
            Ok(SwitchReport::NoMatch(msg)) | Ok(SwitchReport::TooSmall(msg)) => {
                warn!(%msg, "starting type not applied")
            }
            Err(err) => {
                restore_terminal();
                eprintln!("wiremon: {}", err);
                return Err(ExitCodes::ERROR);
            }
        }
    }

    let code = if display {
        let cancel_keys = cancel.clone();
        let mut keys = Box::pin(EventStream::new().filter_map(move |event| {
            let cancel = cancel_keys.clone();
            async move {
                match event {
                    Ok(Event::Key(key)) => {
                        // Raw mode swallows the interrupt key
                        if key.code == KeyCode::Char('c')
                            && key.modifiers.contains(KeyModifiers::CONTROL)
                        {
                            cancel.cancel(TerminationCode::Signal);
                            return None;
                        }
                        key_byte(&key).map(InputEvent::Key)
                    }
                    _ => None,
                }
            }
        }));
        runtime.run(&mut keys).await
    } else {
        let (tx, mut rx) = futures::channel::mpsc::unbounded();
        spawn_headless_reader(link.prompt(), tx);
        runtime.run(&mut rx).await
    };

    // Teardown order: pulse capture, session, log stream, terminal
    if let Some(pulse) = pulse.as_mut() {
        pulse.stop();
    }
    runtime.shutdown().await;
    reports.close_log();
    if display {
        restore_terminal();
    }

    if let Some(explanation) = code.explanation() {
        eprintln!("{}", explanation);
    }
    Ok(())
}

fn restore_terminal() {
    let _ = execute!(std::io::stdout(), terminal::LeaveAlternateScreen);
    let _ = terminal::disable_raw_mode();
}

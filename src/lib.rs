//! # Wiremon Core Library
//!
//! A real-time terminal monitor for bidirectional wire-protocol devices:
//! framed binary or text traffic over a serial line or a network relay,
//! decoded live while the operator drives the link with single-letter
//! commands.
//!
//! ## Features
//!
//! - Pluggable per-protocol monitor objects behind a capability registry
//! - Automatic protocol-type switching on packet receipt, with a sticky
//!   fallback across text-mode transitions
//! - Four-pane terminal display (status, command, device, scroll)
//! - Link control: speed, parity, stop bits, protocol mode, report cycle
//! - Raw and checksummed control packet injection
//! - Verbatim binary-transparent packet logging
//! - Hardware pulse-timing side channel with device/host clock correlation
//! - Headless mode for scripting and piping
//!
//! ## Example
//!
//! ```rust,no_run
//! use wiremon_core::{
//!     CancelToken, DeviceSession, InputEvent, MonitorRegistry, MonitorRuntime, ReportHub,
//!     WireSession,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let mut session = Box::new(WireSession::serial("/dev/ttyUSB0", 9600));
//!     session.activate().await.unwrap();
//!
//!     let mut runtime = MonitorRuntime::<std::io::Stdout>::new(
//!         session,
//!         MonitorRegistry::builtin(),
//!         ReportHub::new(),
//!         CancelToken::new(),
//!         None,
//!     );
//!     let mut keys = futures::stream::iter(Vec::<InputEvent>::new());
//!     let code = runtime.run(&mut keys).await;
//!     runtime.shutdown().await;
//!     println!("terminated: {:?}", code);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cli;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{Cli, ExitCodes, Source};
pub use crate::core::cancel::{CancelToken, TerminationCode};
pub use crate::core::event_loop::{InputEvent, MonitorRuntime};
pub use crate::core::registry::{MonitorCaps, MonitorDescriptor, MonitorRegistry, PacketMonitor};
pub use crate::core::report::ReportHub;
pub use crate::core::session::wire::WireSession;
pub use crate::core::session::{DeviceSession, DriverId, Packet, PacketKind};
pub use crate::core::surface::{DevicePane, Surface};
pub use crate::core::switcher::TypeSwitcher;
pub use crate::core::timing::TimeOffsetSample;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

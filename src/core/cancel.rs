//! Cooperative cancellation for the monitor loop
//!
//! A signal handler may fire at any time, so all it does is store a one-shot
//! termination code into an atomic. The event loop polls the token at every
//! phase boundary and tears down cooperatively.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Reason the monitor loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TerminationCode {
    /// Readiness wait on the device descriptor failed
    IoWaitFailed = 1,
    /// Protocol-type switch failed fatally
    SwitchFailed = 2,
    /// Zero-length read: the device went away
    EmptyRead = 3,
    /// Read error from the device
    ReadError = 4,
    /// Asynchronous signal received
    Signal = 5,
    /// Operator asked to quit
    Quit = 6,
    /// Display surface failed to initialize
    DisplayInit = 7,
}

impl TerminationCode {
    fn from_raw(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::IoWaitFailed),
            2 => Some(Self::SwitchFailed),
            3 => Some(Self::EmptyRead),
            4 => Some(Self::ReadError),
            5 => Some(Self::Signal),
            6 => Some(Self::Quit),
            7 => Some(Self::DisplayInit),
            _ => None,
        }
    }

    /// Fixed explanation line written to stderr before exit.
    ///
    /// Signal and quit terminations are silent.
    pub fn explanation(self) -> Option<&'static str> {
        match self {
            Self::IoWaitFailed => Some("I/O wait on device failed"),
            Self::SwitchFailed => Some("Monitor type switch failed"),
            Self::EmptyRead => Some("Device went offline"),
            Self::ReadError => Some("Read error from device"),
            Self::DisplayInit => Some("Display initialization failed"),
            Self::Signal | Self::Quit => None,
        }
    }
}

/// One-shot cancellation token
///
/// The first code stored wins; later attempts are ignored so the reason for
/// termination is never overwritten.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicU8>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state
    pub fn new() -> Self {
        Self::default()
    }

    /// Request termination; a no-op if a code is already set
    pub fn cancel(&self, code: TerminationCode) {
        let _ = self
            .flag
            .compare_exchange(0, code as u8, Ordering::SeqCst, Ordering::SeqCst);
    }

    /// The termination code, if one has been set
    pub fn get(&self) -> Option<TerminationCode> {
        TerminationCode::from_raw(self.flag.load(Ordering::SeqCst))
    }

    /// Has termination been requested?
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_code_wins() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        token.cancel(TerminationCode::Quit);
        token.cancel(TerminationCode::ReadError);

        assert_eq!(token.get(), Some(TerminationCode::Quit));
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let other = token.clone();

        other.cancel(TerminationCode::Signal);
        assert!(token.is_cancelled());
        assert_eq!(token.get(), Some(TerminationCode::Signal));
    }

    #[test]
    fn test_explanations() {
        assert!(TerminationCode::EmptyRead.explanation().is_some());
        assert!(TerminationCode::Quit.explanation().is_none());
        assert!(TerminationCode::Signal.explanation().is_none());
    }
}

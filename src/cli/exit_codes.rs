//! CLI Exit Codes
//!
//! Exit codes for automation. The monitor itself always exits 0 once the
//! loop has run; nonzero codes only come from startup failures.

use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success, including help/version/list requests
    pub const SUCCESS: u8 = 0;

    /// Startup failure: bad arguments, unmatched type, unopenable logfile
    pub const ERROR: u8 = 1;
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "Startup failure",
        _ => "Unknown error",
    }
}

/// Convert a code to a process exit code
pub fn to_exit_code(code: u8) -> ExitCode {
    ExitCode::from(code)
}

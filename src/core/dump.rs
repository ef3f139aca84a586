//! Conditional hex rendering of raw packet bytes
//!
//! Packets that are entirely printable pass through as text with the odd
//! control byte escaped; anything else becomes a plain lowercase hex dump.
//! Output is always bounded so a hostile packet can never overrun the pane.

use thiserror::Error;

/// Failure decoding an operator-supplied hex argument
#[derive(Error, Debug)]
pub enum HexArgError {
    /// Odd digit count or a non-hex character
    #[error("invalid hex string: {0}")]
    Invalid(String),
}

fn byte_is_display(b: u8) -> bool {
    b.is_ascii_graphic() || b == b' '
}

fn byte_is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

/// Render `data` for the scroll pane, bounded to `cap` output bytes.
///
/// If every byte is printable or whitespace the text passes through with
/// non-printing bytes escaped as `\xNN`; for packets tagged textual a single
/// trailing CR/LF pair is suppressed instead of escaped. Otherwise the whole
/// packet is rendered as two lowercase hex digits per byte, truncated to
/// `cap`, never overrun.
pub fn cond_hexdump(data: &[u8], cap: usize, textual: bool) -> String {
    let printable = data.iter().all(|&b| byte_is_display(b) || byte_is_space(b));
    let mut out = String::new();

    if printable {
        for (i, &b) in data.iter().enumerate() {
            if out.len() >= cap {
                break;
            }
            if byte_is_display(b) {
                out.push(b as char);
            } else {
                if textual && b == b'\n' && i == data.len() - 1 {
                    continue;
                }
                if textual && b == b'\r' && i == data.len().wrapping_sub(2) {
                    continue;
                }
                let escape = format!("\\x{:02x}", b);
                if out.len() + escape.len() > cap {
                    break;
                }
                out.push_str(&escape);
            }
        }
        out.truncate(cap);
    } else {
        for &b in data {
            if out.len() + 2 > cap {
                break;
            }
            out.push_str(&format!("{:02x}", b));
        }
    }

    out
}

/// Decode an operator hex argument into raw bytes.
///
/// Spaces are tolerated as separators; an odd digit count or any non-hex
/// character is a recoverable command error, never a panic.
pub fn hex_unpack(arg: &str) -> Result<Vec<u8>, HexArgError> {
    let cleaned: String = arg.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&cleaned).map_err(|_| HexArgError::Invalid(arg.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_printable_passthrough() {
        let data = b"$GPGGA,123519,4807.038,N";
        assert_eq!(cond_hexdump(data, 512, true), "$GPGGA,123519,4807.038,N");
    }

    #[test]
    fn test_trailing_crlf_suppressed_for_textual() {
        assert_eq!(cond_hexdump(b"$GPGGA*47\r\n", 512, true), "$GPGGA*47");
        // A binary-tagged packet keeps its escapes instead
        assert_eq!(cond_hexdump(b"hi\r\n", 512, false), "hi\\x0d\\x0a");
    }

    #[test]
    fn test_embedded_control_escaped() {
        assert_eq!(cond_hexdump(b"a\tb", 512, false), "a\\x09b");
    }

    #[test]
    fn test_binary_becomes_hex() {
        let data = [0xb5u8, 0x62, 0x01, 0x06];
        let out = cond_hexdump(&data, 512, false);
        assert_eq!(out, "b5620106");
        assert_eq!(out.len(), 2 * data.len());
    }

    #[test]
    fn test_hex_truncates_at_cap() {
        let data = [0xffu8; 32];
        let out = cond_hexdump(&data, 10, false);
        assert_eq!(out, "ffffffffff");
        assert_eq!(out.len(), 10);
    }

    #[test]
    fn test_printable_truncates_at_cap() {
        let out = cond_hexdump(b"abcdefgh", 4, false);
        assert_eq!(out, "abcd");
    }

    #[test]
    fn test_hex_unpack() {
        assert_eq!(hex_unpack("b5 62 01").unwrap(), vec![0xb5, 0x62, 0x01]);
        assert!(hex_unpack("b5 6").is_err());
        assert!(hex_unpack("zz").is_err());
    }
}

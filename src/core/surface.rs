//! Display surface and pane layout
//!
//! The terminal splits into four panes. Row 0 holds the status pane (left 30
//! columns, device identity) and the command pane (remainder, prompt and
//! echo). Below that the active monitor owns a device pane of its requested
//! height, and whatever rows remain scroll framework packet dumps. All
//! drawing is queued and flushed once per loop iteration.

use std::collections::VecDeque;
use std::io::{self, Write};

use crossterm::{
    cursor::MoveTo,
    queue,
    style::{Attribute, Print, SetAttribute},
    terminal::{Clear, ClearType},
};
use thiserror::Error;

/// Width of the status pane on row 0
pub const STATUS_COLS: u16 = 30;

/// Display failures
#[derive(Error, Debug)]
pub enum SurfaceError {
    /// Terminal too small for the requested pane arrangement
    #[error("terminal too small: need {need_rows}x{need_cols}, have {rows}x{cols}")]
    TooSmall {
        /// Rows required
        need_rows: u16,
        /// Columns required
        need_cols: u16,
        /// Rows available
        rows: u16,
        /// Columns available
        cols: u16,
    },
    /// Writing to the terminal failed
    #[error("terminal write failed: {0}")]
    Io(#[from] io::Error),
}

/// Pure pane geometry
///
/// Invariant: `1 + device_rows <= rows`, so the scroll pane height
/// (`rows - 1 - device_rows`) never underflows. A zero-height scroll pane is
/// disabled rather than drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Terminal rows
    pub rows: u16,
    /// Terminal columns
    pub cols: u16,
    /// Rows granted to the device pane
    pub device_rows: u16,
}

impl Layout {
    /// Geometry with no device pane yet
    pub fn new(rows: u16, cols: u16) -> Result<Self, SurfaceError> {
        if rows < 2 || cols < STATUS_COLS + 1 {
            return Err(SurfaceError::TooSmall {
                need_rows: 2,
                need_cols: STATUS_COLS + 1,
                rows,
                cols,
            });
        }
        Ok(Self {
            rows,
            cols,
            device_rows: 0,
        })
    }

    /// Can a device pane of this minimum size fit?
    pub fn fits(&self, min_rows: u16, min_cols: u16) -> bool {
        1 + min_rows <= self.rows && min_cols <= self.cols
    }

    /// Grant the device pane `rows` rows, rejecting an oversized request
    pub fn set_device_rows(&mut self, rows: u16) -> Result<(), SurfaceError> {
        if 1 + rows > self.rows {
            return Err(SurfaceError::TooSmall {
                need_rows: 1 + rows,
                need_cols: self.cols,
                rows: self.rows,
                cols: self.cols,
            });
        }
        self.device_rows = rows;
        Ok(())
    }

    /// Rows left over for the scroll pane
    pub fn scroll_rows(&self) -> u16 {
        self.rows - 1 - self.device_rows
    }

    /// First terminal row of the scroll pane
    pub fn scroll_top(&self) -> u16 {
        1 + self.device_rows
    }

    /// A zero-row scroll pane is disabled, never rendered
    pub fn scroll_enabled(&self) -> bool {
        self.scroll_rows() > 0
    }
}

/// Writable region handed to the active monitor
pub trait DevicePane {
    /// Pane height in rows
    fn rows(&self) -> u16;
    /// Pane width in columns
    fn cols(&self) -> u16;
    /// Write text at a pane-relative position, clipped to the pane
    fn put(&mut self, row: u16, col: u16, text: &str);
    /// Blank the whole pane
    fn clear(&mut self);
}

/// Backing store for the device pane, rendered by the surface on flush
struct PaneView {
    rows: u16,
    cols: u16,
    lines: Vec<String>,
}

impl PaneView {
    fn new(rows: u16, cols: u16) -> Self {
        Self {
            rows,
            cols,
            lines: vec![String::new(); rows as usize],
        }
    }
}

impl DevicePane for PaneView {
    fn rows(&self) -> u16 {
        self.rows
    }

    fn cols(&self) -> u16 {
        self.cols
    }

    fn put(&mut self, row: u16, col: u16, text: &str) {
        if row >= self.rows || col >= self.cols {
            return;
        }
        let col = col as usize;
        let avail = self.cols as usize - col;
        // Overlay by character cell, never by byte offset
        let mut cells: Vec<char> = self.lines[row as usize].chars().collect();
        if cells.len() < col {
            cells.resize(col, ' ');
        }
        for (i, c) in text.chars().take(avail).enumerate() {
            if col + i < cells.len() {
                cells[col + i] = c;
            } else {
                cells.push(c);
            }
        }
        self.lines[row as usize] = cells.into_iter().collect();
    }

    fn clear(&mut self) {
        for line in &mut self.lines {
            line.clear();
        }
    }
}

/// The four-pane terminal display
///
/// Generic over the sink so tests can render into a buffer. All logical
/// writes accumulate in memory; `flush` turns them into one queued batch of
/// terminal commands and a single physical write.
pub struct Surface<W: Write> {
    out: W,
    layout: Layout,
    status: String,
    command: String,
    complaint: Option<String>,
    device: Option<PaneView>,
    scroll: VecDeque<String>,
}

impl<W: Write> Surface<W> {
    /// Build a surface over `out` with the given terminal size
    pub fn new(out: W, rows: u16, cols: u16) -> Result<Self, SurfaceError> {
        let layout = Layout::new(rows, cols)?;
        Ok(Self {
            out,
            layout,
            status: String::new(),
            command: String::new(),
            complaint: None,
            device: None,
            scroll: VecDeque::new(),
        })
    }

    /// Current geometry
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Replace the device pane with one of `rows` rows; `0` removes it
    pub fn resize_device_pane(&mut self, rows: u16) -> Result<(), SurfaceError> {
        self.layout.set_device_rows(rows)?;
        self.device = if rows > 0 {
            Some(PaneView::new(rows, self.layout.cols))
        } else {
            None
        };
        // The scroll pane shrank or grew; drop lines that no longer fit
        while self.scroll.len() > self.layout.scroll_rows() as usize {
            self.scroll.pop_front();
        }
        Ok(())
    }

    /// Mutable access to the device pane for the active monitor
    pub fn device_pane(&mut self) -> Option<&mut dyn DevicePane> {
        self.device.as_mut().map(|p| p as &mut dyn DevicePane)
    }

    /// Set the status pane text (device identity, bold, left 30 columns)
    pub fn write_status(&mut self, text: &str) {
        self.status = text.chars().take(STATUS_COLS as usize).collect();
    }

    /// Set the command pane to the prompt plus the echoed buffer
    pub fn write_command_prompt(&mut self, type_name: &str, fallback: Option<&str>, echo: &str) {
        let prompt = match fallback {
            Some(fb) if fb != type_name => format!("{} ({})> ", type_name, fb),
            _ => format!("{}> ", type_name),
        };
        self.command = format!("{}{}", prompt, echo);
    }

    /// Show a recoverable complaint in the command pane.
    ///
    /// The complaint preempts the prompt on the next flush only, so a
    /// prompt rewrite later in the same iteration cannot clobber it.
    pub fn complain(&mut self, message: &str) {
        self.complaint = Some(message.to_string());
    }

    /// Append a line to the scroll pane; silently dropped when disabled
    pub fn append_scroll(&mut self, line: &str) {
        if !self.layout.scroll_enabled() {
            return;
        }
        let clipped: String = line.chars().take(self.layout.cols as usize).collect();
        self.scroll.push_back(clipped);
        while self.scroll.len() > self.layout.scroll_rows() as usize {
            self.scroll.pop_front();
        }
    }

    /// Blank every pane's contents
    pub fn clear_all(&mut self) {
        self.status.clear();
        self.command.clear();
        self.complaint = None;
        self.scroll.clear();
        if let Some(pane) = self.device.as_mut() {
            pane.clear();
        }
    }

    /// Render the accumulated state as one physical terminal update
    pub fn flush(&mut self) -> Result<(), SurfaceError> {
        let command = match self.complaint.take() {
            Some(complaint) => complaint,
            None => self.command.clone(),
        };
        queue!(
            self.out,
            MoveTo(0, 0),
            Clear(ClearType::CurrentLine),
            SetAttribute(Attribute::Bold),
            Print(&self.status),
            SetAttribute(Attribute::Reset),
            MoveTo(STATUS_COLS, 0),
            Print(&command),
        )?;
        if let Some(pane) = &self.device {
            for (i, line) in pane.lines.iter().enumerate() {
                queue!(
                    self.out,
                    MoveTo(0, 1 + i as u16),
                    Clear(ClearType::CurrentLine),
                    Print(line),
                )?;
            }
        }
        if self.layout.scroll_enabled() {
            let top = self.layout.scroll_top();
            for i in 0..self.layout.scroll_rows() {
                let line = self.scroll.get(i as usize).map(String::as_str).unwrap_or("");
                queue!(
                    self.out,
                    MoveTo(0, top + i),
                    Clear(ClearType::CurrentLine),
                    Print(line),
                )?;
            }
        }
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_rejects_oversized_device_pane() {
        let mut layout = Layout::new(10, 80).unwrap();
        assert!(layout.set_device_rows(9).is_ok());
        assert_eq!(layout.scroll_rows(), 0);
        assert!(!layout.scroll_enabled());

        assert!(layout.set_device_rows(10).is_err());
        // Rejection leaves the prior grant intact
        assert_eq!(layout.device_rows, 9);
    }

    #[test]
    fn test_layout_fits() {
        let layout = Layout::new(24, 80).unwrap();
        assert!(layout.fits(16, 80));
        assert!(layout.fits(23, 80));
        assert!(!layout.fits(24, 80));
        assert!(!layout.fits(8, 132));
    }

    #[test]
    fn test_tiny_terminal_rejected() {
        assert!(Layout::new(1, 80).is_err());
        assert!(Layout::new(24, 20).is_err());
    }

    #[test]
    fn test_scroll_pane_bounded() {
        let mut surface = Surface::new(Vec::new(), 4, 80).unwrap();
        // 4 rows, no device pane: 3 scroll rows
        for i in 0..10 {
            surface.append_scroll(&format!("line {}", i));
        }
        assert_eq!(surface.scroll.len(), 3);
        assert_eq!(surface.scroll.front().map(String::as_str), Some("line 7"));
    }

    #[test]
    fn test_disabled_scroll_drops_lines() {
        let mut surface = Surface::new(Vec::new(), 4, 80).unwrap();
        surface.resize_device_pane(3).unwrap();
        assert!(!surface.layout().scroll_enabled());
        surface.append_scroll("dropped");
        assert!(surface.scroll.is_empty());
    }

    #[test]
    fn test_pane_put_clips_to_width() {
        let mut pane = PaneView::new(2, 10);
        pane.put(0, 6, "abcdefgh");
        assert_eq!(pane.lines[0], "      abcd");
        pane.put(5, 0, "off the bottom");
        assert_eq!(pane.lines[1], "");
    }

    #[test]
    fn test_pane_put_preserves_tail() {
        let mut pane = PaneView::new(1, 20);
        pane.put(0, 0, "Speed:       Mode:");
        pane.put(0, 7, "9600");
        assert_eq!(pane.lines[0], "Speed: 9600  Mode:");
    }

    #[test]
    fn test_pane_put_overlays_multibyte_text() {
        let mut pane = PaneView::new(1, 20);
        pane.put(0, 0, "Durée:       Mode:");
        pane.put(0, 7, "9600");
        assert_eq!(pane.lines[0], "Durée: 9600  Mode:");

        // Multibyte overwrite of an ASCII cell must not split anything
        pane.put(0, 7, "éé");
        assert_eq!(pane.lines[0], "Durée: éé00  Mode:");
    }

    #[test]
    fn test_complaint_preempts_prompt_for_one_flush() {
        let mut surface = Surface::new(Vec::new(), 6, 80).unwrap();
        surface.complain("Unknown command 'z'");
        surface.write_command_prompt("u-blox", None, "");
        surface.flush().unwrap();
        let first = String::from_utf8_lossy(&surface.out).into_owned();
        assert!(first.contains("Unknown command 'z'"));
        assert!(!first.contains("u-blox> "));

        surface.out.clear();
        surface.flush().unwrap();
        let second = String::from_utf8_lossy(&surface.out).into_owned();
        assert!(second.contains("u-blox> "));
        assert!(!second.contains("Unknown command"));
    }

    #[test]
    fn test_prompt_shows_fallback_when_distinct() {
        let mut surface = Surface::new(Vec::new(), 10, 80).unwrap();
        surface.write_command_prompt("NMEA0183", Some("u-blox"), "s 9600");
        assert_eq!(surface.command, "NMEA0183 (u-blox)> s 9600");

        surface.write_command_prompt("u-blox", Some("u-blox"), "");
        assert_eq!(surface.command, "u-blox> ");
    }

    #[test]
    fn test_flush_writes_something() {
        let mut surface = Surface::new(Vec::new(), 6, 80).unwrap();
        surface.write_status("/dev/ttyUSB0 9600 8N1");
        surface.append_scroll("(12) $GPGGA*47");
        surface.flush().unwrap();
        let rendered = String::from_utf8_lossy(&surface.out).into_owned();
        assert!(rendered.contains("/dev/ttyUSB0 9600 8N1"));
        assert!(rendered.contains("(12) $GPGGA*47"));
    }
}

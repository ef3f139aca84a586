//! Built-in monitor objects
//!
//! These are deliberately thin: they render frame-level facts (message
//! identity, length, counters) into the device pane and leave deep field
//! decoding to dedicated tooling. The passthrough monitor has no pane at all
//! and exists so JSON relay traffic scrolls without a protocol complaint.

use super::registry::{MonitorCaps, MonitorDescriptor, PacketMonitor};
use super::session::{DriverId, Packet};
use super::surface::DevicePane;

/// Descriptors for every monitor shipped in the binary
pub fn builtin_descriptors() -> Vec<MonitorDescriptor> {
    vec![
        MonitorDescriptor {
            driver: DriverId::Ublox,
            min_rows: 8,
            min_cols: 80,
            caps: MonitorCaps {
                initialize: true,
                update: true,
                command: false,
                wrap: true,
            },
            factory: || Box::new(BinaryReceiverMonitor::default()),
        },
        MonitorDescriptor {
            driver: DriverId::Nmea0183,
            min_rows: 6,
            min_cols: 80,
            caps: MonitorCaps {
                initialize: true,
                update: true,
                command: false,
                wrap: true,
            },
            factory: || Box::new(TextSentenceMonitor::default()),
        },
        MonitorDescriptor {
            driver: DriverId::JsonPassthrough,
            min_rows: 0,
            min_cols: 80,
            caps: MonitorCaps::NONE,
            factory: || Box::new(PassthroughMonitor),
        },
    ]
}

/// Frame-level view of u-blox binary traffic
#[derive(Default)]
pub struct BinaryReceiverMonitor {
    packets: u64,
    last_class: u8,
    last_id: u8,
    last_len: u16,
}

impl PacketMonitor for BinaryReceiverMonitor {
    fn initialize(&mut self, pane: &mut dyn DevicePane) -> bool {
        pane.clear();
        pane.put(0, 0, "u-blox binary receiver");
        pane.put(2, 0, "Class/Id:");
        pane.put(3, 0, "Length:");
        pane.put(4, 0, "Packets:");
        true
    }

    fn update(&mut self, pane: &mut dyn DevicePane, packet: &Packet) {
        // Sync (2) + class + id + little-endian length
        if packet.bytes.len() < 6 {
            return;
        }
        self.packets += 1;
        self.last_class = packet.bytes[2];
        self.last_id = packet.bytes[3];
        self.last_len = u16::from_le_bytes([packet.bytes[4], packet.bytes[5]]);

        pane.put(
            2,
            10,
            &format!("{:02x}/{:02x}    ", self.last_class, self.last_id),
        );
        pane.put(3, 10, &format!("{:<6}", self.last_len));
        pane.put(4, 10, &format!("{:<12}", self.packets));
    }

    fn wrap(&mut self) {
        self.packets = 0;
    }
}

/// Frame-level view of text sentence traffic
#[derive(Default)]
pub struct TextSentenceMonitor {
    sentences: u64,
    last_tag: String,
}

impl TextSentenceMonitor {
    fn tag_of(bytes: &[u8]) -> String {
        // Tag runs from after '$' to the first comma
        bytes
            .iter()
            .skip(1)
            .take_while(|&&b| b != b',' && b != b'*' && b != b'\r')
            .map(|&b| b as char)
            .take(8)
            .collect()
    }
}

impl PacketMonitor for TextSentenceMonitor {
    fn initialize(&mut self, pane: &mut dyn DevicePane) -> bool {
        pane.clear();
        pane.put(0, 0, "Text sentences");
        pane.put(2, 0, "Last tag:");
        pane.put(3, 0, "Sentences:");
        true
    }

    fn update(&mut self, pane: &mut dyn DevicePane, packet: &Packet) {
        if packet.bytes.first() != Some(&b'$') {
            return;
        }
        self.sentences += 1;
        self.last_tag = Self::tag_of(&packet.bytes);

        pane.put(2, 11, &format!("{:<10}", self.last_tag));
        pane.put(3, 11, &format!("{:<12}", self.sentences));
    }

    fn wrap(&mut self) {
        self.sentences = 0;
    }
}

/// Paneless monitor for relayed JSON traffic
pub struct PassthroughMonitor;

impl PacketMonitor for PassthroughMonitor {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::PacketKind;
    use bytes::Bytes;

    struct FakePane {
        rows: u16,
        cols: u16,
        writes: Vec<(u16, u16, String)>,
    }

    impl FakePane {
        fn new() -> Self {
            Self {
                rows: 8,
                cols: 80,
                writes: Vec::new(),
            }
        }
    }

    impl DevicePane for FakePane {
        fn rows(&self) -> u16 {
            self.rows
        }
        fn cols(&self) -> u16 {
            self.cols
        }
        fn put(&mut self, row: u16, col: u16, text: &str) {
            self.writes.push((row, col, text.to_string()));
        }
        fn clear(&mut self) {
            self.writes.clear();
        }
    }

    fn ubx_packet(class: u8, id: u8, len: u16) -> Packet {
        let mut bytes = vec![0xb5, 0x62, class, id];
        bytes.extend_from_slice(&len.to_le_bytes());
        bytes.extend(std::iter::repeat(0u8).take(len as usize + 2));
        Packet {
            kind: PacketKind::Ublox,
            bytes: Bytes::from(bytes),
        }
    }

    #[test]
    fn test_binary_monitor_tracks_header() {
        let mut pane = FakePane::new();
        let mut mon = BinaryReceiverMonitor::default();
        assert!(mon.initialize(&mut pane));

        mon.update(&mut pane, &ubx_packet(0x01, 0x06, 92));
        mon.update(&mut pane, &ubx_packet(0x01, 0x06, 92));
        assert_eq!(mon.packets, 2);
        assert_eq!(mon.last_class, 0x01);
        assert_eq!(mon.last_id, 0x06);
        assert_eq!(mon.last_len, 92);

        // Truncated header is ignored, not counted
        mon.update(
            &mut pane,
            &Packet {
                kind: PacketKind::Ublox,
                bytes: Bytes::from_static(&[0xb5, 0x62, 0x01]),
            },
        );
        assert_eq!(mon.packets, 2);
    }

    #[test]
    fn test_text_monitor_extracts_tag() {
        let mut pane = FakePane::new();
        let mut mon = TextSentenceMonitor::default();
        assert!(mon.initialize(&mut pane));

        mon.update(
            &mut pane,
            &Packet {
                kind: PacketKind::Nmea,
                bytes: Bytes::from_static(b"$GPGGA,123519,4807.038,N*47\r\n"),
            },
        );
        assert_eq!(mon.last_tag, "GPGGA");
        assert_eq!(mon.sentences, 1);
    }

    #[test]
    fn test_wrap_resets_counters() {
        let mut pane = FakePane::new();
        let mut mon = BinaryReceiverMonitor::default();
        mon.update(&mut pane, &ubx_packet(0x02, 0x10, 4));
        mon.wrap();
        assert_eq!(mon.packets, 0);
    }

    #[test]
    fn test_passthrough_is_inert() {
        let mut pane = FakePane::new();
        let mut mon = PassthroughMonitor;
        assert!(mon.initialize(&mut pane));
        assert!(pane.writes.is_empty());
    }
}

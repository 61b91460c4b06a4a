//! TEMPer wire format
//!
//! Command payloads, USB request parameters and the temperature report
//! decoder. The byte offsets and the linear scale are fixed by the stick's
//! firmware.

use byteorder::{BigEndian, ByteOrder};
use std::time::Duration;

/// Length of every command payload and interrupt report
pub const REPORT_LEN: usize = 8;

/// Timeout applied to every control and interrupt transfer
pub const TRANSFER_TIMEOUT: Duration = Duration::from_millis(5000);

/// bmRequestType: host-to-device, class, interface
pub const REQUEST_TYPE: u8 = 0x21;
/// HID SET_REPORT
pub const REQUEST_SET_REPORT: u8 = 0x09;

/// wValue / wIndex for the enable command
pub const ENABLE_VALUE: u16 = 0x0201;
pub const ENABLE_INDEX: u16 = 0x00;
pub const ENABLE_PAYLOAD: [u8; 2] = [0x01, 0x01];

/// wValue / wIndex for 8-byte command reports
pub const REPORT_VALUE: u16 = 0x0200;
pub const REPORT_INDEX: u16 = 0x01;

/// Interrupt IN endpoint carrying responses
pub const RESPONSE_ENDPOINT: u8 = 0x82;

/// Configuration selected during the handshake
pub const CONFIGURATION: u8 = 1;

/// Interfaces claimed for the lifetime of a stick
pub const INTERFACES: [u8; 2] = [0, 1];

/// Calibration/query payloads sent once, in order, during the handshake
pub const CALIBRATION_COMMANDS: [[u8; REPORT_LEN]; 3] = [
    [0x01, 0x80, 0x33, 0x01, 0x00, 0x00, 0x00, 0x00],
    [0x01, 0x82, 0x77, 0x01, 0x00, 0x00, 0x00, 0x00],
    [0x01, 0x86, 0xff, 0x01, 0x00, 0x00, 0x00, 0x00],
];

const READ_TEMPERATURE: [u8; REPORT_LEN] = [0x01, 0x80, 0x33, 0x01, 0x00, 0x00, 0x00, 0x00];

/// Degrees Celsius per raw count
pub const CELSIUS_PER_COUNT: f64 = 125.0 / 32000.0;

/// A decoded reading together with the calibration offset applied to it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureSample {
    pub celsius: f32,
    pub calibration_offset: i32,
}

/// Build the read-temperature command
pub fn encode_read_command() -> [u8; REPORT_LEN] {
    READ_TEMPERATURE
}

/// Decode a temperature report
///
/// Bytes 2 and 3 carry a big-endian signed count; `calibration_offset` is
/// added in raw counts before scaling.
pub fn decode(report: &[u8; REPORT_LEN], calibration_offset: i32) -> f32 {
    let raw = BigEndian::read_i16(&report[2..4]);
    let counts = i64::from(raw) + i64::from(calibration_offset);
    (counts as f64 * CELSIUS_PER_COUNT) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(hi: u8, lo: u8) -> [u8; REPORT_LEN] {
        [0x80, 0x02, hi, lo, 0x00, 0x00, 0x00, 0x00]
    }

    #[test]
    fn test_read_command_matches_first_calibration_command() {
        assert_eq!(encode_read_command(), CALIBRATION_COMMANDS[0]);
    }

    #[test]
    fn test_decode_known_report() {
        let buf = [0x00, 0x00, 0x0c, 0x80, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(decode(&buf, 0), 12.5);
    }

    #[test]
    fn test_decode_ignores_other_bytes() {
        let mut buf = report(0x14, 0x00);
        assert_eq!(decode(&buf, 0), 20.0);
        buf[0] = 0xff;
        buf[7] = 0xaa;
        assert_eq!(decode(&buf, 0), 20.0);
    }

    #[test]
    fn test_decode_matches_formula() {
        let cases = [
            (0x00, 0x00),
            (0x01, 0x01),
            (0x0c, 0x80),
            (0x7f, 0xff),
            (0x80, 0x00),
            (0xff, 0xff),
        ];
        for (hi, lo) in cases {
            let expected = f64::from(i16::from_be_bytes([hi, lo])) * 125.0 / 32000.0;
            assert_eq!(decode(&report(hi, lo), 0), expected as f32);
        }
    }

    #[test]
    fn test_decode_negative_temperature() {
        // 0xfb00 = -1280 counts
        assert_eq!(decode(&report(0xfb, 0x00), 0), -5.0);
    }

    #[test]
    fn test_calibration_offset_is_additive() {
        let buf = report(0x0c, 0x80);
        let base = decode(&buf, 0);
        for offset in [-512, -1, 1, 256, 1000] {
            let shifted = decode(&buf, offset);
            assert_eq!(shifted - base, (f64::from(offset) * CELSIUS_PER_COUNT) as f32);
        }
    }

    #[test]
    fn test_decode_extreme_offset_does_not_overflow() {
        let value = decode(&report(0x7f, 0xff), i32::MAX);
        assert!(value.is_finite());
        assert!(value > 0.0);
    }
}

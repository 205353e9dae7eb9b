//! Frame layout and byte-order handling.
//!
//! A raw frame from an array head is exactly 16 bytes: eight little-endian
//! 16-bit fields. Field 0 is the reference/supply reading; fields 1-7 are
//! the seven proximity sensor readings, in physical wiring order.
//!
//! All byte-order logic lives in this module as an explicit
//! serialize/deserialize pair ([`Frame::decode`] / [`Frame::encode`]) so the
//! rest of the crate works with typed values.

use serde::{Deserialize, Serialize};

/// Size of one raw frame in bytes (8 fields x 2 bytes).
pub const FRAME_LEN: usize = 16;

/// Number of proximity sensors per source (reference field excluded).
pub const SENSOR_COUNT: usize = 7;

/// Full-scale value of the 12-bit array-head ADC.
const ADC_FULL_SCALE: u16 = 4095;

/// A decoded sensor frame from one source.
///
/// `vref` is the reference/supply reading from field 0; `sensors` holds the
/// seven raw readings from fields 1-7 in physical order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub vref: u16,
    pub sensors: [u16; SENSOR_COUNT],
}

impl Frame {
    /// Decode a frame from raw bytes (LSB first per field).
    ///
    /// A slice shorter than [`FRAME_LEN`] is zero-filled past its end; bytes
    /// beyond the first 16 are ignored.
    pub fn decode(bytes: &[u8]) -> Self {
        let mut raw = [0u8; FRAME_LEN];
        let n = bytes.len().min(FRAME_LEN);
        raw[..n].copy_from_slice(&bytes[..n]);

        let field = |i: usize| u16::from_le_bytes([raw[2 * i], raw[2 * i + 1]]);

        let mut sensors = [0u16; SENSOR_COUNT];
        for (i, s) in sensors.iter_mut().enumerate() {
            *s = field(i + 1);
        }
        Frame {
            vref: field(0),
            sensors,
        }
    }

    /// Encode the full frame, reference field included, into `out`.
    pub fn encode(&self, out: &mut [u8; FRAME_LEN]) {
        out[..2].copy_from_slice(&self.vref.to_le_bytes());
        encode_sensors(&self.sensors, out);
    }
}

/// Encode seven sensor values into byte positions 2..16 of a raw frame,
/// leaving the reference field (bytes 0..2) untouched.
pub fn encode_sensors(sensors: &[u16; SENSOR_COUNT], out: &mut [u8; FRAME_LEN]) {
    for (i, s) in sensors.iter().enumerate() {
        let off = 2 * (i + 1);
        out[off..off + 2].copy_from_slice(&s.to_le_bytes());
    }
}

/// Convert a raw ADC sample to a voltage, given the reference voltage.
///
/// Assumes the 12-bit range 0-4095: `raw * vref / 4095`.
pub fn to_voltage(raw: u16, vref: f32) -> f32 {
    (raw as f32 * vref) / ADC_FULL_SCALE as f32
}

//! Table driven decoding of response frames into [`Telemetry`].
//!
//! Every device variant describes its response layout as a [`Layout`]: a list of
//! fields read from fixed big-endian offsets, followed by fields derived from
//! the ones already decoded.

use crate::telemetry::{Telemetry, Value};

/// How the raw bytes of a field are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Unsigned,
    /// Two's complement, for fields carrying a direction such as current flow.
    Signed,
    /// Top bit is the sign, the remaining bits the magnitude.
    SignMagnitude,
}

/// A field read directly from the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Field {
    pub name: &'static str,
    pub offset: usize,
    pub width: usize,
    pub encoding: Encoding,
    /// Fixed point divisor. Unscaled fields are reported as integers.
    pub scale: Option<f64>,
    /// Offset of a byte which, when zero, forces the field to zero.
    pub valid_if: Option<usize>,
}

impl Field {
    pub const fn unsigned(name: &'static str, offset: usize, width: usize) -> Self {
        Self { name, offset, width, encoding: Encoding::Unsigned, scale: None, valid_if: None }
    }

    pub const fn signed(name: &'static str, offset: usize, width: usize) -> Self {
        Self { name, offset, width, encoding: Encoding::Signed, scale: None, valid_if: None }
    }

    pub const fn sign_magnitude(name: &'static str, offset: usize, width: usize) -> Self {
        Self { name, offset, width, encoding: Encoding::SignMagnitude, scale: None, valid_if: None }
    }

    pub const fn scaled(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    pub const fn valid_if(mut self, offset: usize) -> Self {
        self.valid_if = Some(offset);
        self
    }

    fn decode(&self, frame: &[u8]) -> Value {
        let present = self
            .valid_if
            .map_or(true, |offset| read_unsigned(frame, offset, 1) != 0);

        let raw = if present {
            match self.encoding {
                Encoding::Unsigned => read_unsigned(frame, self.offset, self.width) as i64,
                Encoding::Signed => read_signed(frame, self.offset, self.width),
                Encoding::SignMagnitude => read_sign_magnitude(frame, self.offset, self.width),
            }
        } else {
            0
        };

        match self.scale {
            Some(scale) => Value::Float(round2(raw as f64 * scale)),
            None => Value::Int(raw),
        }
    }
}

/// A field computed from two already decoded fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Derived {
    pub name: &'static str,
    pub left: &'static str,
    pub right: &'static str,
}

impl Derived {
    /// `left × right`, rounded to two decimal places.
    pub const fn product(name: &'static str, left: &'static str, right: &'static str) -> Self {
        Self { name, left, right }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Layout {
    pub fields: &'static [Field],
    pub derived: &'static [Derived],
}

impl Layout {
    /// Decode `frame` according to this layout. Reads past the end of the frame
    /// yield zero rather than failing.
    pub fn decode(&self, frame: &[u8]) -> Telemetry {
        let mut telemetry = Telemetry::new();
        for field in self.fields {
            telemetry.insert(field.name, field.decode(frame));
        }
        for derived in self.derived {
            let left = telemetry.float(derived.left).unwrap_or_default();
            let right = telemetry.float(derived.right).unwrap_or_default();
            telemetry.insert(derived.name, Value::Float(round2(left * right)));
        }
        telemetry
    }
}

/// Big-endian unsigned integer of `width` bytes at `offset`.
pub fn read_unsigned(frame: &[u8], offset: usize, width: usize) -> u64 {
    let Some(bytes) = frame.get(offset..offset + width) else {
        return 0;
    };
    if width == 0 || width > 8 {
        return 0;
    }
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

/// Big-endian two's complement integer of `width` bytes at `offset`.
pub fn read_signed(frame: &[u8], offset: usize, width: usize) -> i64 {
    let raw = read_unsigned(frame, offset, width);
    if width == 0 || width > 8 {
        return 0;
    }
    let shift = 64 - 8 * width as u32;
    ((raw << shift) as i64) >> shift
}

/// Big-endian sign-magnitude integer of `width` bytes at `offset`.
pub fn read_sign_magnitude(frame: &[u8], offset: usize, width: usize) -> i64 {
    let raw = read_unsigned(frame, offset, width);
    if width == 0 || width > 8 {
        return 0;
    }
    let sign_bit = 1u64 << (8 * width as u32 - 1);
    let magnitude = (raw & (sign_bit - 1)) as i64;
    if raw & sign_bit != 0 {
        -magnitude
    } else {
        magnitude
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

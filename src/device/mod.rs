pub mod controller;
pub mod shunt;

use serde::Deserialize;

use crate::parser::Layout;
use crate::telemetry::Telemetry;

/// How the length of a section's reply relates to its word count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Unsolicited notifications whose length is the section's word count.
    Notify,
    /// Function 3 replies: three header bytes, two bytes per word and a CRC.
    ModbusRead,
}

/// A register range polled as one unit, together with the layout used to
/// decode its reply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Section {
    pub register: u16,
    pub word_count: u16,
    pub layout: &'static Layout,
}

impl Section {
    pub const fn new(register: u16, word_count: u16, layout: &'static Layout) -> Self {
        Self { register, word_count, layout }
    }

    pub fn expected_len(&self, framing: Framing) -> usize {
        match framing {
            Framing::Notify => self.word_count as usize,
            Framing::ModbusRead => self.word_count as usize * 2 + 5,
        }
    }

    /// Whether `frame` has the length this section's reply must have.
    pub fn accepts(&self, frame: &[u8], framing: Framing) -> bool {
        frame.len() == self.expected_len(framing)
    }

    pub fn parse(&self, frame: &[u8]) -> Telemetry {
        self.layout.decode(frame)
    }
}

/// The kinds of peripheral a client can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum DeviceVariant {
    #[serde(rename = "RNG_SHNT")]
    SmartShunt,
    #[serde(rename = "RNG_CTRL")]
    ChargeController,
}

impl DeviceVariant {
    pub fn sections(&self) -> &'static [Section] {
        match self {
            DeviceVariant::SmartShunt => shunt::SECTIONS,
            DeviceVariant::ChargeController => controller::SECTIONS,
        }
    }

    pub fn framing(&self) -> Framing {
        match self {
            DeviceVariant::SmartShunt => shunt::FRAMING,
            DeviceVariant::ChargeController => controller::FRAMING,
        }
    }

    /// Extra operation code the device uses for read data, besides function 3.
    pub fn notify_operation(&self) -> Option<u8> {
        match self {
            DeviceVariant::SmartShunt => Some(shunt::NOTIFY_OPERATION),
            DeviceVariant::ChargeController => None,
        }
    }

    /// Whether read requests have to be written to get data back.
    pub fn solicited(&self) -> bool {
        matches!(self.framing(), Framing::ModbusRead)
    }

    /// Alias prefixes of devices of this kind, used to suggest candidates when
    /// the configured device can't be found.
    pub fn alias_prefixes(&self) -> &'static [&'static str] {
        match self {
            DeviceVariant::SmartShunt => shunt::ALIAS_PREFIXES,
            DeviceVariant::ChargeController => controller::ALIAS_PREFIXES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_len() {
        let section = DeviceVariant::ChargeController.sections()[1];
        assert_eq!(section.expected_len(Framing::ModbusRead), 73);
        assert_eq!(section.expected_len(Framing::Notify), 34);
    }

    #[test]
    fn test_variant_deserialize() {
        let variant: DeviceVariant = serde_json::from_str(r#""RNG_SHNT""#).unwrap();
        assert_eq!(variant, DeviceVariant::SmartShunt);
        assert!(!variant.solicited());
        assert!(DeviceVariant::ChargeController.solicited());
    }
}

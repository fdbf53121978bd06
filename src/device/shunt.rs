//! Renogy smart shunt (RMTShunt300 / Shunt300).
//!
//! The shunt streams its whole state as unsolicited notifications with
//! operation 0x57. Each notification is 110 bytes long; nothing has to be
//! written to the device to receive them.

use crate::parser::{Derived, Field, Layout};

use super::{Framing, Section};

pub(crate) const NOTIFY_OPERATION: u8 = 0x57;

pub(crate) const ALIAS_PREFIXES: &[&str] = &["RMTShunt300", "Shunt300"];

const FIELDS: &[Field] = &[
    Field::unsigned("charge_battery_voltage", 25, 3).scaled(0.001),
    Field::unsigned("stater_battery_voltage", 30, 2).scaled(0.001),
    Field::signed("discharge_amps", 21, 3).scaled(0.001),
    Field::unsigned("temperature_sensor_1", 66, 3).scaled(0.001).valid_if(67),
    Field::unsigned("temperature_sensor_2", 70, 3).scaled(0.001).valid_if(71),
];

const DERIVED: &[Derived] =
    &[Derived::product("discharge_watts", "charge_battery_voltage", "discharge_amps")];

pub(crate) const SHUNT_INFO: Layout = Layout { fields: FIELDS, derived: DERIVED };

pub(crate) const SECTIONS: &[Section] = &[Section::new(256, 110, &SHUNT_INFO)];

pub(crate) const FRAMING: Framing = Framing::Notify;

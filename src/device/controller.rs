//! Renogy Rover / Wanderer / Adventurer charge controllers behind a BT-1 or
//! BT-2 module.
//!
//! Registers are read with function 3 one section at a time. Replies carry
//! `id, 3, byte count`, two bytes per requested word and a CRC, so the field
//! offsets below include the three header bytes.

use crate::parser::{Field, Layout};

use super::{Framing, Section};

pub(crate) const ALIAS_PREFIXES: &[&str] = &["BT-TH", "RNGRBP"];

/// Register of the load switch, written with function 6.
pub const LOAD_REGISTER: u16 = 266;

const DEVICE_ADDRESS: Layout = Layout {
    fields: &[Field::unsigned("device_id", 4, 1)],
    derived: &[],
};

const CHARGING_INFO: Layout = Layout {
    fields: &[
        Field::unsigned("battery_percentage", 3, 2),
        Field::unsigned("battery_voltage", 5, 2).scaled(0.1),
        Field::unsigned("battery_current", 7, 2).scaled(0.01),
        Field::sign_magnitude("controller_temperature", 9, 1),
        Field::sign_magnitude("battery_temperature", 10, 1),
        Field::unsigned("load_voltage", 11, 2).scaled(0.1),
        Field::unsigned("load_current", 13, 2).scaled(0.01),
        Field::unsigned("load_power", 15, 2),
        Field::unsigned("pv_voltage", 17, 2).scaled(0.1),
        Field::unsigned("pv_current", 19, 2).scaled(0.01),
        Field::unsigned("pv_power", 21, 2),
        Field::unsigned("max_charging_power_today", 33, 2),
        Field::unsigned("max_discharging_power_today", 35, 2),
        Field::unsigned("charging_amp_hours_today", 37, 2),
        Field::unsigned("discharging_amp_hours_today", 39, 2),
        Field::unsigned("power_generation_today", 41, 2),
        Field::unsigned("power_consumption_today", 43, 2),
        Field::unsigned("power_generation_total", 59, 4),
        Field::unsigned("charging_status", 68, 1),
    ],
    derived: &[],
};

const BATTERY_TYPE: Layout = Layout {
    fields: &[Field::unsigned("battery_type", 3, 2)],
    derived: &[],
};

pub(crate) const SECTIONS: &[Section] = &[
    Section::new(26, 1, &DEVICE_ADDRESS),
    Section::new(256, 34, &CHARGING_INFO),
    Section::new(57348, 1, &BATTERY_TYPE),
];

pub(crate) const FRAMING: Framing = Framing::ModbusRead;

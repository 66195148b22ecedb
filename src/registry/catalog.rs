//! Built-in parameter catalog for the Fighter-series pump this RCU model was
//! developed against.
//!
//! The catalog covers the parameter indices the master is known to broadcast
//! in its polling cycle. A loaded configuration document replaces this
//! catalog wholesale; the two are never merged, so the document stays
//! authoritative for registers that double as bitfield carriers.

use super::{BitfieldDef, ParamDef, ParamRegistry};
use crate::constants::DEFAULT_FALLBACK_WIDTH;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared instance of the built-in catalog.
pub static DEFAULT_REGISTRY: Lazy<Arc<ParamRegistry>> =
    Lazy::new(|| Arc::new(default_registry()));

/// Builds the built-in catalog.
pub fn default_registry() -> ParamRegistry {
    let mut defs = vec![
        ParamDef::numeric(0x00, "CPU ID", 1, 1.0, ""),
        ParamDef::numeric(0x01, "Outdoor Temperature", 2, 10.0, "\u{b0}C"),
        ParamDef::numeric(0x02, "Hot Water Temperature", 2, 10.0, "\u{b0}C"),
        ParamDef::numeric(0x03, "Exhaust Air Temperature", 2, 10.0, "\u{b0}C"),
        ParamDef::numeric(0x04, "Extract Air Temperature", 2, 10.0, "\u{b0}C"),
        ParamDef::numeric(0x05, "Evaporator Temperature", 2, 10.0, "\u{b0}C"),
        ParamDef::numeric(0x06, "Supply Temperature", 2, 10.0, "\u{b0}C"),
        ParamDef::numeric(0x07, "Return Temperature", 2, 10.0, "\u{b0}C"),
        ParamDef::numeric(0x08, "Compressor Temperature", 2, 10.0, "\u{b0}C"),
        ParamDef::numeric(0x09, "Electric Heater Temperature", 2, 10.0, "\u{b0}C"),
    ];

    let mut slope = ParamDef::numeric(0x0B, "Heat Curve Slope", 1, 1.0, "");
    slope.writable = true;
    slope.menu = Some("heating".into());
    slope.min = Some(0);
    slope.max = Some(15);
    slope.step = Some(1);
    defs.push(slope);

    let mut offset = ParamDef::numeric(0x0C, "Heat Curve Offset", 1, 1.0, "\u{b0}C");
    offset.writable = true;
    offset.menu = Some("heating".into());
    offset.min = Some(-10);
    offset.max = Some(10);
    offset.step = Some(1);
    defs.push(offset);

    // Status registers. These carry packed flags, not scaled numbers; the
    // factor is ignored for them.
    let mut relays = ParamDef::numeric(0x13, "Relay Status", 1, 1.0, "");
    relays.bitfields = vec![
        flag("Kompressor", 0x02, 1),
        flag("CP1", 0x40, 2),
        flag("CP2", 0x01, 3),
    ];
    defs.push(relays);

    let mut fan = ParamDef::numeric(0x14, "Fan Status", 1, 1.0, "");
    fan.bitfields = vec![
        BitfieldDef {
            name: "Fan Speed".into(),
            mask: 0x38,
            sort_order: 1,
            value_map: Some(speed_map()),
        },
        flag("Heater", 0x04, 2),
    ];
    defs.push(fan);

    let mut alarm = ParamDef::numeric(0x16, "Alarm Status", 1, 1.0, "");
    alarm.bitfields = vec![
        flag("Sensor Fault", 0x01, 1),
        flag("High Pressure", 0x02, 2),
        flag("Low Pressure", 0x04, 3),
        flag("Motor Protection", 0x08, 4),
    ];
    defs.push(alarm);

    ParamRegistry::new(defs, DEFAULT_FALLBACK_WIDTH)
        .expect("built-in catalog must validate")
}

fn flag(name: &str, mask: u16, sort_order: u32) -> BitfieldDef {
    BitfieldDef {
        name: name.to_string(),
        mask,
        sort_order,
        value_map: None,
    }
}

fn speed_map() -> BTreeMap<u32, String> {
    [(0, "Off"), (1, "Low"), (2, "Medium"), (3, "High")]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_validates() {
        let reg = default_registry();
        assert!(reg.len() >= 15);
        assert_eq!(reg.size(0x01), Some(2));
        assert_eq!(reg.size(0x0B), Some(1));
        assert!(reg.writable(0x0B));
        assert!(!reg.writable(0x01));
        assert_eq!(reg.bitfields(0x13).len(), 3);
    }

    #[test]
    fn unknown_index_uses_fallback_width() {
        let reg = default_registry();
        assert_eq!(reg.size(0x7F), None);
        assert_eq!(reg.width_or_fallback(0x7F), 2);
    }
}

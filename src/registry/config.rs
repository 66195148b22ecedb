//! Parameter configuration document.
//!
//! A human-editable JSON document describing one or more pump profiles: the
//! link bytes the protocol uses on that model and the register catalog with
//! optional bitfield descriptors. Loading a document replaces the built-in
//! catalog; nothing is merged, so the document is authoritative for registers
//! that double as bitfield carriers.
//!
//! ```json
//! {
//!   "fighter-360p": {
//!     "baudrate": 19200,
//!     "rcu_addr": 20,
//!     "registers": [
//!       { "index": 1, "name": "Outdoor Temperature", "size": 2,
//!         "factor": 10.0, "unit": "°C" },
//!       { "index": 19, "name": "Relay Status", "size": 1,
//!         "bit_fields": [
//!           { "name": "Kompressor", "mask": 2, "sort_order": 1 }
//!         ] }
//!     ]
//!   }
//! }
//! ```

use crate::bus::protocol::SessionConfig;
use crate::constants::*;
use crate::error::RcuError;
use crate::registry::{BitfieldDef, ParamDef, ParamRegistry};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level document: a map keyed by logical pump name.
#[derive(Debug, Deserialize)]
pub struct BusDocument {
    #[serde(flatten)]
    pub pumps: BTreeMap<String, PumpProfile>,
}

/// One pump model's link bytes and register catalog.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PumpProfile {
    #[serde(default = "d_baudrate")]
    pub baudrate: u32,
    /// Logical bits per character; only 9 (8 data + framing bit) is supported.
    #[serde(default = "d_bit_mode")]
    pub bit_mode: u8,
    /// Physical realization of the ninth bit; only "mark-space" is supported.
    #[serde(default = "d_parity")]
    pub parity: String,
    #[serde(default = "d_cmd_data")]
    pub cmd_data: u8,
    #[serde(default = "d_master_addr")]
    pub master_addr: u8,
    #[serde(default = "d_rcu_addr")]
    pub rcu_addr: u8,
    #[serde(default = "d_ack")]
    pub ack: u8,
    #[serde(default = "d_enq")]
    pub enq: u8,
    #[serde(default = "d_nak")]
    pub nak: u8,
    #[serde(default = "d_etx")]
    pub etx: u8,
    /// Width assumed for indices absent from the register list.
    #[serde(default = "d_fallback_width")]
    pub fallback_width: u8,
    #[serde(default)]
    pub registers: Vec<RegisterEntry>,
}

/// One register entry of a pump profile.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterEntry {
    pub index: u8,
    pub name: String,
    #[serde(default = "d_size")]
    pub size: u8,
    #[serde(default = "d_factor")]
    pub factor: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub writable: bool,
    #[serde(default)]
    pub menu: Option<String>,
    #[serde(default)]
    pub min: Option<i32>,
    #[serde(default)]
    pub max: Option<i32>,
    #[serde(default)]
    pub step: Option<i32>,
    #[serde(default)]
    pub bit_fields: Vec<BitFieldEntry>,
}

/// Bitfield descriptor nested under a register entry.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BitFieldEntry {
    pub name: String,
    pub mask: u16,
    pub sort_order: u32,
    /// JSON object keys are strings; parsed to integers at validation.
    #[serde(default)]
    pub value_map: Option<BTreeMap<String, String>>,
}

fn d_baudrate() -> u32 {
    DEFAULT_BAUDRATE
}
fn d_bit_mode() -> u8 {
    9
}
fn d_parity() -> String {
    "mark-space".to_string()
}
fn d_cmd_data() -> u8 {
    CMD_DATA
}
fn d_master_addr() -> u8 {
    MASTER_ADDR
}
fn d_rcu_addr() -> u8 {
    RCU_ADDR
}
fn d_ack() -> u8 {
    ACK
}
fn d_enq() -> u8 {
    ENQ
}
fn d_nak() -> u8 {
    NAK
}
fn d_etx() -> u8 {
    ETX
}
fn d_fallback_width() -> u8 {
    DEFAULT_FALLBACK_WIDTH
}
fn d_size() -> u8 {
    2
}
fn d_factor() -> f64 {
    1.0
}

/// Loads and parses a configuration document from disk.
pub fn load_document(path: &Path) -> Result<BusDocument, RcuError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| RcuError::Config(format!("cannot read {}: {e}", path.display())))?;
    parse_document(&text)
}

/// Parses a configuration document from a string.
pub fn parse_document(text: &str) -> Result<BusDocument, RcuError> {
    serde_json::from_str(text).map_err(|e| RcuError::Config(e.to_string()))
}

impl BusDocument {
    /// Looks up a pump profile by name.
    pub fn profile(&self, name: &str) -> Result<&PumpProfile, RcuError> {
        self.pumps
            .get(name)
            .ok_or_else(|| RcuError::Config(format!("no pump profile named '{name}'")))
    }
}

impl PumpProfile {
    /// Validates the profile and builds its parameter registry.
    pub fn registry(&self) -> Result<ParamRegistry, RcuError> {
        if self.bit_mode != 9 {
            return Err(RcuError::Config(format!(
                "unsupported bit_mode {}; only 9 is supported",
                self.bit_mode
            )));
        }
        if self.parity != "mark-space" {
            return Err(RcuError::Config(format!(
                "unsupported parity '{}'; only 'mark-space' is supported",
                self.parity
            )));
        }

        let mut defs = Vec::with_capacity(self.registers.len());
        for entry in &self.registers {
            defs.push(entry.to_def()?);
        }
        ParamRegistry::new(defs, self.fallback_width)
    }

    /// Session configuration with this profile's link bytes and addresses.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            rcu_addr: self.rcu_addr,
            master_addr: self.master_addr,
            cmd_data: self.cmd_data,
            ack: self.ack,
            enq: self.enq,
            nak: self.nak,
            etx: self.etx,
            ..SessionConfig::default()
        }
    }
}

impl RegisterEntry {
    fn to_def(&self) -> Result<ParamDef, RcuError> {
        let mut bitfields = Vec::with_capacity(self.bit_fields.len());
        for bf in &self.bit_fields {
            bitfields.push(bf.to_def(self.index)?);
        }
        Ok(ParamDef {
            index: self.index,
            name: self.name.clone(),
            size: self.size,
            factor: self.factor,
            unit: self.unit.clone(),
            writable: self.writable,
            menu: self.menu.clone(),
            min: self.min,
            max: self.max,
            step: self.step,
            bitfields,
        })
    }
}

impl BitFieldEntry {
    fn to_def(&self, index: u8) -> Result<BitfieldDef, RcuError> {
        let value_map = match &self.value_map {
            None => None,
            Some(raw) => {
                let mut map = BTreeMap::new();
                for (key, label) in raw {
                    let parsed = parse_map_key(key).ok_or_else(|| {
                        RcuError::Config(format!(
                            "register {index:#04X} bitfield '{}': value_map key '{key}' \
                             is not a non-negative integer",
                            self.name
                        ))
                    })?;
                    map.insert(parsed, label.clone());
                }
                Some(map)
            }
        };
        Ok(BitfieldDef {
            name: self.name.clone(),
            mask: self.mask,
            sort_order: self.sort_order,
            value_map,
        })
    }
}

/// Accepts decimal or 0x-prefixed hex keys.
fn parse_map_key(key: &str) -> Option<u32> {
    if let Some(hex) = key.strip_prefix("0x").or_else(|| key.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        key.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "fighter-360p": {
            "registers": [
                { "index": 1, "name": "Outdoor Temperature", "size": 2,
                  "factor": 10.0, "unit": "°C" },
                { "index": 11, "name": "Heat Curve Slope", "size": 1,
                  "writable": true, "min": 0, "max": 15 },
                { "index": 19, "name": "Relay Status", "size": 1,
                  "bit_fields": [
                      { "name": "Kompressor", "mask": 2, "sort_order": 1 },
                      { "name": "Fan Speed", "mask": 56, "sort_order": 2,
                        "value_map": { "0": "Off", "1": "Low", "2": "Medium", "3": "High" } }
                  ] }
            ]
        }
    }"#;

    #[test]
    fn parses_and_builds_registry() {
        let doc = parse_document(DOC).unwrap();
        let profile = doc.profile("fighter-360p").unwrap();
        assert_eq!(profile.rcu_addr, 0x14);
        let reg = profile.registry().unwrap();
        assert_eq!(reg.size(0x01), Some(2));
        assert!(reg.writable(0x0B));
        assert_eq!(reg.bitfields(0x13).len(), 2);
        let map = reg.bitfields(0x13)[1].value_map.as_ref().unwrap();
        assert_eq!(map.get(&3).map(String::as_str), Some("High"));
    }

    #[test]
    fn unknown_profile_is_a_config_error() {
        let doc = parse_document(DOC).unwrap();
        assert!(matches!(
            doc.profile("fighter-2005"),
            Err(RcuError::Config(_))
        ));
    }

    #[test]
    fn typo_in_entry_is_rejected() {
        let text = r#"{ "p": { "registers": [
            { "index": 1, "name": "X", "sise": 2 }
        ] } }"#;
        assert!(parse_document(text).is_err());
    }

    #[test]
    fn bad_value_map_key_is_a_config_error() {
        let text = r#"{ "p": { "registers": [
            { "index": 19, "name": "S", "size": 1, "bit_fields": [
                { "name": "F", "mask": 3, "sort_order": 1,
                  "value_map": { "off": "Off" } }
            ] }
        ] } }"#;
        let doc = parse_document(text).unwrap();
        assert!(doc.profile("p").unwrap().registry().is_err());
    }
}

//! # Parameter Registry
//!
//! The registry is the immutable catalog mapping a one-byte parameter index to
//! its name, byte width, scaling factor, unit, writability, and optional
//! bitfield decomposition. It is built once (from the built-in catalog or a
//! configuration document) and handed to the other components by reference.
//!
//! Value projection is a pure function of `(raw integer, definition)`:
//!
//! - a definition with bitfields yields one decoded value per bitfield,
//!   `(raw & mask) >> mask.trailing_zeros()`, ordered by `sort_order`;
//! - anything else is interpreted as two's complement at the declared width
//!   and divided by the scaling factor.

pub mod catalog;
pub mod config;

pub use catalog::{default_registry, DEFAULT_REGISTRY};

use crate::error::RcuError;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// A named sub-region of a register's raw integer.
#[derive(Debug, Clone)]
pub struct BitfieldDef {
    pub name: String,
    /// Non-zero mask selecting the bits; must fit in `size * 8` bits.
    pub mask: u16,
    /// Display order of the projected value, independent of the mask.
    pub sort_order: u32,
    /// Optional mapping from the projected integer to a label.
    pub value_map: Option<BTreeMap<u32, String>>,
}

impl BitfieldDef {
    /// Projects the bitfield out of a raw register value.
    pub fn project(&self, raw: u16) -> u32 {
        ((raw & self.mask) >> self.mask.trailing_zeros()) as u32
    }
}

/// Immutable definition of one pump parameter.
#[derive(Debug, Clone)]
pub struct ParamDef {
    pub index: u8,
    pub name: String,
    /// Byte width on the wire: 1 or 2.
    pub size: u8,
    /// Division factor applied to the signed raw value. Ignored when
    /// bitfields are present.
    pub factor: f64,
    pub unit: String,
    pub writable: bool,
    /// Menu the parameter appears under on the pump's own display, if known.
    pub menu: Option<String>,
    pub min: Option<i32>,
    pub max: Option<i32>,
    pub step: Option<i32>,
    pub bitfields: Vec<BitfieldDef>,
}

impl ParamDef {
    /// A plain numeric read-only parameter.
    pub fn numeric(index: u8, name: &str, size: u8, factor: f64, unit: &str) -> Self {
        ParamDef {
            index,
            name: name.to_string(),
            size,
            factor,
            unit: unit.to_string(),
            writable: false,
            menu: None,
            min: None,
            max: None,
            step: None,
            bitfields: Vec::new(),
        }
    }

    /// The accepted write range: the declared (min, max), or the full signed
    /// range of the declared width when none is given.
    pub fn write_range(&self) -> (i32, i32) {
        let (lo, hi) = signed_range(self.size);
        (self.min.unwrap_or(lo), self.max.unwrap_or(hi))
    }
}

/// Full signed two's-complement range for a 1- or 2-byte parameter.
pub fn signed_range(size: u8) -> (i32, i32) {
    match size {
        1 => (i8::MIN as i32, i8::MAX as i32),
        _ => (i16::MIN as i32, i16::MAX as i32),
    }
}

/// Sign-extends a big-endian raw register value at the given width.
pub fn sign_extend(raw: u16, size: u8) -> i32 {
    match size {
        1 => raw as u8 as i8 as i32,
        _ => raw as i16 as i32,
    }
}

/// A decoded engineering value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DecodedValue {
    Integer(i64),
    /// Scaled value with its unit.
    Real(f64, String),
    /// Bitfield projection with its mapped label, when one is declared.
    Enumerated(u32, Option<String>),
    Boolean(bool),
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedValue::Integer(v) => write!(f, "{v}"),
            DecodedValue::Real(v, unit) if unit.is_empty() => write!(f, "{v:.1}"),
            DecodedValue::Real(v, unit) => write!(f, "{v:.1} {unit}"),
            DecodedValue::Enumerated(v, Some(label)) => write!(f, "{label} ({v})"),
            DecodedValue::Enumerated(v, None) => write!(f, "{v}"),
            DecodedValue::Boolean(true) => write!(f, "ON"),
            DecodedValue::Boolean(false) => write!(f, "OFF"),
        }
    }
}

/// Projects a raw register value into decoded form.
///
/// Returns `(bitfield name, value)` pairs sorted by `sort_order` for bitfield
/// carriers, or a single `(None, value)` pair otherwise.
pub fn project(def: &ParamDef, raw: u16) -> Vec<(Option<String>, DecodedValue)> {
    if def.bitfields.is_empty() {
        let signed = sign_extend(raw, def.size);
        let value = if def.factor > 1.0 {
            DecodedValue::Real(signed as f64 / def.factor, def.unit.clone())
        } else {
            DecodedValue::Integer(signed as i64)
        };
        return vec![(None, value)];
    }

    let mut fields: Vec<&BitfieldDef> = def.bitfields.iter().collect();
    fields.sort_by_key(|b| b.sort_order);

    fields
        .into_iter()
        .map(|b| {
            let v = b.project(raw);
            let value = match &b.value_map {
                Some(map) => DecodedValue::Enumerated(v, map.get(&v).cloned()),
                None if b.mask.count_ones() == 1 => DecodedValue::Boolean(v != 0),
                None => DecodedValue::Integer(v as i64),
            };
            (Some(b.name.clone()), value)
        })
        .collect()
}

/// The process-wide parameter catalog. Lookups are O(1) by index.
#[derive(Debug, Clone)]
pub struct ParamRegistry {
    params: HashMap<u8, ParamDef>,
    fallback_width: u8,
}

impl ParamRegistry {
    /// Builds a registry from a list of definitions, enforcing the load-time
    /// validation rules.
    pub fn new(defs: Vec<ParamDef>, fallback_width: u8) -> Result<Self, RcuError> {
        if !matches!(fallback_width, 1 | 2) {
            return Err(RcuError::Config(format!(
                "fallback width must be 1 or 2, got {fallback_width}"
            )));
        }

        let mut params = HashMap::with_capacity(defs.len());
        for mut def in defs {
            validate_def(&def)?;
            if def.writable && def.min.is_none() && def.max.is_none() {
                let (lo, hi) = signed_range(def.size);
                def.min = Some(lo);
                def.max = Some(hi);
            }
            let index = def.index;
            if params.insert(index, def).is_some() {
                return Err(RcuError::Config(format!(
                    "duplicate parameter index {index:#04X} in catalog"
                )));
            }
        }

        Ok(ParamRegistry {
            params,
            fallback_width,
        })
    }

    /// Declared byte width for an index, if known.
    pub fn size(&self, index: u8) -> Option<u8> {
        self.params.get(&index).map(|d| d.size)
    }

    /// Declared width, or the configured fallback for unknown indices.
    pub fn width_or_fallback(&self, index: u8) -> u8 {
        self.size(index).unwrap_or(self.fallback_width)
    }

    pub fn definition(&self, index: u8) -> Option<&ParamDef> {
        self.params.get(&index)
    }

    pub fn writable(&self, index: u8) -> bool {
        self.params.get(&index).map(|d| d.writable).unwrap_or(false)
    }

    pub fn bitfields(&self, index: u8) -> &[BitfieldDef] {
        self.params
            .get(&index)
            .map(|d| d.bitfields.as_slice())
            .unwrap_or(&[])
    }

    pub fn fallback_width(&self) -> u8 {
        self.fallback_width
    }

    /// All declared indices, ascending. Used as the default expected set for
    /// one-shot reads.
    pub fn indices(&self) -> Vec<u8> {
        let mut v: Vec<u8> = self.params.keys().copied().collect();
        v.sort_unstable();
        v
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

fn validate_def(def: &ParamDef) -> Result<(), RcuError> {
    if !matches!(def.size, 1 | 2) {
        return Err(RcuError::Config(format!(
            "parameter {:#04X}: size must be 1 or 2, got {}",
            def.index, def.size
        )));
    }
    if def.factor <= 0.0 {
        return Err(RcuError::Config(format!(
            "parameter {:#04X}: factor must be positive",
            def.index
        )));
    }
    let max_mask: u32 = (1u32 << (def.size as u32 * 8)) - 1;
    for bf in &def.bitfields {
        if bf.mask == 0 {
            return Err(RcuError::Config(format!(
                "parameter {:#04X}: bitfield '{}' has a zero mask",
                def.index, bf.name
            )));
        }
        if bf.mask as u32 > max_mask {
            return Err(RcuError::Config(format!(
                "parameter {:#04X}: bitfield '{}' mask {:#06X} exceeds {} bits",
                def.index,
                bf.name,
                bf.mask,
                def.size * 8
            )));
        }
    }
    Ok(())
}

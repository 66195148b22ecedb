//! # Value Store
//!
//! Thread-safe mapping from parameter index (and bitfield name) to the last
//! observed decoded value. Writes originate from the session worker; reads
//! from the facade. Last write wins, snapshots are coherent copies, and the
//! set of observed indices backs the collection-complete predicate. Deletion
//! is not supported.

use crate::bus::frame::DataPacket;
use crate::registry::{project, DecodedValue, ParamRegistry};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use tokio::sync::Notify;

/// Key of one stored value: a whole parameter, or one projected bitfield.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ValueKey {
    Param(u8),
    Bitfield(u8, String),
}

/// A stored value with its optional warning annotation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredValue {
    pub value: DecodedValue,
    /// Set when the value was decoded at the fallback width because the
    /// index is not in the registry.
    pub warning: Option<String>,
}

#[derive(Default)]
struct StoreInner {
    values: BTreeMap<ValueKey, StoredValue>,
    observed: BTreeSet<u8>,
}

/// The per-session value store.
#[derive(Default)]
pub struct ValueStore {
    inner: Mutex<StoreInner>,
    changed: Notify,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one decoded packet. Returns the updates in decode order for
    /// callback delivery.
    pub fn record_packet(
        &self,
        packet: &DataPacket,
        registry: &ParamRegistry,
    ) -> Vec<(ValueKey, StoredValue)> {
        let mut updates = Vec::new();
        for record in &packet.records {
            match registry.definition(record.index) {
                Some(def) => {
                    for (bitfield, value) in project(def, record.raw) {
                        let key = match bitfield {
                            Some(name) => ValueKey::Bitfield(record.index, name),
                            None => ValueKey::Param(record.index),
                        };
                        updates.push((
                            key,
                            StoredValue {
                                value,
                                warning: None,
                            },
                        ));
                    }
                }
                None => {
                    // Width was the configured fallback; keep the raw
                    // unsigned value and flag it.
                    updates.push((
                        ValueKey::Param(record.index),
                        StoredValue {
                            value: DecodedValue::Integer(record.raw as i64),
                            warning: Some(format!(
                                "unknown parameter {:#04X}, fallback width {}",
                                record.index, record.width
                            )),
                        },
                    ));
                }
            }
        }

        {
            let mut inner = self.inner.lock().unwrap();
            for record in &packet.records {
                inner.observed.insert(record.index);
            }
            for (key, value) in &updates {
                inner.values.insert(key.clone(), value.clone());
            }
        }
        self.changed.notify_waiters();
        updates
    }

    pub fn get(&self, index: u8) -> Option<StoredValue> {
        self.inner
            .lock()
            .unwrap()
            .values
            .get(&ValueKey::Param(index))
            .cloned()
    }

    pub fn get_bitfield(&self, index: u8, name: &str) -> Option<StoredValue> {
        self.inner
            .lock()
            .unwrap()
            .values
            .get(&ValueKey::Bitfield(index, name.to_string()))
            .cloned()
    }

    /// Coherent copy of everything observed so far.
    pub fn snapshot(&self) -> BTreeMap<ValueKey, StoredValue> {
        self.inner.lock().unwrap().values.clone()
    }

    /// Indices whose full value has been observed at least once.
    pub fn observed(&self) -> BTreeSet<u8> {
        self.inner.lock().unwrap().observed.clone()
    }

    /// The collection-complete predicate for one-shot reads.
    pub fn is_complete(&self, expected: &[u8]) -> bool {
        let inner = self.inner.lock().unwrap();
        expected.iter().all(|idx| inner.observed.contains(idx))
    }

    /// Resolves once every expected index has been observed.
    pub async fn wait_complete(&self, expected: &[u8]) {
        loop {
            let notified = self.changed.notified();
            if self.is_complete(expected) {
                return;
            }
            notified.await;
        }
    }
}

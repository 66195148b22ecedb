//! # rcu-rs - Room Control Unit Emulator for Heat-Pump Serial Buses
//!
//! The rcu-rs crate emulates the Room Control Unit (RCU) accessory of an
//! older-generation residential heat pump on its two-wire differential serial
//! bus. The pump's controller is the bus master; the RCU is a passive slave
//! that answers address polls, acknowledges data packets, decodes parameter
//! telegrams into engineering values, and can originate write requests for
//! named parameters.
//!
//! ## Features
//!
//! - 9-bit framed serial transport: the address/data distinction is carried
//!   by a ninth bit, physically produced through parity manipulation
//! - Stateless packet codec with XOR checksum discipline
//! - Parameter registry with scaling, units, writability, and bitfield
//!   decomposition, loadable from a human-editable configuration document
//! - Event-driven session state machine covering the poll/ACK/ENQ/ETX cycle
//!   and the write handshake, testable from recorded byte streams
//! - Thread-safe value store with a collection-complete predicate for
//!   one-shot reads
//! - Support for logging and error handling
//!
//! ## Usage
//!
//! ```no_run
//! use rcu_rs::{
//!     LinkConfig, RcuClient, RcuLinkHandle, SessionConfig, DEFAULT_REGISTRY,
//! };
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), rcu_rs::RcuError> {
//! let link = RcuLinkHandle::open("/dev/ttyUSB0", LinkConfig::default()).await?;
//! let client = RcuClient::attach(
//!     link,
//!     DEFAULT_REGISTRY.clone(),
//!     SessionConfig::default(),
//! );
//! let pass = client
//!     .run_once(&[0x01, 0x02, 0x06], Duration::from_secs(60))
//!     .await?;
//! for (key, value) in &pass.values {
//!     println!("{key:?} = {}", value.value);
//! }
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod constants;
pub mod error;
pub mod logging;
pub mod rcu_client;
pub mod registry;
pub mod store;
pub mod util;

pub use bus::frame::{DataPacket, FrameByte, ParamRecord};
pub use bus::protocol::{PendingWrite, RcuSession, SessionConfig, SessionOutput, SessionState};
pub use bus::serial::{
    CapturedByte, FrameTag, LinkConfig, ParityPort, RcuLinkHandle, RxByte,
};
pub use error::RcuError;
pub use logging::{init_logger, log_debug, log_error, log_info, log_warn};
pub use rcu_client::{DecodeCallback, RcuClient, ReadPass, WriteTicket};
pub use registry::config::{load_document, parse_document, BusDocument, PumpProfile};
pub use registry::{
    default_registry, BitfieldDef, DecodedValue, ParamDef, ParamRegistry, DEFAULT_REGISTRY,
};
pub use store::{StoredValue, ValueKey, ValueStore};

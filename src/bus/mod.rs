//! The bus module contains the components that speak the pump's wire
//! protocol: the packet codec, the ninth-bit serial transport, and the RCU
//! session state machine.

pub mod frame;
pub mod protocol;
pub mod serial;
pub mod serial_mock;

pub use frame::{DataPacket, FrameByte, ParamRecord};
pub use protocol::{PendingWrite, RcuSession, SessionConfig, SessionOutput, SessionState};
pub use serial::{CapturedByte, FrameTag, LinkConfig, ParityPort, RcuLinkHandle, RxByte};

//! Shared-segment layout and notification transport for the tandem
//! cross-core RPC runtime.
//!
//! Two independently-scheduled OS images map one region of physical memory.
//! This crate owns everything both sides must agree on below the RPC layer:
//! the segment layout (validated header, spinlock cell array, scalar table,
//! four descriptor rings), the fixed-layout message descriptor, and the
//! soft-interrupt notification channels (REQUEST and REPLY, independent so
//! neither class head-of-line blocks the other).
//!
//! The hardware interface consumed is a raisable line per direction and
//! class ([`IrqLine`]); [`loopback_pair`] wires two in-process endpoints
//! together for tests and single-image setups.

pub mod channel;
pub mod endpoint;
pub mod layout;
pub mod line;
pub mod loopback;
pub mod msg;

pub use channel::{ChannelClass, ChannelCounters, NotifyChannel};
pub use endpoint::{AttachError, LineSet, LinkDiagnostics, LinkEndpoint, SendError};
pub use layout::{LinkConfig, LinkLayout, PeerSide, SegmentHeader};
pub use line::{IrqLine, IrqSlot, LoopbackLine};
pub use loopback::loopback_pair;
pub use msg::{MAX_PAYLOAD, MsgDesc, MsgError};

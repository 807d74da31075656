//! RPC layer of the tandem cross-core runtime.
//!
//! Rides on [`tandem_link`]: calls are addressed by
//! (program, version, procedure), correlated by xid, and carried as
//! fixed-layout descriptors over the link's REQUEST/REPLY rings. The
//! server side never runs a handler body in notification context; every
//! resolved call is deferred through the bounded [`dispatch`] queue to a
//! fixed worker pool. All protocol- and call-level failures are typed
//! [`Status`] values.
//!
//! ```no_run
//! use tandem_link::{LinkConfig, loopback_pair};
//! use tandem_rpc::{NodeConfig, ProgramDef, RpcNode};
//!
//! let (a, b) = loopback_pair(LinkConfig::default()).unwrap();
//! let alpha = RpcNode::new(a, NodeConfig::default()).unwrap();
//! let beta = RpcNode::new(b, NodeConfig::default()).unwrap();
//!
//! beta.register(
//!     ProgramDef::new("echo", 0x2000_0001, 1)
//!         .procedure(1, |args| Ok(args.to_vec())),
//! )
//! .unwrap();
//!
//! let reply = alpha.call(0x2000_0001, 1, 1, b"hello").unwrap();
//! assert_eq!(reply, b"hello");
//! ```

pub mod client;
pub mod dispatch;
pub mod node;
pub mod registry;
mod server;
pub mod status;

pub use client::{PendingCall, RpcClient};
pub use dispatch::{
    CancelToken, DispatchConfig, DispatchEntry, DispatchHandle, DispatchPool, QueueClosed,
};
pub use node::{InitError, NodeConfig, RpcNode};
pub use registry::{ProcedureFn, ProgramDef, Registry, codec_procedure};
pub use status::Status;

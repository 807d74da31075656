//! The per-image RPC context.
//!
//! Everything the runtime owns (registry, dispatch pool, client pending
//! table, channel callbacks) hangs off one [`RpcNode`] created by
//! [`RpcNode::new`] and torn down by [`RpcNode::shutdown`] (or `Drop`).
//! There are no hidden globals: two nodes in one process are two complete,
//! independent peers, which is exactly how the test suite runs them.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tandem_link::endpoint::LinkEndpoint;

use crate::client::{PendingCall, RpcClient};
use crate::dispatch::{DispatchConfig, DispatchPool};
use crate::registry::{ProgramDef, Registry};
use crate::server;
use crate::status::Status;

/// Node-level configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Dispatch queue and worker pool sizing.
    pub dispatch: DispatchConfig,
    /// Timeout applied to synchronous calls.
    pub call_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            call_timeout: Duration::from_secs(2),
        }
    }
}

/// Failure to bring up a node. Fatal: there is no partial bring-up.
#[derive(Debug)]
pub enum InitError {
    /// The dispatch pool could not be created.
    Dispatch(io::Error),
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::Dispatch(err) => write!(f, "dispatch pool init failed: {err}"),
        }
    }
}

impl std::error::Error for InitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InitError::Dispatch(err) => Some(err),
        }
    }
}

/// One image's complete RPC runtime over one link endpoint.
pub struct RpcNode {
    endpoint: Arc<LinkEndpoint>,
    registry: Arc<Registry>,
    client: Arc<RpcClient>,
    pool: Option<DispatchPool>,
}

impl RpcNode {
    /// Bring up the runtime: spawn the pool, wire server and client
    /// callbacks, enable both channels.
    pub fn new(endpoint: LinkEndpoint, config: NodeConfig) -> Result<Self, InitError> {
        let endpoint = Arc::new(endpoint);
        let pool = DispatchPool::new(config.dispatch).map_err(InitError::Dispatch)?;
        let registry = Arc::new(Registry::new());

        server::install(&endpoint, &registry, &pool.handle());
        let client = RpcClient::new(endpoint.clone(), config.call_timeout);
        client.install();

        endpoint.request_channel().enable();
        endpoint.reply_channel().enable();

        tracing::debug!(side = ?endpoint.side(), "rpc node up");
        Ok(Self {
            endpoint,
            registry,
            client,
            pool: Some(pool),
        })
    }

    /// The program registry.
    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Register a program (see [`Registry::register`]).
    pub fn register(&self, def: ProgramDef) -> Result<(), Status> {
        self.registry.register(def)
    }

    /// Unregister a program id (see [`Registry::unregister`]).
    pub fn unregister(&self, program: u32) {
        self.registry.unregister(program)
    }

    /// Synchronous call to the peer.
    pub fn call(
        &self,
        program: u32,
        version: u32,
        procedure: u32,
        args: &[u8],
    ) -> Result<Vec<u8>, Status> {
        self.client.call(program, version, procedure, args)
    }

    /// Issue a call without blocking; wait or cancel via the handle.
    pub fn begin(
        &self,
        program: u32,
        version: u32,
        procedure: u32,
        args: &[u8],
    ) -> Result<PendingCall<'_>, Status> {
        self.client.begin(program, version, procedure, args)
    }

    /// Fire-and-forget call to the peer.
    pub fn call_oneway(
        &self,
        program: u32,
        version: u32,
        procedure: u32,
        args: &[u8],
    ) -> Result<(), Status> {
        self.client.call_oneway(program, version, procedure, args)
    }

    /// Cancel a pending call by xid.
    pub fn cancel(&self, xid: u32) -> Result<(), Status> {
        self.client.cancel(xid)
    }

    /// The underlying link endpoint (channels, spinlocks, scalars,
    /// diagnostics).
    #[inline]
    pub fn endpoint(&self) -> &Arc<LinkEndpoint> {
        &self.endpoint
    }

    /// Per-worker serviced counts, if the pool is still up.
    pub fn worker_counts(&self) -> Vec<u64> {
        self.pool
            .as_ref()
            .map(DispatchPool::serviced_counts)
            .unwrap_or_default()
    }

    /// Tear the runtime down on every exit path: gate both channels
    /// closed, unhook the callbacks, stop and join the workers.
    /// Idempotent; `Drop` calls it too.
    pub fn shutdown(&mut self) {
        self.endpoint.request_channel().disable();
        self.endpoint.reply_channel().disable();
        self.endpoint.request_channel().clear_callback();
        self.endpoint.reply_channel().clear_callback();
        if let Some(mut pool) = self.pool.take() {
            pool.shutdown();
            tracing::debug!(side = ?self.endpoint.side(), "rpc node down");
        }
    }
}

impl Drop for RpcNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

//! Client stub.
//!
//! Composes call descriptors, signals REQUEST, and correlates REPLY
//! descriptors back to blocked callers by xid. Timeouts are measured here
//! and only here: a request lost in flight surfaces as `TimedOut`, never
//! as a retry. A reply arriving for an xid that has already timed out or
//! been cancelled is dropped (and logged at trace level); it must not
//! disturb later calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use tandem_link::endpoint::{LinkEndpoint, SendError};
use tandem_link::msg::{MAX_PAYLOAD, MsgDesc};

use crate::status::Status;

/// The transient context of one in-flight call.
struct Pending {
    state: Mutex<PendingState>,
    ready: Condvar,
}

struct PendingState {
    outcome: Option<(Status, Vec<u8>)>,
    cancelled: bool,
}

impl Pending {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PendingState {
                outcome: None,
                cancelled: false,
            }),
            ready: Condvar::new(),
        })
    }

    fn complete(&self, status: Status, payload: Vec<u8>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.outcome = Some((status, payload));
        self.ready.notify_all();
    }

    fn mark_cancelled(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.cancelled = true;
        self.ready.notify_all();
    }
}

/// A call that has been sent and may be waited on or cancelled.
///
/// Dropping the handle without waiting abandons the call; its eventual
/// reply is ignored like any other late reply.
pub struct PendingCall<'a> {
    client: &'a RpcClient,
    xid: u32,
    pending: Arc<Pending>,
}

impl PendingCall<'_> {
    /// The transport handle correlating this call with its reply.
    #[inline]
    pub fn xid(&self) -> u32 {
        self.xid
    }

    /// Block until the reply arrives, the call is cancelled, or `timeout`
    /// expires.
    pub fn wait(self, timeout: Duration) -> Result<Vec<u8>, Status> {
        let deadline = Instant::now() + timeout;
        let mut state = self
            .pending
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some((status, payload)) = state.outcome.take() {
                return if status.is_success() {
                    Ok(payload)
                } else {
                    Err(status)
                };
            }
            if state.cancelled {
                return Err(Status::Cancelled);
            }

            let now = Instant::now();
            if now >= deadline {
                drop(state);
                // Forget the xid so the late reply, if it ever comes, is
                // dropped instead of completing a ghost.
                self.client.forget(self.xid);
                return Err(Status::TimedOut);
            }
            let (next, _timed_out) = self
                .pending
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        // `wait` consumes self after removing interest where needed; an
        // un-waited handle still has to drop its map entry.
        self.client.forget(self.xid);
    }
}

/// The client half of a node.
pub struct RpcClient {
    endpoint: Arc<LinkEndpoint>,
    pending: Mutex<HashMap<u32, Arc<Pending>>>,
    next_xid: AtomicU32,
    call_timeout: Duration,
}

impl RpcClient {
    pub(crate) fn new(endpoint: Arc<LinkEndpoint>, call_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            pending: Mutex::new(HashMap::new()),
            next_xid: AtomicU32::new(1),
            call_timeout,
        })
    }

    /// Install the REPLY notification callback. The callback holds a weak
    /// reference; a torn-down client leaves late replies to rot on the
    /// ring.
    pub(crate) fn install(self: &Arc<Self>) {
        let weak: Weak<RpcClient> = Arc::downgrade(self);
        self.endpoint
            .reply_channel()
            .set_callback(Box::new(move || {
                let Some(client) = weak.upgrade() else {
                    return;
                };
                client.drain_replies();
            }));
    }

    fn drain_replies(&self) {
        while let Some(desc) = self.endpoint.recv_reply() {
            let waiter = self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&desc.xid);
            match waiter {
                Some(pending) => {
                    let status =
                        Status::from_wire(desc.status).unwrap_or(Status::ReceiveFailure);
                    pending.complete(status, desc.payload_bytes().to_vec());
                }
                None => {
                    tracing::trace!(xid = desc.xid, "ignoring late or unmatched reply");
                }
            }
        }
    }

    fn forget(&self, xid: u32) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&xid);
    }

    /// Issue a call and return a waitable handle.
    pub fn begin(
        &self,
        program: u32,
        version: u32,
        procedure: u32,
        args: &[u8],
    ) -> Result<PendingCall<'_>, Status> {
        if args.len() > MAX_PAYLOAD {
            return Err(Status::SendFailure);
        }
        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);
        let desc =
            MsgDesc::call(xid, program, version, procedure, args).map_err(|err| {
                tracing::warn!(xid, %err, "call descriptor construction failed");
                Status::SendFailure
            })?;

        let pending = Pending::new();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(xid, pending.clone());

        if let Err(err) = self.endpoint.send_request(&desc) {
            self.forget(xid);
            return Err(match err {
                // The peer has stopped draining its request ring: it is
                // busy, not broken.
                SendError::RingFull => Status::QueueFull,
            });
        }

        Ok(PendingCall {
            client: self,
            xid,
            pending,
        })
    }

    /// Synchronous call: issue, then block for the reply under the
    /// configured timeout.
    pub fn call(
        &self,
        program: u32,
        version: u32,
        procedure: u32,
        args: &[u8],
    ) -> Result<Vec<u8>, Status> {
        let timeout = self.call_timeout;
        self.begin(program, version, procedure, args)?.wait(timeout)
    }

    /// Fire-and-forget call: returns as soon as the request is on the
    /// wire. No reply is ever sent for it.
    pub fn call_oneway(
        &self,
        program: u32,
        version: u32,
        procedure: u32,
        args: &[u8],
    ) -> Result<(), Status> {
        if args.len() > MAX_PAYLOAD {
            return Err(Status::SendFailure);
        }
        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);
        let desc = MsgDesc::call(xid, program, version, procedure, args)
            .map_err(|_| Status::SendFailure)?
            .oneway();
        self.endpoint.send_request(&desc).map_err(|err| match err {
            SendError::RingFull => Status::QueueFull,
        })
    }

    /// Cancel a pending call by xid.
    ///
    /// The blocked waiter (if any) returns `Cancelled`; the eventual
    /// reply is ignored. An xid that names no pending call is
    /// `InvalidHandle`.
    pub fn cancel(&self, xid: u32) -> Result<(), Status> {
        let waiter = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&xid);
        match waiter {
            Some(pending) => {
                pending.mark_cancelled();
                tracing::debug!(xid, "call cancelled");
                Ok(())
            }
            None => Err(Status::InvalidHandle),
        }
    }

    /// The configured per-call timeout.
    #[inline]
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }
}

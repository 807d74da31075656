//! Server stub.
//!
//! The REQUEST notification callback runs in interrupt context: it drains
//! the inbound ring, resolves each call against the registry, and defers
//! every resolved handler body through the dispatch queue. Handler bodies
//! never run inside the notification handler. Resolution failures are
//! answered immediately with a typed status: a ring push and a line
//! raise, nothing more.

use std::sync::{Arc, Weak};

use tandem_link::endpoint::LinkEndpoint;
use tandem_link::msg::MsgDesc;

use crate::dispatch::{DispatchEntry, DispatchHandle};
use crate::registry::Registry;
use crate::status::Status;

/// Wire the server half onto an endpoint: install the REQUEST callback
/// that routes inbound calls through `registry` via `dispatch`.
pub(crate) fn install(
    endpoint: &Arc<LinkEndpoint>,
    registry: &Arc<Registry>,
    dispatch: &DispatchHandle,
) {
    let weak: Weak<LinkEndpoint> = Arc::downgrade(endpoint);
    let registry = registry.clone();
    let dispatch = dispatch.clone();
    endpoint
        .request_channel()
        .set_callback(Box::new(move || {
            let Some(endpoint) = weak.upgrade() else {
                return;
            };
            while let Some(desc) = endpoint.recv_request() {
                accept(&endpoint, &registry, &dispatch, desc);
            }
        }));
}

/// Handle one validated call descriptor, still in interrupt context.
fn accept(
    endpoint: &Arc<LinkEndpoint>,
    registry: &Arc<Registry>,
    dispatch: &DispatchHandle,
    desc: MsgDesc,
) {
    let resolved = registry.resolve(desc.program, desc.version, desc.procedure);
    if !resolved.is_success() {
        tracing::debug!(
            xid = desc.xid,
            program = desc.program,
            procedure = desc.procedure,
            status = %resolved,
            "call did not resolve"
        );
        if !desc.is_oneway() {
            send_status_reply(endpoint, desc.xid, resolved);
        }
        return;
    }

    let job_endpoint = endpoint.clone();
    let job_registry = registry.clone();
    let entry = DispatchEntry::new(
        desc.xid,
        Box::new(move || {
            let outcome = job_registry.dispatch(
                desc.program,
                desc.version,
                desc.procedure,
                desc.payload_bytes(),
            );
            if desc.is_oneway() {
                return;
            }
            match outcome {
                Ok(result) => match MsgDesc::reply(desc.xid, Status::Success.as_wire(), &result) {
                    Ok(reply) => send_reply(&job_endpoint, &reply),
                    Err(err) => {
                        // The result does not fit a reply descriptor: the
                        // remote's view is that we could not allocate it.
                        tracing::warn!(xid = desc.xid, %err, "result does not fit reply");
                        send_status_reply(&job_endpoint, desc.xid, Status::OutOfMemory);
                    }
                },
                Err(status) => send_status_reply(&job_endpoint, desc.xid, status),
            }
        }),
    );

    if dispatch.queue(entry).is_err() {
        // Teardown raced an inbound call; tell the caller the subsystem is
        // gone rather than letting it time out.
        tracing::warn!(xid = desc.xid, "dispatch queue closed; refusing call");
        if !desc.is_oneway() {
            send_status_reply(endpoint, desc.xid, Status::NotInitialized);
        }
    }
}

fn send_status_reply(endpoint: &LinkEndpoint, xid: u32, status: Status) {
    let reply =
        MsgDesc::reply(xid, status.as_wire(), &[]).expect("empty reply fits a descriptor");
    send_reply(endpoint, &reply);
}

fn send_reply(endpoint: &LinkEndpoint, reply: &MsgDesc) {
    if let Err(err) = endpoint.send_reply(reply) {
        // Nothing sane to do: dropping the reply means the caller times
        // out, which is at least visible on their side.
        tracing::error!(xid = reply.xid, %err, "reply ring full; dropping reply");
    }
}

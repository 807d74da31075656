//! In-process link construction.
//!
//! Wires two endpoints over a heap-backed region with loopback lines, so
//! both "cores" live in one process. This is how the test suite races real
//! peers against each other, and how a single-image deployment hosts both
//! halves of the protocol.

use std::sync::Arc;

use tandem_primitives::region::HeapRegion;

use crate::endpoint::{AttachError, LineSet, LinkEndpoint};
use crate::layout::LinkConfig;
use crate::line::{IrqSlot, LoopbackLine};

/// Build a connected pair of endpoints over one heap region.
///
/// Side A creates the segment, side B attaches; each side's REQUEST/REPLY
/// raises land on the other's local slots. The backing allocation is kept
/// alive by the endpoints themselves.
pub fn loopback_pair(config: LinkConfig) -> Result<(LinkEndpoint, LinkEndpoint), AttachError> {
    let layout = config.layout().map_err(AttachError::BadConfig)?;
    let backing = Arc::new(HeapRegion::new_zeroed(layout.total_size));

    let a_request = IrqSlot::new();
    let a_reply = IrqSlot::new();
    let b_request = IrqSlot::new();
    let b_reply = IrqSlot::new();

    let lines_a = LineSet {
        request_peer: LoopbackLine::new(b_request.clone()),
        reply_peer: LoopbackLine::new(b_reply.clone()),
        request_local: a_request.clone(),
        reply_local: a_reply.clone(),
    };
    let lines_b = LineSet {
        request_peer: LoopbackLine::new(a_request),
        reply_peer: LoopbackLine::new(a_reply),
        request_local: b_request,
        reply_local: b_reply,
    };

    let mut a = LinkEndpoint::create(backing.region(), config, lines_a)?;
    let mut b = LinkEndpoint::attach(backing.region(), lines_b)?;
    a.retain_backing(backing.clone());
    b.retain_backing(backing);

    Ok((a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::PeerSide;

    #[test]
    fn pair_comes_up_attached_and_ready() {
        let (a, b) = loopback_pair(LinkConfig::default()).unwrap();
        assert_eq!(a.side(), PeerSide::A);
        assert_eq!(b.side(), PeerSide::B);

        let region = a.region();
        let header = unsafe { region.get::<crate::layout::SegmentHeader>(0) };
        assert!(header.is_ready());
        assert!(header.is_attached(PeerSide::A));
        assert!(header.is_attached(PeerSide::B));
    }

    #[test]
    fn attach_rejects_uninitialized_region() {
        let backing = HeapRegion::new_zeroed(4096);
        let slot = IrqSlot::new();
        let lines = LineSet {
            request_peer: LoopbackLine::new(slot.clone()),
            reply_peer: LoopbackLine::new(slot.clone()),
            request_local: slot.clone(),
            reply_local: slot,
        };
        let err = LinkEndpoint::attach(backing.region(), lines).unwrap_err();
        assert_eq!(err, AttachError::BadSegment("invalid magic bytes"));
    }

    #[test]
    fn create_rejects_undersized_region() {
        let config = LinkConfig::default();
        let backing = HeapRegion::new_zeroed(128);
        let slot = IrqSlot::new();
        let lines = LineSet {
            request_peer: LoopbackLine::new(slot.clone()),
            reply_peer: LoopbackLine::new(slot.clone()),
            request_local: slot.clone(),
            reply_local: slot,
        };
        match LinkEndpoint::create(backing.region(), config, lines) {
            Err(AttachError::RegionTooSmall { have: 128, .. }) => {}
            other => panic!("expected RegionTooSmall, got {other:?}"),
        }
    }
}

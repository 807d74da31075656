//! The per-peer view of one link relationship.
//!
//! A [`LinkEndpoint`] maps the shared segment (spinlock table, scalar
//! table, four descriptor rings) and owns this side's two notification
//! channels. Side A creates and initializes the segment; side B attaches
//! and validates. Above this sits the RPC layer; below it, raw memory and
//! two raisable lines per direction.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tandem_primitives::region::{HeapRegion, Region};
use tandem_primitives::ring::{DescRing, RingFull, RingStatus};
use tandem_primitives::scalar::ScalarTable;
use tandem_primitives::spinlock::SpinLockTable;

use crate::channel::{ChannelClass, ChannelCounters, NotifyChannel};
use crate::layout::{self, LinkConfig, LinkLayout, PeerSide, SegmentHeader};
use crate::line::{IrqLine, IrqSlot};
use crate::msg::{self, MsgDesc};

/// Failure to bring up an endpoint. Fatal at init: there is no partial
/// bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachError {
    /// Configuration rejected by validation.
    BadConfig(&'static str),
    /// The region cannot hold the computed layout.
    RegionTooSmall { need: usize, have: usize },
    /// Header did not validate (wrong magic/version/geometry).
    BadSegment(&'static str),
    /// The creating peer has not finished initializing the segment.
    NotReady,
}

impl fmt::Display for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachError::BadConfig(msg) => write!(f, "bad link config: {msg}"),
            AttachError::RegionTooSmall { need, have } => {
                write!(f, "region too small: need {need} bytes, have {have}")
            }
            AttachError::BadSegment(msg) => write!(f, "bad segment: {msg}"),
            AttachError::NotReady => write!(f, "segment not initialized by creating peer"),
        }
    }
}

impl std::error::Error for AttachError {}

/// Failure to place a descriptor on an outbound ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The peer has not drained the ring; it is full.
    RingFull,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::RingFull => write!(f, "outbound ring full"),
        }
    }
}

impl std::error::Error for SendError {}

/// The four lines wiring one endpoint into the relationship: the peer's
/// raisable REQUEST/REPLY lines, and the local slots those classes land
/// on here.
pub struct LineSet {
    pub request_peer: Arc<dyn IrqLine>,
    pub reply_peer: Arc<dyn IrqLine>,
    pub request_local: Arc<IrqSlot>,
    pub reply_local: Arc<IrqSlot>,
}

/// Outbound ring plus the producer-private head index.
struct TxRing {
    ring: DescRing<MsgDesc>,
    head: Mutex<u64>,
}

impl TxRing {
    fn push(&self, desc: &MsgDesc) -> Result<(), RingFull> {
        let mut head = self.head.lock().unwrap_or_else(PoisonError::into_inner);
        self.ring.push(&mut head, desc)
    }
}

/// Counter and ring snapshot for one endpoint.
#[derive(Debug, Clone, Copy)]
pub struct LinkDiagnostics {
    pub side: PeerSide,
    pub request: ChannelCounters,
    pub reply: ChannelCounters,
    pub request_rx: RingStatus,
    pub reply_rx: RingStatus,
}

/// One peer's handle on the shared link.
pub struct LinkEndpoint {
    side: PeerSide,
    region: Region,
    layout: LinkLayout,
    locks: SpinLockTable,
    scalars: ScalarTable,
    request_tx: TxRing,
    reply_tx: TxRing,
    request_rx: DescRing<MsgDesc>,
    reply_rx: DescRing<MsgDesc>,
    request: NotifyChannel,
    reply: NotifyChannel,
    /// Keeps a heap-backed region alive for in-process links.
    _backing: Option<Arc<HeapRegion>>,
}

impl core::fmt::Debug for LinkEndpoint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LinkEndpoint")
            .field("side", &self.side)
            .finish_non_exhaustive()
    }
}

impl LinkEndpoint {
    /// Create the segment as side A: validate the config, initialize every
    /// sub-structure, then publish readiness for the attaching peer.
    pub fn create(
        region: Region,
        config: LinkConfig,
        lines: LineSet,
    ) -> Result<Self, AttachError> {
        let layout = config.layout().map_err(AttachError::BadConfig)?;
        if region.len() < layout.total_size {
            return Err(AttachError::RegionTooSmall {
                need: layout.total_size,
                have: region.len(),
            });
        }

        let side = PeerSide::A;
        let locks = unsafe {
            SpinLockTable::map(
                region,
                layout.spinlock_offset,
                config.spinlock_cells,
                side.token(),
                true,
            )
        };
        let scalars = unsafe {
            ScalarTable::init(
                region,
                layout.scalar_offset,
                layout::SCALAR_CELLS,
                layout::SCALAR_AREAS,
            )
        };

        let ring_at = |from: PeerSide, class: ChannelClass| unsafe {
            DescRing::init(region, layout.ring_offset(from, class), config.ring_capacity)
        };
        let request_tx = TxRing {
            ring: ring_at(side, ChannelClass::Request),
            head: Mutex::new(0),
        };
        let reply_tx = TxRing {
            ring: ring_at(side, ChannelClass::Reply),
            head: Mutex::new(0),
        };
        let request_rx = ring_at(side.other(), ChannelClass::Request);
        let reply_rx = ring_at(side.other(), ChannelClass::Reply);

        let header = unsafe { region.get_mut::<SegmentHeader>(0) };
        header.init(&config, layout.total_size as u64);
        header.publish_ready();
        header.mark_attached(side);

        tracing::debug!(
            side = ?side,
            total_size = layout.total_size,
            ring_capacity = config.ring_capacity,
            "link segment created"
        );

        Ok(Self::assemble(
            side, region, layout, locks, scalars, request_tx, reply_tx, request_rx, reply_rx,
            lines,
        ))
    }

    /// Attach to a segment side A already created, validating its header.
    pub fn attach(region: Region, lines: LineSet) -> Result<Self, AttachError> {
        if region.len() < layout::HEADER_SIZE {
            return Err(AttachError::RegionTooSmall {
                need: layout::HEADER_SIZE,
                have: region.len(),
            });
        }
        let header = unsafe { region.get::<SegmentHeader>(0) };
        header.validate().map_err(AttachError::BadSegment)?;
        if !header.is_ready() {
            return Err(AttachError::NotReady);
        }

        let config = header.config();
        let layout = config.layout().map_err(AttachError::BadConfig)?;
        if region.len() < layout.total_size {
            return Err(AttachError::RegionTooSmall {
                need: layout.total_size,
                have: region.len(),
            });
        }

        let side = PeerSide::B;
        let locks = unsafe {
            SpinLockTable::map(
                region,
                layout.spinlock_offset,
                config.spinlock_cells,
                side.token(),
                false,
            )
        };
        let scalars = unsafe {
            ScalarTable::attach(
                region,
                layout.scalar_offset,
                layout::SCALAR_CELLS,
                layout::SCALAR_AREAS,
            )
        };

        let ring_at = |from: PeerSide, class: ChannelClass| unsafe {
            DescRing::attach(region, layout.ring_offset(from, class), config.ring_capacity)
        };
        let request_tx = TxRing {
            ring: ring_at(side, ChannelClass::Request),
            head: Mutex::new(0),
        };
        let reply_tx = TxRing {
            ring: ring_at(side, ChannelClass::Reply),
            head: Mutex::new(0),
        };
        let request_rx = ring_at(side.other(), ChannelClass::Request);
        let reply_rx = ring_at(side.other(), ChannelClass::Reply);

        header.mark_attached(side);
        tracing::debug!(side = ?side, "attached to link segment");

        Ok(Self::assemble(
            side, region, layout, locks, scalars, request_tx, reply_tx, request_rx, reply_rx,
            lines,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        side: PeerSide,
        region: Region,
        layout: LinkLayout,
        locks: SpinLockTable,
        scalars: ScalarTable,
        request_tx: TxRing,
        reply_tx: TxRing,
        request_rx: DescRing<MsgDesc>,
        reply_rx: DescRing<MsgDesc>,
        lines: LineSet,
    ) -> Self {
        Self {
            side,
            region,
            layout,
            locks,
            scalars,
            request_tx,
            reply_tx,
            request_rx,
            reply_rx,
            request: NotifyChannel::new(
                ChannelClass::Request,
                lines.request_peer,
                lines.request_local,
            ),
            reply: NotifyChannel::new(ChannelClass::Reply, lines.reply_peer, lines.reply_local),
            _backing: None,
        }
    }

    /// Tie a heap-backed region's lifetime to this endpoint.
    pub(crate) fn retain_backing(&mut self, backing: Arc<HeapRegion>) {
        self._backing = Some(backing);
    }

    /// Which side of the relationship this endpoint is.
    #[inline]
    pub fn side(&self) -> PeerSide {
        self.side
    }

    /// The computed segment layout.
    #[inline]
    pub fn layout(&self) -> &LinkLayout {
        &self.layout
    }

    /// The cross-core spinlock table.
    #[inline]
    pub fn locks(&self) -> &SpinLockTable {
        &self.locks
    }

    /// The shared scalar table.
    #[inline]
    pub fn scalars(&self) -> &ScalarTable {
        &self.scalars
    }

    /// This side's REQUEST channel.
    #[inline]
    pub fn request_channel(&self) -> &NotifyChannel {
        &self.request
    }

    /// This side's REPLY channel.
    #[inline]
    pub fn reply_channel(&self) -> &NotifyChannel {
        &self.reply
    }

    /// Queue a call descriptor to the peer and signal REQUEST.
    pub fn send_request(&self, desc: &MsgDesc) -> Result<(), SendError> {
        debug_assert_eq!(desc.kind, msg::kind::CALL);
        self.request_tx.push(desc).map_err(|RingFull| SendError::RingFull)?;
        self.request.send();
        Ok(())
    }

    /// Queue a reply descriptor to the peer and signal REPLY.
    pub fn send_reply(&self, desc: &MsgDesc) -> Result<(), SendError> {
        debug_assert_eq!(desc.kind, msg::kind::REPLY);
        self.reply_tx.push(desc).map_err(|RingFull| SendError::RingFull)?;
        self.reply.send();
        Ok(())
    }

    /// Claim the oldest inbound call descriptor, if any.
    ///
    /// Malformed descriptors are dropped here with a warning; their
    /// contents cannot be trusted enough to answer them.
    pub fn recv_request(&self) -> Option<MsgDesc> {
        self.recv_validated(&self.request_rx)
    }

    /// Claim the oldest inbound reply descriptor, if any.
    pub fn recv_reply(&self) -> Option<MsgDesc> {
        self.recv_validated(&self.reply_rx)
    }

    fn recv_validated(&self, ring: &DescRing<MsgDesc>) -> Option<MsgDesc> {
        loop {
            let desc = ring.pop()?;
            match desc.validate() {
                Ok(()) => return Some(desc),
                Err(err) => {
                    tracing::warn!(side = ?self.side, %err, "dropping malformed descriptor");
                }
            }
        }
    }

    /// Publish this side's channel counters into its diagnostics scalar
    /// area (single writer: us).
    pub fn publish_diagnostics(&self) {
        let area = layout::diag_area(self.side);
        let request = self.request.counters();
        let reply = self.reply.counters();
        self.scalars.write(&area, layout::diag::REQ_SENT, request.sent as u32);
        self.scalars.write(&area, layout::diag::REQ_RECV, request.received as u32);
        self.scalars.write(&area, layout::diag::REP_SENT, reply.sent as u32);
        self.scalars.write(&area, layout::diag::REP_RECV, reply.received as u32);
    }

    /// Snapshot of channel counters and inbound ring state.
    pub fn diagnostics(&self) -> LinkDiagnostics {
        LinkDiagnostics {
            side: self.side,
            request: self.request.counters(),
            reply: self.reply.counters(),
            request_rx: self.request_rx.status(),
            reply_rx: self.reply_rx.status(),
        }
    }

    /// The shared region (for layering further structures in the user
    /// scalar area or argument buffers).
    #[inline]
    pub fn region(&self) -> Region {
        self.region
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::loopback_pair;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn request_descriptor_crosses_the_link() {
        let (a, b) = loopback_pair(LinkConfig::default()).unwrap();
        let b = Arc::new(b);

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let receiver = b.clone();
        let seen: Arc<Mutex<Vec<MsgDesc>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        b.request_channel().set_callback(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            while let Some(desc) = receiver.recv_request() {
                sink.lock().unwrap().push(desc);
            }
        }));
        b.request_channel().enable();

        let desc = MsgDesc::call(42, 0x10, 1, 2, b"ping").unwrap();
        a.send_request(&desc).unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].xid, 42);
        assert_eq!(seen[0].payload_bytes(), b"ping");
        assert_eq!(a.request_channel().counters().sent, 1);
        assert_eq!(b.request_channel().counters().received, 1);
    }

    #[test]
    fn malformed_descriptor_is_dropped_on_receipt() {
        let (a, b) = loopback_pair(LinkConfig::default()).unwrap();

        let mut bad = MsgDesc::call(1, 1, 1, 1, b"x").unwrap();
        bad.payload_len = u32::MAX;
        // Push the corrupt descriptor straight onto the ring, bypassing the
        // constructor's checks, as a hostile or buggy peer would.
        a.request_tx.push(&bad).unwrap();
        a.request.send();

        assert!(b.recv_request().is_none());
    }

    #[test]
    fn reply_ring_is_independent_of_request_ring() {
        let (a, b) = loopback_pair(LinkConfig::default()).unwrap();

        let call = MsgDesc::call(7, 1, 1, 1, b"call").unwrap();
        let reply = MsgDesc::reply(7, 0, b"reply").unwrap();
        a.send_request(&call).unwrap();
        b.send_reply(&reply).unwrap();

        assert_eq!(b.recv_request().unwrap().payload_bytes(), b"call");
        assert_eq!(a.recv_reply().unwrap().payload_bytes(), b"reply");
    }

    #[test]
    fn full_request_ring_reports_ring_full() {
        let config = LinkConfig {
            ring_capacity: 4,
            ..LinkConfig::default()
        };
        let (a, _b) = loopback_pair(config).unwrap();

        let desc = MsgDesc::call(1, 1, 1, 1, b"").unwrap();
        for _ in 0..4 {
            a.send_request(&desc).unwrap();
        }
        assert_eq!(a.send_request(&desc), Err(SendError::RingFull));
    }

    #[test]
    fn diagnostics_published_to_scalar_area() {
        let (a, b) = loopback_pair(LinkConfig::default()).unwrap();

        let desc = MsgDesc::call(1, 1, 1, 1, b"").unwrap();
        a.send_request(&desc).unwrap();
        a.send_request(&desc).unwrap();
        a.publish_diagnostics();

        // The other peer reads A's diagnostics straight out of shared
        // memory.
        let area = layout::diag_area(PeerSide::A);
        assert_eq!(b.scalars().read(&area, layout::diag::REQ_SENT), 2);
    }

    #[test]
    fn spinlock_table_is_shared_between_sides() {
        let (a, b) = loopback_pair(LinkConfig::default()).unwrap();
        let held = a.locks().lock(0);
        assert!(b.locks().try_lock(0).is_none());
        drop(held);
        assert!(b.locks().try_lock(0).is_some());
    }
}

//! Segment layout.
//!
//! Both peers must agree byte-for-byte on where everything lives in the
//! shared region. The creating peer writes a [`SegmentHeader`] the
//! attaching peer validates, and [`LinkLayout`] computes every sub-region
//! offset from a [`LinkConfig`]. All offsets are cache-line aligned.

use core::mem::size_of;
use core::sync::atomic::{AtomicU32, Ordering};

use tandem_primitives::ring::DescRing;
use tandem_primitives::scalar::{ScalarArea, ScalarTable};
use tandem_primitives::spinlock::SpinLockTable;

use crate::channel::ChannelClass;
use crate::msg::MsgDesc;

/// Magic bytes identifying a tandem segment.
pub const MAGIC: [u8; 8] = *b"TANDEM\x01\0";

/// Segment format version.
pub const VERSION: u32 = 1;

/// Segment header size in bytes.
pub const HEADER_SIZE: usize = 128;

/// Which half of the relationship this image is.
///
/// Side A creates and initializes the segment; side B attaches to it.
/// The assignment is fixed at build/boot time along with the region
/// itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerSide {
    A,
    B,
}

impl PeerSide {
    /// The other half.
    #[inline]
    pub fn other(self) -> PeerSide {
        match self {
            PeerSide::A => PeerSide::B,
            PeerSide::B => PeerSide::A,
        }
    }

    /// Non-zero owner token used in spinlock cells.
    #[inline]
    pub fn token(self) -> u32 {
        match self {
            PeerSide::A => 1,
            PeerSide::B => 2,
        }
    }

    /// Zero-based index (header flags, diagnostics areas).
    #[inline]
    pub fn index(self) -> usize {
        match self {
            PeerSide::A => 0,
            PeerSide::B => 1,
        }
    }
}

/// Standard scalar partitions.
///
/// Each peer owns its diagnostics area (single writer); the user area has
/// no discipline imposed here.
pub const AREA_DIAG_A: ScalarArea = ScalarArea::new("diag-a", 0, 4);
pub const AREA_DIAG_B: ScalarArea = ScalarArea::new("diag-b", 4, 4);
pub const AREA_USER: ScalarArea = ScalarArea::new("user", 8, 16);

/// The full partition set, in cell order.
pub const SCALAR_AREAS: &[ScalarArea] = &[AREA_DIAG_A, AREA_DIAG_B, AREA_USER];

/// Total scalar cells across all areas.
pub const SCALAR_CELLS: u32 = 24;

/// Diagnostics cell indices within a peer's diag area.
pub mod diag {
    pub const REQ_SENT: u32 = 0;
    pub const REQ_RECV: u32 = 1;
    pub const REP_SENT: u32 = 2;
    pub const REP_RECV: u32 = 3;
}

/// The diagnostics area owned by `side`.
pub const fn diag_area(side: PeerSide) -> ScalarArea {
    match side {
        PeerSide::A => AREA_DIAG_A,
        PeerSide::B => AREA_DIAG_B,
    }
}

/// Configuration both peers must share.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Number of cross-core spinlock cells.
    pub spinlock_cells: u32,
    /// Capacity of each descriptor ring (power of 2).
    pub ring_capacity: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            spinlock_cells: 8,
            ring_capacity: 64,
        }
    }
}

impl LinkConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.spinlock_cells == 0 || self.spinlock_cells > 256 {
            return Err("spinlock_cells must be 1-256");
        }
        if !self.ring_capacity.is_power_of_two() || self.ring_capacity < 2 {
            return Err("ring_capacity must be a power of 2, >= 2");
        }
        if self.ring_capacity > 4096 {
            return Err("ring_capacity must be <= 4096");
        }
        Ok(())
    }

    /// Compute the segment layout from this configuration.
    pub fn layout(&self) -> Result<LinkLayout, &'static str> {
        self.validate()?;
        Ok(LinkLayout::new(self))
    }
}

/// Header at the start of the shared region.
///
/// Written once by the creating peer; the attaching peer validates it
/// before touching anything behind it.
#[repr(C)]
pub struct SegmentHeader {
    /// Magic bytes: `TANDEM\x01\0`.
    pub magic: [u8; 8],
    /// Segment format version.
    pub version: u32,
    /// Size of this header (128).
    pub header_size: u32,
    /// Total segment size in bytes.
    pub total_size: u64,
    /// Number of spinlock cells.
    pub spinlock_cells: u32,
    /// Number of scalar cells.
    pub scalar_cells: u32,
    /// Capacity of each descriptor ring.
    pub ring_capacity: u32,
    /// Maximum inline payload per descriptor.
    pub max_payload: u32,
    /// Set to 1 by the creator once every sub-structure is initialized.
    pub ready: AtomicU32,
    /// Presence flag per peer side.
    pub attached: [AtomicU32; 2],
    /// Reserved (zero).
    reserved: [u8; 76],
}

const _: () = assert!(size_of::<SegmentHeader>() == HEADER_SIZE);

impl SegmentHeader {
    pub(crate) fn init(&mut self, config: &LinkConfig, total_size: u64) {
        self.magic = MAGIC;
        self.version = VERSION;
        self.header_size = HEADER_SIZE as u32;
        self.total_size = total_size;
        self.spinlock_cells = config.spinlock_cells;
        self.scalar_cells = SCALAR_CELLS;
        self.ring_capacity = config.ring_capacity;
        self.max_payload = crate::msg::MAX_PAYLOAD as u32;
        self.ready = AtomicU32::new(0);
        self.attached = [AtomicU32::new(0), AtomicU32::new(0)];
        self.reserved = [0; 76];
    }

    /// Validate magic and version.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.magic != MAGIC {
            return Err("invalid magic bytes");
        }
        if self.version != VERSION {
            return Err("unsupported segment version");
        }
        if self.header_size != HEADER_SIZE as u32 {
            return Err("invalid header size");
        }
        if self.max_payload != crate::msg::MAX_PAYLOAD as u32 {
            return Err("descriptor payload size mismatch");
        }
        Ok(())
    }

    /// True once the creator has finished initialization.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) == 1
    }

    pub(crate) fn publish_ready(&self) {
        self.ready.store(1, Ordering::Release);
    }

    pub(crate) fn mark_attached(&self, side: PeerSide) {
        self.attached[side.index()].store(1, Ordering::Release);
    }

    /// True if `side` has attached.
    pub fn is_attached(&self, side: PeerSide) -> bool {
        self.attached[side.index()].load(Ordering::Acquire) == 1
    }

    /// Reconstruct the shared configuration from the header.
    pub fn config(&self) -> LinkConfig {
        LinkConfig {
            spinlock_cells: self.spinlock_cells,
            ring_capacity: self.ring_capacity,
        }
    }
}

/// Computed offsets of every sub-region.
///
/// Ring order is fixed: A→B REQUEST, A→B REPLY, B→A REQUEST, B→A REPLY.
#[derive(Debug, Clone)]
pub struct LinkLayout {
    /// Configuration this layout was computed from.
    pub config: LinkConfig,
    /// Offset of the spinlock cell array.
    pub spinlock_offset: usize,
    /// Offset of the scalar table.
    pub scalar_offset: usize,
    /// Offset of the first ring.
    pub rings_offset: usize,
    /// Size of one ring (header + entries).
    pub ring_size: usize,
    /// Total segment size.
    pub total_size: usize,
}

impl LinkLayout {
    fn new(config: &LinkConfig) -> Self {
        let spinlock_offset = align_up(HEADER_SIZE, 64);
        let spinlock_size = SpinLockTable::bytes_for(config.spinlock_cells);

        let scalar_offset = align_up(spinlock_offset + spinlock_size, 64);
        let scalar_size = ScalarTable::bytes_for(SCALAR_CELLS);

        let rings_offset = align_up(scalar_offset + scalar_size, 64);
        let ring_size = align_up(DescRing::<MsgDesc>::bytes_for(config.ring_capacity), 64);

        let total_size = rings_offset + 4 * ring_size;

        Self {
            config: config.clone(),
            spinlock_offset,
            scalar_offset,
            rings_offset,
            ring_size,
            total_size,
        }
    }

    /// Offset of the ring written by `from` carrying `class` descriptors.
    pub fn ring_offset(&self, from: PeerSide, class: ChannelClass) -> usize {
        let index = from.index() * 2
            + match class {
                ChannelClass::Request => 0,
                ChannelClass::Reply => 1,
            };
        self.rings_offset + index * self.ring_size
    }
}

/// Align a value up to the given alignment.
#[inline]
const fn align_up(value: usize, align: usize) -> usize {
    (value + (align - 1)) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_aligned_and_disjoint() {
        let layout = LinkConfig::default().layout().unwrap();
        assert!(layout.spinlock_offset >= HEADER_SIZE);
        assert!(layout.scalar_offset.is_multiple_of(64));
        assert!(layout.rings_offset.is_multiple_of(64));

        let mut offsets: Vec<usize> = (0..4)
            .map(|i| layout.rings_offset + i * layout.ring_size)
            .collect();
        offsets.dedup();
        assert_eq!(offsets.len(), 4);
        assert_eq!(
            layout.total_size,
            layout.rings_offset + 4 * layout.ring_size
        );
    }

    #[test]
    fn ring_offsets_cover_both_directions() {
        let layout = LinkConfig::default().layout().unwrap();
        let mut seen = std::collections::BTreeSet::new();
        for side in [PeerSide::A, PeerSide::B] {
            for class in [ChannelClass::Request, ChannelClass::Reply] {
                assert!(seen.insert(layout.ring_offset(side, class)));
            }
        }
    }

    #[test]
    fn config_validation() {
        assert!(LinkConfig::default().validate().is_ok());
        assert!(
            LinkConfig {
                ring_capacity: 3,
                ..LinkConfig::default()
            }
            .validate()
            .is_err()
        );
        assert!(
            LinkConfig {
                spinlock_cells: 0,
                ..LinkConfig::default()
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn scalar_areas_are_contiguous() {
        let mut next = 0;
        for area in SCALAR_AREAS {
            assert_eq!(area.first, next);
            next = area.end();
        }
        assert_eq!(next, SCALAR_CELLS);
    }
}

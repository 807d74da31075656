//! Shared scalar table: named partitions of plain `u32` cells.
//!
//! The table provides no locking of its own. Each cell has a documented
//! writer discipline (single writer, or guarded by a spinlock cell) that
//! the component does not enforce; when cross-core atomicity is required
//! it is layered on top with a [`SpinLockCell`](crate::spinlock); see
//! [`ScalarTable::inc_locked`].

use core::mem::size_of;

use crate::region::Region;
use crate::sync::{AtomicU32, Ordering};

/// A named partition of the scalar table, fixed at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalarArea {
    /// Area name, for diagnostics.
    pub name: &'static str,
    /// Index of the area's first cell within the table.
    pub first: u32,
    /// Number of cells in the area.
    pub count: u32,
}

impl ScalarArea {
    pub const fn new(name: &'static str, first: u32, count: u32) -> Self {
        Self { name, first, count }
    }

    /// One past the last cell index.
    #[inline]
    pub const fn end(&self) -> u32 {
        self.first + self.count
    }
}

/// The table of shared `u32` cells, partitioned into named areas.
pub struct ScalarTable {
    region: Region,
    offset: usize,
    cells: u32,
    areas: &'static [ScalarArea],
}

impl ScalarTable {
    /// Map `cells` cells at `offset`, zeroing them (creating peer).
    ///
    /// Panics if the areas overlap or extend past `cells`; the partition
    /// set is fixed at compile time, so a bad one is a build bug.
    ///
    /// # Safety
    ///
    /// The span must lie within `region`, be 4-byte aligned, and be
    /// exclusively owned while it is zeroed.
    pub unsafe fn init(
        region: Region,
        offset: usize,
        cells: u32,
        areas: &'static [ScalarArea],
    ) -> Self {
        let table = unsafe { Self::map(region, offset, cells, areas) };
        unsafe { region.zero(offset, Self::bytes_for(cells)) };
        table
    }

    /// Map an already-initialized table (attaching peer).
    ///
    /// # Safety
    ///
    /// As [`ScalarTable::init`], except the span must already have been
    /// zeroed by the creating peer.
    pub unsafe fn attach(
        region: Region,
        offset: usize,
        cells: u32,
        areas: &'static [ScalarArea],
    ) -> Self {
        unsafe { Self::map(region, offset, cells, areas) }
    }

    unsafe fn map(
        region: Region,
        offset: usize,
        cells: u32,
        areas: &'static [ScalarArea],
    ) -> Self {
        assert!(offset.is_multiple_of(size_of::<u32>()), "scalar table misaligned");
        assert!(
            offset + Self::bytes_for(cells) <= region.len(),
            "region too small for scalar table"
        );
        let mut next = 0u32;
        for area in areas {
            assert!(
                area.first >= next && area.end() <= cells,
                "scalar area '{}' overlaps or exceeds table",
                area.name
            );
            next = area.end();
        }
        Self {
            region,
            offset,
            cells,
            areas,
        }
    }

    /// Bytes `cells` cells occupy.
    pub const fn bytes_for(cells: u32) -> usize {
        cells as usize * size_of::<u32>()
    }

    /// Total number of cells.
    #[inline]
    pub fn cells(&self) -> u32 {
        self.cells
    }

    /// The configured partition set.
    #[inline]
    pub fn areas(&self) -> &'static [ScalarArea] {
        self.areas
    }

    /// The cell at `index` within `area`.
    ///
    /// Panics on an out-of-range index: cell addresses are compile-time
    /// decisions, not runtime input.
    pub fn cell(&self, area: &ScalarArea, index: u32) -> &AtomicU32 {
        assert!(
            index < area.count,
            "cell {index} out of range for area '{}' ({} cells)",
            area.name,
            area.count
        );
        let off = self.offset + (area.first + index) as usize * size_of::<u32>();
        unsafe { self.region.get::<AtomicU32>(off) }
    }

    /// Read a cell.
    #[inline]
    pub fn read(&self, area: &ScalarArea, index: u32) -> u32 {
        self.cell(area, index).load(Ordering::Relaxed)
    }

    /// Write a cell.
    #[inline]
    pub fn write(&self, area: &ScalarArea, index: u32, value: u32) {
        self.cell(area, index).store(value, Ordering::Relaxed)
    }

    /// Increment a cell as a plain read-modify-write.
    ///
    /// Not atomic across the cross-core boundary: concurrent increments
    /// from both peers can lose updates. Single-writer cells may use this
    /// freely; shared counters go through [`ScalarTable::inc_locked`].
    #[inline]
    pub fn inc(&self, area: &ScalarArea, index: u32) -> u32 {
        let cell = self.cell(area, index);
        let next = cell.load(Ordering::Relaxed).wrapping_add(1);
        cell.store(next, Ordering::Relaxed);
        next
    }
}

#[cfg(any(test, feature = "std"))]
impl ScalarTable {
    /// Increment under a spinlock cell, making the update atomic across
    /// the cross-core boundary.
    pub fn inc_locked(
        &self,
        locks: &crate::spinlock::SpinLockTable,
        lock_id: u32,
        area: &ScalarArea,
        index: u32,
    ) -> u32 {
        let _held = locks.lock(lock_id);
        self.inc(area, index)
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::region::HeapRegion;

    const AREAS: &[ScalarArea] = &[
        ScalarArea::new("counters", 0, 4),
        ScalarArea::new("flags", 4, 4),
    ];

    #[test]
    fn init_zeroes_and_partitions() {
        let backing = HeapRegion::new_zeroed(ScalarTable::bytes_for(8));
        let table = unsafe { ScalarTable::init(backing.region(), 0, 8, AREAS) };

        for area in table.areas() {
            for i in 0..area.count {
                assert_eq!(table.read(area, i), 0);
            }
        }

        table.write(&AREAS[0], 2, 17);
        assert_eq!(table.read(&AREAS[0], 2), 17);
        // The write did not bleed into the neighboring area.
        assert_eq!(table.read(&AREAS[1], 0), 0);
    }

    #[test]
    fn inc_is_per_cell() {
        let backing = HeapRegion::new_zeroed(ScalarTable::bytes_for(8));
        let table = unsafe { ScalarTable::init(backing.region(), 0, 8, AREAS) };

        assert_eq!(table.inc(&AREAS[0], 0), 1);
        assert_eq!(table.inc(&AREAS[0], 0), 2);
        assert_eq!(table.read(&AREAS[0], 1), 0);
    }

    #[test]
    fn attach_sees_creator_writes() {
        let backing = HeapRegion::new_zeroed(ScalarTable::bytes_for(8));
        let creator = unsafe { ScalarTable::init(backing.region(), 0, 8, AREAS) };
        creator.write(&AREAS[1], 3, 0xABCD);

        let attached = unsafe { ScalarTable::attach(backing.region(), 0, 8, AREAS) };
        assert_eq!(attached.read(&AREAS[1], 3), 0xABCD);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_cell_panics() {
        let backing = HeapRegion::new_zeroed(ScalarTable::bytes_for(8));
        let table = unsafe { ScalarTable::init(backing.region(), 0, 8, AREAS) };
        table.read(&AREAS[0], 4);
    }

    #[test]
    fn locked_inc_counts_every_update() {
        use crate::spinlock::SpinLockTable;
        use std::sync::Arc;
        use std::thread;

        let lock_bytes = SpinLockTable::bytes_for(1);
        let backing = Arc::new(HeapRegion::new_zeroed(
            lock_bytes + ScalarTable::bytes_for(8),
        ));
        unsafe {
            SpinLockTable::map(backing.region(), 0, 1, 1, true);
            ScalarTable::init(backing.region(), lock_bytes, 8, AREAS);
        }

        let mut peers = std::vec::Vec::new();
        for owner in [1u32, 2u32] {
            let backing = backing.clone();
            peers.push(thread::spawn(move || {
                let locks =
                    unsafe { SpinLockTable::map(backing.region(), 0, 1, owner, false) };
                let table =
                    unsafe { ScalarTable::attach(backing.region(), lock_bytes, 8, AREAS) };
                for _ in 0..1000 {
                    table.inc_locked(&locks, 0, &AREAS[0], 0);
                }
            }));
        }
        for p in peers {
            p.join().unwrap();
        }

        let table = unsafe { ScalarTable::attach(backing.region(), lock_bytes, 8, AREAS) };
        assert_eq!(table.read(&AREAS[0], 0), 2000);
    }
}

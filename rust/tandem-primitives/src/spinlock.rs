//! Cross-core spinlock cells.
//!
//! The two peers share physical memory but not a scheduler, so mutual
//! exclusion across the boundary cannot sleep: a holder on the other core
//! cannot be woken, only waited out. These cells busy-wait by design and
//! are a different animal from an intra-process mutex: hold times must be
//! short and bounded, and callers must follow a global lock-ordering
//! discipline (there is no deadlock detection; two peers spinning on each
//! other's locks is livelock).

use core::mem::size_of;

use crate::sync::{AtomicU32, Ordering, spin_loop};

/// Cell state for "no holder".
pub const UNLOCKED: u32 = 0;

/// One cross-core mutual-exclusion cell.
///
/// The state word holds the owner's peer token (non-zero) or [`UNLOCKED`].
/// Storing the token rather than a bare flag lets a stress test observe
/// "at most one holder" directly and lets diagnostics name the holder.
/// One cache line per cell so two peers spinning on different locks do not
/// false-share.
#[repr(C, align(64))]
pub struct SpinLockCell {
    state: AtomicU32,
    _pad: [u8; 60],
}

#[cfg(not(loom))]
const _: () = assert!(size_of::<SpinLockCell>() == 64);

impl SpinLockCell {
    /// A fresh, unheld cell.
    pub fn new() -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
            _pad: [0; 60],
        }
    }

    /// Attempt one acquire with `owner` as the holder token. Non-blocking.
    ///
    /// `owner` must be non-zero and unique per peer.
    #[inline]
    pub fn try_acquire(&self, owner: u32) -> bool {
        debug_assert_ne!(owner, UNLOCKED);
        self.state
            .compare_exchange(UNLOCKED, owner, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Acquire, busy-waiting the calling core until the cell is free.
    pub fn acquire(&self, owner: u32) {
        loop {
            if self.try_acquire(owner) {
                return;
            }
            // Test before retrying the CAS so the spin stays read-only while
            // the other core holds the line.
            while self.state.load(Ordering::Relaxed) != UNLOCKED {
                spin_loop();
            }
        }
    }

    /// Release the cell with a store-release.
    pub fn release(&self, owner: u32) {
        debug_assert_eq!(
            self.state.load(Ordering::Relaxed),
            owner,
            "release by non-holder"
        );
        self.state.store(UNLOCKED, Ordering::Release);
    }

    /// Current holder token, or [`UNLOCKED`].
    #[inline]
    pub fn holder(&self) -> u32 {
        self.state.load(Ordering::Relaxed)
    }
}

impl Default for SpinLockCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "std"))]
mod table {
    use super::{SpinLockCell, UNLOCKED};
    use crate::region::Region;
    use std::boxed::Box;
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use std::vec::Vec;

    /// The fixed array of spinlock cells in the shared region, plus the
    /// local contention gate in front of each.
    ///
    /// `lock` first takes a per-cell local mutex (the hosted stand-in for
    /// "local lock + interrupts disabled") so only one local thread at a
    /// time contends for the cross-core cell; without it, several local
    /// threads would convoy on the CAS while the other core holds the line.
    /// Cells are pre-allocated at init and never created dynamically.
    pub struct SpinLockTable {
        region: Region,
        offset: usize,
        count: u32,
        owner: u32,
        local: Box<[Mutex<()>]>,
    }

    impl SpinLockTable {
        /// Map `count` cells at `offset`, acting as peer `owner`.
        ///
        /// The creating peer zeroes the span (all cells unheld); the
        /// attaching peer maps it as-is.
        ///
        /// # Safety
        ///
        /// The span must lie within `region`, be 64-byte aligned, and hold
        /// `count` cells both peers agree on. `owner` must be non-zero and
        /// distinct from the other peer's token.
        pub unsafe fn map(
            region: Region,
            offset: usize,
            count: u32,
            owner: u32,
            zero: bool,
        ) -> Self {
            assert!(owner != UNLOCKED, "owner token must be non-zero");
            assert!(offset.is_multiple_of(64), "cell array must be 64-byte aligned");
            let bytes = Self::bytes_for(count);
            assert!(offset + bytes <= region.len(), "region too small for lock table");
            if zero {
                unsafe { region.zero(offset, bytes) };
            }

            let local: Vec<Mutex<()>> = (0..count).map(|_| Mutex::new(())).collect();
            Self {
                region,
                offset,
                count,
                owner,
                local: local.into_boxed_slice(),
            }
        }

        /// Bytes `count` cells occupy.
        pub const fn bytes_for(count: u32) -> usize {
            count as usize * core::mem::size_of::<SpinLockCell>()
        }

        /// Number of cells.
        #[inline]
        pub fn count(&self) -> u32 {
            self.count
        }

        /// The shared cell for lock `id`. Panics if `id` is out of range.
        #[inline]
        pub fn cell(&self, id: u32) -> &SpinLockCell {
            assert!(id < self.count, "lock id {id} out of range ({})", self.count);
            let off = self.offset + id as usize * core::mem::size_of::<SpinLockCell>();
            unsafe { self.region.get::<SpinLockCell>(off) }
        }

        fn local_gate(&self, id: u32) -> MutexGuard<'_, ()> {
            self.local[id as usize]
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
        }

        /// Acquire lock `id`, busy-waiting until the other peer releases it.
        pub fn lock(&self, id: u32) -> SpinGuard<'_> {
            let gate = self.local_gate(id);
            let cell = self.cell(id);
            cell.acquire(self.owner);
            SpinGuard {
                cell,
                owner: self.owner,
                _gate: gate,
            }
        }

        /// Attempt lock `id` once, without blocking on either the local gate
        /// or the cross-core cell.
        pub fn try_lock(&self, id: u32) -> Option<SpinGuard<'_>> {
            let gate = self.local[id as usize].try_lock().ok()?;
            let cell = self.cell(id);
            if cell.try_acquire(self.owner) {
                Some(SpinGuard {
                    cell,
                    owner: self.owner,
                    _gate: gate,
                })
            } else {
                None
            }
        }
    }

    /// Holds lock `id` until dropped.
    ///
    /// Drop releases the cross-core cell first, then the local gate, so the
    /// other core is unblocked before local waiters are admitted.
    pub struct SpinGuard<'a> {
        cell: &'a SpinLockCell,
        owner: u32,
        _gate: MutexGuard<'a, ()>,
    }

    impl Drop for SpinGuard<'_> {
        fn drop(&mut self) {
            self.cell.release(self.owner);
        }
    }
}

#[cfg(any(test, feature = "std"))]
pub use table::{SpinGuard, SpinLockTable};

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::region::{HeapRegion, Region};
    use std::sync::Arc;
    use std::thread;
    use std::vec::Vec;

    fn table_for(region: Region, owner: u32, zero: bool) -> SpinLockTable {
        unsafe { SpinLockTable::map(region, 0, 4, owner, zero) }
    }

    #[test]
    fn lock_excludes_other_peer() {
        let backing = HeapRegion::new_zeroed(SpinLockTable::bytes_for(4));
        let a = table_for(backing.region(), 1, true);
        let b = table_for(backing.region(), 2, false);

        let held = a.lock(0);
        assert!(b.try_lock(0).is_none());
        assert_eq!(b.cell(0).holder(), 1);
        drop(held);

        let held = b.try_lock(0).expect("free after release");
        assert_eq!(a.cell(0).holder(), 2);
        drop(held);
        assert_eq!(a.cell(0).holder(), UNLOCKED);
    }

    #[test]
    fn distinct_ids_do_not_contend() {
        let backing = HeapRegion::new_zeroed(SpinLockTable::bytes_for(4));
        let a = table_for(backing.region(), 1, true);
        let b = table_for(backing.region(), 2, false);

        let g0 = a.lock(0);
        let g1 = b.lock(1);
        drop(g0);
        drop(g1);
    }

    // Two emulated peers race increments on an unsynchronized counter that
    // only the spinlock protects; a lost update or a torn observation of
    // "two holders" fails the test.
    #[test]
    fn racing_peers_never_overlap() {
        const ROUNDS: usize = 10_000;

        let backing = Arc::new(HeapRegion::new_zeroed(SpinLockTable::bytes_for(4)));
        unsafe { SpinLockTable::map(backing.region(), 0, 4, 1, true) };

        let counter = Arc::new(std::cell::UnsafeCell::new(0u64));
        struct Shared(Arc<std::cell::UnsafeCell<u64>>);
        unsafe impl Send for Shared {}

        let mut peers = Vec::new();
        for owner in [1u32, 2u32] {
            let backing = backing.clone();
            let shared = Shared(counter.clone());
            peers.push(thread::spawn(move || {
                // Force the whole wrapper to be captured (its `unsafe impl Send`),
                // rather than the disjoint `shared.0` field under edition 2021+.
                let shared = shared;
                let table = unsafe { SpinLockTable::map(backing.region(), 0, 4, owner, false) };
                for _ in 0..ROUNDS {
                    let guard = table.lock(0);
                    assert_eq!(table.cell(0).holder(), owner);
                    unsafe {
                        let p = shared.0.get();
                        *p += 1;
                    }
                    drop(guard);
                }
            }));
        }
        for p in peers {
            p.join().unwrap();
        }
        assert_eq!(unsafe { *counter.get() }, 2 * ROUNDS as u64);
    }
}

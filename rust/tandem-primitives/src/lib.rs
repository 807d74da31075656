#![doc = include_str!("../README.md")]
#![no_std]

#[cfg(any(test, feature = "alloc"))]
extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod region;
pub mod ring;
pub mod scalar;
pub mod spinlock;
pub mod sync;

#[cfg(any(test, feature = "alloc"))]
pub use region::HeapRegion;
pub use region::Region;
pub use ring::{DescRing, RingFull, RingHeader, RingStatus};
pub use scalar::{ScalarArea, ScalarTable};
pub use spinlock::SpinLockCell;
#[cfg(any(test, feature = "std"))]
pub use spinlock::{SpinGuard, SpinLockTable};

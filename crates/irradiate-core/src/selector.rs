//! Uniform selection of flip targets over a [`RegionSet`].
//!
//! An address is drawn uniformly from the union of all regions, so each
//! region is hit with a probability proportional to its length.

use rand::Rng;
use serde::Serialize;

use crate::flip::Bit;
use crate::region::RegionSet;

/// A byte address and the bit within it to flip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct FlipTarget {
    /// Absolute address in the target's address space
    pub addr: u64,
    /// Bit to invert
    pub bit: Bit,
}

/// Maps an offset into the concatenation of all regions to an absolute address.
///
/// Returns `None` if `offset` is not smaller than the aggregate length.
///
/// # Examples
///
/// ```
/// use irradiate_core::region::{MemoryRegion, RegionSet};
/// use irradiate_core::selector::locate;
///
/// let regions = RegionSet::new(vec![MemoryRegion::new(0, 10), MemoryRegion::new(100, 5)]).unwrap();
/// assert_eq!(locate(&regions, 7), Some(7));
/// assert_eq!(locate(&regions, 12), Some(102));
/// assert_eq!(locate(&regions, 15), None);
/// ```
pub fn locate(regions: &RegionSet, mut offset: u64) -> Option<u64> {
    for region in regions.regions() {
        if offset < region.length {
            return Some(region.start + offset);
        }
        offset -= region.length;
    }
    None
}

/// Draws a random flip target from `regions`.
///
/// Returns `None` if there is no readable memory.
pub fn select_target<R: Rng + ?Sized>(regions: &RegionSet, rng: &mut R) -> Option<FlipTarget> {
    if regions.is_empty() {
        return None;
    }
    let offset = rng.random_range(0..regions.total_len());
    let bit = Bit::random(rng);
    locate(regions, offset).map(|addr| FlipTarget { addr, bit })
}

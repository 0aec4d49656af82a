//! A `Slice` is a (origin, shape) pair addressing a sub-block of a dataset.

use crate::common::shape::Shape;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub type Origin = SmallVec<[u64; 6]>;

/// A sub-block of a dataset: an origin and a shape of matching structure.
///
/// A `Slice` is *flat-nav* when its navigation part has been collapsed to a
/// single leading axis (`shape.nav_dims() == 1`); otherwise it is
/// structured, with the original multi-axis navigation shape intact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slice {
    origin: Origin,
    shape: Shape,
}

impl Slice {
    pub fn new(origin: Origin, shape: Shape) -> Self {
        assert_eq!(
            origin.len(),
            shape.rank(),
            "origin and shape must have the same rank"
        );
        Slice { origin, shape }
    }

    pub fn origin(&self) -> &[u64] {
        &self.origin
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// The flat-nav start/end of this slice's navigation range, assuming the
    /// slice is already flat-nav (a single leading nav axis).
    pub fn nav_range(&self) -> (u64, u64) {
        assert_eq!(self.shape.nav_dims(), 1, "slice must be flat-nav");
        let start = self.origin[0];
        let end = start + self.shape.dims()[0];
        (start, end)
    }

    /// Restricts this slice to the positions selected by `roi`: the nav
    /// extent becomes the count of `true` entries in `roi` within the
    /// slice's (unfiltered) nav range. `roi` is a flat boolean mask over the
    /// whole dataset's navigation axis.
    ///
    /// Mirrors `Slice.adjust_for_roi` in the reference implementation this
    /// engine's tiling model was distilled from.
    pub fn adjust_for_roi(&self, roi: Option<&[bool]>) -> Slice {
        let roi = match roi {
            None => return self.clone(),
            Some(roi) => roi,
        };
        let (start, end) = self.nav_range();
        let count = roi[start as usize..end as usize]
            .iter()
            .filter(|&&b| b)
            .count() as u64;
        Slice {
            origin: self.origin.clone(),
            shape: self.shape.with_flat_nav_count(count),
        }
    }
}

/// Number of `true` entries in `roi[..idx]`. The mapping between a tile's
/// original (unfiltered) nav range and its ROI-compressed buffer range is
/// `popcount(roi[0..tile_start]) .. popcount(roi[0..tile_end])`.
pub fn popcount(roi: &[bool], idx: u64) -> u64 {
    roi[..idx as usize].iter().filter(|&&b| b).count() as u64
}

/// Maps a tile's unfiltered flat-nav range through an optional ROI into the
/// ROI-compressed buffer range. With no ROI, this is the identity.
pub fn roi_compressed_range(roi: Option<&[bool]>, start: u64, end: u64) -> (u64, u64) {
    match roi {
        None => (start, end),
        Some(roi) => (popcount(roi, start), popcount(roi, end)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_slice(start: u64, len: u64) -> Slice {
        Slice::new(
            Origin::from_slice(&[start]),
            Shape::new(vec![len], 0),
        )
    }

    #[test]
    fn adjust_for_roi_counts_true_entries() {
        let roi = vec![true, false, true, true, false, true];
        let slice = flat_slice(1, 3); // positions 1,2,3 -> false,true,true
        let adjusted = slice.adjust_for_roi(Some(&roi));
        assert_eq!(adjusted.shape().dims(), &[2]);
    }

    #[test]
    fn adjust_for_roi_none_is_identity() {
        let slice = flat_slice(0, 4);
        let adjusted = slice.adjust_for_roi(None);
        assert_eq!(adjusted, slice);
    }

    #[test]
    fn roi_compressed_range_maps_tile_bounds() {
        let roi = vec![true, false, true, true, false, true];
        // popcount prefix: [0,1,1,2,3,3,4]
        assert_eq!(roi_compressed_range(Some(&roi), 0, 6), (0, 4));
        assert_eq!(roi_compressed_range(Some(&roi), 2, 4), (1, 3));
        assert_eq!(roi_compressed_range(None, 2, 4), (2, 4));
    }
}

//! Structured n-D index algebra with a signal/navigation split.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Inline storage for up to 6 axes before spilling to the heap; covers every
/// dataset shape we have ever seen in practice (nav usually 1-2 dims, sig
/// usually 1-3 dims).
pub type Dims = SmallVec<[u64; 6]>;

/// An ordered tuple of axis sizes with a declared split point separating the
/// leading navigation axes from the trailing signal axes.
///
/// All sizes are `>= 0`; `sig_dims` is the number of trailing axes that
/// belong to the signal.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    dims: Dims,
    sig_dims: usize,
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Shape(nav={:?}, sig={:?})",
            self.nav().dims(),
            self.sig().dims()
        )
    }
}

impl Shape {
    /// Builds a shape from a full list of axis sizes and the number of
    /// trailing axes that make up the signal.
    pub fn new<I: IntoIterator<Item = u64>>(dims: I, sig_dims: usize) -> Self {
        let dims: Dims = dims.into_iter().collect();
        assert!(
            sig_dims <= dims.len(),
            "sig_dims {} exceeds rank {}",
            sig_dims,
            dims.len()
        );
        Shape { dims, sig_dims }
    }

    /// All axis sizes, navigation axes first.
    pub fn dims(&self) -> &[u64] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn sig_dims(&self) -> usize {
        self.sig_dims
    }

    pub fn nav_dims(&self) -> usize {
        self.dims.len() - self.sig_dims
    }

    /// The leading navigation axes, as their own `Shape` (with `sig_dims=0`).
    pub fn nav(&self) -> Shape {
        Shape::new(self.dims[..self.nav_dims()].iter().cloned(), 0)
    }

    /// The trailing signal axes, as their own `Shape` (with `sig_dims` equal
    /// to its own rank).
    pub fn sig(&self) -> Shape {
        let n = self.sig_dims;
        Shape::new(self.dims[self.nav_dims()..].iter().cloned(), n)
    }

    /// Total number of elements covered by this shape.
    pub fn size(&self) -> u64 {
        self.dims.iter().product()
    }

    /// Collapses the navigation axes into a single leading axis, keeping the
    /// signal axes untouched.
    pub fn flatten_nav(&self) -> Shape {
        let nav_size: u64 = self.dims[..self.nav_dims()].iter().product();
        let mut dims: Dims = SmallVec::new();
        dims.push(nav_size);
        dims.extend(self.dims[self.nav_dims()..].iter().cloned());
        Shape {
            dims,
            sig_dims: self.sig_dims,
        }
    }

    /// Replaces the navigation extent (first axis, assumed already
    /// flat-nav) with `count`, keeping signal axes unchanged. Used to build
    /// ROI-compressed shapes.
    pub fn with_flat_nav_count(&self, count: u64) -> Shape {
        let mut dims = self.dims.clone();
        let nav_dims = self.nav_dims();
        assert_eq!(nav_dims, 1, "shape must already be flat-nav");
        dims[0] = count;
        Shape {
            dims,
            sig_dims: self.sig_dims,
        }
    }

    /// Appends `extra` as trailing signal-like axes (used by
    /// `Buffer::extra_shape`).
    pub fn concat(&self, extra: &Shape) -> Shape {
        let mut dims = self.dims.clone();
        dims.extend(extra.dims.iter().cloned());
        Shape {
            dims,
            sig_dims: self.sig_dims + extra.dims.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nav_sig_split() {
        let shape = Shape::new(vec![4, 4, 16, 16], 2);
        assert_eq!(shape.nav().dims(), &[4, 4]);
        assert_eq!(shape.sig().dims(), &[16, 16]);
        assert_eq!(shape.size(), 4 * 4 * 16 * 16);
    }

    #[test]
    fn flatten_nav_collapses_leading_axes() {
        let shape = Shape::new(vec![4, 4, 16, 16], 2);
        let flat = shape.flatten_nav();
        assert_eq!(flat.dims(), &[16, 16, 16]);
        assert_eq!(flat.nav_dims(), 1);
    }

    #[test]
    fn with_flat_nav_count_replaces_first_axis() {
        let shape = Shape::new(vec![16, 16, 16], 2);
        let compressed = shape.with_flat_nav_count(5);
        assert_eq!(compressed.dims(), &[5, 16, 16]);
    }
}

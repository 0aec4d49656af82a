//! Typed result/aux buffers with kind-dependent view semantics, per
//! `SPEC_FULL.md` §4.1.

pub mod aux;
pub mod group;
pub mod view;

pub use self::aux::AuxBuffer;
pub use self::group::BufferGroup;
pub use self::view::View;

use crate::common::dtype::DType;
use crate::common::shape::Shape;
use crate::common::slice::popcount;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// What a buffer's navigation extent tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferKind {
    /// Sized by the ROI-compressed navigation count of the current binding.
    Nav,
    /// Sized by the dataset's signal shape; independent of partitioning.
    Sig,
    /// Sized by `extra_shape` alone.
    Single,
}

/// Where a buffer's storage lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Where {
    Host,
    Device,
}

/// The unit of data a view has been set for, tracked so `flush`/`export`
/// know which contiguity guarantees currently hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum Granularity {
    Dataset,
    Partition,
    Tile,
    Frame,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
enum Binding {
    Unbound,
    /// `nav_roi` is `None` when there is no ROI (the full nav range is
    /// active), or the ROI slice local to this binding (0-based, one entry
    /// per original nav position in the binding) otherwise. `dataset_sig`
    /// is always recorded, since `kind=Sig` buffers need it regardless of
    /// binding.
    Bound {
        nav_roi: Option<Vec<bool>>,
        full_nav_len: u64,
        dataset_sig: Shape,
    },
}

/// A typed result or auxiliary buffer. See `SPEC_FULL.md` §4.1 for the full
/// contract; this type implements every operation listed there.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Buffer {
    kind: BufferKind,
    extra_shape: Shape,
    dtype: DType,
    where_: Where,
    binding: Binding,
    storage: Option<Vec<u8>>,
    view: Option<(View, Granularity)>,
}

impl Buffer {
    pub fn new(kind: BufferKind, extra_shape: Shape, dtype: DType, where_: Where) -> Self {
        Buffer {
            kind,
            extra_shape,
            dtype,
            where_,
            binding: Binding::Unbound,
            storage: None,
            view: None,
        }
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn where_(&self) -> Where {
        self.where_
    }

    pub fn extra_shape(&self) -> &Shape {
        &self.extra_shape
    }

    /// Bind to the whole dataset. The nav extent of a `kind=Nav` buffer
    /// becomes the count of `true` entries in `roi` (or the full dataset
    /// nav size with no ROI).
    pub fn set_shape_ds(&mut self, dataset_nav: &Shape, dataset_sig: &Shape, roi: Option<&[bool]>) {
        let full_nav_len = dataset_nav.size();
        self.binding = Binding::Bound {
            nav_roi: roi.map(|r| r.to_vec()),
            full_nav_len,
            dataset_sig: dataset_sig.clone(),
        };
        self.storage = None;
        self.view = None;
    }

    /// Bind to one partition. `partition_roi` is the slice of the dataset
    /// ROI local to this partition (0-based, same length as the
    /// partition's unfiltered nav extent), or `None` with no ROI.
    pub fn set_shape_partition(
        &mut self,
        partition_nav: &Shape,
        dataset_sig: &Shape,
        partition_roi: Option<&[bool]>,
    ) {
        let full_nav_len = partition_nav.size();
        self.binding = Binding::Bound {
            nav_roi: partition_roi.map(|r| r.to_vec()),
            full_nav_len,
            dataset_sig: dataset_sig.clone(),
        };
        self.storage = None;
        self.view = None;
    }

    fn nav_len(&self) -> Result<u64> {
        match &self.binding {
            Binding::Unbound => Err(Error::Shape("buffer is not bound".into())),
            Binding::Bound {
                nav_roi,
                full_nav_len,
                ..
            } => Ok(match nav_roi {
                Some(roi) => popcount(roi, *full_nav_len),
                None => *full_nav_len,
            }),
        }
    }

    /// The base shape (before `extra_shape`) for the current binding.
    fn base_shape(&self) -> Result<Shape> {
        match self.kind {
            BufferKind::Nav => Ok(Shape::new(vec![self.nav_len()?], 0)),
            BufferKind::Sig => match &self.binding {
                Binding::Unbound => Err(Error::Shape("buffer is not bound".into())),
                Binding::Bound { dataset_sig, .. } => Ok(dataset_sig.clone()),
            },
            BufferKind::Single => Ok(Shape::new(Vec::<u64>::new(), 0)),
        }
    }

    /// Full shape (base + extra) for the current binding.
    pub fn full_shape(&self) -> Result<Shape> {
        Ok(self.base_shape()?.concat(&self.extra_shape))
    }

    pub fn has_data(&self) -> bool {
        self.storage.is_some()
    }

    /// Zero-initialise storage for the current binding. Idempotent-error if
    /// already allocated on this binding (re-binding via `set_shape_*`
    /// clears storage first, so a second `allocate` after a rebind is fine).
    pub fn allocate(&mut self) -> Result<()> {
        if self.storage.is_some() {
            return Err(Error::Shape(
                "buffer already allocated for this binding".into(),
            ));
        }
        let shape = self.full_shape()?;
        let nbytes = shape.size() as usize * self.dtype.size_of();
        self.storage = Some(vec![0u8; nbytes]);
        Ok(())
    }

    fn storage_mut(&mut self) -> Result<&mut [u8]> {
        self.storage
            .as_mut()
            .map(|v| v.as_mut_slice())
            .ok_or_else(|| Error::Shape("buffer has no storage".into()))
    }

    pub fn raw_data(&self) -> Result<&[u8]> {
        self.storage
            .as_deref()
            .ok_or_else(|| Error::Shape("buffer has no storage".into()))
    }

    pub fn raw_data_mut(&mut self) -> Result<&mut [u8]> {
        self.storage_mut()
    }

    /// The current view's bytes if one is set, otherwise the whole storage.
    /// This is the attribute-style access the contract in §4.2 describes.
    pub fn current_view_data(&self) -> Result<&[u8]> {
        match &self.view {
            Some((view, _)) => {
                let len = view.byte_len(self.dtype.size_of());
                let offset = view.byte_offset();
                Ok(&self.raw_data()?[offset..offset + len])
            }
            None => self.raw_data(),
        }
    }

    pub fn current_view_data_mut(&mut self) -> Result<&mut [u8]> {
        match self.view.clone() {
            Some((view, _)) => {
                let len = view.byte_len(self.dtype.size_of());
                let offset = view.byte_offset();
                Ok(&mut self.storage_mut()?[offset..offset + len])
            }
            None => self.storage_mut(),
        }
    }

    /// A whole-buffer view, used for dataset-level access (`preprocess`
    /// called with dataset-level views bound) and for `kind != Nav`
    /// buffers at any granularity.
    pub fn get_view_for_dataset(&mut self) -> Result<&mut [u8]> {
        let shape = self.full_shape()?;
        let view = View::new(0, shape);
        let len = view.byte_len(self.dtype.size_of());
        self.view = Some((view, Granularity::Dataset));
        Ok(&mut self.storage_mut()?[..len])
    }

    pub fn get_view_for_partition(&mut self) -> Result<&mut [u8]> {
        let shape = self.full_shape()?;
        let view = View::new(0, shape);
        let len = view.byte_len(self.dtype.size_of());
        self.view = Some((view, Granularity::Partition));
        Ok(&mut self.storage_mut()?[..len])
    }

    /// Compressed `[start, end)` in the buffer's own nav index space for a
    /// tile spanning `[orig_start, orig_end)` in the binding's *original*
    /// (unfiltered) nav coordinates. With no ROI this is the identity.
    fn compressed_tile_range(&self, orig_start: u64, orig_end: u64) -> Result<(u64, u64)> {
        match &self.binding {
            Binding::Unbound => Err(Error::Shape("buffer is not bound".into())),
            Binding::Bound { nav_roi, .. } => Ok(match nav_roi {
                Some(roi) => (popcount(roi, orig_start), popcount(roi, orig_end)),
                None => (orig_start, orig_end),
            }),
        }
    }

    fn elem_len(&self) -> usize {
        self.extra_shape.size() as usize
    }

    /// View for one tile, `[orig_start, orig_end)` in unfiltered nav
    /// coordinates. For `kind=Sig`/`Single` this is always the whole
    /// buffer; for `kind=Nav` it is the ROI-compressed sub-range.
    pub fn get_view_for_tile(&mut self, orig_start: u64, orig_end: u64) -> Result<&mut [u8]> {
        let view = match self.kind {
            BufferKind::Sig | BufferKind::Single => View::new(0, self.full_shape()?),
            BufferKind::Nav => {
                let (c_start, c_end) = self.compressed_tile_range(orig_start, orig_end)?;
                let elem = self.elem_len().max(1);
                let byte_offset = c_start as usize * elem * self.dtype.size_of();
                let count = (c_end - c_start) as usize;
                let mut dims = vec![count as u64];
                dims.extend(self.extra_shape.dims().iter().cloned());
                View::new(byte_offset, Shape::new(dims, self.extra_shape.rank()))
            }
        };
        let len = view.byte_len(self.dtype.size_of());
        let offset = view.byte_offset();
        self.view = Some((view, Granularity::Tile));
        Ok(&mut self.storage_mut()?[offset..offset + len])
    }

    /// Identical to `get_view_for_tile`: the buffer's storage is already
    /// laid out in ROI-compressed nav order, so the compressed range for a
    /// tile is by construction a contiguous run — no gather/scatter staging
    /// is needed to satisfy the contiguity guarantee.
    pub fn get_contiguous_view_for_tile(&mut self, orig_start: u64, orig_end: u64) -> Result<&mut [u8]> {
        self.get_view_for_tile(orig_start, orig_end)
    }

    /// View for a single frame at `orig_tile_start + frame_idx` in
    /// unfiltered nav coordinates.
    pub fn get_view_for_frame(&mut self, orig_tile_start: u64, frame_idx: u64) -> Result<&mut [u8]> {
        let view = match self.kind {
            BufferKind::Sig | BufferKind::Single => View::new(0, self.full_shape()?),
            BufferKind::Nav => {
                let (c_tile_start, _) = self.compressed_tile_range(orig_tile_start, orig_tile_start + 1)?;
                let c_start = c_tile_start + frame_idx;
                let elem = self.elem_len().max(1);
                let byte_offset = c_start as usize * elem * self.dtype.size_of();
                let mut dims = vec![1u64];
                dims.extend(self.extra_shape.dims().iter().cloned());
                View::new(byte_offset, Shape::new(dims, self.extra_shape.rank()))
            }
        };
        let len = view.byte_len(self.dtype.size_of());
        let offset = view.byte_offset();
        self.view = Some((view, Granularity::Frame));
        Ok(&mut self.storage_mut()?[offset..offset + len])
    }

    /// Propagate staged writes back to storage. A no-op in this
    /// implementation since every view is a direct sub-slice of storage
    /// (see `get_contiguous_view_for_tile`), but still mandatory to call
    /// after each partition so a backend that *does* stage (e.g. a future
    /// device-resident `Where::Device` implementation) has a defined sync
    /// point.
    pub fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// One-time finalisation before ship-back (e.g. device -> host). A
    /// no-op for `Where::Host`; device storage would be copied down here.
    pub fn export(&mut self) -> Result<()> {
        Ok(())
    }

    pub fn clear_view(&mut self) {
        self.view = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nav_buffer() -> Buffer {
        Buffer::new(BufferKind::Nav, Shape::new(Vec::<u64>::new(), 0), DType::Float32, Where::Host)
    }

    #[test]
    fn nav_buffer_size_under_roi_is_popcount() {
        let mut buf = nav_buffer();
        let roi = vec![true, false, true, true, false, true, true, false];
        buf.set_shape_ds(&Shape::new(vec![8], 0), &Shape::new(Vec::<u64>::new(), 0), Some(&roi));
        buf.allocate().unwrap();
        assert_eq!(buf.full_shape().unwrap().size(), 5);
    }

    #[test]
    fn sig_buffer_independent_of_partitioning() {
        let mut buf = Buffer::new(BufferKind::Sig, Shape::new(Vec::<u64>::new(), 0), DType::Float32, Where::Host);
        let sig = Shape::new(vec![16, 16], 2);
        buf.set_shape_partition(&Shape::new(vec![4], 0), &sig, None);
        assert_eq!(buf.full_shape().unwrap().size(), 256);
    }

    #[test]
    fn single_buffer_is_extra_shape_only() {
        let extra = Shape::new(vec![3], 1);
        let mut buf = Buffer::new(BufferKind::Single, extra, DType::Float32, Where::Host);
        buf.set_shape_ds(&Shape::new(vec![8], 0), &Shape::new(Vec::<u64>::new(), 0), None);
        assert_eq!(buf.full_shape().unwrap().size(), 3);
    }

    #[test]
    fn tile_view_is_roi_compressed_contiguous_range() {
        let mut buf = nav_buffer();
        let roi = vec![true, false, true, true, false, true, true, false];
        buf.set_shape_ds(&Shape::new(vec![8], 0), &Shape::new(Vec::<u64>::new(), 0), Some(&roi));
        buf.allocate().unwrap();
        // tile covers original positions [2, 6) -> roi[2..6] = [true,true,false,true] -> 3 selected
        let view = buf.get_view_for_tile(2, 6).unwrap();
        assert_eq!(view.len(), 3 * 4);
    }

    #[test]
    fn allocate_twice_on_same_binding_errors() {
        let mut buf = nav_buffer();
        buf.set_shape_ds(&Shape::new(vec![4], 0), &Shape::new(Vec::<u64>::new(), 0), None);
        buf.allocate().unwrap();
        assert!(buf.allocate().is_err());
    }

    #[test]
    fn rebinding_clears_storage() {
        let mut buf = nav_buffer();
        buf.set_shape_ds(&Shape::new(vec![4], 0), &Shape::new(Vec::<u64>::new(), 0), None);
        buf.allocate().unwrap();
        buf.set_shape_ds(&Shape::new(vec![8], 0), &Shape::new(Vec::<u64>::new(), 0), None);
        assert!(!buf.has_data());
        buf.allocate().unwrap();
        assert_eq!(buf.full_shape().unwrap().size(), 8);
    }
}

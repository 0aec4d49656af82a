//! `AuxBuffer`: caller-supplied, pre-populated data that is sliced to each
//! partition/tile rather than allocated by the engine.

use crate::buffer::{Buffer, BufferKind, Where};
use crate::common::dtype::DType;
use crate::common::shape::Shape;
use crate::common::slice::popcount;
use crate::error::{Error, Result};

/// A `Buffer` whose storage is supplied up front by the caller, in full
/// (unfiltered) dataset-nav order, and re-sliced — never (re)allocated —
/// for each partition/ROI.
#[derive(Clone, Debug)]
pub struct AuxBuffer {
    extra_shape: Shape,
    dtype: DType,
    /// Full, unfiltered, dataset-nav-ordered data, one `extra_shape`-sized
    /// element per nav position.
    data: Vec<u8>,
}

impl AuxBuffer {
    pub fn new(extra_shape: Shape, dtype: DType, data: Vec<u8>) -> Result<Self> {
        let elem_bytes = extra_shape.size() as usize * dtype.size_of();
        if elem_bytes != 0 && data.len() % elem_bytes != 0 {
            return Err(Error::Shape(format!(
                "aux data length {} is not a multiple of element size {}",
                data.len(),
                elem_bytes
            )));
        }
        Ok(AuxBuffer {
            extra_shape,
            dtype,
            data,
        })
    }

    /// Slices this aux buffer's data down to the nav positions
    /// `[orig_start, orig_end)` of one partition, respecting `roi` (the
    /// dataset-wide ROI, same coordinate space as this buffer's own data).
    /// Returned as a plain `Buffer` of `kind=Nav` with storage already
    /// populated, matching `copy_for_partition`'s aux-slicing behaviour in
    /// the engine this was distilled from.
    pub fn slice_for_partition(&self, orig_start: u64, orig_end: u64, roi: Option<&[bool]>) -> Result<Buffer> {
        let elem_bytes = self.extra_shape.size() as usize * self.dtype.size_of();
        let mut sliced = Vec::new();
        match roi {
            None => {
                let start_byte = orig_start as usize * elem_bytes;
                let end_byte = orig_end as usize * elem_bytes;
                sliced.extend_from_slice(&self.data[start_byte..end_byte]);
            }
            Some(roi) => {
                for idx in orig_start..orig_end {
                    if roi[idx as usize] {
                        let start_byte = idx as usize * elem_bytes;
                        sliced.extend_from_slice(&self.data[start_byte..start_byte + elem_bytes]);
                    }
                }
            }
        }
        let mut buf = Buffer::new(BufferKind::Nav, self.extra_shape.clone(), self.dtype, Where::Host);
        let partition_nav = Shape::new(vec![orig_end - orig_start], 0);
        let partition_roi = roi.map(|r| r[orig_start as usize..orig_end as usize].to_vec());
        buf.set_shape_partition(
            &partition_nav,
            &Shape::new(Vec::<u64>::new(), 0),
            partition_roi.as_deref(),
        );
        buf.adopt_storage(sliced)?;
        Ok(buf)
    }

    /// The compressed nav count for a `[orig_start, orig_end)` range under
    /// `roi`, matching `Buffer`'s own popcount convention.
    pub fn compressed_len(&self, orig_start: u64, orig_end: u64, roi: Option<&[bool]>) -> u64 {
        match roi {
            None => orig_end - orig_start,
            Some(roi) => popcount(roi, orig_end) - popcount(roi, orig_start),
        }
    }
}

impl Buffer {
    /// Adopts pre-populated storage for the current binding, bypassing
    /// `allocate`'s zero-initialisation. Used only by `AuxBuffer` slicing.
    pub(crate) fn adopt_storage(&mut self, data: Vec<u8>) -> Result<()> {
        let expected = self.full_shape()?.size() as usize * self.dtype.size_of();
        if data.len() != expected {
            return Err(Error::Shape(format!(
                "aux slice has {} bytes, expected {}",
                data.len(),
                expected
            )));
        }
        self.storage = Some(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_for_partition_without_roi_is_contiguous_copy() {
        let extra = Shape::new(vec![3], 1);
        let data: Vec<u8> = (0u8..(8 * 3 * 4)).collect();
        let aux = AuxBuffer::new(extra, DType::Float32, data).unwrap();
        let buf = aux.slice_for_partition(2, 5, None).unwrap();
        assert_eq!(buf.full_shape().unwrap().size(), 3 * 3);
    }

    #[test]
    fn slice_for_partition_with_roi_drops_unselected_positions() {
        let extra = Shape::new(Vec::<u64>::new(), 0);
        let data: Vec<u8> = (0u8..8 * 4).collect();
        let aux = AuxBuffer::new(extra, DType::Float32, data).unwrap();
        let roi = vec![true, false, true, true, false, true, true, false];
        let buf = aux.slice_for_partition(2, 6, Some(&roi)).unwrap();
        // positions 2,3,4,5 -> true,true,false,true => 3 selected
        assert_eq!(buf.full_shape().unwrap().size(), 3);
    }
}

//! `UDFMeta`: an immutable per-(partition, tiling) snapshot of context,
//! handed to every UDF before each dispatch.

use crate::common::backend::DeviceClass;
use crate::common::dtype::DType;
use crate::common::shape::Shape;
use crate::common::slice::Slice;

/// Tiling parameters negotiated by the external `Negotiator` collaborator;
/// opaque to the engine beyond what the tile iterator needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TilingScheme {
    pub depth: u64,
    pub total_size: u64,
}

/// Immutable per-(partition, tiling) snapshot of context, with one mutable
/// field (`slice`) the runner updates before each `process_*` dispatch.
///
/// Field-for-field this mirrors the reference implementation's `UDFMeta`:
/// `partition_shape` (ROI-adjusted), `dataset_shape`, `roi` (reshaped to
/// nav), dtypes, tiling scheme/index, corrections and device class.
#[derive(Clone, Debug)]
pub struct UDFMeta<C> {
    partition_shape: Option<Shape>,
    dataset_shape: Shape,
    roi: Option<Vec<bool>>,
    dataset_dtype: DType,
    input_dtype: DType,
    tiling_scheme: Option<TilingScheme>,
    tiling_index: usize,
    corrections: C,
    device_class: DeviceClass,
    slice: Option<Slice>,
}

impl<C: Clone> UDFMeta<C> {
    /// Dataset-level meta: no partition, no tiling scheme yet. Used while
    /// sizing global buffers and running dataset-level `preprocess`.
    pub fn for_dataset(
        dataset_shape: Shape,
        roi: Option<Vec<bool>>,
        dataset_dtype: DType,
        input_dtype: DType,
        corrections: C,
    ) -> Self {
        UDFMeta {
            partition_shape: None,
            dataset_shape,
            roi,
            dataset_dtype,
            input_dtype,
            tiling_scheme: None,
            tiling_index: 0,
            corrections,
            device_class: DeviceClass::Cpu,
            slice: None,
        }
    }

    /// Partition-level meta, before tiling has been negotiated.
    #[allow(clippy::too_many_arguments)]
    pub fn for_partition(
        partition_shape: Shape,
        dataset_shape: Shape,
        roi: Option<Vec<bool>>,
        dataset_dtype: DType,
        input_dtype: DType,
        corrections: C,
        device_class: DeviceClass,
    ) -> Self {
        UDFMeta {
            partition_shape: Some(partition_shape),
            dataset_shape,
            roi,
            dataset_dtype,
            input_dtype,
            tiling_scheme: None,
            tiling_index: 0,
            corrections,
            device_class,
            slice: None,
        }
    }

    /// Returns a copy of this meta with the tiling scheme attached, as the
    /// runner does once the negotiator has produced one.
    pub fn with_tiling_scheme(&self, scheme: TilingScheme) -> Self {
        let mut next = self.clone();
        next.tiling_scheme = Some(scheme);
        next
    }

    pub fn partition_shape(&self) -> Option<&Shape> {
        self.partition_shape.as_ref()
    }

    pub fn dataset_shape(&self) -> &Shape {
        &self.dataset_shape
    }

    pub fn roi(&self) -> Option<&[bool]> {
        self.roi.as_deref()
    }

    pub fn dataset_dtype(&self) -> DType {
        self.dataset_dtype
    }

    pub fn input_dtype(&self) -> DType {
        self.input_dtype
    }

    pub fn tiling_scheme(&self) -> Option<&TilingScheme> {
        self.tiling_scheme.as_ref()
    }

    pub fn tiling_index(&self) -> usize {
        self.tiling_index
    }

    pub fn corrections(&self) -> &C {
        &self.corrections
    }

    pub fn device_class(&self) -> DeviceClass {
        self.device_class
    }

    pub fn slice(&self) -> Option<&Slice> {
        self.slice.as_ref()
    }

    pub fn set_slice(&mut self, slice: Slice) {
        self.slice = Some(slice);
    }

    pub fn clear_slice(&mut self) {
        self.slice = None;
    }
}

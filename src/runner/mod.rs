//! `PartitionRunner`: executes one (partition × UDF-set) tuple through its
//! `Init -> Negotiated -> Streaming -> Finalized` lifecycle. Each state is
//! its own type (consuming `self`, returning the next state), so a caller
//! cannot skip a step or call one twice — the teacher's own phased
//! `sched::scheduler` (init threads -> inject -> run) suggested the same
//! shape for a hand-rolled state machine over an external resource; here
//! the "resource" is the worker's device id and thread-count pin, scoped
//! by the guards carried through every state.

use crate::buffer::group::BufferGroup;
use crate::collab::{DeviceBackend, Negotiator, Partition, Tile, TileFrames};
use crate::common::backend::{Backend, BackendTag, DeviceClass};
use crate::common::corrections::Corrections;
use crate::common::dtype::fold_promote;
use crate::common::meta::UDFMeta;
use crate::common::shape::Shape;
use crate::common::slice::{Origin, Slice};
use crate::device::{DeviceGuard, ThreadLimitGuard};
use crate::error::{Error, Result};
use crate::udf::{Processing, Udf};

fn backend_tag_for(device_class: DeviceClass, backends: &std::collections::HashSet<Backend>) -> Result<BackendTag> {
    match device_class {
        DeviceClass::Cpu => {
            if backends.contains(&Backend::CpuNative) {
                Ok(BackendTag::Numpy)
            } else {
                Err(Error::Config(
                    "udf does not declare cpu-native and cannot run on a cpu worker".into(),
                ))
            }
        }
        DeviceClass::Cuda => {
            if backends.contains(&Backend::CudaNative) {
                Ok(BackendTag::Cuda)
            } else if backends.contains(&Backend::DeviceNative) {
                Ok(BackendTag::Cupy)
            } else {
                Err(Error::Config(
                    "udf does not declare cuda-native or device-native and cannot run on a cuda worker".into(),
                ))
            }
        }
    }
}

struct UdfSlot<C: Corrections> {
    udf: Box<dyn Udf<C>>,
    tag: BackendTag,
    task_data: BufferGroup,
    results: BufferGroup,
}

/// Runner state before tiling has been negotiated: UDFs are bound, their
/// result buffers allocated against the partition, and `preprocess` has
/// run.
pub struct Init<C: Corrections> {
    slots: Vec<UdfSlot<C>>,
    meta: UDFMeta<C>,
    partition_roi: Option<Vec<bool>>,
    partition_slice: Slice,
    _device_guard: DeviceGuard,
    _thread_guard: Option<ThreadLimitGuard>,
}

impl<C: Corrections> Init<C> {
    /// Starts a run of `udfs` over one partition. `roi` is the partition-
    /// local ROI slice (already computed by the dispatcher's
    /// `roi_for_partition`), the same length as the partition's unfiltered
    /// nav extent.
    #[allow(clippy::too_many_arguments)]
    pub fn new<P: Partition>(
        partition: &P,
        partition_slice: &Slice,
        dataset_shape: Shape,
        udfs: Vec<Box<dyn Udf<C>>>,
        roi: Option<Vec<bool>>,
        corrections: C,
        device_class: DeviceClass,
        device_id: Option<u32>,
        thread_limit: Option<usize>,
    ) -> Result<Self> {
        let device_guard = DeviceGuard::acquire(device_class, device_id)?;
        let thread_guard = match thread_limit {
            Some(limit) => Some(ThreadLimitGuard::acquire(limit)?),
            None => None,
        };

        let input_dtype = fold_promote(
            partition.dtype(),
            udfs.iter().map(|u| u.get_preferred_input_dtype()),
        );
        // `roi` here is partition-local (0-based, one entry per position in
        // this partition's unfiltered nav extent) — not the dataset-wide
        // mask `Slice::adjust_for_roi` expects, so the compressed nav count
        // is folded in directly rather than routed through that method.
        let partition_shape = match roi.as_deref() {
            Some(local_roi) => {
                let count = local_roi.iter().filter(|&&b| b).count() as u64;
                partition_slice.shape().with_flat_nav_count(count)
            }
            None => partition_slice.shape().clone(),
        };
        let meta = UDFMeta::for_partition(
            partition_shape,
            dataset_shape,
            roi.clone(),
            partition.dtype(),
            input_dtype,
            corrections,
            device_class,
        );

        let dataset_sig = meta.dataset_shape().sig();
        let partition_nav = partition_slice.shape().nav();
        let mut slots = Vec::with_capacity(udfs.len());
        for mut udf in udfs {
            let tag = backend_tag_for(device_class, &udf.get_backends())?;
            let task_data = udf.get_task_data(&meta);
            let mut results = udf.get_result_buffers(&meta);
            results.allocate_for_partition(&partition_nav, &dataset_sig, roi.as_deref())?;
            udf.preprocess(&meta, &mut results)?;
            slots.push(UdfSlot {
                udf,
                tag,
                task_data,
                results,
            });
        }

        log::debug!(
            "runner init: {} udf(s), input dtype {:?}, device class {:?}",
            slots.len(),
            meta.input_dtype(),
            device_class
        );

        Ok(Init {
            slots,
            meta,
            partition_roi: roi,
            partition_slice: partition_slice.clone(),
            _device_guard: device_guard,
            _thread_guard: thread_guard,
        })
    }

    /// Negotiates a tiling scheme from the combined UDF preferences and
    /// advances to `Streaming`. Uses the ROI-adjusted partition shape
    /// computed in `new`, so the caller need not recompute it.
    pub fn negotiate<P: Partition>(self, partition: &P, negotiator: &dyn Negotiator) -> Negotiated<C> {
        let preferences: Vec<_> = self.slots.iter().map(|s| s.udf.get_tiling_preferences()).collect();
        let partition_shape = self
            .meta
            .partition_shape()
            .expect("partition-level meta always carries a partition_shape")
            .clone();
        let scheme = negotiator.negotiate(
            &preferences,
            &partition_shape,
            self.meta.input_dtype(),
            self.partition_roi.as_deref(),
        );
        log::debug!("runner negotiated tiling: depth={} total_size={}", scheme.depth, scheme.total_size);
        let meta = self.meta.with_tiling_scheme(scheme.clone());
        let raw_tiles = partition.get_tiles(&scheme, self.partition_roi.as_deref(), meta.input_dtype());
        let tiles: Box<dyn Iterator<Item = Box<dyn Tile>>> =
            Box::new(raw_tiles.map(|t| Box::new(t) as Box<dyn Tile>));
        Negotiated {
            slots: self.slots,
            meta,
            partition_roi: self.partition_roi,
            partition_slice: self.partition_slice,
            tiles,
            _device_guard: self._device_guard,
            _thread_guard: self._thread_guard,
        }
    }
}

pub struct Negotiated<C: Corrections> {
    slots: Vec<UdfSlot<C>>,
    meta: UDFMeta<C>,
    partition_roi: Option<Vec<bool>>,
    partition_slice: Slice,
    tiles: Box<dyn Iterator<Item = Box<dyn Tile>>>,
    _device_guard: DeviceGuard,
    _thread_guard: Option<ThreadLimitGuard>,
}

impl<C: Corrections> Negotiated<C> {
    /// Streams every tile through each UDF in declared granularity and
    /// advances to `Finalized`. `device_backend` is required only if any
    /// UDF was assigned the `Cupy` tag.
    pub fn stream(mut self, device_backend: Option<&dyn DeviceBackend>) -> Result<Finalized<C>> {
        while let Some(tile) = self.tiles.next() {
            let tile_slice = tile.tile_slice().clone();
            let (orig_start, orig_end) = tile_slice.nav_range();
            let (c_start, c_end) =
                crate::common::slice::roi_compressed_range(self.partition_roi.as_deref(), orig_start, orig_end);
            if c_end - c_start == 0 {
                continue;
            }

            for slot in &mut self.slots {
                let host_bytes = tile.data();
                let dispatch_bytes = if slot.tag == BackendTag::Cupy {
                    let backend = device_backend.ok_or_else(|| {
                        Error::Device("udf requires a device backend but none was supplied".into())
                    })?;
                    backend.transfer_to_device(host_bytes)?
                } else {
                    host_bytes.to_vec()
                };

                match slot.udf.processing() {
                    Processing::Tile => {
                        slot.results.set_contiguous_view_for_tile(orig_start, orig_end)?;
                        self.meta.set_slice(tile_slice.clone());
                        slot.udf.process_tile(&self.meta, &mut slot.results, &dispatch_bytes)?;
                    }
                    Processing::Frame => {
                        for frame_idx in 0..tile.frame_count() {
                            slot.results.set_view_for_frame(orig_start, frame_idx)?;
                            self.meta.set_slice(frame_slice(&tile_slice, frame_idx));
                            slot.udf.process_frame(&self.meta, &mut slot.results, tile.frame_data(frame_idx))?;
                        }
                    }
                    Processing::Partition => {
                        slot.results.set_view_for_tile(orig_start, orig_end)?;
                        self.meta.set_slice(self.partition_slice.clone());
                        slot.udf.process_partition(&self.meta, &mut slot.results, &dispatch_bytes)?;
                    }
                }
            }
        }

        Ok(Finalized {
            slots: self.slots,
            meta: self.meta,
            _device_guard: self._device_guard,
            _thread_guard: self._thread_guard,
        })
    }
}

/// The leading axis of `tile_slice` addressed at a single frame, as the
/// runner does for `Processing::Frame` dispatch.
fn frame_slice(tile_slice: &Slice, frame_idx: u64) -> Slice {
    let mut origin: Origin = tile_slice.origin().iter().cloned().collect();
    origin[0] += frame_idx;
    let mut dims = vec![1u64];
    dims.extend(tile_slice.shape().sig().dims().iter().cloned());
    Slice::new(origin, Shape::new(dims, tile_slice.shape().sig_dims()))
}

pub struct Finalized<C: Corrections> {
    slots: Vec<UdfSlot<C>>,
    meta: UDFMeta<C>,
    _device_guard: DeviceGuard,
    _thread_guard: Option<ThreadLimitGuard>,
}

impl<C: Corrections> Finalized<C> {
    /// Flushes, post-processes and exports every UDF's results, returning
    /// them in declaration order. The device/thread guards drop (and
    /// restore prior state) when the returned `Vec` goes out of scope with
    /// `self`.
    pub fn finish(mut self) -> Result<Vec<BufferGroup>> {
        self.meta.clear_slice();
        let mut out = Vec::with_capacity(self.slots.len());
        for slot in &mut self.slots {
            slot.results.flush()?;
            slot.results.clear_views();
            slot.udf.postprocess(&self.meta, &mut slot.results)?;
            slot.udf.cleanup();
            slot.results.clear_views();
            slot.results.export()?;
        }
        for slot in self.slots {
            out.push(slot.results);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_tag_for_cpu_worker_requires_cpu_native() {
        let mut backends = std::collections::HashSet::new();
        backends.insert(Backend::CudaNative);
        assert!(backend_tag_for(DeviceClass::Cpu, &backends).is_err());
        backends.insert(Backend::CpuNative);
        assert_eq!(backend_tag_for(DeviceClass::Cpu, &backends).unwrap(), BackendTag::Numpy);
    }

    #[test]
    fn backend_tag_for_cuda_worker_prefers_cuda_native_over_device_native() {
        let mut backends = std::collections::HashSet::new();
        backends.insert(Backend::CudaNative);
        assert_eq!(backend_tag_for(DeviceClass::Cuda, &backends).unwrap(), BackendTag::Cuda);
        let mut backends2 = std::collections::HashSet::new();
        backends2.insert(Backend::DeviceNative);
        assert_eq!(backend_tag_for(DeviceClass::Cuda, &backends2).unwrap(), BackendTag::Cupy);
    }
}

//! End-to-end scenarios driving the full Dataset -> Dispatcher -> Runner ->
//! merge pipeline through in-process fake collaborators (a dataset backed by
//! an in-memory `f32` array, a fixed-depth negotiator, and an executor that
//! runs each task's `PartitionRunner` inline instead of shipping it anywhere).

use gridreduce::buffer::{Buffer, BufferGroup, BufferKind, Where};
use gridreduce::collab::{Dataset, Executor, Negotiator, Partition, Tile, TileFrames};
use gridreduce::common::slice::Origin;
use gridreduce::dispatcher;
use gridreduce::dispatcher::task::{resolve_backends, resources_for, ResourceRequest, Task};
use gridreduce::runner::Init;
use gridreduce::udf::{Processing, Udf};
use gridreduce::{Backend, DType, DeviceClass, EngineConfig, NoCorrections, NullProgress, ProgressSink, Result, Shape, Slice, TilingPreferences, TilingScheme, UDFMeta};
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;

// ---------------------------------------------------------------------
// Fake dataset: an in-memory (nav_len, 16, 16) float32 array, partitioned
// into fixed-size contiguous nav chunks.
// ---------------------------------------------------------------------

fn init_logging() {
    let _ = env_logger::try_init();
}

const SIG_LEN: usize = 256; // 16 * 16

fn bytes_of(frame: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.len() * 4);
    for v in frame {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

struct FrameDataset {
    shape: Shape,
    dtype: DType,
    data: Arc<Vec<f32>>,
    partition_len: u64,
}

impl Dataset for FrameDataset {
    type Partition = FramePartition;

    fn shape(&self) -> &Shape {
        &self.shape
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn get_partitions(&self) -> Vec<FramePartition> {
        let nav_len = self.shape.nav().size();
        let sig = self.shape.sig();
        let mut partitions = Vec::new();
        let mut start = 0u64;
        while start < nav_len {
            let end = (start + self.partition_len).min(nav_len);
            let slice = Slice::new(
                Origin::from_slice(&[start, 0, 0]),
                Shape::new(vec![end - start, 16, 16], 2),
            );
            partitions.push(FramePartition {
                start,
                end,
                sig: sig.clone(),
                dtype: self.dtype,
                data: self.data.clone(),
                slice,
            });
            start = end;
        }
        partitions
    }
}

struct FramePartition {
    start: u64,
    end: u64,
    sig: Shape,
    dtype: DType,
    data: Arc<Vec<f32>>,
    slice: Slice,
}

impl Partition for FramePartition {
    type Tile = FrameTile;
    type Corrections = NoCorrections;

    fn slice(&self) -> &Slice {
        &self.slice
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn meta_shape(&self) -> &Shape {
        self.slice.shape()
    }

    fn get_tiles(&self, scheme: &TilingScheme, roi: Option<&[bool]>, _dest_dtype: DType) -> Box<dyn Iterator<Item = FrameTile>> {
        let partition_len = self.end - self.start;
        let depth = scheme.depth.max(1);
        let mut tiles = Vec::new();
        let mut local_start = 0u64;
        while local_start < partition_len {
            let local_end = (local_start + depth).min(partition_len);
            let mut frames = Vec::new();
            for local_pos in local_start..local_end {
                let active = roi.map(|r| r[local_pos as usize]).unwrap_or(true);
                if !active {
                    continue;
                }
                let abs_pos = (self.start + local_pos) as usize;
                let frame = &self.data[abs_pos * SIG_LEN..(abs_pos + 1) * SIG_LEN];
                frames.push(bytes_of(frame));
            }
            let flat: Vec<u8> = frames.iter().flatten().cloned().collect();
            let tile_slice = Slice::new(
                Origin::from_slice(&[local_start, 0, 0]),
                Shape::new(vec![local_end - local_start, 16, 16], self.sig.sig_dims()),
            );
            tiles.push(FrameTile {
                tile_slice,
                frames,
                flat,
            });
            local_start = local_end;
        }
        Box::new(tiles.into_iter())
    }

    fn set_corrections(&mut self, _corrections: NoCorrections) {}

    fn get_locations(&self) -> Vec<String> {
        vec!["local".to_string()]
    }
}

struct FrameTile {
    tile_slice: Slice,
    frames: Vec<Vec<u8>>,
    flat: Vec<u8>,
}

impl TileFrames for FrameTile {
    fn frame_count(&self) -> u64 {
        self.frames.len() as u64
    }

    fn frame_data(&self, index: u64) -> &[u8] {
        &self.frames[index as usize]
    }
}

impl Tile for FrameTile {
    fn tile_slice(&self) -> &Slice {
        &self.tile_slice
    }

    fn data(&self) -> &[u8] {
        &self.flat
    }
}

struct FixedDepthNegotiator {
    depth: u64,
}

impl Negotiator for FixedDepthNegotiator {
    fn negotiate(&self, _preferences: &[TilingPreferences], _partition_shape: &Shape, _read_dtype: DType, _roi: Option<&[bool]>) -> TilingScheme {
        TilingScheme {
            depth: self.depth,
            total_size: self.depth * SIG_LEN as u64 * 4,
        }
    }
}

/// Runs each task's `PartitionRunner` to completion inline — the fake
/// stand-in for a local/cluster executor.
struct LocalExecutor {
    dataset_shape: Shape,
    negotiator: FixedDepthNegotiator,
}

impl<P, C> Executor<Task<P, C>, Vec<BufferGroup>> for LocalExecutor
where
    P: Partition<Corrections = C> + Send + 'static,
    C: gridreduce::Corrections,
{
    fn run_tasks(&self, tasks: Vec<Task<P, C>>, _cancel_id: &str) -> Result<Box<dyn Iterator<Item = (Vec<BufferGroup>, Task<P, C>)>>> {
        let mut out = Vec::with_capacity(tasks.len());
        for task in tasks {
            let Task {
                meta,
                partition,
                udfs,
                corrections,
            } = task;
            let init = Init::new(
                &partition,
                partition.slice(),
                self.dataset_shape.clone(),
                udfs,
                meta.roi.clone(),
                corrections.clone(),
                DeviceClass::Cpu,
                None,
                None,
            )?;
            let negotiated = init.negotiate(&partition, &self.negotiator);
            let finalized = negotiated.stream(None)?;
            let results = finalized.finish()?;
            out.push((
                results,
                Task {
                    meta,
                    partition,
                    udfs: Vec::new(),
                    corrections,
                },
            ));
        }
        Ok(Box::new(out.into_iter()))
    }

    fn run_tasks_async(
        &self,
        tasks: Vec<Task<P, C>>,
        cancel_id: &str,
    ) -> Result<Pin<Box<dyn futures::stream::Stream<Item = (Vec<BufferGroup>, Task<P, C>)> + Send>>> {
        let out = Executor::run_tasks(self, tasks, cancel_id)?.collect::<Vec<_>>();
        Ok(Box::pin(futures::stream::iter(out)))
    }

    fn cancel(&self, _cancel_id: &str) {}
}

fn build_dataset(nav_len: u64, partition_len: u64, data: Vec<f32>) -> FrameDataset {
    assert_eq!(data.len(), nav_len as usize * SIG_LEN);
    FrameDataset {
        shape: Shape::new(vec![nav_len, 16, 16], 2),
        dtype: DType::Float32,
        data: Arc::new(data),
        partition_len,
    }
}

// ---------------------------------------------------------------------
// UDFs
// ---------------------------------------------------------------------

struct PixelSum;

impl Udf<NoCorrections> for PixelSum {
    fn processing(&self) -> Processing {
        Processing::Frame
    }

    fn get_result_buffers(&self, _meta: &UDFMeta<NoCorrections>) -> BufferGroup {
        let mut group = BufferGroup::new();
        group
            .declare(
                "pixelsum",
                Buffer::new(BufferKind::Nav, Shape::new(Vec::<u64>::new(), 0), DType::Float32, Where::Host),
            )
            .unwrap();
        group
    }

    fn process_frame(&mut self, _meta: &UDFMeta<NoCorrections>, results: &mut BufferGroup, frame: &[u8]) -> Result<()> {
        let sum: f32 = frame
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .sum();
        results.view_or_data_mut("pixelsum")?.copy_from_slice(&sum.to_le_bytes());
        Ok(())
    }
}

struct SigAccumulator;

impl Udf<NoCorrections> for SigAccumulator {
    fn processing(&self) -> Processing {
        Processing::Partition
    }

    fn get_result_buffers(&self, _meta: &UDFMeta<NoCorrections>) -> BufferGroup {
        let mut group = BufferGroup::new();
        group
            .declare(
                "acc",
                Buffer::new(BufferKind::Sig, Shape::new(Vec::<u64>::new(), 0), DType::Float32, Where::Host),
            )
            .unwrap();
        group
    }

    fn process_partition(&mut self, _meta: &UDFMeta<NoCorrections>, results: &mut BufferGroup, tile: &[u8]) -> Result<()> {
        let frame_bytes = SIG_LEN * 4;
        let frame_count = tile.len() / frame_bytes;
        let acc = results.view_or_data_mut("acc")?;
        for fi in 0..frame_count {
            let frame = &tile[fi * frame_bytes..(fi + 1) * frame_bytes];
            for i in 0..SIG_LEN {
                let v = f32::from_le_bytes([frame[i * 4], frame[i * 4 + 1], frame[i * 4 + 2], frame[i * 4 + 3]]);
                let cur = f32::from_le_bytes([acc[i * 4], acc[i * 4 + 1], acc[i * 4 + 2], acc[i * 4 + 3]]);
                acc[i * 4..i * 4 + 4].copy_from_slice(&(cur + v).to_le_bytes());
            }
        }
        Ok(())
    }

    fn merge(&self, _meta: &UDFMeta<NoCorrections>, dest: &mut BufferGroup, src: &BufferGroup) -> Result<()> {
        let src_bytes = src.view_or_data("acc")?.to_vec();
        let dest_bytes = dest.view_or_data_mut("acc")?;
        for i in 0..(dest_bytes.len() / 4) {
            let a = f32::from_le_bytes([dest_bytes[i * 4], dest_bytes[i * 4 + 1], dest_bytes[i * 4 + 2], dest_bytes[i * 4 + 3]]);
            let b = f32::from_le_bytes([src_bytes[i * 4], src_bytes[i * 4 + 1], src_bytes[i * 4 + 2], src_bytes[i * 4 + 3]]);
            dest_bytes[i * 4..i * 4 + 4].copy_from_slice(&(a + b).to_le_bytes());
        }
        Ok(())
    }
}

struct BackendUdf {
    backends: Vec<Backend>,
}

impl Udf<NoCorrections> for BackendUdf {
    fn processing(&self) -> Processing {
        Processing::Frame
    }

    fn get_result_buffers(&self, _meta: &UDFMeta<NoCorrections>) -> BufferGroup {
        BufferGroup::new()
    }

    fn get_backends(&self) -> HashSet<Backend> {
        self.backends.iter().cloned().collect()
    }
}

fn f32_bytes(bytes: &[u8], i: usize) -> f32 {
    f32::from_le_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
}

// ---------------------------------------------------------------------
// Scenario 1: pixel sum
// ---------------------------------------------------------------------

#[test]
fn pixel_sum_matches_direct_frame_sums() {
    init_logging();
    let nav_len = 16u64;
    let data: Vec<f32> = (0..nav_len as usize * SIG_LEN).map(|i| (i % 97) as f32 * 0.5).collect();
    let dataset = build_dataset(nav_len, 4, data.clone());
    let executor = LocalExecutor {
        dataset_shape: dataset.shape().clone(),
        negotiator: FixedDepthNegotiator { depth: 3 },
    };

    let results = dispatcher::run_for_dataset(
        &dataset,
        &executor,
        |_| -> Vec<Box<dyn Udf<NoCorrections>>> { vec![Box::new(PixelSum)] },
        None,
        NoCorrections,
        None,
        &NullProgress,
        &EngineConfig::default(),
    )
    .unwrap();

    let pixelsum = results[0].get("pixelsum").unwrap();
    let bytes = pixelsum.raw_data().unwrap();
    for pos in 0..nav_len as usize {
        let expected: f32 = data[pos * SIG_LEN..(pos + 1) * SIG_LEN].iter().sum();
        let got = f32_bytes(bytes, pos);
        assert!((got - expected).abs() < 1e-2, "pos {}: got {} expected {}", pos, got, expected);
    }
}

// ---------------------------------------------------------------------
// Scenario 2: ROI
// ---------------------------------------------------------------------

#[test]
fn roi_compresses_pixelsum_to_selected_positions_in_order() {
    init_logging();
    let nav_len = 16u64;
    let data: Vec<f32> = (0..nav_len as usize * SIG_LEN).map(|i| (i % 53) as f32).collect();
    let dataset = build_dataset(nav_len, 4, data.clone());
    let executor = LocalExecutor {
        dataset_shape: dataset.shape().clone(),
        negotiator: FixedDepthNegotiator { depth: 3 },
    };

    // checkerboard over the flattened (4,4) nav shape
    let roi: Vec<bool> = (0..nav_len).map(|i| i % 2 == 0).collect();

    let results = dispatcher::run_for_dataset(
        &dataset,
        &executor,
        |_| -> Vec<Box<dyn Udf<NoCorrections>>> { vec![Box::new(PixelSum)] },
        Some(roi.clone()),
        NoCorrections,
        None,
        &NullProgress,
        &EngineConfig::default(),
    )
    .unwrap();

    let pixelsum = results[0].get("pixelsum").unwrap();
    assert_eq!(pixelsum.full_shape().unwrap().size(), 8);
    let bytes = pixelsum.raw_data().unwrap();

    let selected: Vec<usize> = roi.iter().enumerate().filter(|(_, &b)| b).map(|(i, _)| i).collect();
    for (k, &pos) in selected.iter().enumerate() {
        let expected: f32 = data[pos * SIG_LEN..(pos + 1) * SIG_LEN].iter().sum();
        let got = f32_bytes(bytes, k);
        assert!((got - expected).abs() < 1e-2, "selected {}: got {} expected {}", k, got, expected);
    }
}

// ---------------------------------------------------------------------
// Scenario 3: dtype promotion
// ---------------------------------------------------------------------

#[test]
fn dtype_promotion_follows_the_numeric_lattice() {
    use gridreduce::common::dtype::fold_promote;
    assert_eq!(fold_promote(DType::Int16, vec![DType::Float32]), DType::Float32);
    assert_eq!(fold_promote(DType::Complex64, vec![DType::Bool]), DType::Complex64);
}

// ---------------------------------------------------------------------
// Scenario 4: sig accumulator
// ---------------------------------------------------------------------

#[test]
fn sig_accumulator_sums_to_nav_count_times_ones() {
    init_logging();
    let nav_len = 6u64;
    let data: Vec<f32> = vec![1.0; nav_len as usize * SIG_LEN];
    let dataset = build_dataset(nav_len, 2, data);
    let executor = LocalExecutor {
        dataset_shape: dataset.shape().clone(),
        negotiator: FixedDepthNegotiator { depth: 2 },
    };

    let results = dispatcher::run_for_dataset(
        &dataset,
        &executor,
        |_| -> Vec<Box<dyn Udf<NoCorrections>>> { vec![Box::new(SigAccumulator)] },
        None,
        NoCorrections,
        None,
        &NullProgress,
        &EngineConfig::default(),
    )
    .unwrap();

    let acc = results[0].get("acc").unwrap();
    let bytes = acc.raw_data().unwrap();
    assert_eq!(bytes.len() / 4, SIG_LEN);
    for i in 0..SIG_LEN {
        let got = f32_bytes(bytes, i);
        assert!((got - nav_len as f32).abs() < 1e-3, "element {}: got {} expected {}", i, got, nav_len);
    }
}

// ---------------------------------------------------------------------
// Scenario 5: backend intersection
// ---------------------------------------------------------------------

#[test]
fn backend_intersection_narrows_to_the_dispatcher_filter() {
    let udfs: Vec<Box<dyn Udf<NoCorrections>>> = vec![
        Box::new(BackendUdf {
            backends: vec![Backend::CpuNative, Backend::DeviceNative],
        }),
        Box::new(BackendUdf {
            backends: vec![Backend::CpuNative],
        }),
    ];
    let mut filter = HashSet::new();
    filter.insert(Backend::CpuNative);
    let backends = resolve_backends(&udfs, Some(&filter)).unwrap();
    let resources = resources_for(&backends).unwrap();
    assert_eq!(resources, ResourceRequest { cpu: 1, cuda: 0, compute: 1 });
}

#[test]
fn backend_intersection_empty_after_filter_is_a_config_error() {
    let udfs: Vec<Box<dyn Udf<NoCorrections>>> = vec![
        Box::new(BackendUdf {
            backends: vec![Backend::CpuNative, Backend::DeviceNative],
        }),
        Box::new(BackendUdf {
            backends: vec![Backend::CpuNative],
        }),
    ];
    let mut filter = HashSet::new();
    filter.insert(Backend::DeviceNative);
    assert!(resolve_backends(&udfs, Some(&filter)).is_err());
}

// ---------------------------------------------------------------------
// Scenario 6: async streaming
// ---------------------------------------------------------------------

#[test]
fn async_dispatch_yields_one_snapshot_per_partition() {
    init_logging();
    use futures::stream::StreamExt;

    let nav_len = 6u64;
    let data: Vec<f32> = (0..nav_len as usize * SIG_LEN).map(|i| i as f32).collect();
    let dataset = build_dataset(nav_len, 2, data);
    let executor = LocalExecutor {
        dataset_shape: dataset.shape().clone(),
        negotiator: FixedDepthNegotiator { depth: 2 },
    };
    let progress: Arc<dyn ProgressSink + Send + Sync> = Arc::new(NullProgress);

    let stream = dispatcher::run_for_dataset_async(
        dataset,
        executor,
        |_| -> Vec<Box<dyn Udf<NoCorrections>>> { vec![Box::new(PixelSum)] },
        None,
        NoCorrections,
        None,
        progress,
        EngineConfig::default(),
    )
    .unwrap();

    let snapshots = futures_executor::block_on(stream.collect::<Vec<_>>());
    assert_eq!(snapshots.len(), 3, "one snapshot per partition (6 nav / 2 per partition)");
    for snapshot in &snapshots {
        assert!(snapshot.is_ok());
    }
    let last = snapshots.last().unwrap().as_ref().unwrap();
    assert_eq!(last[0].get("pixelsum").unwrap().full_shape().unwrap().size(), nav_len);
}

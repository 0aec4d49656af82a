//! Traits for every subsystem this engine treats as an external
//! collaborator: dataset readers and their partition/tile iterators, the
//! tiling negotiator, the task executor, the device backend and progress
//! reporting. None of these are implemented here — the runner and
//! dispatcher only ever call through these seams.

use crate::common::dtype::DType;
use crate::common::meta::TilingScheme;
use crate::common::shape::Shape;
use crate::common::slice::Slice;
use crate::error::Result;
use crate::udf::TilingPreferences;
use futures::stream::Stream;
use std::pin::Pin;

/// A dataset: the top-level addressable array this engine reduces over.
pub trait Dataset {
    type Partition: Partition;

    fn shape(&self) -> &Shape;
    fn dtype(&self) -> DType;
    fn get_partitions(&self) -> Vec<Self::Partition>;
}

/// One contiguous block of navigation positions, owned by a single reader
/// unit. Produces its own tile iterator once a `TilingScheme` has been
/// negotiated.
pub trait Partition {
    type Tile: Tile + 'static;
    type Corrections;

    fn slice(&self) -> &Slice;
    fn dtype(&self) -> DType;
    fn meta_shape(&self) -> &Shape;

    /// `roi` is partition-local: one entry per position in this
    /// partition's unfiltered nav extent, 0-based from the partition's own
    /// start — the same slice the dispatcher computes via `roi_for_partition`
    /// and the runner binds result buffers against. Every returned tile's
    /// `tile_slice()` must address this same partition-local nav range
    /// (0-based), not the dataset-absolute range `Partition::slice()`
    /// itself uses — the runner feeds tile nav ranges straight into
    /// partition-bound buffer views, which only make sense in local
    /// coordinates.
    fn get_tiles(
        &self,
        tiling_scheme: &TilingScheme,
        roi: Option<&[bool]>,
        dest_dtype: DType,
    ) -> Box<dyn Iterator<Item = Self::Tile>>;
    fn set_corrections(&mut self, corrections: Self::Corrections);
    fn get_locations(&self) -> Vec<String>;
}

/// A sub-block of a partition produced by its tile iterator. Iterates as
/// frames along its leading (flat-nav) axis.
pub trait Tile: TileFrames {
    fn tile_slice(&self) -> &Slice;
    fn data(&self) -> &[u8];
}

/// Frame-wise iteration over a tile's leading axis, used by
/// `Processing::Frame` dispatch.
pub trait TileFrames {
    fn frame_count(&self) -> u64;
    fn frame_data(&self, index: u64) -> &[u8];
}

/// Negotiates a `TilingScheme` for one partition from a UDF set's combined
/// tiling preferences; honours them as soft hints only.
pub trait Negotiator {
    fn negotiate(
        &self,
        preferences: &[TilingPreferences],
        partition_shape: &Shape,
        read_dtype: DType,
        roi: Option<&[bool]>,
    ) -> TilingScheme;
}

/// Runs tasks to completion, sync or async, and reports their results as
/// they arrive. `Task`/`TaskResult` are generic so this trait does not
/// depend on `dispatcher::task`'s concrete types.
pub trait Executor<Task, TaskResult> {
    fn run_tasks(
        &self,
        tasks: Vec<Task>,
        cancel_id: &str,
    ) -> Result<Box<dyn Iterator<Item = (TaskResult, Task)>>>;

    fn run_tasks_async(
        &self,
        tasks: Vec<Task>,
        cancel_id: &str,
    ) -> Result<Pin<Box<dyn Stream<Item = (TaskResult, Task)> + Send>>>;

    /// Requests best-effort abort of every in-flight task registered under
    /// `cancel_id`. Partial results from cancelled tasks must not be
    /// yielded afterwards.
    fn cancel(&self, cancel_id: &str);
}

/// Host/device array capability set a UDF addresses through its backend
/// tag. The runner never calls this directly; it only decides, via
/// `BackendTag`, whether a host tile needs transferring to a device-
/// resident one before dispatch.
pub trait DeviceBackend {
    fn transfer_to_device(&self, host_tile: &[u8]) -> Result<Vec<u8>>;
    fn transfer_to_host(&self, device_tile: &[u8]) -> Result<Vec<u8>>;
}

/// Reports dispatch progress as a textual counter, matching the boolean
/// `tqdm`-style toggle of the original engine without pulling in a TUI
/// dependency.
pub trait ProgressSink {
    fn on_task_complete(&self, completed: usize, total: usize);
}

/// The default, silent `ProgressSink`.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn on_task_complete(&self, _completed: usize, _total: usize) {}
}

/// Logs one line per completed task via `log::info!`, matching the
/// teacher's own preference for `log` over a dedicated progress-bar crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct CountingProgress;

impl ProgressSink for CountingProgress {
    fn on_task_complete(&self, completed: usize, total: usize) {
        log::info!("progress: {}/{} partitions merged", completed, total);
    }
}

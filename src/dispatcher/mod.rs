//! `Dispatcher`: resource-aware task generation, global-buffer allocation,
//! the merge loop, and the sync/async dataset-level entry points.
//!
//! Tiling negotiation and tile iteration happen inside `PartitionRunner`,
//! on whatever worker the `Executor` collaborator runs a task on — the
//! dispatcher itself never touches a `Negotiator`; it only builds tasks,
//! hands them to the executor, and folds partial results back in.

pub mod task;

use crate::buffer::group::BufferGroup;
use crate::collab::{Dataset, Executor, Partition, ProgressSink};
use crate::common::backend::Backend;
use crate::common::corrections::Corrections;
use crate::common::dtype::fold_promote;
use crate::common::meta::UDFMeta;
use crate::common::slice::roi_compressed_range;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::udf::Udf;
use futures::stream::{self, Stream, StreamExt};
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use task::{debug_roundtrip_check, resolve_backends, resources_for, Task, TaskMeta};

fn validate_roi<D: Dataset>(dataset: &D, roi: &Option<Vec<bool>>) -> Result<()> {
    if let Some(roi) = roi {
        let expected = dataset.shape().nav().size();
        if roi.len() as u64 != expected {
            return Err(Error::Config(format!(
                "roi has {} entries, expected {} (dataset nav size)",
                roi.len(),
                expected
            )));
        }
    }
    Ok(())
}

struct Setup<C: Corrections> {
    dataset_meta: UDFMeta<C>,
    dataset_udfs: Vec<Box<dyn Udf<C>>>,
    globals: Vec<BufferGroup>,
    backends: HashSet<Backend>,
}

fn setup<D, C>(
    dataset: &D,
    udf_factory: &dyn Fn(Option<usize>) -> Vec<Box<dyn Udf<C>>>,
    roi: &Option<Vec<bool>>,
    corrections: &C,
    backends_filter: Option<&HashSet<Backend>>,
) -> Result<Setup<C>>
where
    D: Dataset,
    C: Corrections,
{
    validate_roi(dataset, roi)?;
    let mut dataset_udfs = udf_factory(None);
    let input_dtype = fold_promote(dataset.dtype(), dataset_udfs.iter().map(|u| u.get_preferred_input_dtype()));
    let dataset_meta = UDFMeta::for_dataset(
        dataset.shape().clone(),
        roi.clone(),
        dataset.dtype(),
        input_dtype,
        corrections.clone(),
    );

    let backends = resolve_backends(&dataset_udfs, backends_filter)?;

    let mut globals = Vec::with_capacity(dataset_udfs.len());
    for udf in &mut dataset_udfs {
        let mut group = udf.get_result_buffers(&dataset_meta);
        group.allocate_for_dataset(&dataset.shape().nav(), &dataset.shape().sig(), roi.as_deref())?;
        udf.preprocess(&dataset_meta, &mut group)?;
        globals.push(group);
    }

    Ok(Setup {
        dataset_meta,
        dataset_udfs,
        globals,
        backends,
    })
}

fn build_tasks<D, C>(
    dataset: &D,
    udf_factory: &dyn Fn(Option<usize>) -> Vec<Box<dyn Udf<C>>>,
    roi: &Option<Vec<bool>>,
    corrections: &C,
    backends: &HashSet<Backend>,
    cancel_id: &str,
    config: &EngineConfig,
) -> Result<Vec<Task<D::Partition, C>>>
where
    D: Dataset,
    D::Partition: Partition<Corrections = C>,
    C: Corrections,
{
    let resources = resources_for(backends)?;
    let mut tasks = Vec::new();
    for (index, mut partition) in dataset.get_partitions().into_iter().enumerate() {
        let (start, end) = partition.slice().nav_range();
        let partition_roi = roi.as_deref().map(|r| r[start as usize..end as usize].to_vec());
        if let Some(ref r) = partition_roi {
            if !r.iter().any(|&b| b) {
                continue;
            }
        }
        partition.set_corrections(corrections.clone());
        let meta = TaskMeta {
            partition_index: index,
            roi: partition_roi,
            backends: backends.iter().cloned().collect(),
            resources,
            cancel_id: cancel_id.to_string(),
        };
        if config.debug_serialization_check {
            debug_roundtrip_check("task meta", &meta)?;
        }
        tasks.push(Task {
            meta,
            partition,
            udfs: udf_factory(Some(index)),
            corrections: corrections.clone(),
        });
    }
    Ok(tasks)
}

/// Merges one partition's partial results into the running global state:
/// binds each global buffer's view to the partition's original (dataset-
/// coordinate) nav range — which, for a `kind=nav` buffer bound with the
/// dataset ROI, is exactly the ROI-compressed sub-range belonging to this
/// partition — calls the UDF's `merge`, then clears both sides' views.
fn merge_partial<C: Corrections>(
    dataset_meta: &UDFMeta<C>,
    udfs: &[Box<dyn Udf<C>>],
    globals: &mut [BufferGroup],
    partials: &mut [BufferGroup],
    orig_start: u64,
    orig_end: u64,
    config: &EngineConfig,
) -> Result<()> {
    if config.debug_serialization_check {
        for partial in partials.iter() {
            debug_roundtrip_check("partial result buffer group", partial)?;
        }
    }
    for ((udf, global), partial) in udfs.iter().zip(globals.iter_mut()).zip(partials.iter_mut()) {
        global.set_view_for_tile(orig_start, orig_end)?;
        partial.set_view_for_partition()?;
        udf.merge(dataset_meta, global, partial)?;
        global.clear_views();
        partial.clear_views();
    }
    Ok(())
}

/// Blocking dataset-level run. `udf_factory(None)` must build a UDF set
/// used to size and preprocess the global buffers; `udf_factory(Some(i))`
/// builds the (already partition-tailored, e.g. aux-resliced) UDF set
/// dispatched for partition `i`.
#[allow(clippy::too_many_arguments)]
pub fn run_for_dataset<D, E, C>(
    dataset: &D,
    executor: &E,
    udf_factory: impl Fn(Option<usize>) -> Vec<Box<dyn Udf<C>>>,
    roi: Option<Vec<bool>>,
    corrections: C,
    backends_filter: Option<HashSet<Backend>>,
    progress: &dyn ProgressSink,
    config: &EngineConfig,
) -> Result<Vec<BufferGroup>>
where
    D: Dataset,
    D::Partition: Partition<Corrections = C>,
    E: Executor<Task<D::Partition, C>, Vec<BufferGroup>>,
    C: Corrections,
{
    let Setup {
        dataset_meta,
        dataset_udfs,
        mut globals,
        backends,
    } = setup(dataset, &udf_factory, &roi, &corrections, backends_filter.as_ref())?;

    let cancel_id = uuid::Uuid::new_v4().to_string();
    let tasks = build_tasks(dataset, &udf_factory, &roi, &corrections, &backends, &cancel_id, config)?;
    let total = tasks.len();
    if total == 0 {
        return Ok(globals);
    }

    let arrivals = executor.run_tasks(tasks, &cancel_id)?;
    let mut completed = 0;
    for (mut partials, task) in arrivals {
        let (orig_start, orig_end) = task.partition.slice().nav_range();
        merge_partial(
            &dataset_meta,
            &dataset_udfs,
            &mut globals,
            &mut partials,
            orig_start,
            orig_end,
            config,
        )?;
        completed += 1;
        progress.on_task_complete(completed, total);
    }
    Ok(globals)
}

/// Streaming dataset-level run: yields a snapshot of the global result
/// groups after each merged partition, plus a final identical snapshot
/// when the executor's stream is empty from the start. Ownership of
/// `dataset`/`executor`/`udf_factory` is taken so the returned stream has
/// no borrowed lifetime to track.
#[allow(clippy::too_many_arguments)]
pub fn run_for_dataset_async<D, E, C, F>(
    dataset: D,
    executor: E,
    udf_factory: F,
    roi: Option<Vec<bool>>,
    corrections: C,
    backends_filter: Option<HashSet<Backend>>,
    progress: Arc<dyn ProgressSink + Send + Sync>,
    config: EngineConfig,
) -> Result<Pin<Box<dyn Stream<Item = Result<Vec<BufferGroup>>> + Send>>>
where
    D: Dataset + Send + Sync + 'static,
    D::Partition: Partition<Corrections = C> + Send + 'static,
    E: Executor<Task<D::Partition, C>, Vec<BufferGroup>> + Send + Sync + 'static,
    C: Corrections,
    F: Fn(Option<usize>) -> Vec<Box<dyn Udf<C>>> + Send + Sync + 'static,
{
    let Setup {
        dataset_meta,
        dataset_udfs,
        globals,
        backends,
    } = setup(&dataset, &udf_factory, &roi, &corrections, backends_filter.as_ref())?;

    let cancel_id = uuid::Uuid::new_v4().to_string();
    let tasks = build_tasks(&dataset, &udf_factory, &roi, &corrections, &backends, &cancel_id, &config)?;
    let total = tasks.len();

    if total == 0 {
        return Ok(Box::pin(stream::once(async move { Ok(globals) })));
    }

    let exec_stream = executor.run_tasks_async(tasks, &cancel_id)?;

    struct State<C: Corrections, D: Dataset> {
        exec_stream: Pin<Box<dyn Stream<Item = (Vec<BufferGroup>, Task<D::Partition, C>)> + Send>>,
        dataset_meta: UDFMeta<C>,
        dataset_udfs: Vec<Box<dyn Udf<C>>>,
        globals: Vec<BufferGroup>,
        completed: usize,
        total: usize,
        progress: Arc<dyn ProgressSink + Send + Sync>,
        config: EngineConfig,
    }

    let state = State {
        exec_stream,
        dataset_meta,
        dataset_udfs,
        globals,
        completed: 0,
        total,
        progress,
        config,
    };

    let stream = stream::unfold(state, move |mut state| async move {
        match state.exec_stream.next().await {
            None => None,
            Some((mut partials, task)) => {
                let (orig_start, orig_end) = task.partition.slice().nav_range();
                let outcome = merge_partial(
                    &state.dataset_meta,
                    &state.dataset_udfs,
                    &mut state.globals,
                    &mut partials,
                    orig_start,
                    orig_end,
                    &state.config,
                );
                state.completed += 1;
                state.progress.on_task_complete(state.completed, state.total);
                let snapshot = outcome.map(|_| state.globals.clone());
                Some((snapshot, state))
            }
        }
    });

    Ok(Box::pin(stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roi_compressed_range_matches_dataset_partition_math() {
        let roi = vec![true, false, true, true];
        assert_eq!(roi_compressed_range(Some(&roi), 0, 4), (0, 3));
    }
}

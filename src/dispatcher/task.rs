//! `Task`: one partition's worth of work, handed to the executor.
//!
//! The UDF set itself is out-of-band from this type's own `Serialize` impl
//! — a boxed `dyn Udf<C>` carries arbitrary user state Rust cannot
//! generically serialise without a trait-object registry the teacher's
//! stack doesn't carry (`typetag` and friends). `TaskMeta` is the part of
//! a task that is always plain data; it is what the debug-mode
//! serialization self-test round-trips (see `Dispatcher`).

use crate::common::backend::Backend;
use crate::common::corrections::Corrections;
use crate::udf::Udf;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The resource request a task's backend intersection resolves to (§4.5's
/// resolution table), passed to the executor alongside the task itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub cpu: u32,
    pub cuda: u32,
    pub compute: u32,
}

/// The serialisable envelope of a `Task`: everything about it that isn't
/// UDF closure state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskMeta {
    pub partition_index: usize,
    pub roi: Option<Vec<bool>>,
    pub backends: Vec<Backend>,
    pub resources: ResourceRequest,
    pub cancel_id: String,
}

/// One partition's unit of work: a partition handle, its resolved
/// metadata, and the UDF set copy (built by the caller's factory, already
/// tailored — aux buffers resliced — to this partition) to run against it.
pub struct Task<P, C: Corrections> {
    pub meta: TaskMeta,
    pub partition: P,
    pub udfs: Vec<Box<dyn Udf<C>>>,
    pub corrections: C,
}

/// Resolves the backend intersection of a UDF set, narrowed by an optional
/// dispatcher-level filter, per §4.5's exact table. An empty intersection
/// is a fatal configuration error.
pub fn resolve_backends<C: Corrections>(
    udfs: &[Box<dyn Udf<C>>],
    filter: Option<&HashSet<Backend>>,
) -> crate::error::Result<HashSet<Backend>> {
    let mut intersection: HashSet<Backend> = udfs
        .first()
        .map(|u| u.get_backends())
        .unwrap_or_default();
    for udf in udfs.iter().skip(1) {
        let backends = udf.get_backends();
        intersection = intersection.intersection(&backends).cloned().collect();
    }
    if let Some(filter) = filter {
        intersection = intersection.intersection(filter).cloned().collect();
    }
    if intersection.is_empty() {
        return Err(crate::error::Error::Config(
            "empty backend intersection across the udf set and dispatcher filter".into(),
        ));
    }
    Ok(intersection)
}

/// Round-trips a value through `bincode`, erroring with `Error::Serialization`
/// if either direction fails. Used behind `EngineConfig::debug_serialization_check`
/// to catch non-serialisable task/result state early rather than failing only
/// once an out-of-process executor actually ships work across a boundary.
pub fn debug_roundtrip_check<T>(label: &str, value: &T) -> crate::error::Result<()>
where
    T: Serialize + serde::de::DeserializeOwned,
{
    let bytes = bincode::serialize(value)
        .map_err(|e| crate::error::Error::Serialization(format!("{} failed to serialize: {}", label, e)))?;
    bincode::deserialize::<T>(&bytes)
        .map_err(|e| crate::error::Error::Serialization(format!("{} failed to deserialize: {}", label, e)))?;
    Ok(())
}

/// Maps a resolved backend set to the resource request the executor is
/// asked to satisfy.
pub fn resources_for(backends: &HashSet<Backend>) -> crate::error::Result<ResourceRequest> {
    if backends.is_empty() {
        return Err(crate::error::Error::Config(
            "empty backend intersection has no resource mapping".into(),
        ));
    }
    let has_cpu = backends.contains(&Backend::CpuNative);
    let has_device = backends.contains(&Backend::CudaNative) || backends.contains(&Backend::DeviceNative);
    Ok(match (has_cpu, has_device) {
        (true, false) => ResourceRequest { cpu: 1, cuda: 0, compute: 1 },
        (true, true) => ResourceRequest { cpu: 0, cuda: 0, compute: 1 },
        (false, true) => ResourceRequest { cpu: 0, cuda: 1, compute: 1 },
        (false, false) => unreachable!("non-empty backend set with neither cpu nor device backend"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_only_resolves_to_cpu_and_compute() {
        let mut backends = HashSet::new();
        backends.insert(Backend::CpuNative);
        assert_eq!(
            resources_for(&backends).unwrap(),
            ResourceRequest { cpu: 1, cuda: 0, compute: 1 }
        );
    }

    #[test]
    fn mixed_cpu_and_device_resolves_to_compute_only() {
        let mut backends = HashSet::new();
        backends.insert(Backend::CpuNative);
        backends.insert(Backend::CudaNative);
        assert_eq!(
            resources_for(&backends).unwrap(),
            ResourceRequest { cpu: 0, cuda: 0, compute: 1 }
        );
    }

    #[test]
    fn device_only_resolves_to_cuda_and_compute() {
        let mut backends = HashSet::new();
        backends.insert(Backend::DeviceNative);
        assert_eq!(
            resources_for(&backends).unwrap(),
            ResourceRequest { cpu: 0, cuda: 1, compute: 1 }
        );
    }

    #[test]
    fn empty_intersection_is_a_config_error() {
        assert!(resources_for(&HashSet::new()).is_err());
    }

    #[test]
    fn task_meta_round_trips_through_bincode() {
        let meta = TaskMeta {
            partition_index: 3,
            roi: Some(vec![true, false, true]),
            backends: vec![Backend::CpuNative],
            resources: ResourceRequest { cpu: 1, cuda: 0, compute: 1 },
            cancel_id: "abc-123".to_string(),
        };
        assert!(debug_roundtrip_check("task meta", &meta).is_ok());
    }
}

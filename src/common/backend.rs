//! Device classes and the backend tags a UDF is assigned per partition.

use serde::{Deserialize, Serialize};

/// The class of worker a partition runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceClass {
    Cpu,
    Cuda,
}

/// Compute back-ends a UDF can declare support for via `Udf::get_backends`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Backend {
    /// Host-memory, CPU-native computation (the default).
    CpuNative,
    /// CUDA computation addressing host memory through the device library,
    /// without a CuPy-like array API.
    CudaNative,
    /// CUDA computation through a CuPy-like device-resident array API.
    DeviceNative,
}

/// The backend tag assigned to a UDF for the duration of one partition. Set
/// explicitly on every partition (workers are stateless between
/// partitions), never inferred implicitly mid-run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendTag {
    Numpy,
    Cuda,
    Cupy,
}

impl BackendTag {
    /// Whether this tag addresses host memory (`Numpy`/`Cuda`) or
    /// device-resident memory (`Cupy`).
    pub fn is_device_resident(self) -> bool {
        matches!(self, BackendTag::Cupy)
    }
}

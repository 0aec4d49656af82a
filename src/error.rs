//! Crate-wide error type. One variant per error kind the engine raises,
//! matching the failure modes a dispatch can hit end to end.

use failure::Fail;

#[derive(Debug, Fail)]
pub enum Error {
    /// ROI shape mismatch, empty backend intersection, unknown device
    /// class, unknown backend label, a UDF without any `process_*`.
    #[fail(display = "configuration error: {}", _0)]
    Config(String),

    /// Unsafe dtype cast detected by the default merge.
    #[fail(display = "unsafe cast from {} to {}", from, to)]
    TypeCast { from: String, to: String },

    /// Buffer kind/shape mismatch at allocation or view time.
    #[fail(display = "shape error: {}", _0)]
    Shape(String),

    /// A UDF declares buffers requiring a custom merge but provides none,
    /// or `get_result_buffers` is unimplemented.
    #[fail(display = "not implemented: {}", _0)]
    NotImplemented(String),

    /// A task or its results failed a debug-mode serialization round trip.
    #[fail(display = "serialization error: {}", _0)]
    Serialization(String),

    /// Propagated verbatim from the executor collaborator.
    #[fail(display = "executor error: {}", _0)]
    Executor(#[fail(cause)] Box<dyn std::error::Error + Send + Sync>),

    /// CUDA device selection failed.
    #[fail(display = "device error: {}", _0)]
    Device(String),
}

pub type Result<T> = ::std::result::Result<T, Error>;

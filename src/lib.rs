#[macro_use]
extern crate lazy_static;

pub mod buffer;
pub mod collab;
pub mod common;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod prelude;
pub mod runner;
pub mod udf;

pub use self::buffer::{AuxBuffer, Buffer, BufferGroup, BufferKind, View, Where};
pub use self::collab::{
    CountingProgress, Dataset, DeviceBackend, Executor, Negotiator, NullProgress, Partition, ProgressSink, Tile,
    TileFrames,
};
pub use self::common::{Backend, BackendTag, Corrections, DType, DeviceClass, NoCorrections, Shape, Slice, TilingScheme, UDFMeta};
pub use self::config::EngineConfig;
pub use self::device::{DeviceGuard, ThreadLimitGuard};
pub use self::dispatcher::task::{ResourceRequest, Task, TaskMeta};
pub use self::error::{Error, Result};
pub use self::udf::{Processing, TilingPreferences, Udf};

pub use crate::buffer::{AuxBuffer, Buffer, BufferGroup, BufferKind, Where};
pub use crate::collab::{Dataset, DeviceBackend, Executor, Negotiator, Partition, ProgressSink, Tile, TileFrames};
pub use crate::common::{Backend, BackendTag, Corrections, DType, DeviceClass, NoCorrections, Shape, Slice, TilingScheme, UDFMeta};
pub use crate::config::EngineConfig;
pub use crate::dispatcher::task::{ResourceRequest, Task, TaskMeta};
pub use crate::error::{Error, Result};
pub use crate::udf::{Processing, TilingPreferences, Udf};

//! The user-extension point: a `Udf` declares its result/aux buffers, its
//! processing granularity, and (optionally) how partial results merge.

use crate::buffer::group::BufferGroup;
use crate::buffer::BufferKind;
use crate::common::backend::Backend;
use crate::common::corrections::Corrections;
use crate::common::dtype::DType;
use crate::common::meta::UDFMeta;
use crate::error::{Error, Result};
use std::collections::HashSet;

/// Soft hints forwarded to the external `Negotiator`; it is free to ignore
/// them when deriving the actual `TilingScheme`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TilingPreferences {
    pub depth: Option<u64>,
    pub total_size: Option<u64>,
}

/// Which of `process_tile`/`process_frame`/`process_partition` a UDF is
/// dispatched through. Chosen once, at registration time — a UDF declares
/// exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Processing {
    Tile,
    Frame,
    Partition,
}

/// A user-defined reduction. `C` is the opaque corrections type threaded
/// through from the dispatcher; most UDFs can leave it generic and let the
/// caller pick `NoCorrections`.
pub trait Udf<C: Corrections>: Send {
    /// Which `process_*` method the runner dispatches this UDF through.
    fn processing(&self) -> Processing;

    /// Declares this UDF's result buffers. Called on the coordinator to
    /// size globals and on the worker to size per-partition results; must
    /// be deterministic and pure with respect to `meta`.
    fn get_result_buffers(&self, meta: &UDFMeta<C>) -> BufferGroup;

    /// Worker-local, non-shipped data (caches, scratch space). Empty by
    /// default.
    fn get_task_data(&self, _meta: &UDFMeta<C>) -> BufferGroup {
        BufferGroup::new()
    }

    fn get_preferred_input_dtype(&self) -> DType {
        DType::Float32
    }

    fn get_backends(&self) -> HashSet<Backend> {
        let mut backends = HashSet::new();
        backends.insert(Backend::CpuNative);
        backends
    }

    fn get_tiling_preferences(&self) -> TilingPreferences {
        TilingPreferences::default()
    }

    fn preprocess(&mut self, _meta: &UDFMeta<C>, _results: &mut BufferGroup) -> Result<()> {
        Ok(())
    }

    fn postprocess(&mut self, _meta: &UDFMeta<C>, _results: &mut BufferGroup) -> Result<()> {
        Ok(())
    }

    fn cleanup(&mut self) {}

    fn process_tile(&mut self, _meta: &UDFMeta<C>, _results: &mut BufferGroup, _tile: &[u8]) -> Result<()> {
        Err(Error::Config(
            "process_tile called on a UDF that does not declare Processing::Tile".into(),
        ))
    }

    fn process_frame(&mut self, _meta: &UDFMeta<C>, _results: &mut BufferGroup, _frame: &[u8]) -> Result<()> {
        Err(Error::Config(
            "process_frame called on a UDF that does not declare Processing::Frame".into(),
        ))
    }

    fn process_partition(&mut self, _meta: &UDFMeta<C>, _results: &mut BufferGroup, _tile: &[u8]) -> Result<()> {
        Err(Error::Config(
            "process_partition called on a UDF that does not declare Processing::Partition".into(),
        ))
    }

    /// True iff any declared buffer has `kind != nav`. Such a UDF has no
    /// well-defined default merge and must override `merge`.
    fn requires_custom_merge(&self, meta: &UDFMeta<C>) -> bool {
        self.get_result_buffers(meta)
            .iter()
            .any(|(_, buf)| buf.kind() != BufferKind::Nav)
    }

    /// Combines one partition's partial results (`src`) into the running
    /// global state (`dest`). Both are already bound/viewed to the same
    /// partition-local range of nav positions, so the default merge is a
    /// plain elementwise byte copy under a safe-cast check.
    ///
    /// Must be commutative and associative: the dispatcher may call this in
    /// any partition-arrival order.
    fn merge(&self, meta: &UDFMeta<C>, dest: &mut BufferGroup, src: &BufferGroup) -> Result<()> {
        if self.requires_custom_merge(meta) {
            return Err(Error::NotImplemented(
                "UDF declares non-nav result buffers and must provide a custom merge".into(),
            ));
        }
        let names: Vec<String> = dest.names().map(str::to_string).collect();
        for name in names {
            let src_buf = src
                .get(&name)
                .ok_or_else(|| Error::Config(format!("merge: source has no buffer {:?}", name)))?;
            let src_dtype = src_buf.dtype();
            let src_bytes = src_buf.current_view_data()?.to_vec();
            let dest_buf = dest
                .get_mut(&name)
                .ok_or_else(|| Error::Config(format!("merge: dest has no buffer {:?}", name)))?;
            if !src_dtype.can_cast_safely_to(dest_buf.dtype()) {
                return Err(Error::TypeCast {
                    from: format!("{:?}", src_dtype),
                    to: format!("{:?}", dest_buf.dtype()),
                });
            }
            let dest_bytes = dest_buf.current_view_data_mut()?;
            if dest_bytes.len() != src_bytes.len() {
                return Err(Error::Shape(format!(
                    "merge: buffer {:?} length mismatch ({} dest vs {} src)",
                    name,
                    dest_bytes.len(),
                    src_bytes.len()
                )));
            }
            dest_bytes.copy_from_slice(&src_bytes);
        }
        Ok(())
    }
}

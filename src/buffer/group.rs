//! `BufferGroup`: an ordered name -> `Buffer` mapping with keyed and
//! attribute-style access, and group-wide view/lifecycle operations that
//! forward to every buffer.

use crate::buffer::Buffer;
use crate::common::shape::Shape;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An immutable name -> raw bytes snapshot pinned to the group's current
/// views, passed to `Udf::merge` as `dest`/`src`.
pub type Proxy<'a> = BTreeMap<&'a str, &'a [u8]>;

/// A named collection of `Buffer`s. Declaring a name twice (re-binding) is
/// an error — once constructed, user code may only replace the *contents*
/// of a buffer's current view, never rebind its name, mirroring the
/// `__setattr__` guard in the engine this was distilled from.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BufferGroup {
    buffers: BTreeMap<String, Buffer>,
    order: Vec<String>,
}

impl BufferGroup {
    pub fn new() -> Self {
        BufferGroup {
            buffers: BTreeMap::new(),
            order: Vec::new(),
        }
    }

    /// Declares a new named buffer. Errors if `name` is already declared.
    pub fn declare(&mut self, name: &str, buffer: Buffer) -> Result<()> {
        if self.buffers.contains_key(name) {
            return Err(Error::Config(format!(
                "cannot re-declare buffer {:?}, did you mean to update its contents?",
                name
            )));
        }
        self.order.push(name.to_string());
        self.buffers.insert(name.to_string(), buffer);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Buffer> {
        self.buffers.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Buffer> {
        self.buffers.get_mut(name)
    }

    /// Attribute-style access: returns the current view if one is set,
    /// otherwise the raw storage.
    pub fn view_or_data(&self, name: &str) -> Result<&[u8]> {
        let buf = self
            .buffers
            .get(name)
            .ok_or_else(|| Error::Config(format!("no such buffer: {:?}", name)))?;
        buf.current_view_data()
    }

    pub fn view_or_data_mut(&mut self, name: &str) -> Result<&mut [u8]> {
        let buf = self
            .buffers
            .get_mut(name)
            .ok_or_else(|| Error::Config(format!("no such buffer: {:?}", name)))?;
        buf.current_view_data_mut()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Buffer)> {
        self.order.iter().map(move |name| (name.as_str(), &self.buffers[name]))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Buffer)> {
        let order = &self.order;
        let buffers = &mut self.buffers;
        order.iter().map(move |name| {
            let ptr: *mut Buffer = buffers.get_mut(name.as_str()).unwrap();
            // Safety: `order` holds each name exactly once, so every
            // `get_mut` here targets a distinct entry; the resulting
            // mutable borrows never alias.
            (name.as_str(), unsafe { &mut *ptr })
        })
    }

    pub fn allocate_for_dataset(&mut self, dataset_nav: &Shape, dataset_sig: &Shape, roi: Option<&[bool]>) -> Result<()> {
        for (_, buf) in self.iter_mut() {
            buf.set_shape_ds(dataset_nav, dataset_sig, roi);
        }
        for (_, buf) in self.iter_mut() {
            if !buf.has_data() {
                buf.allocate()?;
            }
        }
        Ok(())
    }

    pub fn allocate_for_partition(
        &mut self,
        partition_nav: &Shape,
        dataset_sig: &Shape,
        partition_roi: Option<&[bool]>,
    ) -> Result<()> {
        for (_, buf) in self.iter_mut() {
            buf.set_shape_partition(partition_nav, dataset_sig, partition_roi);
        }
        for (_, buf) in self.iter_mut() {
            if !buf.has_data() {
                buf.allocate()?;
            }
        }
        Ok(())
    }

    pub fn set_view_for_dataset(&mut self) -> Result<()> {
        for (_, buf) in self.iter_mut() {
            buf.get_view_for_dataset()?;
        }
        Ok(())
    }

    pub fn set_view_for_partition(&mut self) -> Result<()> {
        for (_, buf) in self.iter_mut() {
            buf.get_view_for_partition()?;
        }
        Ok(())
    }

    pub fn set_view_for_tile(&mut self, orig_start: u64, orig_end: u64) -> Result<()> {
        for (_, buf) in self.iter_mut() {
            buf.get_view_for_tile(orig_start, orig_end)?;
        }
        Ok(())
    }

    pub fn set_contiguous_view_for_tile(&mut self, orig_start: u64, orig_end: u64) -> Result<()> {
        for (_, buf) in self.iter_mut() {
            buf.get_contiguous_view_for_tile(orig_start, orig_end)?;
        }
        Ok(())
    }

    pub fn set_view_for_frame(&mut self, orig_tile_start: u64, frame_idx: u64) -> Result<()> {
        for (_, buf) in self.iter_mut() {
            buf.get_view_for_frame(orig_tile_start, frame_idx)?;
        }
        Ok(())
    }

    pub fn clear_views(&mut self) {
        for (_, buf) in self.iter_mut() {
            buf.clear_view();
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        for (_, buf) in self.iter_mut() {
            buf.flush()?;
        }
        Ok(())
    }

    pub fn export(&mut self) -> Result<()> {
        for (_, buf) in self.iter_mut() {
            buf.export()?;
        }
        Ok(())
    }

    /// An immutable name -> raw-bytes snapshot pinned to the current views,
    /// used as the `dest`/`src` argument to `Udf::merge`.
    pub fn proxy(&self) -> Result<Proxy<'_>> {
        let mut proxy = BTreeMap::new();
        for (name, buf) in self.iter() {
            proxy.insert(name, buf.current_view_data()?);
        }
        Ok(proxy)
    }
}

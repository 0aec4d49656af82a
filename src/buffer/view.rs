//! A `View` is a (byte offset, shape) pair into a `Buffer`'s storage. Unlike
//! a borrowed slice, a `View` carries no lifetime of its own — it is
//! resolved against the owning buffer's storage on every access, the same
//! way `utils::data_buf::DataBufferPtr` resolves a typed pointer against its
//! `DataBuffer` on every access. That sidesteps the self-referential
//! storage+view-into-itself problem a `Buffer` would otherwise have.

use crate::common::shape::Shape;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    byte_offset: usize,
    shape: Shape,
}

impl View {
    pub fn new(byte_offset: usize, shape: Shape) -> Self {
        View { byte_offset, shape }
    }

    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn byte_len(&self, elem_size: usize) -> usize {
        self.shape.size() as usize * elem_size
    }
}

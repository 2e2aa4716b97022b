//! Device buffers laid out along a shape.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use kiln_shape::{Shape, ShapeIndex, ShapeTree};
use snafu::ResultExt;
use tracing::warn;

use crate::allocator::MemoryAllocator;
use crate::error::{Result, ShapeSnafu};
use crate::memory::DeviceMemory;

/// One device address per position of `on_device_shape`. Does not own memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapedBuffer {
    device_ordinal: usize,
    buffers: ShapeTree<DeviceMemory>,
}

impl ShapedBuffer {
    /// A buffer with every position set to the null address.
    pub fn new(on_device_shape: &Shape, device_ordinal: usize) -> Self {
        Self { device_ordinal, buffers: ShapeTree::new(on_device_shape) }
    }

    pub fn on_device_shape(&self) -> &Shape {
        self.buffers.shape()
    }

    pub fn device_ordinal(&self) -> usize {
        self.device_ordinal
    }

    pub fn buffer(&self, index: &ShapeIndex) -> Result<DeviceMemory> {
        self.buffers.element(index).copied().context(ShapeSnafu)
    }

    pub fn root_buffer(&self) -> DeviceMemory {
        self.buffer(&ShapeIndex::root()).unwrap_or_default()
    }

    pub fn set_buffer(&mut self, index: &ShapeIndex, memory: DeviceMemory) -> Result<()> {
        *self.buffers.element_mut(index).context(ShapeSnafu)? = memory;
        Ok(())
    }

    pub fn buffers(&self) -> &ShapeTree<DeviceMemory> {
        &self.buffers
    }

    pub fn into_scoped(self, allocator: Arc<dyn MemoryAllocator>) -> ScopedShapedBuffer {
        ScopedShapedBuffer { buffer: self, allocator }
    }
}

impl fmt::Display for ShapedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ShapedBuffer({}), on-device shape={}:", self.device_ordinal, self.on_device_shape())?;
        for (index, memory) in self.buffers.iter() {
            writeln!(f, "  {index}: {memory}")?;
        }
        Ok(())
    }
}

/// A [`ShapedBuffer`] that frees its distinct non-null addresses on drop.
#[derive(Debug)]
pub struct ScopedShapedBuffer {
    buffer: ShapedBuffer,
    allocator: Arc<dyn MemoryAllocator>,
}

impl ScopedShapedBuffer {
    pub fn new(on_device_shape: &Shape, device_ordinal: usize, allocator: Arc<dyn MemoryAllocator>) -> Self {
        Self { buffer: ShapedBuffer::new(on_device_shape, device_ordinal), allocator }
    }

    pub fn allocator(&self) -> &Arc<dyn MemoryAllocator> {
        &self.allocator
    }

    pub fn set_buffer(&mut self, index: &ShapeIndex, memory: DeviceMemory) -> Result<()> {
        self.buffer.set_buffer(index, memory)
    }

    /// Gives up ownership of every address.
    pub fn release(mut self) -> ShapedBuffer {
        let empty = ShapedBuffer::new(self.buffer.on_device_shape(), self.buffer.device_ordinal);
        std::mem::replace(&mut self.buffer, empty)
    }
}

impl std::ops::Deref for ScopedShapedBuffer {
    type Target = ShapedBuffer;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl Drop for ScopedShapedBuffer {
    fn drop(&mut self) {
        let mut freed = HashSet::new();
        for (index, memory) in self.buffer.buffers.iter() {
            if memory.is_null() || !freed.insert(memory.address()) {
                continue;
            }
            if let Err(error) = self.allocator.deallocate(self.buffer.device_ordinal, *memory) {
                warn!(%index, address = memory.address(), %error, "failed to deallocate result buffer");
            }
        }
    }
}

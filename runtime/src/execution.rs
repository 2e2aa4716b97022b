//! Arguments and results of one execution.
//!
//! Inputs are either borrowed [`ShapedBuffer`]s, which the executable never
//! frees, or [`ExecutionInput`]s whose `Owned` slots are donated: the
//! executable may reuse a donated buffer as an output, and otherwise hands it
//! to the [`ExecutionOutput`] to be released with the results.

use std::sync::Arc;

use kiln_device::{
    DeviceMemory, MaybeOwningDeviceMemory, MemoryAllocator, OwningDeviceMemory, ScopedShapedBuffer, ShapedBuffer,
};
use kiln_shape::{Shape, ShapeIndex, ShapeTree};
use snafu::{ResultExt, ensure};

use crate::error::*;

/// One argument whose buffers may be donated to the execution.
#[derive(Debug)]
pub struct ExecutionInput {
    buffers: ShapeTree<MaybeOwningDeviceMemory>,
}

impl ExecutionInput {
    /// An input with every position unowned and null.
    pub fn new(shape: &Shape) -> Self {
        Self { buffers: ShapeTree::new(shape) }
    }

    /// Borrows every address of `buffer` without taking ownership.
    pub fn unowned(buffer: &ShapedBuffer) -> Self {
        let buffers = buffer.buffers().clone().map(|_, memory| MaybeOwningDeviceMemory::Unowned(memory));
        Self { buffers }
    }

    /// Takes ownership of every distinct non-null address of `buffer`.
    ///
    /// Positions sharing an address are owned once, by the first in pre-order.
    pub fn donated(buffer: ScopedShapedBuffer) -> Self {
        let allocator = Arc::clone(buffer.allocator());
        let buffer = buffer.release();
        let ordinal = buffer.device_ordinal();
        let mut seen = std::collections::HashSet::new();
        let buffers = buffer.buffers().clone().map(|_, memory| {
            if memory.is_null() || !seen.insert(memory.address()) {
                MaybeOwningDeviceMemory::Unowned(memory)
            } else {
                OwningDeviceMemory::new(memory, ordinal, Arc::clone(&allocator)).into()
            }
        });
        Self { buffers }
    }

    pub fn shape(&self) -> &Shape {
        self.buffers.shape()
    }

    pub fn buffers(&self) -> &ShapeTree<MaybeOwningDeviceMemory> {
        &self.buffers
    }

    pub fn buffer(&self, index: &ShapeIndex) -> Result<&MaybeOwningDeviceMemory> {
        self.buffers.element(index).context(ShapeSnafu)
    }

    pub fn mutable_buffer(&mut self, index: &ShapeIndex) -> Result<&mut MaybeOwningDeviceMemory> {
        self.buffers.element_mut(index).context(ShapeSnafu)
    }

    pub fn set_buffer(&mut self, index: &ShapeIndex, buffer: impl Into<MaybeOwningDeviceMemory>) -> Result<()> {
        *self.mutable_buffer(index)? = buffer.into();
        Ok(())
    }
}

/// Caller-provided arguments, one per entry parameter.
#[derive(Debug)]
pub enum Arguments<'a> {
    Borrowed(&'a [&'a ShapedBuffer]),
    Donated(&'a mut [ExecutionInput]),
}

impl Arguments<'_> {
    pub fn len(&self) -> usize {
        match self {
            Self::Borrowed(buffers) => buffers.len(),
            Self::Donated(inputs) => inputs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Address of `index` inside parameter `parameter`.
    pub fn buffer(&self, parameter: usize, index: &ShapeIndex) -> Result<DeviceMemory> {
        let provided = self.len();
        ensure!(parameter < provided, MissingArgumentSnafu { parameter, provided });
        match self {
            Self::Borrowed(buffers) => buffers[parameter].buffer(index).context(DeviceSnafu),
            Self::Donated(inputs) => Ok(inputs[parameter].buffer(index)?.as_device_memory()),
        }
    }

    /// The donatable slot at `index` of parameter `parameter`; `None` for borrowed arguments.
    pub fn donatable_slot(
        &mut self,
        parameter: usize,
        index: &ShapeIndex,
    ) -> Result<Option<&mut MaybeOwningDeviceMemory>> {
        let provided = self.len();
        ensure!(parameter < provided, MissingArgumentSnafu { parameter, provided });
        match self {
            Self::Borrowed(_) => Ok(None),
            Self::Donated(inputs) => inputs[parameter].mutable_buffer(index).map(Some),
        }
    }
}

/// Results of one execution.
///
/// Indices in `aliased_indices` hold donated input buffers. Until the output
/// is committed or consumed they are not freed on drop: if execution failed
/// they still hold the caller's data.
#[derive(Debug)]
pub struct ExecutionOutput {
    result: ScopedShapedBuffer,
    aliased_indices: Vec<ShapeIndex>,
    to_be_released: Vec<OwningDeviceMemory>,
}

impl ExecutionOutput {
    pub fn new(shape: &Shape, allocator: Arc<dyn MemoryAllocator>, device_ordinal: usize) -> Self {
        Self {
            result: ScopedShapedBuffer::new(shape, device_ordinal, allocator),
            aliased_indices: Vec::new(),
            to_be_released: Vec::new(),
        }
    }

    pub fn result(&self) -> &ScopedShapedBuffer {
        &self.result
    }

    pub fn mutable_result(&mut self) -> &mut ScopedShapedBuffer {
        &mut self.result
    }

    pub fn aliased_indices(&self) -> &[ShapeIndex] {
        &self.aliased_indices
    }

    pub fn add_aliased_index(&mut self, index: ShapeIndex) {
        self.aliased_indices.push(index);
    }

    pub fn to_be_released(&self) -> &[OwningDeviceMemory] {
        &self.to_be_released
    }

    pub fn add_to_be_released(&mut self, memory: OwningDeviceMemory) {
        self.to_be_released.push(memory);
    }

    /// Accepts the results; aliased buffers are owned by the result from now on.
    pub fn commit(&mut self) {
        self.aliased_indices.clear();
    }

    pub fn consume_result(mut self) -> ScopedShapedBuffer {
        self.commit();
        let allocator = Arc::clone(self.result.allocator());
        let empty = ScopedShapedBuffer::new(self.result.on_device_shape(), self.result.device_ordinal(), allocator);
        std::mem::replace(&mut self.result, empty)
    }
}

impl Drop for ExecutionOutput {
    fn drop(&mut self) {
        for index in std::mem::take(&mut self.aliased_indices) {
            // Index came from the result's own shape.
            let _ = self.result.set_buffer(&index, DeviceMemory::null());
        }
    }
}

/// Moves every buffer still owned by a donated argument into `result`.
pub fn mark_to_be_released_arguments(arguments: &mut [ExecutionInput], result: &mut ExecutionOutput) {
    for argument in arguments {
        for (_, buffer) in argument.buffers.iter_mut() {
            if let Some(owned) = buffer.release() {
                result.add_to_be_released(owned);
            }
        }
    }
}

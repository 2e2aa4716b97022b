//! Device addresses of every allocation for one execution.
//!
//! [`BufferAllocations::generate`] resolves each compile-time allocation to
//! a device address: thread-local allocations get a null placeholder,
//! parameters come from the caller, constants from the executable's
//! constant cache, and everything else is freshly allocated. Each address is
//! checked against the alignment its category guarantees.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use bon::bon;
use kiln_device::{DeviceMemory, MemoryAllocator};
use kiln_schedule::{AllocationIndex, BufferAllocation, Slice};
use snafu::{OptionExt, ResultExt, ensure};
use tracing::{trace, warn};

use crate::error::*;
use crate::execution::Arguments;

pub const ENTRY_PARAMETER_ALIGN_BYTES: usize = 16;
pub const CONSTANT_BUFFER_ALIGN_BYTES: usize = 64;
pub const XLA_ALLOCATED_BUFFER_ALIGN_BYTES: usize = 64;

/// Resolved constant addresses by allocation index.
pub type ConstantGlobals = HashMap<AllocationIndex, DeviceMemory>;

/// Whether an execution allocates this allocation's buffer itself.
fn is_execution_owned(allocation: &BufferAllocation) -> bool {
    !(allocation.is_entry_computation_parameter() || allocation.is_constant() || allocation.is_thread_local())
}

/// Alignment a buffer of this allocation's category is guaranteed to have.
pub fn expected_alignment(allocation: &BufferAllocation) -> usize {
    if allocation.is_entry_computation_parameter() {
        ENTRY_PARAMETER_ALIGN_BYTES
    } else if allocation.is_constant() {
        CONSTANT_BUFFER_ALIGN_BYTES
    } else {
        XLA_ALLOCATED_BUFFER_ALIGN_BYTES
    }
}

pub fn check_alignment(allocation: &BufferAllocation, buffer: DeviceMemory) -> Result<()> {
    let alignment = expected_alignment(allocation);
    ensure!(
        buffer.is_null() || buffer.is_aligned(alignment),
        MisalignedSnafu { allocation: allocation.index(), alignment, address: buffer.address() }
    );
    Ok(())
}

pub struct BufferAllocations {
    buffers: Vec<DeviceMemory>,
    /// Execution-owned buffers whose allocation was pointed elsewhere.
    retired: Vec<DeviceMemory>,
    device_ordinal: usize,
    allocator: Arc<dyn MemoryAllocator>,
}

impl fmt::Debug for BufferAllocations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferAllocations")
            .field("buffers", &self.buffers.len())
            .field("device_ordinal", &self.device_ordinal)
            .field("allocator", &self.allocator.name())
            .finish()
    }
}

#[bon]
impl BufferAllocations {
    /// Resolves every allocation, in index order.
    ///
    /// On failure, buffers allocated so far are released again.
    #[builder]
    pub fn generate(
        allocations: &[BufferAllocation],
        arguments: &Arguments<'_>,
        globals: &ConstantGlobals,
        allocator: Arc<dyn MemoryAllocator>,
        device_ordinal: usize,
        /// Verbose buffer-assignment dump, only rendered for allocation failures.
        dump: &dyn Fn() -> String,
        #[builder(default = true)] check_alignment: bool,
    ) -> Result<Self> {
        let buffers = Vec::with_capacity(allocations.len());
        let mut resolved = Self { buffers, retired: Vec::new(), device_ordinal, allocator };
        for allocation in allocations {
            let buffer = match resolved.buffer_for_allocation(allocation, arguments, globals, dump) {
                Ok(buffer) => buffer,
                Err(error) => return Err(resolved.abandon(allocations, error)),
            };
            resolved.buffers.push(buffer);
            if check_alignment && let Err(error) = self::check_alignment(allocation, buffer) {
                return Err(resolved.abandon(allocations, error));
            }
        }
        Ok(resolved)
    }
}

impl BufferAllocations {
    pub fn new(buffers: Vec<DeviceMemory>, device_ordinal: usize, allocator: Arc<dyn MemoryAllocator>) -> Self {
        Self { buffers, retired: Vec::new(), device_ordinal, allocator }
    }

    fn buffer_for_allocation(
        &self,
        allocation: &BufferAllocation,
        arguments: &Arguments<'_>,
        globals: &ConstantGlobals,
        dump: &dyn Fn() -> String,
    ) -> Result<DeviceMemory> {
        if allocation.is_thread_local() {
            return Ok(DeviceMemory::null());
        }

        if let (Some(parameter), Some(index)) = (allocation.parameter_number(), allocation.param_shape_index()) {
            let buffer = arguments.buffer(parameter, index)?;
            ensure!(
                !buffer.is_null() || allocation.size() == 0,
                NullParameterBufferSnafu { index: index.clone(), parameter }
            );
            trace!(allocation = allocation.index(), parameter, %index, address = buffer.address(), "bound parameter");
            return Ok(buffer);
        }

        if allocation.is_constant() {
            return Ok(globals.get(&allocation.index()).copied().unwrap_or_default());
        }

        let buffer = self
            .allocator
            .allocate(self.device_ordinal, allocation.size())
            .with_context(|_| ResourceExhaustedSnafu { dump: dump() })?;
        trace!(allocation = allocation.index(), size = allocation.size(), address = buffer.address(), "allocated");
        Ok(buffer)
    }

    /// Releases what was allocated so far and hands back `error`.
    fn abandon(self, allocations: &[BufferAllocation], error: Error) -> Error {
        if let Err(teardown) = self.tear_down(&HashSet::new(), allocations) {
            warn!(error = %teardown, "failed to release buffers after resolution error");
        }
        error
    }

    pub fn size(&self) -> usize {
        self.buffers.len()
    }

    pub fn device_ordinal(&self) -> usize {
        self.device_ordinal
    }

    pub fn memory_allocator(&self) -> &Arc<dyn MemoryAllocator> {
        &self.allocator
    }

    pub fn get_device_address(&self, index: AllocationIndex) -> Result<DeviceMemory> {
        self.buffers.get(index).copied().context(UnknownAllocationSnafu { index, count: self.buffers.len() })
    }

    pub fn get_mutable_device_address(&mut self, index: AllocationIndex) -> Result<&mut DeviceMemory> {
        let count = self.buffers.len();
        self.buffers.get_mut(index).context(UnknownAllocationSnafu { index, count })
    }

    /// Points `allocation` at `memory`.
    ///
    /// A buffer this execution allocated for it is kept until [`tear_down`](Self::tear_down),
    /// since work already enqueued may still read it.
    pub fn replace_device_address(&mut self, allocation: &BufferAllocation, memory: DeviceMemory) -> Result<()> {
        let owned = is_execution_owned(allocation);
        let slot = self.get_mutable_device_address(allocation.index())?;
        let previous = std::mem::replace(slot, memory);
        if owned && !previous.is_null() && previous != memory {
            self.retired.push(previous);
        }
        Ok(())
    }

    /// Address of `slice` inside its allocation's buffer.
    pub fn get_device_address_for_slice(&self, slice: &Slice) -> Result<DeviceMemory> {
        let base = self.get_device_address(slice.allocation)?;
        let buffer_size = base.size();
        base.view(slice.offset, slice.size).ok().context(SliceOutOfBoundsSnafu { slice: *slice, buffer_size })
    }

    /// Frees temporaries and live-out buffers that did not end up in the result.
    ///
    /// Caller parameters and constants are never freed here. Every buffer is
    /// attempted; the first failure is reported.
    pub fn tear_down(&self, live_addresses: &HashSet<usize>, allocations: &[BufferAllocation]) -> Result<()> {
        let mut freed = HashSet::new();
        let mut status = Ok(());
        for (allocation, buffer) in allocations.iter().zip(&self.buffers) {
            if allocation.is_entry_computation_parameter() || allocation.is_constant() {
                continue;
            }
            let dead_live_out = allocation.maybe_live_out() && !live_addresses.contains(&buffer.address());
            if !(dead_live_out || allocation.is_preallocated_temp_buffer()) {
                continue;
            }
            if buffer.is_null() || live_addresses.contains(&buffer.address()) || !freed.insert(buffer.address()) {
                continue;
            }
            if let Err(source) = self.allocator.deallocate(self.device_ordinal, *buffer) {
                let address = buffer.address();
                warn!(allocation = allocation.index(), address, error = %source, "failed to deallocate");
                if status.is_ok() {
                    status = Err(Error::Device { source });
                }
            }
        }
        for buffer in &self.retired {
            if live_addresses.contains(&buffer.address()) || !freed.insert(buffer.address()) {
                continue;
            }
            if let Err(source) = self.allocator.deallocate(self.device_ordinal, *buffer) {
                warn!(address = buffer.address(), error = %source, "failed to deallocate replaced buffer");
                if status.is_ok() {
                    status = Err(Error::Device { source });
                }
            }
        }
        status
    }
}

impl fmt::Display for BufferAllocations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BufferAllocations on device {}:", self.device_ordinal)?;
        for (index, buffer) in self.buffers.iter().enumerate() {
            writeln!(f, "  allocation {index}: {buffer}")?;
        }
        Ok(())
    }
}

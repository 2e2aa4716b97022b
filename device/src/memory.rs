//! Device addresses and ownership wrappers.
//!
//! [`DeviceMemory`] is a plain `(address, size)` pair with no ownership.
//! [`OwningDeviceMemory`] returns its memory to the allocator on drop, and
//! [`MaybeOwningDeviceMemory`] is the slot type of donatable inputs: an input
//! the caller donated is `Owned`, everything else is `Unowned`.

use std::fmt;
use std::sync::Arc;

use snafu::ensure;
use tracing::warn;

use crate::allocator::MemoryAllocator;
use crate::error::{InvalidViewSnafu, Result};

/// Untyped region of device memory. Address 0 is the null address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DeviceMemory {
    address: usize,
    size: usize,
}

impl DeviceMemory {
    pub const fn new(address: usize, size: usize) -> Self {
        Self { address, size }
    }

    pub const fn null() -> Self {
        Self { address: 0, size: 0 }
    }

    pub const fn address(&self) -> usize {
        self.address
    }

    pub const fn size(&self) -> usize {
        self.size
    }

    pub const fn is_null(&self) -> bool {
        self.address == 0
    }

    pub const fn is_aligned(&self, alignment: usize) -> bool {
        self.address % alignment == 0
    }

    /// Sub-range `[offset, offset + size)` of this region.
    pub fn view(&self, offset: usize, size: usize) -> Result<DeviceMemory> {
        ensure!(
            offset.checked_add(size).is_some_and(|end| end <= self.size),
            InvalidViewSnafu { offset, size, buffer_size: self.size }
        );
        if self.is_null() {
            return Ok(DeviceMemory { address: 0, size });
        }
        Ok(DeviceMemory { address: self.address + offset, size })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.address as *const u8
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.address as *mut u8
    }

    /// Host view of the region.
    ///
    /// # Safety
    ///
    /// The region must be host-addressable memory that stays live and is not
    /// written concurrently for `'a`.
    pub unsafe fn as_host_slice<'a>(&self) -> &'a [u8] {
        if self.is_null() || self.size == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.size) }
    }

    /// Mutable host view of the region.
    ///
    /// # Safety
    ///
    /// The region must be host-addressable memory that stays live and is not
    /// accessed through any other view for `'a`.
    pub unsafe fn as_host_slice_mut<'a>(&self) -> &'a mut [u8] {
        if self.is_null() || self.size == 0 {
            return &mut [];
        }
        unsafe { std::slice::from_raw_parts_mut(self.as_mut_ptr(), self.size) }
    }
}

impl fmt::Display for DeviceMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x} ({} bytes)", self.address, self.size)
    }
}

/// Device memory that is returned to its allocator when dropped.
pub struct OwningDeviceMemory {
    memory: DeviceMemory,
    device_ordinal: usize,
    allocator: Arc<dyn MemoryAllocator>,
}

impl fmt::Debug for OwningDeviceMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwningDeviceMemory")
            .field("memory", &self.memory)
            .field("device_ordinal", &self.device_ordinal)
            .field("allocator", &self.allocator.name())
            .finish()
    }
}

impl OwningDeviceMemory {
    pub fn new(memory: DeviceMemory, device_ordinal: usize, allocator: Arc<dyn MemoryAllocator>) -> Self {
        Self { memory, device_ordinal, allocator }
    }

    pub fn allocate(allocator: &Arc<dyn MemoryAllocator>, device_ordinal: usize, size: usize) -> Result<Self> {
        let memory = allocator.allocate(device_ordinal, size)?;
        Ok(Self::new(memory, device_ordinal, Arc::clone(allocator)))
    }

    pub fn memory(&self) -> DeviceMemory {
        self.memory
    }

    pub fn device_ordinal(&self) -> usize {
        self.device_ordinal
    }

    pub fn allocator(&self) -> &Arc<dyn MemoryAllocator> {
        &self.allocator
    }

    pub fn is_null(&self) -> bool {
        self.memory.is_null()
    }

    /// Gives up ownership without freeing.
    pub fn release(mut self) -> DeviceMemory {
        std::mem::take(&mut self.memory)
    }

    /// Frees the memory now, reporting deallocation errors.
    pub fn free(mut self) -> Result<()> {
        let memory = std::mem::take(&mut self.memory);
        if memory.is_null() {
            return Ok(());
        }
        self.allocator.deallocate(self.device_ordinal, memory)
    }
}

impl Drop for OwningDeviceMemory {
    fn drop(&mut self) {
        if self.memory.is_null() {
            return;
        }
        if let Err(error) = self.allocator.deallocate(self.device_ordinal, self.memory) {
            warn!(address = self.memory.address(), %error, "failed to deallocate owned device memory");
        }
    }
}

#[derive(Debug)]
pub enum MaybeOwningDeviceMemory {
    Owned(OwningDeviceMemory),
    Unowned(DeviceMemory),
}

impl Default for MaybeOwningDeviceMemory {
    fn default() -> Self {
        Self::Unowned(DeviceMemory::null())
    }
}

impl MaybeOwningDeviceMemory {
    pub fn as_device_memory(&self) -> DeviceMemory {
        match self {
            Self::Owned(owned) => owned.memory(),
            Self::Unowned(memory) => *memory,
        }
    }

    pub fn is_owning(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    /// Takes ownership out of the slot, leaving the address behind unowned.
    pub fn release(&mut self) -> Option<OwningDeviceMemory> {
        let memory = self.as_device_memory();
        match std::mem::replace(self, Self::Unowned(memory)) {
            Self::Owned(owned) => Some(owned),
            Self::Unowned(_) => None,
        }
    }
}

impl From<OwningDeviceMemory> for MaybeOwningDeviceMemory {
    fn from(value: OwningDeviceMemory) -> Self {
        Self::Owned(value)
    }
}

impl From<DeviceMemory> for MaybeOwningDeviceMemory {
    fn from(value: DeviceMemory) -> Self {
        Self::Unowned(value)
    }
}

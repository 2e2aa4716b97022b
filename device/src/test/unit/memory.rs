use std::sync::Arc;

use crate::{DeviceMemory, HostAllocator, MaybeOwningDeviceMemory, MemoryAllocator, OwningDeviceMemory};

#[test]
fn test_view() {
    let memory = DeviceMemory::new(0x1000, 64);
    let view = memory.view(16, 32).unwrap();
    assert_eq!(view.address(), 0x1010);
    assert_eq!(view.size(), 32);
    assert!(memory.view(48, 32).is_err());
}

#[test]
fn test_null_view_stays_null() {
    let memory = DeviceMemory::new(0, 64);
    let view = memory.view(16, 16).unwrap();
    assert!(view.is_null());
    assert_eq!(view.size(), 16);
}

#[test]
fn test_owning_memory_frees_on_drop() {
    let host = Arc::new(HostAllocator::default());
    let allocator: Arc<dyn MemoryAllocator> = host.clone();
    let owned = OwningDeviceMemory::allocate(&allocator, 0, 32).unwrap();
    assert_eq!(host.live_allocations(), 1);
    drop(owned);
    assert_eq!(host.live_allocations(), 0);
}

#[test]
fn test_owning_memory_release() {
    let host = Arc::new(HostAllocator::default());
    let allocator: Arc<dyn MemoryAllocator> = host.clone();
    let owned = OwningDeviceMemory::allocate(&allocator, 0, 32).unwrap();
    let memory = owned.release();
    assert_eq!(host.live_allocations(), 1);
    host.deallocate(0, memory).unwrap();
}

#[test]
fn test_maybe_owning_release() {
    let host = Arc::new(HostAllocator::default());
    let allocator: Arc<dyn MemoryAllocator> = host.clone();
    let owned = OwningDeviceMemory::allocate(&allocator, 0, 32).unwrap();
    let address = owned.memory();

    let mut slot = MaybeOwningDeviceMemory::from(owned);
    assert!(slot.is_owning());
    let taken = slot.release().unwrap();
    assert!(!slot.is_owning());
    assert_eq!(slot.as_device_memory(), address);
    assert!(slot.release().is_none());

    drop(taken);
    assert_eq!(host.live_allocations(), 0);
}

use std::sync::mpsc;

use test_case::test_case;

use crate::{HostAllocator, HostExecutor, MemoryAllocator, StreamExecutor};

#[test]
fn test_zero_size_is_null() {
    let allocator = HostAllocator::default();
    let memory = allocator.allocate(0, 0).unwrap();
    assert!(memory.is_null());
    assert_eq!(allocator.live_allocations(), 0);
    allocator.deallocate(0, memory).unwrap();
}

#[test_case(1; "one byte")]
#[test_case(63; "under alignment")]
#[test_case(4096; "page")]
fn test_allocation_alignment(size: usize) {
    let allocator = HostAllocator::builder().alignment(256).build();
    let memory = allocator.allocate(0, size).unwrap();
    assert!(memory.is_aligned(256));
    assert_eq!(memory.size(), size);
    assert_eq!(allocator.bytes_in_use(), size);
    allocator.deallocate(0, memory).unwrap();
    assert_eq!(allocator.bytes_in_use(), 0);
}

#[test]
fn test_memory_is_zeroed() {
    let allocator = HostAllocator::default();
    let memory = allocator.allocate(0, 128).unwrap();
    assert!(unsafe { memory.as_host_slice() }.iter().all(|&b| b == 0));
    allocator.deallocate(0, memory).unwrap();
}

#[test]
fn test_memory_limit() {
    let allocator = HostAllocator::builder().memory_limit(100).build();
    let first = allocator.allocate(0, 80).unwrap();
    let error = allocator.allocate(0, 40).unwrap_err();
    assert!(error.to_string().contains("out of memory"));
    allocator.deallocate(0, first).unwrap();
    allocator.allocate(0, 40).unwrap();
}

#[test]
fn test_double_free_rejected() {
    let allocator = HostAllocator::default();
    let memory = allocator.allocate(0, 16).unwrap();
    allocator.deallocate(0, memory).unwrap();
    assert!(allocator.deallocate(0, memory).is_err());
}

#[test]
fn test_synchronous_by_default() {
    assert!(!HostAllocator::default().allows_asynchronous_deallocation());
}

#[test]
fn test_deallocation_is_ordered_on_stream() {
    let executor = HostExecutor::new(0);
    let stream = executor.create_stream().unwrap();
    let allocator = HostAllocator::builder().deallocation_stream(stream.clone()).build();
    assert!(allocator.allows_asynchronous_deallocation());

    let (open, gate) = mpsc::channel::<()>();
    stream
        .do_host_callback(Box::new(move || -> crate::Result<()> {
            let _ = gate.recv();
            Ok(())
        }))
        .unwrap();
    let memory = allocator.allocate(0, 32).unwrap();
    allocator.deallocate(0, memory).unwrap();

    // Queued work may still use the buffer.
    assert!(allocator.is_live(memory));
    assert_eq!(allocator.bytes_in_use(), 32);
    assert!(allocator.deallocate(0, memory).is_err());

    open.send(()).unwrap();
    stream.block_host_until_done().unwrap();
    assert!(!allocator.is_live(memory));
    assert_eq!(allocator.bytes_in_use(), 0);
}

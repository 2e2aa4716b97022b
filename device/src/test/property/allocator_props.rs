use proptest::prelude::*;

use crate::error::Error;
use crate::{DeviceMemory, HostAllocator, MemoryAllocator};

#[derive(Debug, Clone)]
enum Op {
    Allocate(usize),
    /// Frees the n-th live buffer, modulo the live count.
    Free(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![3 => (0usize..96).prop_map(Op::Allocate), 2 => any::<usize>().prop_map(Op::Free)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn accounting_tracks_live_buffers(ops in prop::collection::vec(op(), 1..48), limit in 64usize..512) {
        let allocator = HostAllocator::builder().alignment(16).memory_limit(limit).build();
        let mut live: Vec<DeviceMemory> = Vec::new();

        for op in ops {
            match op {
                Op::Allocate(size) => match allocator.allocate(0, size) {
                    Ok(memory) if size == 0 => prop_assert!(memory.is_null()),
                    Ok(memory) => {
                        prop_assert_eq!(memory.size(), size);
                        prop_assert_eq!(memory.address() % 16, 0);
                        live.push(memory);
                    }
                    Err(Error::OutOfMemory { requested, in_use, .. }) => {
                        prop_assert_eq!(requested, size);
                        prop_assert!(in_use + size > limit);
                    }
                    Err(error) => prop_assert!(false, "unexpected error: {error}"),
                },
                Op::Free(n) if !live.is_empty() => {
                    let memory = live.swap_remove(n % live.len());
                    allocator.deallocate(0, memory).unwrap();
                    prop_assert!(!allocator.is_live(memory));
                }
                Op::Free(_) => {}
            }

            prop_assert!(allocator.bytes_in_use() <= limit);
            prop_assert_eq!(allocator.bytes_in_use(), live.iter().map(|memory| memory.size()).sum::<usize>());
            prop_assert_eq!(allocator.live_allocations(), live.len());
        }

        for memory in live {
            allocator.deallocate(0, memory).unwrap();
        }
        prop_assert_eq!(allocator.bytes_in_use(), 0);
    }
}

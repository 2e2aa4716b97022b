use std::collections::HashSet;
use std::sync::Arc;

use kiln_device::{DeviceMemory, HostAllocator, MemoryAllocator};
use kiln_schedule::BufferAssignment;
use kiln_shape::ShapeIndex;
use proptest::prelude::*;

use crate::BufferAllocations;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Parameter,
    Constant,
    ThreadLocal,
    LiveOut { in_result: bool },
    Temporary,
}

fn category() -> impl Strategy<Value = Category> {
    prop_oneof![
        Just(Category::Parameter),
        Just(Category::Constant),
        Just(Category::ThreadLocal),
        any::<bool>().prop_map(|in_result| Category::LiveOut { in_result }),
        Just(Category::Temporary),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn tear_down_frees_exactly_execution_owned_buffers(
        layout in prop::collection::vec((category(), 0usize..64), 1..24),
    ) {
        let execution = Arc::new(HostAllocator::builder().name("execution").build());
        let caller = HostAllocator::builder().name("caller").build();

        let mut assignment = BufferAssignment::builder();
        let mut buffers = Vec::new();
        let mut live = HashSet::new();
        let mut kept = Vec::new();
        for (parameter, &(category, size)) in layout.iter().enumerate() {
            let allocation = assignment.allocation().size(size);
            match category {
                Category::Parameter => {
                    allocation.parameter((parameter, ShapeIndex::root())).call();
                    buffers.push(caller.allocate(0, size).unwrap());
                }
                Category::Constant => {
                    allocation.is_constant(true).call();
                    buffers.push(caller.allocate(0, size).unwrap());
                }
                Category::ThreadLocal => {
                    allocation.is_thread_local(true).call();
                    buffers.push(DeviceMemory::null());
                }
                Category::LiveOut { in_result } => {
                    allocation.maybe_live_out(true).call();
                    let buffer = execution.allocate(0, size).unwrap();
                    if in_result && !buffer.is_null() {
                        live.insert(buffer.address());
                        kept.push(buffer);
                    }
                    buffers.push(buffer);
                }
                Category::Temporary => {
                    allocation.call();
                    buffers.push(execution.allocate(0, size).unwrap());
                }
            }
        }
        let assignment = assignment.build();
        let caller_live = caller.live_allocations();

        let resolved = BufferAllocations::new(buffers, 0, execution.clone());
        resolved.tear_down(&live, assignment.allocations()).unwrap();

        prop_assert_eq!(execution.live_allocations(), kept.len());
        prop_assert!(kept.iter().all(|buffer| execution.is_live(*buffer)));
        prop_assert_eq!(caller.live_allocations(), caller_live);
    }
}

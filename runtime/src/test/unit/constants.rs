use std::sync::{Arc, mpsc};

use kiln_device::{HostAllocator, MemoryAllocator, Stream, StreamExecutor};

use kiln_hlo::{HloComputation, HloModule, HloOpcode};
use kiln_schedule::{BufferAssignment, HloPosition, Slice, StreamAssignmentConfig, assign_streams};
use kiln_shape::ShapeIndex;

use super::helpers::{Fixture, add_kernel, f32_bytes, kernel_thunk, read_f32, vector_shape};
use crate::thunk::ThunkSequence;
use crate::{Arguments, ConstantCache, ConstantInfo, Executable, RunOptions};

/// `(p + c1) + c2` with both constants bound to allocations.
///
/// Allocations: 0 parameter, 1 result, 2 `c1`, 3 `c2`, 4 temporary.
fn constant_sum(binary: &[u8]) -> Executable {
    let mut builder = HloComputation::builder("entry");
    let p = builder.add_parameter(0, "p", vector_shape()).unwrap();
    let c1 = builder.add_constant("c1", vector_shape()).unwrap();
    let c2 = builder.add_constant("c2", vector_shape()).unwrap();
    let partial = builder.add_instruction("partial", HloOpcode::Add, vector_shape(), &[p, c1]).unwrap();
    let sum = builder.add_instruction("sum", HloOpcode::Add, vector_shape(), &[partial, c2]).unwrap();
    let computation = builder.build().unwrap();

    let mut assignment = BufferAssignment::builder();
    let param = assignment.allocation().size(16).parameter((0, ShapeIndex::root())).call();
    let result = assignment.allocation().size(16).maybe_live_out(true).call();
    let first = assignment.allocation().size(16).is_constant(true).call();
    let second = assignment.allocation().size(16).is_constant(true).call();
    let temp = assignment.allocation().size(16).call();
    for (hlo, allocation) in [(p, param), (sum, result), (c1, first), (c2, second), (partial, temp)] {
        assignment.assign(HloPosition::top_level(hlo), Slice::new(allocation, 0, 16)).unwrap();
    }

    let slice = |allocation| Slice::new(allocation, 0, 16);
    let thunks: ThunkSequence = vec![
        Box::new(kernel_thunk(&computation, partial, add_kernel(), &[slice(param), slice(first), slice(temp)])),
        Box::new(kernel_thunk(&computation, sum, add_kernel(), &[slice(temp), slice(second), slice(result)])),
    ];
    let constants = vec![
        ConstantInfo::new("c1", f32_bytes(&[10.0, 20.0, 30.0, 40.0])).with_allocation(first),
        ConstantInfo::new("c2", f32_bytes(&[0.5; 4])).with_allocation(second),
    ];

    let module = HloModule::new("constant_sum", computation);
    let streams = assign_streams(&module, &StreamAssignmentConfig::default()).unwrap();
    Executable::from_module(&module, Arc::new(assignment.build()), thunks, &streams, constants, binary.to_vec())
        .unwrap()
}

#[test]
fn test_constants_resolved_once_per_device() {
    let fixture = Fixture::new();
    // The binary defines `c1`; `c2` needs a buffer of its own.
    let global = fixture.executor.define_global("c1", &[0; 16]).unwrap();
    let executable = constant_sum(b"\x7fELF");
    let argument = fixture.shaped(fixture.vector(&[1.0, 2.0, 3.0, 4.0]));

    for _ in 0..2 {
        let result = executable.execute_on_stream_borrowed(&fixture.run_options(), &[&argument]).unwrap();
        assert_eq!(read_f32(result.root_buffer()), vec![11.5, 22.5, 33.5, 44.5]);
    }

    assert_eq!(fixture.executor.module_loads(), 1);
    assert_eq!(executable.constants().resolved_devices(), 1);
    assert!(executable.constants().module(0).is_some());
    assert_eq!(read_f32(global), vec![10.0, 20.0, 30.0, 40.0]);
    assert_eq!(fixture.allocator.live_allocations(), 1);
}

#[test]
fn test_constants_without_binary_get_own_buffers() {
    let fixture = Fixture::new();
    let global = fixture.executor.define_global("c1", &[0; 16]).unwrap();
    let executable = constant_sum(b"");
    let argument = fixture.shaped(fixture.vector(&[0.0; 4]));

    let result = executable.execute_on_stream_borrowed(&fixture.run_options(), &[&argument]).unwrap();

    assert_eq!(read_f32(result.root_buffer()), vec![10.5, 20.5, 30.5, 40.5]);
    assert_eq!(fixture.executor.module_loads(), 0);
    assert!(executable.constants().module(0).is_none());
    // Without a loaded module the global is never looked up.
    assert_eq!(read_f32(global), vec![0.0; 4]);
}

#[test]
fn test_empty_constant_without_symbol_is_null() {
    let fixture = Fixture::new();
    let cache = ConstantCache::new(
        vec![
            ConstantInfo::new("empty", Vec::<u8>::new()).with_allocation(0),
            ConstantInfo::new("unbound", f32_bytes(&[1.0])),
            ConstantInfo::new("bound", f32_bytes(&[2.0])).with_allocation(1),
        ],
        Arc::from(&b"module"[..]),
    );

    let resolved = cache.resolve(fixture.stream.as_ref()).unwrap();
    resolved.uploaded.wait().unwrap();
    let globals = resolved.globals;

    assert_eq!(globals.len(), 2);
    assert!(globals[&0].is_null());
    assert_eq!(read_f32(globals[&1]), vec![2.0]);
    assert!(Arc::ptr_eq(&globals, &cache.resolve(fixture.stream.as_ref()).unwrap().globals));
    assert_eq!(cache.constants().len(), 3);
}

/// Run options on `stream` whose frees are ordered on that same stream.
fn stream_ordered_options(fixture: &Fixture, stream: &Arc<dyn Stream>) -> RunOptions {
    let allocator: Arc<dyn MemoryAllocator> =
        Arc::new(HostAllocator::builder().name("stream-ordered").deallocation_stream(stream.clone()).build());
    RunOptions::builder().stream(stream.clone()).allocator(allocator).stream_pool(fixture.pool.clone()).build()
}

#[test]
fn test_second_stream_waits_for_constant_upload() {
    let fixture = Fixture::new();
    let executable = constant_sum(b"");
    let other = fixture.executor.create_stream().unwrap();
    let argument = fixture.shaped(fixture.vector(&[1.0, 2.0, 3.0, 4.0]));
    let borrowed = [&argument];

    // Hold the first stream so the upload is still queued when the second stream runs.
    let (open, gate) = mpsc::channel::<()>();
    fixture
        .stream
        .do_host_callback(Box::new(move || -> kiln_device::Result<()> {
            let _ = gate.recv();
            Ok(())
        }))
        .unwrap();
    let first = stream_ordered_options(&fixture, &fixture.stream);
    let second = stream_ordered_options(&fixture, &other);
    let held = executable.execute_async_on_stream(&first, Arguments::Borrowed(&borrowed)).unwrap();
    let waiting = executable.execute_async_on_stream(&second, Arguments::Borrowed(&borrowed)).unwrap();
    assert_eq!(executable.constants().resolved_devices(), 1);

    let marker = other.record_event().unwrap();
    assert!(!marker.is_complete());
    open.send(()).unwrap();
    other.block_host_until_done().unwrap();
    fixture.stream.block_host_until_done().unwrap();

    let expected = vec![11.5, 22.5, 33.5, 44.5];
    assert_eq!(read_f32(waiting.consume_result().root_buffer()), expected);
    assert_eq!(read_f32(held.consume_result().root_buffer()), expected);
}

use std::collections::HashSet;

use kiln_device::{DeviceMemory, ShapedBuffer};
use kiln_schedule::{BufferAllocation, BufferAssignment, Slice};
use kiln_shape::ShapeIndex;
use test_case::test_case;

use super::helpers::{Fixture, vector_shape};
use crate::{
    Arguments, BufferAllocations, ConstantGlobals, Error, ErrorCode, Result, check_alignment, expected_alignment,
};

/// Parameter, constant, thread-local, live-out and temporary, in that order.
fn mixed_allocations() -> Vec<BufferAllocation> {
    let mut assignment = BufferAssignment::builder();
    assignment.allocation().size(16).parameter((0, ShapeIndex::root())).call();
    assignment.allocation().size(16).is_constant(true).call();
    assignment.allocation().size(64).is_thread_local(true).call();
    assignment.allocation().size(16).maybe_live_out(true).call();
    assignment.allocation().size(32).call();
    assignment.build().allocations().to_vec()
}

fn generate(
    fixture: &Fixture,
    allocations: &[BufferAllocation],
    argument: &ShapedBuffer,
    globals: &ConstantGlobals,
) -> Result<BufferAllocations> {
    BufferAllocations::generate()
        .allocations(allocations)
        .arguments(&Arguments::Borrowed(&[argument]))
        .globals(globals)
        .allocator(fixture.dyn_allocator())
        .device_ordinal(0)
        .dump(&|| "assignment".to_string())
        .call()
}

#[test]
fn test_generate_resolves_each_category() {
    let fixture = Fixture::new();
    let allocations = mixed_allocations();
    let input = fixture.vector(&[1.0; 4]);
    let constant = fixture.vector(&[2.0; 4]);
    let globals = ConstantGlobals::from([(1, constant)]);

    let buffers = generate(&fixture, &allocations, &fixture.shaped(input), &globals).unwrap();

    assert_eq!(buffers.size(), 5);
    assert_eq!(buffers.get_device_address(0).unwrap(), input);
    assert_eq!(buffers.get_device_address(1).unwrap(), constant);
    assert!(buffers.get_device_address(2).unwrap().is_null());
    assert_eq!(buffers.get_device_address(3).unwrap().size(), 16);
    assert_eq!(buffers.get_device_address(4).unwrap().size(), 32);
    assert_eq!(fixture.allocator.live_allocations(), 4);

    buffers.tear_down(&HashSet::new(), &allocations).unwrap();
    assert_eq!(fixture.allocator.live_allocations(), 2);
}

#[test]
fn test_unresolved_constant_is_null() {
    let fixture = Fixture::new();
    let allocations = mixed_allocations();
    let argument = fixture.shaped(fixture.vector(&[1.0; 4]));

    let buffers = generate(&fixture, &allocations, &argument, &ConstantGlobals::new()).unwrap();

    assert!(buffers.get_device_address(1).unwrap().is_null());
    buffers.tear_down(&HashSet::new(), &allocations).unwrap();
}

#[test]
fn test_tear_down_keeps_live_outputs() {
    let fixture = Fixture::new();
    let allocations = mixed_allocations();
    let argument = fixture.shaped(fixture.vector(&[1.0; 4]));
    let buffers = generate(&fixture, &allocations, &argument, &ConstantGlobals::new()).unwrap();
    let output = buffers.get_device_address(3).unwrap();

    buffers.tear_down(&HashSet::from([output.address()]), &allocations).unwrap();

    assert!(fixture.allocator.is_live(output));
    assert!(!fixture.allocator.is_live(buffers.get_device_address(4).unwrap()));
    assert_eq!(fixture.allocator.live_allocations(), 2);
}

#[test]
fn test_tear_down_reports_foreign_buffer() {
    let fixture = Fixture::new();
    let allocations = mixed_allocations();
    let foreign = DeviceMemory::new(0x1000, 32);
    let buffers = BufferAllocations::new(
        vec![DeviceMemory::null(), DeviceMemory::null(), DeviceMemory::null(), DeviceMemory::null(), foreign],
        0,
        fixture.dyn_allocator(),
    );

    let error = buffers.tear_down(&HashSet::new(), &allocations).unwrap_err();

    assert!(matches!(error, Error::Device { .. }), "{error}");
}

#[test]
fn test_zero_sized_parameter_may_be_null() {
    let fixture = Fixture::new();
    let mut assignment = BufferAssignment::builder();
    assignment.allocation().size(0).parameter((0, ShapeIndex::root())).call();
    let allocations = assignment.build().allocations().to_vec();
    let argument = ShapedBuffer::new(&vector_shape(), 0);

    let buffers = generate(&fixture, &allocations, &argument, &ConstantGlobals::new()).unwrap();

    assert!(buffers.get_device_address(0).unwrap().is_null());
}

#[test]
fn test_null_parameter_for_sized_allocation_is_rejected() {
    let fixture = Fixture::new();
    let allocations = mixed_allocations();
    let argument = ShapedBuffer::new(&vector_shape(), 0);

    let error = generate(&fixture, &allocations, &argument, &ConstantGlobals::new()).unwrap_err();

    assert!(matches!(error, Error::NullParameterBuffer { parameter: 0, .. }), "{error}");
    assert_eq!(error.code(), ErrorCode::FailedPrecondition);
    assert_eq!(fixture.allocator.live_allocations(), 0);
}

#[test_case(0, 16, true; "parameter on 16 bytes")]
#[test_case(0, 8, false; "parameter on 8 bytes")]
#[test_case(1, 64, true; "constant on 64 bytes")]
#[test_case(1, 32, false; "constant on 32 bytes")]
#[test_case(4, 128, true; "temporary on 128 bytes")]
#[test_case(4, 16, false; "temporary on 16 bytes")]
#[test_case(4, 0, true; "null is always aligned")]
fn test_check_alignment(allocation: usize, address: usize, aligned: bool) {
    let allocations = mixed_allocations();
    let buffer = if address == 0 { DeviceMemory::null() } else { DeviceMemory::new(address, 16) };

    let result = check_alignment(&allocations[allocation], buffer);

    assert_eq!(result.is_ok(), aligned);
    if let Err(error) = result {
        let expected = expected_alignment(&allocations[allocation]);
        assert!(matches!(error, Error::Misaligned { alignment, .. } if alignment == expected), "{error}");
        assert_eq!(error.code(), ErrorCode::Internal);
    }
}

#[test]
fn test_slice_address() {
    let fixture = Fixture::new();
    let base = DeviceMemory::new(0x4000, 64);
    let buffers = BufferAllocations::new(vec![base], 0, fixture.dyn_allocator());

    let view = buffers.get_device_address_for_slice(&Slice::new(0, 16, 32)).unwrap();

    assert_eq!(view, DeviceMemory::new(0x4010, 32));
    assert!(buffers.get_device_address_for_slice(&Slice::new(0, 48, 32)).is_err());
    assert!(matches!(buffers.get_device_address(1), Err(Error::UnknownAllocation { index: 1, count: 1 })));
}

#[test]
fn test_display() {
    let fixture = Fixture::new();
    let buffers =
        BufferAllocations::new(vec![DeviceMemory::new(0x40, 16), DeviceMemory::null()], 0, fixture.dyn_allocator());

    assert_eq!(
        buffers.to_string(),
        "BufferAllocations on device 0:\n  allocation 0: 0x40 (16 bytes)\n  allocation 1: 0x0 (0 bytes)\n"
    );
}

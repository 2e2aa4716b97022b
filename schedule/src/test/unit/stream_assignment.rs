use kiln_hlo::{GEMM_CUSTOM_CALL_TARGET, HloComputation, HloModule, HloOpcode, PrimitiveType, Shape};

use super::helpers::{binary, dot, unary, vector};
use crate::{Error, StreamAssignmentConfig, assign_streams};

fn two_parameters() -> (kiln_hlo::HloComputationBuilder, kiln_hlo::HloId, kiln_hlo::HloId) {
    let mut builder = HloComputation::builder("entry");
    let lhs = builder.add_parameter(0, "lhs", vector()).unwrap();
    let rhs = builder.add_parameter(1, "rhs", vector()).unwrap();
    (builder, lhs, rhs)
}

#[test]
fn test_single_gemm_on_main_stream() {
    let (mut builder, lhs, rhs) = two_parameters();
    let d = dot(&mut builder, "d", lhs, rhs);
    let module = HloModule::new("single", builder.build().unwrap());

    let streams = assign_streams(&module, &StreamAssignmentConfig::default()).unwrap();

    assert_eq!(streams.stream_count(), 1);
    assert_eq!(streams.stream_number_for_hlo(d).unwrap(), 0);
    assert!(!streams.has_stream_assigned(lhs));
    assert!(matches!(streams.stream_number_for_hlo(rhs), Err(Error::MissingStreamAssignment { .. })));
}

#[test]
fn test_independent_gemms_run_concurrently() {
    let (mut builder, lhs, rhs) = two_parameters();
    let d1 = dot(&mut builder, "d1", lhs, rhs);
    let d2 = builder.add_custom_call("d2", GEMM_CUSTOM_CALL_TARGET, vector(), &[lhs, rhs]).unwrap();
    let d3 = builder.add_instruction("d3", HloOpcode::Convolution, vector(), &[rhs, lhs]).unwrap();
    let sum = binary(&mut builder, "sum", d1, d2);
    let module = HloModule::new("concurrent", builder.build().unwrap());

    let streams = assign_streams(&module, &StreamAssignmentConfig::default()).unwrap();

    assert_eq!(streams.stream_number_for_hlo(d1).unwrap(), 0);
    assert_eq!(streams.stream_number_for_hlo(d2).unwrap(), 1);
    assert_eq!(streams.stream_number_for_hlo(d3).unwrap(), 2);
    assert_eq!(streams.stream_number_for_hlo(sum).unwrap(), 0);
    assert_eq!(streams.stream_count(), 3);
}

#[test]
fn test_dependent_gemms_share_stream() {
    let (mut builder, lhs, rhs) = two_parameters();
    let d1 = dot(&mut builder, "d1", lhs, rhs);
    let d2 = dot(&mut builder, "d2", lhs, rhs);
    let d3 = dot(&mut builder, "d3", d2, rhs);
    let module = HloModule::new("chain", builder.build().unwrap());

    let streams = assign_streams(&module, &StreamAssignmentConfig::default()).unwrap();

    // d3 reads d2 so may reuse its stream, but not d1's.
    assert_eq!(streams.stream_number_for_hlo(d1).unwrap(), 0);
    assert_eq!(streams.stream_number_for_hlo(d2).unwrap(), 1);
    assert_eq!(streams.stream_number_for_hlo(d3).unwrap(), 1);
}

#[test]
fn test_disabled_multi_streaming() {
    let (mut builder, lhs, rhs) = two_parameters();
    let d1 = dot(&mut builder, "d1", lhs, rhs);
    let d2 = dot(&mut builder, "d2", lhs, rhs);
    let module = HloModule::new("disabled", builder.build().unwrap());
    let config = StreamAssignmentConfig::builder().disable_multi_streaming(true).build();

    let streams = assign_streams(&module, &config).unwrap();

    assert_eq!(streams.stream_count(), 1);
    assert_eq!(streams.stream_number_for_hlo(d1).unwrap(), 0);
    assert_eq!(streams.stream_number_for_hlo(d2).unwrap(), 0);
}

#[test]
fn test_rng_ops_share_stream() {
    let mut builder = HloComputation::builder("entry");
    let seed = builder.add_constant("seed", Shape::scalar(PrimitiveType::U64)).unwrap();
    let state = builder.add_instruction("state", HloOpcode::RngGetAndUpdateState, vector(), &[seed]).unwrap();
    let r1 = builder.add_instruction("r1", HloOpcode::Rng, vector(), &[state]).unwrap();
    let n = unary(&mut builder, "n", r1);
    let r2 = builder.add_instruction("r2", HloOpcode::Rng, vector(), &[state]).unwrap();
    let module = HloModule::new("rng", builder.build().unwrap());

    let streams = assign_streams(&module, &StreamAssignmentConfig::default()).unwrap();

    assert!(!streams.has_stream_assigned(seed));
    let rng_stream = streams.stream_number_for_hlo(state).unwrap();
    assert_eq!(streams.stream_number_for_hlo(r1).unwrap(), rng_stream);
    assert_eq!(streams.stream_number_for_hlo(r2).unwrap(), rng_stream);
    assert_eq!(streams.stream_number_for_hlo(n).unwrap(), 0);
}

use kiln_hlo::{HloId, HloOpcode};

use super::helpers::{binary, entry, unary, vector};
use crate::{Error, ScheduleDependencies, StreamAssignment};

fn streams(assignments: &[(HloId, usize)]) -> StreamAssignment {
    let mut streams = StreamAssignment::new();
    for &(hlo, stream) in assignments {
        streams.assign_stream_to_hlo(hlo, stream);
    }
    streams
}

#[test]
fn test_cross_stream_edge_subsumes_later_waits() {
    let (mut builder, p) = entry();
    let t1 = unary(&mut builder, "t1", p);
    let t3 = unary(&mut builder, "t3", p);
    let t2 = unary(&mut builder, "t2", t1);
    let t4 = binary(&mut builder, "t4", t1, t3);
    let computation = builder.build().unwrap();
    let streams = streams(&[(t1, 0), (t2, 0), (t3, 1), (t4, 1)]);

    let deps = ScheduleDependencies::compute(&computation, &[t1, t3, t2, t4], &streams).unwrap();

    // t4 -> t3 and t2 -> t1 are same-stream, only t4 -> t1 crosses.
    assert_eq!(deps.edges(), vec![(3, 0)]);
    assert!(deps.is_depended(0));
    assert!(!deps.is_depended(1));
    assert_eq!(deps.depends_on(3), &[0]);
}

#[test]
fn test_earlier_wait_on_same_stream_drops_edge() {
    let (mut builder, p) = entry();
    let t1 = unary(&mut builder, "t1", p);
    let t3 = unary(&mut builder, "t3", t1);
    let t2 = unary(&mut builder, "t2", t1);
    let t4 = binary(&mut builder, "t4", t1, t3);
    let computation = builder.build().unwrap();
    let streams = streams(&[(t1, 0), (t2, 0), (t3, 1), (t4, 1)]);

    let deps = ScheduleDependencies::compute(&computation, &[t1, t3, t2, t4], &streams).unwrap();

    assert_eq!(deps.edges(), vec![(1, 0)]);
    assert!(deps.depends_on(3).is_empty());
}

#[test]
fn test_single_stream_has_no_edges() {
    let (mut builder, p) = entry();
    let a = unary(&mut builder, "a", p);
    let b = unary(&mut builder, "b", a);
    let c = binary(&mut builder, "c", a, b);
    let computation = builder.build().unwrap();
    let streams = streams(&[(a, 0), (b, 0), (c, 0)]);

    let deps = ScheduleDependencies::compute(&computation, &[a, b, c], &streams).unwrap();

    assert_eq!(deps.edge_count(), 0);
    assert!((0..3).all(|thunk| !deps.is_depended(thunk)));
}

#[test]
fn test_looks_through_operands_without_thunks() {
    let (mut builder, p) = entry();
    let a = unary(&mut builder, "a", p);
    let cast = builder.add_instruction("cast", HloOpcode::Bitcast, vector(), &[a]).unwrap();
    let tuple = builder.add_tuple("tuple", &[cast, p]).unwrap();
    let element = builder.add_get_tuple_element("element", tuple, 0).unwrap();
    let b = unary(&mut builder, "b", element);
    let computation = builder.build().unwrap();
    let streams = streams(&[(a, 0), (b, 1)]);

    let deps = ScheduleDependencies::compute(&computation, &[a, b], &streams).unwrap();

    assert_eq!(deps.edges(), vec![(1, 0)]);
}

#[test]
fn test_latest_source_on_stream_wins() {
    // Thunks 0 and 1 on stream 0; thunk 2 on stream 1 reads both.
    let deps = ScheduleDependencies::from_edges(vec![0, 0, 1], [(2, 0), (2, 1)]).unwrap();

    assert_eq!(deps.edges(), vec![(2, 1)]);
    assert!(!deps.is_depended(0));
    assert!(deps.is_depended(1));
}

#[test]
fn test_sources_on_different_streams_are_kept() {
    let deps = ScheduleDependencies::from_edges(vec![0, 1, 2], [(2, 0), (2, 1)]).unwrap();
    assert_eq!(deps.edges(), vec![(2, 1), (2, 0)]);
}

#[test]
fn test_missing_stream_is_an_error() {
    let (mut builder, p) = entry();
    let a = unary(&mut builder, "a", p);
    let computation = builder.build().unwrap();

    let err = ScheduleDependencies::compute(&computation, &[a], &StreamAssignment::new()).unwrap_err();
    assert!(matches!(err, Error::MissingStreamAssignment { hlo } if hlo == a));
}

#[test]
fn test_duplicate_thunk_is_an_error() {
    let (mut builder, p) = entry();
    let a = unary(&mut builder, "a", p);
    let computation = builder.build().unwrap();
    let streams = streams(&[(a, 0)]);

    let err = ScheduleDependencies::compute(&computation, &[a, a], &streams).unwrap_err();
    assert!(matches!(err, Error::DuplicateThunk { .. }));
}

#[test]
fn test_forward_edge_is_an_error() {
    let err = ScheduleDependencies::from_edges(vec![0, 1], [(0, 1)]).unwrap_err();
    assert!(matches!(err, Error::DependencyOrder { thunk: 0, dependency: 1 }));
}

#[test]
fn test_operand_scheduled_later_is_an_error() {
    let (mut builder, p) = entry();
    let a = unary(&mut builder, "a", p);
    let b = unary(&mut builder, "b", a);
    let computation = builder.build().unwrap();
    let streams = streams(&[(a, 0), (b, 1)]);

    let err = ScheduleDependencies::compute(&computation, &[b, a], &streams).unwrap_err();
    assert!(matches!(err, Error::DependencyOrder { .. }));
}

#[test]
fn test_empty() {
    let deps = ScheduleDependencies::from_edges(Vec::new(), []).unwrap();
    assert!(deps.is_empty());
    assert!(deps.depends_on(0).is_empty());
    assert!(!deps.is_depended(0));
}

//! Mapping of instructions to device streams.
//!
//! Stream 0 is the main stream. Only matrix multiplications are spread over
//! side streams: each one takes the lowest stream not used by an earlier
//! matrix multiplication that could run concurrently with it. Random number
//! generators share a single stream so their state updates stay ordered.

use std::collections::{HashMap, HashSet};

use kiln_hlo::{HloId, HloInstruction, HloModule, HloOpcode, HloReachabilityMap};
use snafu::OptionExt;
use tracing::debug;

use crate::config::StreamAssignmentConfig;
use crate::error::{MissingStreamAssignmentSnafu, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamAssignment {
    stream_count: usize,
    hlo_to_stream: HashMap<HloId, usize>,
}

impl StreamAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of streams used; at least one.
    pub fn stream_count(&self) -> usize {
        self.stream_count.max(1)
    }

    pub fn has_stream_assigned(&self, hlo: HloId) -> bool {
        self.hlo_to_stream.contains_key(&hlo)
    }

    pub fn stream_number_for_hlo(&self, hlo: HloId) -> Result<usize> {
        self.hlo_to_stream.get(&hlo).copied().context(MissingStreamAssignmentSnafu { hlo })
    }

    pub fn assign_stream_to_hlo(&mut self, hlo: HloId, stream: usize) {
        self.stream_count = self.stream_count.max(stream + 1);
        self.hlo_to_stream.insert(hlo, stream);
    }

    fn assigned_count(&self) -> usize {
        self.stream_count
    }
}

fn compute_stream_to_assign(
    hlo: &HloInstruction,
    config: &StreamAssignmentConfig,
    assignment: &StreamAssignment,
    reachability: &HloReachabilityMap,
    seen_gemms: &[HloId],
) -> Result<Option<usize>> {
    if matches!(hlo.opcode, HloOpcode::Parameter | HloOpcode::Constant) {
        return Ok(None);
    }
    if config.disable_multi_streaming || !hlo.is_gemm() {
        return Ok(Some(0));
    }

    let mut forbidden = HashSet::new();
    for &gemm in seen_gemms {
        if !reachability.is_connected(hlo.id, gemm) {
            forbidden.insert(assignment.stream_number_for_hlo(gemm)?);
        }
    }
    let free = (0..assignment.assigned_count()).find(|stream| !forbidden.contains(stream));
    Ok(Some(free.unwrap_or(assignment.assigned_count())))
}

/// Assigns streams to every instruction of the entry computation that runs
/// on the device. Parameters and constants get no stream.
#[tracing::instrument(skip_all, fields(module = module.name()))]
pub fn assign_streams(module: &HloModule, config: &StreamAssignmentConfig) -> Result<StreamAssignment> {
    let computation = module.entry_computation();
    let reachability = HloReachabilityMap::build(computation);

    let mut assignment = StreamAssignment::new();
    let mut seen_gemms = Vec::new();
    let mut rng_stream = None;

    for hlo in computation.instructions() {
        let stream = match (hlo.opcode.is_rng(), rng_stream) {
            (true, Some(stream)) => Some(stream),
            _ => compute_stream_to_assign(hlo, config, &assignment, &reachability, &seen_gemms)?,
        };
        if let Some(stream) = stream {
            assignment.assign_stream_to_hlo(hlo.id, stream);
            if hlo.opcode.is_rng() && rng_stream.is_none() {
                rng_stream = Some(stream);
            }
        }
        if hlo.is_gemm() {
            seen_gemms.push(hlo.id);
        }
    }

    debug!(streams = assignment.stream_count(), gemms = seen_gemms.len(), "assigned streams");
    Ok(assignment)
}

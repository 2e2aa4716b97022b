//! Thunks in execution order, with their streams and cross-stream waits.

use std::fmt;

use kiln_hlo::{HloComputation, HloId};
use kiln_schedule::{ScheduleDependencies, StreamAssignment};
use snafu::{OptionExt, ResultExt};
use tracing::debug;

use crate::error::*;
use crate::thunk::{Thunk, ThunkSequence};

/// Immutable total order of thunks plus the reduced set of events each
/// thunk waits for before it starts.
#[derive(Debug)]
pub struct ThunkSchedule {
    thunks: ThunkSequence,
    dependencies: ScheduleDependencies,
    stream_count: usize,
}

impl ThunkSchedule {
    /// Schedules `thunks` in the given order. Every thunk must name the
    /// instruction it implements.
    pub fn new(
        thunks: ThunkSequence,
        computation: &HloComputation,
        stream_assignment: &StreamAssignment,
    ) -> Result<Self> {
        let hlos = thunks
            .iter()
            .map(|thunk| thunk.info().hlo.context(MissingThunkInstructionSnafu { thunk: thunk.info().to_string() }))
            .collect::<Result<Vec<HloId>>>()?;
        let dependencies =
            ScheduleDependencies::compute(computation, &hlos, stream_assignment).context(ScheduleSnafu)?;
        let stream_count = dependencies.streams().iter().map(|stream| stream + 1).fold(1, usize::max);
        let stream_count = stream_count.max(stream_assignment.stream_count());
        debug!(thunks = thunks.len(), streams = stream_count, edges = dependencies.edge_count(), "built schedule");
        Ok(Self { thunks, dependencies, stream_count })
    }

    /// Runs every thunk on the main stream.
    pub fn sequential(thunks: ThunkSequence) -> Self {
        let dependencies = ScheduleDependencies::single_stream(thunks.len());
        Self { thunks, dependencies, stream_count: 1 }
    }

    pub fn total_order(&self) -> &[Box<dyn Thunk>] {
        &self.thunks
    }

    pub fn stream_count(&self) -> usize {
        self.stream_count
    }

    pub fn stream_number_for_thunk(&self, position: usize) -> usize {
        self.dependencies.stream_of(position)
    }

    /// Thunks `position` waits for, latest first.
    pub fn depends_on(&self, position: usize) -> &[usize] {
        self.dependencies.depends_on(position)
    }

    /// Whether some thunk waits for `position`, so it must record an event.
    pub fn depended(&self, position: usize) -> bool {
        self.dependencies.is_depended(position)
    }

    pub fn dependencies(&self) -> &ScheduleDependencies {
        &self.dependencies
    }

    pub fn needs_async_comms(&self) -> bool {
        self.thunks.iter().any(|thunk| thunk.kind().needs_async_comms_stream())
    }
}

impl fmt::Display for ThunkSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.thunks.is_empty() {
            return f.write_str("No thunks.");
        }

        f.write_str("Total order:\n")?;
        for (position, thunk) in self.thunks.iter().enumerate() {
            writeln!(f, "\t{} {} [stream {}]", thunk.kind(), thunk.info(), self.stream_number_for_thunk(position))?;
        }
        f.write_str("\nDependencies:\n")?;
        for (position, thunk) in self.thunks.iter().enumerate() {
            for &dependency in self.depends_on(position) {
                let source = &self.thunks[dependency];
                writeln!(f, "\t{} depends on {}", thunk.info().profile_annotation, source.info().profile_annotation)?;
            }
        }
        Ok(())
    }
}

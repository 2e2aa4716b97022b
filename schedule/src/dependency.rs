//! Cross-stream dependency edges between thunks of a fixed total order.
//!
//! Thunks are identified by their position in the total order. A thunk
//! depends on the nearest thunks feeding it through the dataflow graph:
//! operands without a thunk of their own (bitcasts and other forwarding ops)
//! are looked through. Only edges between different streams are kept, since
//! work on one stream is already ordered.
//!
//! Edges are then reduced with a `last_dependency[dst_stream][src_stream]`
//! table, walking the total order: if some earlier thunk on `dst_stream`
//! already waits for a thunk at or after `src` on `src_stream`, the edge is
//! implied and dropped.
//!
//! # Example
//!
//! ```text
//!  S0    S1
//!  T1 <--+---+
//!  T3    |   |
//!        T2  |     T2 -> T1 kept, table[S1][S0] = pos(T1)
//!        T4--+     T4 -> T1 dropped: pos(T1) <= table[S1][S0]
//! ```

use std::collections::{HashMap, HashSet};

use kiln_hlo::{HloComputation, HloId};
use smallvec::SmallVec;
use snafu::{ResultExt, ensure};
use tracing::trace;

use crate::error::*;
use crate::stream_assignment::StreamAssignment;

pub type ThunkPosition = usize;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleDependencies {
    stream_of: Vec<usize>,
    depends_on: Vec<SmallVec<[ThunkPosition; 2]>>,
    depended: Vec<bool>,
}

impl ScheduleDependencies {
    /// Computes the reduced edge set for thunks whose instructions are
    /// `thunk_hlos`, listed in total order.
    pub fn compute(
        computation: &HloComputation,
        thunk_hlos: &[HloId],
        streams: &StreamAssignment,
    ) -> Result<Self> {
        let mut hlo_to_thunk = HashMap::with_capacity(thunk_hlos.len());
        let mut stream_of = Vec::with_capacity(thunk_hlos.len());
        for (position, &hlo) in thunk_hlos.iter().enumerate() {
            ensure!(hlo_to_thunk.insert(hlo, position).is_none(), DuplicateThunkSnafu { hlo });
            stream_of.push(streams.stream_number_for_hlo(hlo)?);
        }

        let mut edges = Vec::new();
        for (position, &hlo) in thunk_hlos.iter().enumerate() {
            let instruction = computation.instruction(hlo).context(HloSnafu)?;
            let mut worklist: Vec<HloId> = instruction.operands.iter().rev().copied().collect();
            let mut visited = HashSet::new();
            while let Some(operand) = worklist.pop() {
                if !visited.insert(operand) {
                    continue;
                }
                match hlo_to_thunk.get(&operand) {
                    Some(&source) => {
                        if stream_of[source] != stream_of[position] {
                            edges.push((position, source));
                        }
                    }
                    None => {
                        let operand = computation.instruction(operand).context(HloSnafu)?;
                        worklist.extend(operand.operands.iter().rev().copied());
                    }
                }
            }
        }

        Self::from_edges(stream_of, edges)
    }

    /// Reduces an arbitrary `(dst, src)` edge list over thunks on `stream_of`.
    pub fn from_edges(
        stream_of: Vec<usize>,
        edges: impl IntoIterator<Item = (ThunkPosition, ThunkPosition)>,
    ) -> Result<Self> {
        let count = stream_of.len();
        let mut depends_on: Vec<SmallVec<[ThunkPosition; 2]>> = vec![SmallVec::new(); count];
        for (dst, src) in edges {
            ensure!(src < dst && dst < count, DependencyOrderSnafu { thunk: dst, dependency: src });
            if stream_of[src] != stream_of[dst] && !depends_on[dst].contains(&src) {
                depends_on[dst].push(src);
            }
        }

        let mut dependencies = Self { stream_of, depends_on, depended: vec![false; count] };
        dependencies.remove_redundant_edges();
        for sources in &dependencies.depends_on {
            for &src in sources {
                dependencies.depended[src] = true;
            }
        }
        Ok(dependencies)
    }

    /// Dependencies of `count` thunks that all run on the main stream.
    pub fn single_stream(count: usize) -> Self {
        Self { stream_of: vec![0; count], depends_on: vec![SmallVec::new(); count], depended: vec![false; count] }
    }

    fn remove_redundant_edges(&mut self) {
        let stream_count = self.stream_of.iter().copied().max().map_or(0, |max| max + 1);
        let mut last_dependency: Vec<Option<ThunkPosition>> = vec![None; stream_count * stream_count];

        for dst in 0..self.depends_on.len() {
            let dst_stream = self.stream_of[dst];
            let sources = &mut self.depends_on[dst];
            // Latest source first, so it subsumes earlier ones on the same stream.
            sources.sort_unstable_by(|a, b| b.cmp(a));
            let before = sources.len();
            sources.retain(|src| {
                let slot = &mut last_dependency[dst_stream * stream_count + self.stream_of[*src]];
                if slot.is_some_and(|last| *src <= last) {
                    return false;
                }
                *slot = Some(*src);
                true
            });
            if sources.len() != before {
                trace!(thunk = dst, removed = before - sources.len(), "dropped redundant dependencies");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.stream_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stream_of.is_empty()
    }

    pub fn stream_of(&self, thunk: ThunkPosition) -> usize {
        self.stream_of[thunk]
    }

    pub fn streams(&self) -> &[usize] {
        &self.stream_of
    }

    /// Thunks `thunk` must wait for, latest first.
    pub fn depends_on(&self, thunk: ThunkPosition) -> &[ThunkPosition] {
        self.depends_on.get(thunk).map_or(&[], |sources| sources.as_slice())
    }

    /// Whether some other thunk waits for `thunk` and it must record an event.
    pub fn is_depended(&self, thunk: ThunkPosition) -> bool {
        self.depended.get(thunk).copied().unwrap_or(false)
    }

    /// All retained `(dst, src)` edges, ordered by `dst`.
    pub fn edges(&self) -> Vec<(ThunkPosition, ThunkPosition)> {
        self.depends_on
            .iter()
            .enumerate()
            .flat_map(|(dst, sources)| sources.iter().map(move |&src| (dst, src)))
            .collect()
    }

    pub fn edge_count(&self) -> usize {
        self.depends_on.iter().map(SmallVec::len).sum()
    }
}

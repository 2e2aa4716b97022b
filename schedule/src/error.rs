use kiln_hlo::HloId;
use kiln_shape::ShapeIndex;
use snafu::Snafu;

use crate::buffer_assignment::{AllocationIndex, HloPosition, Slice};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("allocation {index} does not exist"))]
    UnknownAllocation { index: AllocationIndex },

    #[snafu(display("slice {slice} exceeds allocation of {allocation_size} bytes"))]
    InvalidSlice { slice: Slice, allocation_size: usize },

    #[snafu(display("value {position} is already assigned to {slice}"))]
    ValueAlreadyAssigned { position: HloPosition, slice: Slice },

    /// Constants must own their allocation exclusively.
    #[snafu(display("constant allocation {allocation} already holds {existing}, cannot also hold {position}"))]
    ConstantAllocationShared { allocation: AllocationIndex, existing: HloPosition, position: HloPosition },

    #[snafu(display("constant slice {slice} must cover its whole allocation of {allocation_size} bytes"))]
    ConstantSliceMismatch { slice: Slice, allocation_size: usize },

    #[snafu(display("constant {position} is assigned to non-constant allocation {allocation}"))]
    ConstantOutsideConstantAllocation { position: HloPosition, allocation: AllocationIndex },

    #[snafu(display("constant allocation {allocation} holds {count} values, expected exactly one"))]
    ConstantAllocationValueCount { allocation: AllocationIndex, count: usize },

    #[snafu(display("constant allocation {allocation} holds {position}, which is not a constant"))]
    NonConstantInConstantAllocation { allocation: AllocationIndex, position: HloPosition },

    #[snafu(display("no buffer is assigned at {position}"))]
    NoSlice { position: HloPosition },

    #[snafu(display("buffer at {position} is ambiguous: {slices:?}"))]
    AmbiguousSlice { position: HloPosition, slices: Vec<Slice> },

    #[snafu(display("points-to set of root instruction is ambiguous at {index}"))]
    AmbiguousRoot { index: ShapeIndex },

    #[snafu(display("output {index} must start its own allocation, got {slice}"))]
    OutputSliceOffset { index: ShapeIndex, slice: Slice },

    #[snafu(display("instruction {hlo} has no stream assigned"))]
    MissingStreamAssignment { hlo: HloId },

    #[snafu(display("instruction {hlo} is mapped to more than one thunk"))]
    DuplicateThunk { hlo: HloId },

    /// A thunk may only wait on thunks earlier in the total order.
    #[snafu(display("thunk {thunk} depends on thunk {dependency} which does not precede it"))]
    DependencyOrder { thunk: usize, dependency: usize },

    #[snafu(display("{source}"))]
    Hlo { source: kiln_hlo::Error },

    #[snafu(display("{source}"))]
    Shape { source: kiln_shape::Error },
}

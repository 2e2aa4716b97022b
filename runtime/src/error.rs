//! Error types for executable construction and execution.

use kiln_hlo::HloId;
use kiln_schedule::{AllocationIndex, Slice};
use kiln_shape::ShapeIndex;
use snafu::Snafu;

/// Result type for runtime operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification of a failure, for callers deciding how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ErrorCode {
    Unimplemented,
    Internal,
    ResourceExhausted,
    InvalidArgument,
    FailedPrecondition,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Static scheduling failure (buffer assignment, output info, dependencies).
    #[snafu(display("{source}"))]
    Schedule { source: kiln_schedule::Error },

    /// Device operation failure.
    #[snafu(display("{source}"))]
    Device { source: kiln_device::Error },

    #[snafu(display("{source}"))]
    Shape { source: kiln_shape::Error },

    #[snafu(display("{source}\n{dump}\n"))]
    ResourceExhausted { source: kiln_device::Error, dump: String },

    #[snafu(display(
        "Cannot run computation because pointer to (sub-)buffer at index {index} of parameter {parameter} was null. \
         All pointers to (sub-)buffers must not be null, unless the (sub-)buffer has zero elements."
    ))]
    NullParameterBuffer { index: ShapeIndex, parameter: usize },

    #[snafu(display("computation takes parameter {parameter} but only {provided} arguments were given"))]
    MissingArgument { parameter: usize, provided: usize },

    #[snafu(display("Address of buffer {allocation} must be a multiple of {alignment:x}, but was {address:#x}"))]
    Misaligned { allocation: AllocationIndex, alignment: usize, address: usize },

    #[snafu(display(
        "An input was configured to be must-alias at compile time but not donated at runtime: allocation {allocation}"
    ))]
    MustAliasNotDonated { allocation: AllocationIndex },

    #[snafu(display("aliased allocation {allocation} holds {actual} bytes but the output needs {expected}"))]
    AliasSizeMismatch { allocation: AllocationIndex, expected: usize, actual: usize },

    #[snafu(display("allocation {index} is out of range for {count} buffers"))]
    UnknownAllocation { index: AllocationIndex, count: usize },

    #[snafu(display("slice {slice} exceeds buffer of {buffer_size} bytes"))]
    SliceOutOfBounds { slice: Slice, buffer_size: usize },

    #[snafu(display("Failed to complete all kernels launched on stream {stream}: {source}"))]
    BlockHost { stream: usize, source: kiln_device::Error },

    #[snafu(display("thunk {thunk} has no instruction to schedule by"))]
    MissingThunkInstruction { thunk: String },

    #[snafu(display("schedule uses {streams} streams but run options provide no stream pool"))]
    MissingStreamPool { streams: usize },

    #[snafu(display("thunk {thunk} waits on thunk {dependency} which recorded no event"))]
    MissingEvent { thunk: usize, dependency: usize },

    #[snafu(display("`run_options` must have a stream borrower for async thunks: {thunk}"))]
    MissingAsyncCommsStream { thunk: String },

    #[snafu(display("collective {op_id} spans several replicas but run options provide no collectives"))]
    MissingCollectives { op_id: i64 },

    #[snafu(display("collective started by {start} has no recorded event on device {device_ordinal}"))]
    CollectiveNotStarted { start: HloId, device_ordinal: usize },

    #[snafu(display("collective done for {start} has no matching start"))]
    UnpairedCollective { start: HloId },

    #[snafu(display("collective {op_id} failed: {message}"))]
    Collective { op_id: i64, message: String },

    #[snafu(display("custom call '{target}' failed: {message}"))]
    CustomCall { target: String, message: String },

    #[snafu(display("kernel '{kernel}' failed: {message}"))]
    Kernel { kernel: String, message: String },
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Schedule { source: kiln_schedule::Error::AmbiguousRoot { .. } } => ErrorCode::Unimplemented,
            Self::ResourceExhausted { .. } => ErrorCode::ResourceExhausted,
            Self::MustAliasNotDonated { .. } | Self::MissingArgument { .. } => ErrorCode::InvalidArgument,
            Self::NullParameterBuffer { .. }
            | Self::MissingStreamPool { .. }
            | Self::MissingAsyncCommsStream { .. }
            | Self::MissingCollectives { .. } => ErrorCode::FailedPrecondition,
            _ => ErrorCode::Internal,
        }
    }
}

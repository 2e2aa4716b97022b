//! Execution of compiled kiln modules.
//!
//! An [`Executable`] bundles what compilation produced: the buffer
//! assignment, a [`ThunkSchedule`] (thunks in total order, their streams and
//! the cross-stream waits between them), the module's constants and the
//! output description. Executing it:
//!
//! 1. resolves constants once per device ([`ConstantCache`]),
//! 2. maps every allocation to device memory ([`BufferAllocations`]),
//! 3. binds output positions, reusing donated inputs the module aliases,
//! 4. enqueues each thunk on its stream after the events it waits for,
//! 5. frees temporaries that did not end up in the result.
//!
//! # Configuration
//!
//! [`ExecutionConfig`] reads `KILN_SYNC_EXECUTION` and
//! `KILN_SKIP_ALIGNMENT_CHECK` when built with [`ExecutionConfig::from_env`].

pub mod buffer_allocations;
pub mod config;
pub mod constants;
pub mod error;
pub mod executable;
pub mod execution;
pub mod run_options;
pub mod thunk;
pub mod thunk_schedule;

#[cfg(test)]
pub mod test;

pub use buffer_allocations::{
    BufferAllocations, CONSTANT_BUFFER_ALIGN_BYTES, ConstantGlobals, ENTRY_PARAMETER_ALIGN_BYTES,
    XLA_ALLOCATED_BUFFER_ALIGN_BYTES, check_alignment, expected_alignment,
};
pub use config::ExecutionConfig;
pub use constants::{ConstantCache, ConstantInfo, DeviceConstants};
pub use error::{Error, ErrorCode, Result};
pub use executable::Executable;
pub use execution::{Arguments, ExecutionInput, ExecutionOutput, mark_to_be_released_arguments};
pub use run_options::RunOptions;
pub use thunk::{ExecuteParams, Kind, Thunk, ThunkInfo, ThunkSequence};
pub use thunk_schedule::ThunkSchedule;

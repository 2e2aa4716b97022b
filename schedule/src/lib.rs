//! Static scheduling for the kiln backend.
//!
//! Everything here runs at compile time, before any device is touched:
//!
//! - [`buffer_assignment`] - Allocations, slices and the value-to-slice map
//! - [`output_info`] - Where each position of the result lives
//! - [`stream_assignment`] - Which device stream each instruction runs on
//! - [`dependency`] - Minimal cross-stream wait edges for a thunk order
//! - [`config`] - Scheduling knobs

pub mod buffer_assignment;
pub mod config;
pub mod dependency;
pub mod error;
pub mod output_info;
pub mod stream_assignment;


pub use buffer_assignment::{
    AllocationIndex, BufferAllocation, BufferAssignment, BufferAssignmentBuilder, HloPosition, Slice,
};
pub use config::StreamAssignmentConfig;
pub use dependency::{ScheduleDependencies, ThunkPosition};
pub use error::{Error, Result};
pub use output_info::{OutputInfo, get_output_info};
pub use stream_assignment::{StreamAssignment, assign_streams};

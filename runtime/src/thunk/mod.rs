//! Units of device work.
//!
//! A thunk enqueues its work on the stream it is handed and returns without
//! waiting for it. Thunks never talk to each other directly: ordering across
//! streams is set up by the execution driver from the thunk schedule, and
//! collective start/done pairs share a side table of events.

pub mod collective;
pub mod copy;
pub mod custom_call;
pub mod kernel;
pub mod memset;
pub mod sequential;

use std::fmt;

use kiln_device::{Stream, StreamExecutor};
use kiln_hlo::{HloId, HloInstruction};

use crate::buffer_allocations::BufferAllocations;
use crate::error::Result;
use crate::run_options::RunOptions;

pub use collective::{
    AsyncCollectiveEvents, CollectiveBuffer, CollectiveBufferSlices, CollectiveOpKind, CollectivePairing, Collectives,
    NcclAllReduceDoneThunk, NcclAllReduceStartThunk, NcclCollectiveConfig, ReductionKind, ReplicaGroup,
};
pub use copy::DeviceToDeviceCopyThunk;
pub use custom_call::{CustomCallTarget, CustomCallThunk};
pub use kernel::{HostKernel, Kernel, KernelThunk};
pub use memset::{Memset32Thunk, MemzeroThunk};
pub use sequential::SequentialThunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Kind {
    Kernel,
    Copy,
    Memzero,
    Memset32,
    CustomCall,
    Sequential,
    NcclAllReduceStart,
    NcclAllReduceDone,
}

impl Kind {
    /// Thunks of this kind enqueue their work on the async comms stream.
    pub const fn needs_async_comms_stream(&self) -> bool {
        matches!(self, Self::NcclAllReduceStart)
    }
}

/// Identification of a thunk for scheduling and profiling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThunkInfo {
    pub profile_annotation: String,
    /// Instruction the thunk implements; scheduling needs it.
    pub hlo: Option<HloId>,
}

impl ThunkInfo {
    pub fn for_hlo(instruction: &HloInstruction) -> Self {
        Self { profile_annotation: instruction.name.clone(), hlo: Some(instruction.id) }
    }

    pub fn named(profile_annotation: impl Into<String>) -> Self {
        Self { profile_annotation: profile_annotation.into(), hlo: None }
    }
}

impl fmt::Display for ThunkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hlo {
            Some(hlo) => write!(f, "{} ({hlo})", self.profile_annotation),
            None => f.write_str(&self.profile_annotation),
        }
    }
}

/// Everything a thunk needs to enqueue its work.
#[derive(Clone, Copy)]
pub struct ExecuteParams<'a> {
    pub run_options: &'a RunOptions,
    pub buffer_allocations: &'a BufferAllocations,
    /// Stream the schedule assigned to the thunk.
    pub stream: &'a dyn Stream,
    pub async_comms_stream: Option<&'a dyn Stream>,
}

impl fmt::Debug for ExecuteParams<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteParams")
            .field("device_ordinal", &self.buffer_allocations.device_ordinal())
            .field("stream", &self.stream.id())
            .field("async_comms_stream", &self.async_comms_stream.map(|stream| stream.id()))
            .finish()
    }
}

pub trait Thunk: Send + Sync + fmt::Debug {
    fn kind(&self) -> Kind;

    fn info(&self) -> &ThunkInfo;

    /// Prepares per-device resources. Called before every execution, so
    /// implementations must make repeated calls cheap.
    fn initialize(&self, _executor: &dyn StreamExecutor) -> Result<()> {
        Ok(())
    }

    /// Enqueues the thunk's work on `params.stream`.
    fn execute_on_stream(&self, params: &ExecuteParams<'_>) -> Result<()>;
}

pub type ThunkSequence = Vec<Box<dyn Thunk>>;

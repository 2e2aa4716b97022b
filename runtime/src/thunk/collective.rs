//! Asynchronous all-reduce.
//!
//! The start thunk runs the reduction on the async comms stream after the
//! compute stream has produced its inputs, and leaves the completion event in
//! a table shared with its done thunk. The done thunk makes its own stream
//! wait on that event, so compute can overlap with communication in between.
//!
//! With a single participant the reduction is the identity and the start
//! thunk just copies each source to its destination.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use kiln_device::{DeviceMemory, Event, Stream};
use kiln_hlo::HloId;
use kiln_schedule::Slice;
use kiln_shape::PrimitiveType;
use parking_lot::Mutex;
use snafu::{OptionExt, ResultExt, ensure};
use tracing::debug;

use super::{ExecuteParams, Kind, Thunk, ThunkInfo};
use crate::error::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum CollectiveOpKind {
    CrossReplica,
    CrossModule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ReductionKind {
    Sum,
    Product,
    Min,
    Max,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaGroup {
    pub replica_ids: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NcclCollectiveConfig {
    pub operand_count: usize,
    pub operand_element_type: Vec<PrimitiveType>,
    pub replica_groups: Vec<ReplicaGroup>,
    pub op_kind: CollectiveOpKind,
    pub op_id: i64,
}

impl NcclCollectiveConfig {
    /// Whether every participant only reduces with itself.
    ///
    /// Without explicit groups all `participants` form one group.
    pub fn is_degenerate(&self, participants: usize) -> bool {
        if self.replica_groups.is_empty() {
            return participants == 1;
        }
        self.replica_groups.iter().all(|group| group.replica_ids.len() == 1)
    }
}

/// One operand of a collective, resolved to device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectiveBuffer {
    pub element_type: PrimitiveType,
    pub element_count: usize,
    pub source: DeviceMemory,
    pub destination: DeviceMemory,
}

/// One operand of a collective, as slices of the buffer assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectiveBufferSlices {
    pub element_type: PrimitiveType,
    pub element_count: usize,
    pub source: Slice,
    pub destination: Slice,
}

/// Cross-device communication used by non-degenerate collectives.
pub trait Collectives: Send + Sync + std::fmt::Debug {
    /// Enqueues an all-reduce of `buffers` on `stream`.
    fn all_reduce(
        &self,
        config: &NcclCollectiveConfig,
        reduction: ReductionKind,
        buffers: &[CollectiveBuffer],
        stream: &dyn Stream,
    ) -> Result<()>;
}

/// Completion events of started collectives, keyed by the start
/// instruction and the device it ran on.
#[derive(Debug, Default)]
pub struct AsyncCollectiveEvents {
    events: Mutex<HashMap<(HloId, usize), Event>>,
}

impl AsyncCollectiveEvents {
    pub fn insert(&self, start: HloId, device_ordinal: usize, event: Event) {
        self.events.lock().insert((start, device_ordinal), event);
    }

    pub fn take(&self, start: HloId, device_ordinal: usize) -> Option<Event> {
        self.events.lock().remove(&(start, device_ordinal))
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds start/done thunk pairs that share one event table.
///
/// Starts must be created before the done thunks that wait on them.
#[derive(Debug, Default)]
pub struct CollectivePairing {
    events: Arc<AsyncCollectiveEvents>,
    started: HashSet<HloId>,
}

impl CollectivePairing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &Arc<AsyncCollectiveEvents> {
        &self.events
    }

    pub fn start_thunk(
        &mut self,
        info: ThunkInfo,
        config: NcclCollectiveConfig,
        reduction: ReductionKind,
        buffers: Vec<CollectiveBufferSlices>,
    ) -> Result<NcclAllReduceStartThunk> {
        let start = info.hlo.context(MissingThunkInstructionSnafu { thunk: info.profile_annotation.clone() })?;
        self.started.insert(start);
        Ok(NcclAllReduceStartThunk { info, start, config, reduction, buffers, events: Arc::clone(&self.events) })
    }

    /// Done thunk for the collective started by instruction `start`.
    pub fn done_thunk(&self, info: ThunkInfo, start: HloId) -> Result<NcclAllReduceDoneThunk> {
        ensure!(self.started.contains(&start), UnpairedCollectiveSnafu { start });
        Ok(NcclAllReduceDoneThunk { info, start, events: Arc::clone(&self.events) })
    }
}

#[derive(Debug)]
pub struct NcclAllReduceStartThunk {
    info: ThunkInfo,
    start: HloId,
    config: NcclCollectiveConfig,
    reduction: ReductionKind,
    buffers: Vec<CollectiveBufferSlices>,
    events: Arc<AsyncCollectiveEvents>,
}

impl NcclAllReduceStartThunk {
    pub fn config(&self) -> &NcclCollectiveConfig {
        &self.config
    }
}

impl Thunk for NcclAllReduceStartThunk {
    fn kind(&self) -> Kind {
        Kind::NcclAllReduceStart
    }

    fn info(&self) -> &ThunkInfo {
        &self.info
    }

    fn execute_on_stream(&self, params: &ExecuteParams<'_>) -> Result<()> {
        let comms = params
            .async_comms_stream
            .context(MissingAsyncCommsStreamSnafu { thunk: self.info.profile_annotation.clone() })?;
        comms.wait_for_stream(params.stream).context(DeviceSnafu)?;

        let allocations = params.buffer_allocations;
        let buffers = self
            .buffers
            .iter()
            .map(|buffer| -> Result<CollectiveBuffer> {
                Ok(CollectiveBuffer {
                    element_type: buffer.element_type,
                    element_count: buffer.element_count,
                    source: allocations.get_device_address_for_slice(&buffer.source)?,
                    destination: allocations.get_device_address_for_slice(&buffer.destination)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let participants = params.run_options.replica_count();
        if self.config.is_degenerate(participants) {
            debug!(op_id = self.config.op_id, buffers = buffers.len(), "degenerate all-reduce, copying in place");
            for buffer in &buffers {
                if buffer.source != buffer.destination {
                    let size = buffer.element_count * buffer.element_type.bytes();
                    comms.memcpy_device_to_device(buffer.destination, buffer.source, size).context(DeviceSnafu)?;
                }
            }
        } else {
            let collectives =
                params.run_options.collectives().context(MissingCollectivesSnafu { op_id: self.config.op_id })?;
            debug!(op_id = self.config.op_id, participants, reduction = %self.reduction, "all-reduce");
            collectives.all_reduce(&self.config, self.reduction, &buffers, comms)?;
        }

        let event = comms.record_event().context(DeviceSnafu)?;
        self.events.insert(self.start, allocations.device_ordinal(), event);
        Ok(())
    }
}

#[derive(Debug)]
pub struct NcclAllReduceDoneThunk {
    info: ThunkInfo,
    start: HloId,
    events: Arc<AsyncCollectiveEvents>,
}

impl Thunk for NcclAllReduceDoneThunk {
    fn kind(&self) -> Kind {
        Kind::NcclAllReduceDone
    }

    fn info(&self) -> &ThunkInfo {
        &self.info
    }

    fn execute_on_stream(&self, params: &ExecuteParams<'_>) -> Result<()> {
        let device_ordinal = params.buffer_allocations.device_ordinal();
        let event = self
            .events
            .take(self.start, device_ordinal)
            .context(CollectiveNotStartedSnafu { start: self.start, device_ordinal })?;
        params.stream.wait_for_event(&event).context(DeviceSnafu)
    }
}

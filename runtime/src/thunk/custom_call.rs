use std::fmt;
use std::sync::Arc;

use bon::bon;
use kiln_device::{DeviceMemory, Stream};
use kiln_schedule::Slice;
use tracing::trace;

use super::{ExecuteParams, Kind, Thunk, ThunkInfo};
use crate::error::*;

/// Host function implementing a custom call. It receives the stream to
/// enqueue on, the operand buffers and the result buffers.
pub type CustomCallTarget =
    dyn Fn(&dyn Stream, &[DeviceMemory], &[DeviceMemory]) -> std::result::Result<(), String> + Send + Sync;

pub struct CustomCallThunk {
    info: ThunkInfo,
    target_name: String,
    target: Arc<CustomCallTarget>,
    operands: Vec<Slice>,
    results: Vec<Slice>,
}

impl fmt::Debug for CustomCallThunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomCallThunk")
            .field("info", &self.info)
            .field("target_name", &self.target_name)
            .field("operands", &self.operands)
            .field("results", &self.results)
            .finish_non_exhaustive()
    }
}

#[bon]
impl CustomCallThunk {
    #[builder]
    pub fn new(
        info: ThunkInfo,
        #[builder(into)] target_name: String,
        target: Arc<CustomCallTarget>,
        #[builder(default)] operands: Vec<Slice>,
        #[builder(default)] results: Vec<Slice>,
    ) -> Self {
        Self { info, target_name, target, operands, results }
    }
}

impl CustomCallThunk {
    pub fn target_name(&self) -> &str {
        &self.target_name
    }
}

impl Thunk for CustomCallThunk {
    fn kind(&self) -> Kind {
        Kind::CustomCall
    }

    fn info(&self) -> &ThunkInfo {
        &self.info
    }

    fn execute_on_stream(&self, params: &ExecuteParams<'_>) -> Result<()> {
        let resolve = |slices: &[Slice]| {
            slices
                .iter()
                .map(|slice| params.buffer_allocations.get_device_address_for_slice(slice))
                .collect::<Result<Vec<_>>>()
        };
        let operands = resolve(&self.operands)?;
        let results = resolve(&self.results)?;
        trace!(custom_call = %self.target_name, operands = operands.len(), results = results.len(), "calling");
        (self.target)(params.stream, &operands, &results)
            .map_err(|message| CustomCallSnafu { target: self.target_name.clone(), message }.build())
    }
}

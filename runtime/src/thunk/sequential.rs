use kiln_device::StreamExecutor;

use super::{ExecuteParams, Kind, Thunk, ThunkInfo, ThunkSequence};
use crate::error::Result;

/// Runs nested thunks in order on the stream it is given.
#[derive(Debug)]
pub struct SequentialThunk {
    info: ThunkInfo,
    thunks: ThunkSequence,
}

impl SequentialThunk {
    pub fn new(info: ThunkInfo, thunks: ThunkSequence) -> Self {
        Self { info, thunks }
    }

    pub fn thunks(&self) -> &[Box<dyn Thunk>] {
        &self.thunks
    }
}

impl Thunk for SequentialThunk {
    fn kind(&self) -> Kind {
        Kind::Sequential
    }

    fn info(&self) -> &ThunkInfo {
        &self.info
    }

    fn initialize(&self, executor: &dyn StreamExecutor) -> Result<()> {
        self.thunks.iter().try_for_each(|thunk| thunk.initialize(executor))
    }

    fn execute_on_stream(&self, params: &ExecuteParams<'_>) -> Result<()> {
        self.thunks.iter().try_for_each(|thunk| thunk.execute_on_stream(params))
    }
}

use kiln_schedule::Slice;
use snafu::ResultExt;

use super::{ExecuteParams, Kind, Thunk, ThunkInfo};
use crate::error::*;

#[derive(Debug, Clone)]
pub struct MemzeroThunk {
    info: ThunkInfo,
    destination: Slice,
}

impl MemzeroThunk {
    pub fn new(info: ThunkInfo, destination: Slice) -> Self {
        Self { info, destination }
    }
}

impl Thunk for MemzeroThunk {
    fn kind(&self) -> Kind {
        Kind::Memzero
    }

    fn info(&self) -> &ThunkInfo {
        &self.info
    }

    fn execute_on_stream(&self, params: &ExecuteParams<'_>) -> Result<()> {
        let destination = params.buffer_allocations.get_device_address_for_slice(&self.destination)?;
        params.stream.memzero(destination, destination.size()).context(DeviceSnafu)
    }
}

/// Fills a slice with a repeated 32-bit pattern. The slice size must be a
/// multiple of four.
#[derive(Debug, Clone)]
pub struct Memset32Thunk {
    info: ThunkInfo,
    destination: Slice,
    value: u32,
}

impl Memset32Thunk {
    pub fn new(info: ThunkInfo, destination: Slice, value: u32) -> Self {
        Self { info, destination, value }
    }
}

impl Thunk for Memset32Thunk {
    fn kind(&self) -> Kind {
        Kind::Memset32
    }

    fn info(&self) -> &ThunkInfo {
        &self.info
    }

    fn execute_on_stream(&self, params: &ExecuteParams<'_>) -> Result<()> {
        let destination = params.buffer_allocations.get_device_address_for_slice(&self.destination)?;
        params.stream.memset32(destination, self.value, destination.size()).context(DeviceSnafu)
    }
}

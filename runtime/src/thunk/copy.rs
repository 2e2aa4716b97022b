use kiln_schedule::Slice;
use snafu::ResultExt;

use super::{ExecuteParams, Kind, Thunk, ThunkInfo};
use crate::error::*;

/// Copies `size` bytes between two slices of device memory.
#[derive(Debug, Clone)]
pub struct DeviceToDeviceCopyThunk {
    info: ThunkInfo,
    source: Slice,
    destination: Slice,
    size: usize,
}

impl DeviceToDeviceCopyThunk {
    pub fn new(info: ThunkInfo, source: Slice, destination: Slice, size: usize) -> Self {
        Self { info, source, destination, size }
    }
}

impl Thunk for DeviceToDeviceCopyThunk {
    fn kind(&self) -> Kind {
        Kind::Copy
    }

    fn info(&self) -> &ThunkInfo {
        &self.info
    }

    fn execute_on_stream(&self, params: &ExecuteParams<'_>) -> Result<()> {
        let source = params.buffer_allocations.get_device_address_for_slice(&self.source)?;
        let destination = params.buffer_allocations.get_device_address_for_slice(&self.destination)?;
        params.stream.memcpy_device_to_device(destination, source, self.size).context(DeviceSnafu)
    }
}

//! Kernel launches.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use bon::bon;
use kiln_device::{DeviceMemory, Stream, StreamExecutor};
use kiln_schedule::Slice;
use parking_lot::Mutex;
use smallvec::SmallVec;
use snafu::ResultExt;
use tracing::{debug, trace};

use super::{ExecuteParams, Kind, Thunk, ThunkInfo};
use crate::error::*;

/// A compiled device function.
pub trait Kernel: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Loads the kernel on `executor`. Called once per device.
    fn initialize(&self, _executor: &dyn StreamExecutor) -> Result<()> {
        Ok(())
    }

    /// Enqueues one launch with `arguments` bound in order.
    fn launch(&self, stream: &dyn Stream, arguments: &[DeviceMemory]) -> Result<()>;
}

type HostKernelFn = dyn Fn(&[DeviceMemory]) -> kiln_device::Result<()> + Send + Sync;

/// Kernel for the host device: a closure run as a stream callback.
#[derive(Clone)]
pub struct HostKernel {
    name: String,
    body: Arc<HostKernelFn>,
}

impl HostKernel {
    pub fn new(
        name: impl Into<String>,
        body: impl Fn(&[DeviceMemory]) -> kiln_device::Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self { name: name.into(), body: Arc::new(body) }
    }
}

impl fmt::Debug for HostKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostKernel").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Kernel for HostKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn launch(&self, stream: &dyn Stream, arguments: &[DeviceMemory]) -> Result<()> {
        let body = Arc::clone(&self.body);
        let arguments = arguments.to_vec();
        stream.do_host_callback(Box::new(move || body(&arguments))).context(DeviceSnafu)
    }
}

#[derive(Debug)]
pub struct KernelThunk {
    info: ThunkInfo,
    kernel: Arc<dyn Kernel>,
    arguments: Vec<Slice>,
    /// Device ordinals the kernel has been initialized on.
    initialized: Mutex<HashSet<usize>>,
}

#[bon]
impl KernelThunk {
    #[builder]
    pub fn new(info: ThunkInfo, kernel: Arc<dyn Kernel>, #[builder(default)] arguments: Vec<Slice>) -> Self {
        Self { info, kernel, arguments, initialized: Mutex::new(HashSet::new()) }
    }
}

impl KernelThunk {
    pub fn kernel(&self) -> &Arc<dyn Kernel> {
        &self.kernel
    }

    pub fn arguments(&self) -> &[Slice] {
        &self.arguments
    }
}

impl Thunk for KernelThunk {
    fn kind(&self) -> Kind {
        Kind::Kernel
    }

    fn info(&self) -> &ThunkInfo {
        &self.info
    }

    fn initialize(&self, executor: &dyn StreamExecutor) -> Result<()> {
        let mut initialized = self.initialized.lock();
        if initialized.contains(&executor.device_ordinal()) {
            return Ok(());
        }
        self.kernel.initialize(executor)?;
        initialized.insert(executor.device_ordinal());
        debug!(kernel = self.kernel.name(), device = executor.device_ordinal(), "initialized kernel");
        Ok(())
    }

    fn execute_on_stream(&self, params: &ExecuteParams<'_>) -> Result<()> {
        let arguments = self
            .arguments
            .iter()
            .map(|slice| params.buffer_allocations.get_device_address_for_slice(slice))
            .collect::<Result<SmallVec<[DeviceMemory; 4]>>>()?;
        trace!(kernel = self.kernel.name(), stream = params.stream.id(), arguments = arguments.len(), "launching");
        self.kernel.launch(params.stream, &arguments)
    }
}

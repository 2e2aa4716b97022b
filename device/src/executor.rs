//! Per-device handles that create streams and host loaded modules.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use snafu::{OptionExt, ensure};
use tracing::debug;

use crate::allocator::{HostAllocator, MemoryAllocator};
use crate::error::{ModuleNotLoadedSnafu, Result, RuntimeSnafu};
use crate::memory::{DeviceMemory, OwningDeviceMemory};
use crate::stream::{HostStream, Stream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleHandle(pub u64);

impl fmt::Display for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub trait StreamExecutor: Send + Sync + std::fmt::Debug {
    fn device_ordinal(&self) -> usize;

    fn create_stream(&self) -> Result<Arc<dyn Stream>>;

    /// Loads a compiled binary and returns a handle for symbol lookups.
    fn load_module(&self, binary: &[u8]) -> Result<ModuleHandle>;

    /// Address of the global `name` defined by a loaded module, if any.
    fn get_symbol(&self, module: ModuleHandle, name: &str) -> Result<Option<DeviceMemory>>;

    /// Allocates memory owned by the device itself rather than by an execution.
    fn allocate(&self, size: usize) -> Result<OwningDeviceMemory>;

    /// Waits for every live stream of this device to drain.
    fn synchronize_all_activity(&self) -> Result<()>;
}

/// Host-simulated device.
///
/// Globals registered with [`HostExecutor::define_global`] play the role of
/// initialized data baked into compiled binaries: every loaded module
/// exposes them as symbols.
pub struct HostExecutor {
    ordinal: usize,
    this: Weak<HostExecutor>,
    allocator: Arc<dyn MemoryAllocator>,
    globals: Mutex<HashMap<String, OwningDeviceMemory>>,
    modules: Mutex<HashMap<ModuleHandle, usize>>,
    next_module: AtomicU64,
    module_loads: AtomicUsize,
    streams: Mutex<Vec<Weak<HostStream>>>,
}

impl fmt::Debug for HostExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostExecutor")
            .field("ordinal", &self.ordinal)
            .field("globals", &self.globals.lock().keys().collect::<Vec<_>>())
            .field("module_loads", &self.module_loads.load(Ordering::Relaxed))
            .finish()
    }
}

impl HostExecutor {
    pub fn new(ordinal: usize) -> Arc<Self> {
        Self::with_allocator(ordinal, Arc::new(HostAllocator::builder().name(format!("host:{ordinal}")).build()))
    }

    pub fn with_allocator(ordinal: usize, allocator: Arc<dyn MemoryAllocator>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            ordinal,
            this: this.clone(),
            allocator,
            globals: Mutex::new(HashMap::new()),
            modules: Mutex::new(HashMap::new()),
            next_module: AtomicU64::new(0),
            module_loads: AtomicUsize::new(0),
            streams: Mutex::new(Vec::new()),
        })
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Defines an initialized global visible to every loaded module.
    pub fn define_global(&self, name: impl Into<String>, contents: &[u8]) -> Result<DeviceMemory> {
        let memory = OwningDeviceMemory::allocate(&self.allocator, self.ordinal, contents.len())?;
        if !contents.is_empty() {
            // SAFETY: freshly allocated host memory of exactly `contents.len()` bytes.
            unsafe { memory.memory().as_host_slice_mut() }.copy_from_slice(contents);
        }
        let address = memory.memory();
        self.globals.lock().insert(name.into(), memory);
        Ok(address)
    }

    /// Number of `load_module` calls served so far.
    pub fn module_loads(&self) -> usize {
        self.module_loads.load(Ordering::Relaxed)
    }

    pub fn host_stream(&self) -> Result<Arc<HostStream>> {
        let this = self.this.upgrade().context(RuntimeSnafu { message: "host executor is being dropped" })?;
        let stream = Arc::new(HostStream::new(this)?);
        let mut streams = self.streams.lock();
        streams.retain(|stream| stream.strong_count() > 0);
        streams.push(Arc::downgrade(&stream));
        Ok(stream)
    }
}

impl StreamExecutor for HostExecutor {
    fn device_ordinal(&self) -> usize {
        self.ordinal
    }

    fn create_stream(&self) -> Result<Arc<dyn Stream>> {
        Ok(self.host_stream()? as Arc<dyn Stream>)
    }

    fn load_module(&self, binary: &[u8]) -> Result<ModuleHandle> {
        let handle = ModuleHandle(self.next_module.fetch_add(1, Ordering::Relaxed));
        self.modules.lock().insert(handle, binary.len());
        self.module_loads.fetch_add(1, Ordering::Relaxed);
        debug!(device = self.ordinal, module = handle.0, binary.size = binary.len(), "loaded module");
        Ok(handle)
    }

    fn get_symbol(&self, module: ModuleHandle, name: &str) -> Result<Option<DeviceMemory>> {
        ensure!(
            self.modules.lock().contains_key(&module),
            ModuleNotLoadedSnafu { handle: module.0, device_ordinal: self.ordinal }
        );
        Ok(self.globals.lock().get(name).map(OwningDeviceMemory::memory))
    }

    fn allocate(&self, size: usize) -> Result<OwningDeviceMemory> {
        OwningDeviceMemory::allocate(&self.allocator, self.ordinal, size)
    }

    fn synchronize_all_activity(&self) -> Result<()> {
        let streams: Vec<Arc<HostStream>> = self.streams.lock().iter().filter_map(Weak::upgrade).collect();
        let mut first_error = None;
        for stream in streams {
            if let Err(error) = stream.block_host_until_done() {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

//! Per-device cache of an executable's constants.
//!
//! Constants are resolved once per device ordinal: the executable's binary is
//! loaded on the device, and each constant either binds to the global the
//! binary defines under its symbol name or gets a buffer of its own. Initial
//! contents are copied on the stream that first resolves them; an event
//! recorded after the copies lets executions on any other stream of the
//! device wait for them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use kiln_device::{DeviceMemory, Event, ModuleHandle, OwningDeviceMemory, Stream, StreamExecutor};
use kiln_schedule::AllocationIndex;
use parking_lot::Mutex;
use snafu::ResultExt;
use tracing::{debug, warn};

use crate::buffer_allocations::ConstantGlobals;
use crate::error::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantInfo {
    pub symbol_name: String,
    pub content: Arc<[u8]>,
    /// Allocation the constant is bound to; constants without one are only
    /// referenced from inside the binary.
    pub allocation_index: Option<AllocationIndex>,
}

impl ConstantInfo {
    pub fn new(symbol_name: impl Into<String>, content: impl Into<Arc<[u8]>>) -> Self {
        Self { symbol_name: symbol_name.into(), content: content.into(), allocation_index: None }
    }

    pub fn with_allocation(mut self, index: AllocationIndex) -> Self {
        self.allocation_index = Some(index);
        self
    }
}

/// Constant addresses on one device and the point their uploads complete at.
#[derive(Debug, Clone)]
pub struct DeviceConstants {
    pub globals: Arc<ConstantGlobals>,
    pub uploaded: Event,
}

struct ResolvedConstants {
    executor: Arc<dyn StreamExecutor>,
    module: Option<ModuleHandle>,
    constants: DeviceConstants,
    /// Buffers allocated for constants the binary does not define.
    owned: Vec<OwningDeviceMemory>,
}

pub struct ConstantCache {
    constants: Vec<ConstantInfo>,
    binary: Arc<[u8]>,
    resolved: Mutex<HashMap<usize, ResolvedConstants>>,
}

impl fmt::Debug for ConstantCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let devices: Vec<usize> = self.resolved.lock().keys().copied().collect();
        f.debug_struct("ConstantCache")
            .field("constants", &self.constants.len())
            .field("binary", &self.binary.len())
            .field("devices", &devices)
            .finish()
    }
}

impl ConstantCache {
    pub fn new(constants: Vec<ConstantInfo>, binary: Arc<[u8]>) -> Self {
        Self { constants, binary, resolved: Mutex::new(HashMap::new()) }
    }

    pub fn constants(&self) -> &[ConstantInfo] {
        &self.constants
    }

    /// Addresses of the constants on `stream`'s device, resolving them on
    /// first use.
    ///
    /// Work that reads the constants must wait for `uploaded` first.
    pub fn resolve(&self, stream: &dyn Stream) -> Result<DeviceConstants> {
        let executor = stream.parent();
        let ordinal = executor.device_ordinal();

        let mut resolved = self.resolved.lock();
        if let Some(entry) = resolved.get(&ordinal) {
            return Ok(entry.constants.clone());
        }

        let module = if self.binary.is_empty() {
            None
        } else {
            Some(executor.load_module(&self.binary).context(DeviceSnafu)?)
        };

        let mut globals = ConstantGlobals::new();
        let mut owned = Vec::new();
        for constant in &self.constants {
            let symbol = match module {
                Some(module) => executor.get_symbol(module, &constant.symbol_name).context(DeviceSnafu)?,
                None => None,
            };
            let memory = match symbol {
                Some(memory) => {
                    if !constant.content.is_empty() {
                        stream.memcpy_host_to_device(memory, Arc::clone(&constant.content)).context(DeviceSnafu)?;
                    }
                    memory
                }
                None if constant.content.is_empty() => DeviceMemory::null(),
                None => {
                    let buffer = executor.allocate(constant.content.len()).context(DeviceSnafu)?;
                    let memory = buffer.memory();
                    stream.memcpy_host_to_device(memory, Arc::clone(&constant.content)).context(DeviceSnafu)?;
                    owned.push(buffer);
                    memory
                }
            };
            if let Some(index) = constant.allocation_index {
                globals.insert(index, memory);
            }
        }

        debug!(
            device = ordinal,
            module = module.map(|module| module.0),
            constants = self.constants.len(),
            allocated = owned.len(),
            "resolved constants"
        );
        let uploaded = stream.record_event().context(DeviceSnafu)?;
        let constants = DeviceConstants { globals: Arc::new(globals), uploaded };
        resolved.insert(ordinal, ResolvedConstants { executor, module, constants: constants.clone(), owned });
        Ok(constants)
    }

    /// Number of devices the constants have been resolved on.
    pub fn resolved_devices(&self) -> usize {
        self.resolved.lock().len()
    }

    /// Module loaded for `device_ordinal`, if the constants were resolved there.
    pub fn module(&self, device_ordinal: usize) -> Option<ModuleHandle> {
        self.resolved.lock().get(&device_ordinal).and_then(|entry| entry.module)
    }
}

impl Drop for ConstantCache {
    fn drop(&mut self) {
        for (ordinal, entry) in self.resolved.get_mut().drain() {
            // Pending uploads may still target the owned buffers.
            if let Err(error) = entry.executor.synchronize_all_activity() {
                warn!(device = ordinal, %error, "failed to synchronize device before releasing constants");
            }
            drop(entry.owned);
        }
    }
}

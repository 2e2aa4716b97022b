use std::alloc::Layout;
use std::collections::HashMap;
use std::sync::Arc;

use bon::bon;
use parking_lot::Mutex;
use snafu::{OptionExt, ensure};
use tracing::trace;

use crate::error::{AllocationFailedSnafu, OutOfMemorySnafu, Result, UnknownAllocationSnafu};
use crate::memory::DeviceMemory;
use crate::stream::Stream;

/// Device memory allocator used for temporaries and result buffers.
pub trait MemoryAllocator: Send + Sync + std::fmt::Debug {
    /// Allocates `size` bytes. A zero-sized request yields the null address.
    fn allocate(&self, device_ordinal: usize, size: usize) -> Result<DeviceMemory>;

    fn deallocate(&self, device_ordinal: usize, memory: DeviceMemory) -> Result<()>;

    /// Whether memory may be freed while work using it is still queued.
    ///
    /// Such an allocator must order each free after the work already enqueued
    /// on the execution's stream. When false, execution blocks the host until
    /// the stream drains so that temporaries can be freed safely.
    fn allows_asynchronous_deallocation(&self) -> bool {
        false
    }

    fn name(&self) -> &str;
}

/// Host-memory allocator backing the host-simulated device.
///
/// With a deallocation stream, frees are enqueued on that stream and take
/// effect once the work queued before them has run. Until then the buffer
/// still counts as live.
#[derive(Debug)]
pub struct HostAllocator {
    name: String,
    alignment: usize,
    memory_limit: Option<usize>,
    deallocation_stream: Option<Arc<dyn Stream>>,
    state: Arc<Mutex<HostAllocatorState>>,
}

#[derive(Debug, Default)]
struct HostAllocatorState {
    live: HashMap<usize, Layout>,
    /// Freed by the caller, waiting for the deallocation stream.
    pending: HashMap<usize, Layout>,
    bytes_in_use: usize,
}

impl HostAllocatorState {
    fn release(&mut self, address: usize) {
        if let Some(layout) = self.pending.remove(&address) {
            self.bytes_in_use -= layout.size();
            // SAFETY: the address was returned by `alloc_zeroed` with this layout and left `live` when freed.
            unsafe { std::alloc::dealloc(address as *mut u8, layout) };
        }
    }
}

impl Drop for HostAllocatorState {
    fn drop(&mut self) {
        for (address, layout) in self.live.drain().chain(self.pending.drain()) {
            // SAFETY: every entry came from `alloc_zeroed` with its layout.
            unsafe { std::alloc::dealloc(address as *mut u8, layout) };
        }
    }
}

impl Default for HostAllocator {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[bon]
impl HostAllocator {
    #[builder]
    pub fn builder(
        #[builder(default = "host".to_string(), into)] name: String,
        #[builder(default = 64)] alignment: usize,
        memory_limit: Option<usize>,
        /// Stream that orders frees after queued work; enables asynchronous deallocation.
        deallocation_stream: Option<Arc<dyn Stream>>,
    ) -> Self {
        let state = Arc::new(Mutex::new(HostAllocatorState::default()));
        Self { name, alignment, memory_limit, deallocation_stream, state }
    }

    pub fn bytes_in_use(&self) -> usize {
        self.state.lock().bytes_in_use
    }

    /// Buffers not yet returned to the host, including frees still queued.
    pub fn live_allocations(&self) -> usize {
        let state = self.state.lock();
        state.live.len() + state.pending.len()
    }

    pub fn is_live(&self, memory: DeviceMemory) -> bool {
        let state = self.state.lock();
        state.live.contains_key(&memory.address()) || state.pending.contains_key(&memory.address())
    }
}

impl MemoryAllocator for HostAllocator {
    fn allocate(&self, device_ordinal: usize, size: usize) -> Result<DeviceMemory> {
        if size == 0 {
            return Ok(DeviceMemory::null());
        }

        let mut state = self.state.lock();
        if let Some(limit) = self.memory_limit {
            ensure!(
                state.bytes_in_use + size <= limit,
                OutOfMemorySnafu { requested: size, in_use: state.bytes_in_use, limit }
            );
        }

        let layout = Layout::from_size_align(size, self.alignment)
            .ok()
            .context(AllocationFailedSnafu { device_ordinal, size })?;
        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        ensure!(!ptr.is_null(), AllocationFailedSnafu { device_ordinal, size });

        state.live.insert(ptr as usize, layout);
        state.bytes_in_use += size;
        trace!(allocator = %self.name, address = ptr as usize, size, "allocated");
        Ok(DeviceMemory::new(ptr as usize, size))
    }

    fn deallocate(&self, _device_ordinal: usize, memory: DeviceMemory) -> Result<()> {
        if memory.is_null() {
            return Ok(());
        }

        let address = memory.address();
        {
            let mut state = self.state.lock();
            let layout = state
                .live
                .remove(&address)
                .context(UnknownAllocationSnafu { allocator: self.name.clone(), address })?;
            state.pending.insert(address, layout);
        }

        let Some(stream) = &self.deallocation_stream else {
            self.state.lock().release(address);
            trace!(allocator = %self.name, address, size = memory.size(), "deallocated");
            return Ok(());
        };

        let state = Arc::clone(&self.state);
        // On a failed stream the callback never runs; the buffer is then freed with the allocator.
        stream.do_host_callback(Box::new(move || {
            state.lock().release(address);
            Ok(())
        }))?;
        trace!(allocator = %self.name, address, stream = stream.id(), "deallocation enqueued");
        Ok(())
    }

    fn allows_asynchronous_deallocation(&self) -> bool {
        self.deallocation_stream.is_some()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

//! Device abstraction for the kiln runtime.
//!
//! Provides the pieces execution is written against:
//! - [`DeviceMemory`] addresses and the owning wrappers around them
//! - [`MemoryAllocator`] for per-execution temporaries and results
//! - [`Stream`]s with [`Event`]s for cross-stream ordering
//! - [`StreamExecutor`] for per-device resources (streams, loaded modules)
//! - [`StreamPool`] for reusable side streams
//!
//! The host-simulated device ([`HostExecutor`], [`HostStream`],
//! [`HostAllocator`]) runs every stream on its own worker thread over plain
//! host memory, so multi-stream schedules really execute concurrently.

pub mod allocator;
pub mod error;
pub mod executor;
pub mod memory;
pub mod pool;
pub mod shaped_buffer;
pub mod stream;
pub mod sync;
pub mod worker;


pub use allocator::{HostAllocator, MemoryAllocator};
pub use error::{Error, Result};
pub use executor::{HostExecutor, ModuleHandle, StreamExecutor};
pub use memory::{DeviceMemory, MaybeOwningDeviceMemory, OwningDeviceMemory};
pub use pool::{PooledStream, StreamPool};
pub use shaped_buffer::{ScopedShapedBuffer, ShapedBuffer};
pub use stream::{HostCallback, HostStream, Stream};
pub use sync::{Event, StreamTimeline};
pub use worker::WorkerThread;

//! Per-invocation execution options.

use std::sync::Arc;

use bon::bon;
use kiln_device::{MemoryAllocator, Stream, StreamPool};

use crate::thunk::Collectives;

/// Resources one execution runs with: the main stream, the allocator for
/// temporaries and results, and optional side resources.
#[derive(Debug, Clone)]
pub struct RunOptions {
    stream: Arc<dyn Stream>,
    allocator: Arc<dyn MemoryAllocator>,
    stream_pool: Option<Arc<StreamPool>>,
    replica_count: usize,
    collectives: Option<Arc<dyn Collectives>>,
}

#[bon]
impl RunOptions {
    #[builder]
    pub fn new(
        stream: Arc<dyn Stream>,
        allocator: Arc<dyn MemoryAllocator>,
        /// Source of sub-streams and the async communication stream.
        stream_pool: Option<Arc<StreamPool>>,
        #[builder(default = 1)] replica_count: usize,
        collectives: Option<Arc<dyn Collectives>>,
    ) -> Self {
        Self { stream, allocator, stream_pool, replica_count, collectives }
    }
}

impl RunOptions {
    /// The main stream. Stream 0 of every schedule runs here.
    pub fn stream(&self) -> &Arc<dyn Stream> {
        &self.stream
    }

    pub fn allocator(&self) -> &Arc<dyn MemoryAllocator> {
        &self.allocator
    }

    pub fn stream_pool(&self) -> Option<&StreamPool> {
        self.stream_pool.as_deref()
    }

    pub fn replica_count(&self) -> usize {
        self.replica_count
    }

    pub fn collectives(&self) -> Option<&dyn Collectives> {
        self.collectives.as_deref()
    }

    pub fn device_ordinal(&self) -> usize {
        self.stream.device_ordinal()
    }
}

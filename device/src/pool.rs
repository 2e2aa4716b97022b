//! Reusable side streams.
//!
//! Streams are created on demand and returned to the pool when the borrower
//! drops them, unless the stream is in an error state.

use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::executor::StreamExecutor;
use crate::stream::Stream;

#[derive(Debug)]
pub struct StreamPool {
    executor: Arc<dyn StreamExecutor>,
    streams: Mutex<Vec<Arc<dyn Stream>>>,
}

impl StreamPool {
    pub fn new(executor: Arc<dyn StreamExecutor>) -> Self {
        Self { executor, streams: Mutex::new(Vec::new()) }
    }

    pub fn executor(&self) -> &Arc<dyn StreamExecutor> {
        &self.executor
    }

    pub fn borrow_stream(&self) -> Result<PooledStream<'_>> {
        let pooled = self.streams.lock().pop();
        let stream = match pooled {
            Some(stream) => stream,
            None => {
                let stream = self.executor.create_stream()?;
                debug!(stream = stream.id(), device = self.executor.device_ordinal(), "created pooled stream");
                stream
            }
        };
        Ok(PooledStream { pool: self, stream: Some(stream) })
    }

    /// Number of idle streams.
    pub fn available(&self) -> usize {
        self.streams.lock().len()
    }

    fn return_stream(&self, stream: Arc<dyn Stream>) {
        if stream.ok() {
            self.streams.lock().push(stream);
        } else {
            debug!(stream = stream.id(), "discarding failed stream");
        }
    }
}

/// A stream on loan from a [`StreamPool`].
#[derive(Debug)]
pub struct PooledStream<'a> {
    pool: &'a StreamPool,
    stream: Option<Arc<dyn Stream>>,
}

impl Deref for PooledStream<'_> {
    type Target = dyn Stream;

    fn deref(&self) -> &Self::Target {
        match &self.stream {
            Some(stream) => stream.as_ref(),
            None => unreachable!("pooled stream is only taken on drop"),
        }
    }
}

impl Drop for PooledStream<'_> {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.pool.return_stream(stream);
        }
    }
}

//! Ordered device work queues.
//!
//! Work enqueued on one [`Stream`] runs in enqueue order. Ordering between
//! streams exists only through events: `b.wait_for_event(&a.record_event()?)`
//! makes everything enqueued on `b` afterwards wait for everything enqueued
//! on `a` before the record.
//!
//! Errors are sticky: once an operation fails, later work on the stream is
//! skipped (events still complete so other streams never deadlock) and the
//! failure is reported by the next enqueue or by [`Stream::block_host_until_done`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use snafu::ensure;
use tracing::warn;

use crate::error::{CopyOutOfBoundsSnafu, NullAddressSnafu, Result, StreamFailedSnafu};
use crate::executor::{HostExecutor, StreamExecutor};
use crate::memory::DeviceMemory;
use crate::sync::{Event, StreamTimeline};
use crate::worker::WorkerThread;

pub type HostCallback = Box<dyn FnOnce() -> Result<()> + Send>;

pub trait Stream: Send + Sync + std::fmt::Debug {
    /// Process-unique stream id, used in logs and errors.
    fn id(&self) -> usize;

    fn parent(&self) -> Arc<dyn StreamExecutor>;

    fn device_ordinal(&self) -> usize {
        self.parent().device_ordinal()
    }

    /// Enqueues a completion marker for all work enqueued so far.
    fn record_event(&self) -> Result<Event>;

    /// Makes later work on this stream wait for `event`.
    fn wait_for_event(&self, event: &Event) -> Result<()>;

    /// Makes later work on this stream wait for all work currently on `other`.
    fn wait_for_stream(&self, other: &dyn Stream) -> Result<()> {
        let event = other.record_event()?;
        self.wait_for_event(&event)
    }

    fn memcpy_device_to_device(&self, dst: DeviceMemory, src: DeviceMemory, size: usize) -> Result<()>;

    fn memcpy_host_to_device(&self, dst: DeviceMemory, src: Arc<[u8]>) -> Result<()>;

    fn memzero(&self, dst: DeviceMemory, size: usize) -> Result<()>;

    fn memset32(&self, dst: DeviceMemory, pattern: u32, size: usize) -> Result<()>;

    /// Runs `callback` on the host once preceding work on this stream is done.
    fn do_host_callback(&self, callback: HostCallback) -> Result<()>;

    /// Blocks until all enqueued work completes; reports the sticky error if any.
    fn block_host_until_done(&self) -> Result<()>;

    fn ok(&self) -> bool;
}

fn check_copy(dst: DeviceMemory, src_size: usize, size: usize) -> Result<()> {
    ensure!(size <= dst.size() && size <= src_size, CopyOutOfBoundsSnafu { size, dst_size: dst.size(), src_size });
    ensure!(size == 0 || !dst.is_null(), NullAddressSnafu { size });
    Ok(())
}

static NEXT_STREAM_ID: AtomicUsize = AtomicUsize::new(0);

/// Stream of the host-simulated device, executed by a dedicated worker thread.
pub struct HostStream {
    id: usize,
    executor: Arc<HostExecutor>,
    timeline: Arc<StreamTimeline>,
    next_point: AtomicU64,
    error: Arc<Mutex<Option<String>>>,
    worker: WorkerThread,
}

impl std::fmt::Debug for HostStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostStream")
            .field("id", &self.id)
            .field("device_ordinal", &self.executor.ordinal())
            .field("timeline", &self.timeline.reached())
            .field("error", &*self.error.lock())
            .finish()
    }
}

impl HostStream {
    pub(crate) fn new(executor: Arc<HostExecutor>) -> Result<Self> {
        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        let worker = WorkerThread::new(format!("kiln-stream-{id}"))?;
        Ok(Self {
            id,
            executor,
            timeline: Arc::new(StreamTimeline::new()),
            next_point: AtomicU64::new(0),
            error: Arc::new(Mutex::new(None)),
            worker,
        })
    }

    fn check_ok(&self) -> Result<()> {
        match &*self.error.lock() {
            Some(message) => StreamFailedSnafu { stream: self.id, message: message.clone() }.fail(),
            None => Ok(()),
        }
    }

    /// Enqueues `op`; it is skipped if an earlier operation failed.
    fn enqueue(&self, op_name: &'static str, op: impl FnOnce() -> Result<()> + Send + 'static) -> Result<()> {
        self.check_ok()?;
        let error = Arc::clone(&self.error);
        let stream = self.id;
        self.worker.schedule(move || {
            if error.lock().is_some() {
                return;
            }
            if let Err(failure) = op() {
                warn!(stream, op = op_name, error = %failure, "stream operation failed");
                error.lock().get_or_insert_with(|| failure.to_string());
            }
        });
        Ok(())
    }

    fn record(&self) -> Event {
        let point = self.next_point.fetch_add(1, Ordering::Relaxed) + 1;
        let timeline = Arc::clone(&self.timeline);
        self.worker.schedule(move || timeline.advance_to(point));
        Event::new(Arc::clone(&self.timeline), point)
    }
}

impl Stream for HostStream {
    fn id(&self) -> usize {
        self.id
    }

    fn parent(&self) -> Arc<dyn StreamExecutor> {
        Arc::clone(&self.executor) as Arc<dyn StreamExecutor>
    }

    fn device_ordinal(&self) -> usize {
        self.executor.ordinal()
    }

    fn record_event(&self) -> Result<Event> {
        self.check_ok()?;
        Ok(self.record())
    }

    fn wait_for_event(&self, event: &Event) -> Result<()> {
        let event = event.clone();
        self.enqueue("wait", move || event.wait())
    }

    fn memcpy_device_to_device(&self, dst: DeviceMemory, src: DeviceMemory, size: usize) -> Result<()> {
        check_copy(dst, src.size(), size)?;
        if size == 0 {
            return Ok(());
        }
        ensure!(!src.is_null(), NullAddressSnafu { size });
        self.enqueue("memcpy_d2d", move || {
            // SAFETY: both ranges were bounds-checked against live device regions.
            unsafe { std::ptr::copy(src.as_ptr(), dst.as_mut_ptr(), size) };
            Ok(())
        })
    }

    fn memcpy_host_to_device(&self, dst: DeviceMemory, src: Arc<[u8]>) -> Result<()> {
        let size = src.len();
        check_copy(dst, size, size)?;
        if size == 0 {
            return Ok(());
        }
        self.enqueue("memcpy_h2d", move || {
            // SAFETY: destination was bounds-checked; source is owned host memory.
            unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), dst.as_mut_ptr(), size) };
            Ok(())
        })
    }

    fn memzero(&self, dst: DeviceMemory, size: usize) -> Result<()> {
        check_copy(dst, size, size)?;
        if size == 0 {
            return Ok(());
        }
        self.enqueue("memzero", move || {
            // SAFETY: destination was bounds-checked.
            unsafe { std::ptr::write_bytes(dst.as_mut_ptr(), 0, size) };
            Ok(())
        })
    }

    fn memset32(&self, dst: DeviceMemory, pattern: u32, size: usize) -> Result<()> {
        check_copy(dst, size, size)?;
        ensure!(size % 4 == 0, CopyOutOfBoundsSnafu { size, dst_size: dst.size(), src_size: size - size % 4 });
        if size == 0 {
            return Ok(());
        }
        self.enqueue("memset32", move || {
            // SAFETY: destination was bounds-checked.
            let bytes = unsafe { std::slice::from_raw_parts_mut(dst.as_mut_ptr(), size) };
            for chunk in bytes.chunks_exact_mut(4) {
                chunk.copy_from_slice(&pattern.to_ne_bytes());
            }
            Ok(())
        })
    }

    fn do_host_callback(&self, callback: HostCallback) -> Result<()> {
        self.enqueue("host_callback", callback)
    }

    fn block_host_until_done(&self) -> Result<()> {
        self.record().wait()?;
        self.check_ok()
    }

    fn ok(&self) -> bool {
        self.error.lock().is_none()
    }
}

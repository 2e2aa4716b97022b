//! Stream timelines and the events recorded on them.
//!
//! Each stream counts the operations it has retired on a timeline. Recording
//! an event reserves the next point on that timeline and enqueues the advance
//! to it, so the event is complete once every operation enqueued before it
//! has run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{EventTimeoutSnafu, Result};

/// Highest point a stream has retired, with a condvar for host waiters.
#[derive(Debug, Default)]
pub struct StreamTimeline {
    reached: Mutex<u64>,
    advanced: Condvar,
}

impl StreamTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reached(&self) -> u64 {
        *self.reached.lock()
    }

    /// Moves the timeline forward to `point`. Never moves it backwards.
    pub fn advance_to(&self, point: u64) {
        let mut reached = self.reached.lock();
        if point > *reached {
            *reached = point;
            self.advanced.notify_all();
        }
    }

    /// Blocks until `point` is reached, or until `timeout` elapses when one is given.
    pub fn wait_until(&self, point: u64, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut reached = self.reached.lock();
        while *reached < point {
            match deadline {
                None => self.advanced.wait(&mut reached),
                Some(deadline) => {
                    if self.advanced.wait_until(&mut reached, deadline).timed_out() && *reached < point {
                        let waited_ms = timeout.map_or(0, |timeout| timeout.as_millis());
                        return EventTimeoutSnafu { point, reached: *reached, waited_ms }.fail();
                    }
                }
            }
        }
        Ok(())
    }
}

/// A point on some stream's timeline.
#[derive(Debug, Clone)]
pub struct Event {
    timeline: Arc<StreamTimeline>,
    point: u64,
}

impl Event {
    pub fn new(timeline: Arc<StreamTimeline>, point: u64) -> Self {
        Self { timeline, point }
    }

    pub fn point(&self) -> u64 {
        self.point
    }

    pub fn is_complete(&self) -> bool {
        self.timeline.reached() >= self.point
    }

    pub fn wait(&self) -> Result<()> {
        self.timeline.wait_until(self.point, None)
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        self.timeline.wait_until(self.point, Some(timeout))
    }
}

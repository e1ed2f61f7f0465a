//! Events and scoped ownership of acquired surfaces.
//!
//! A [`SurfaceLease`] is the only way to hold shared surfaces on the compute
//! side. Handing it back through [`QueueSession::release`] consumes it; if it
//! is dropped instead (an error unwound past it) the surfaces are released
//! with a blocking release so the graphics API gets them back either way.
//!
//! [`QueueSession::release`]: crate::env::QueueSession::release

use std::sync::Arc;

use tracing::warn;

use crate::backend::{ComputeDriver, EventId, MemId};
use crate::env::ComputeEnvironment;
use crate::ComputeResult;

/// Completion event of one enqueued command, released on drop.
#[derive(Debug)]
pub struct Event {
    driver: Arc<dyn ComputeDriver>,
    id: EventId,
}

impl Event {
    pub(crate) fn new(driver: Arc<dyn ComputeDriver>, id: EventId) -> Self {
        Self { driver, id }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    /// Block until the command completed.
    pub fn wait(&self) -> ComputeResult<()> {
        self.driver.wait_for_events(&[self.id])
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        // SAFETY: the event owns its handle and is dropped once.
        unsafe { self.driver.release_event(self.id) };
    }
}

pub(crate) fn wait_list(events: &[&Event]) -> Vec<EventId> {
    events.iter().map(|e| e.id).collect()
}

/// Shared surfaces currently acquired for compute use.
#[derive(Debug)]
pub struct SurfaceLease<'s> {
    pub(crate) env: &'s ComputeEnvironment,
    pub(crate) mems: Vec<MemId>,
    pub(crate) acquired: Event,
    pub(crate) released: bool,
}

impl SurfaceLease<'_> {
    /// Memory objects covered by the lease.
    pub fn mems(&self) -> &[MemId] {
        &self.mems
    }

    /// Event signalled once the acquire completed.
    pub fn acquire_event(&self) -> &Event {
        &self.acquired
    }
}

impl Drop for SurfaceLease<'_> {
    fn drop(&mut self) {
        if self.released || self.mems.is_empty() {
            return;
        }
        warn!(surfaces = self.mems.len(), "lease dropped while acquired, releasing");
        let driver = self.env.driver();
        let queue = self.env.queue();
        match driver.enqueue_release(self.env.platform().id, queue, &self.mems, &[]) {
            Ok(event) => {
                if let Err(e) = driver.finish(queue) {
                    warn!("finish after forced release failed: {}", e);
                }
                // SAFETY: fresh event, never handed out.
                unsafe { driver.release_event(event) };
            }
            Err(e) => warn!("forced release failed: {}", e),
        }
    }
}

//! Exclusive assignment of control ports to backend instances.

use core::ops::Range;
use orcano_core::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Semaphore;

/// Hands out ports from a fixed range, at most one holder per port.
///
/// `acquire` suspends while every port is taken. Released ports go to the
/// back of the free list, so a just-released port is reused last and any
/// lingering socket from the previous holder has time to close.
pub struct PortAllocator {
    range: Range<u16>,
    free: Mutex<VecDeque<u16>>,
    available: Semaphore,
}

impl PortAllocator {
    pub fn new(range: Range<u16>) -> Self {
        let free: VecDeque<u16> = range.clone().collect();
        let available = Semaphore::new(free.len());
        Self {
            range,
            free: Mutex::new(free),
            available,
        }
    }

    /// Takes a free port, waiting until one is released if none is free.
    ///
    /// Fails with [`Error::PortsClosed`] once [`PortAllocator::close`] has
    /// been called, including for callers already waiting.
    pub async fn acquire(&self) -> Result<u16> {
        let permit = self
            .available
            .acquire()
            .await
            .map_err(|_| Error::PortsClosed)?;
        // Permits never outnumber free ports; an empty list leaves the permit
        // in place and reports the allocator as unusable.
        let port = self.free.lock().pop_front().ok_or(Error::PortsClosed)?;
        permit.forget();
        Ok(port)
    }

    /// Stops handing out ports. Releases are still accepted.
    pub fn close(&self) {
        self.available.close();
    }

    /// Returns `port` to the free list.
    ///
    /// Releasing a port that is outside the range or already free is logged
    /// and ignored, so a double release cannot hand one port to two holders.
    pub fn release(&self, port: u16) {
        if !self.range.contains(&port) {
            tracing::warn!("Ignoring release of port {port} outside {:?}", self.range);
            return;
        }

        let mut free = self.free.lock();
        if free.contains(&port) {
            tracing::warn!("Ignoring double release of port {port}");
            return;
        }
        free.push_back(port);
        drop(free);

        self.available.add_permits(1);
    }

    /// Number of ports currently free.
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    pub fn range(&self) -> Range<u16> {
        self.range.clone()
    }
}

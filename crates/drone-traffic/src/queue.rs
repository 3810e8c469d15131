//! Bounded waypoint queue shared by the dispatcher (producer) and one drone
//! (consumer).

use drone_domain::Waypoint;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Number of waypoints a drone can hold, including the leg it is flying.
pub const WAYPOINT_QUEUE_CAPACITY: usize = 10;

/// Non-blocking FIFO of scheduled waypoints with a hard capacity.
#[derive(Debug)]
pub struct WaypointQueue {
    capacity: usize,
    inner: Mutex<VecDeque<Waypoint>>,
}

impl Default for WaypointQueue {
    fn default() -> Self {
        Self::with_capacity(WAYPOINT_QUEUE_CAPACITY)
    }
}

impl WaypointQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append a waypoint. Returns `false`, leaving the queue untouched, when
    /// it is already full.
    pub fn offer(&self, waypoint: Waypoint) -> bool {
        let mut inner = self.lock();
        if inner.len() >= self.capacity {
            return false;
        }
        inner.push_back(waypoint);
        true
    }

    /// Head of the queue without removing it.
    pub fn peek(&self) -> Option<Waypoint> {
        self.lock().front().copied()
    }

    /// Remove and return the head of the queue.
    pub fn poll(&self) -> Option<Waypoint> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of the queued waypoints, head first.
    pub fn snapshot(&self) -> Vec<Waypoint> {
        self.lock().iter().copied().collect()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Waypoint>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

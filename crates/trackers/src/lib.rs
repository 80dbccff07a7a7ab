//! Built-in tracker modules for Nimbus.
//!
//! Each built-in platform (`aws`, `openstack`) gets a [`LogTracker`]: events
//! are emitted as structured `tracing` events and the most recent ones are
//! kept in memory for inspection.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Supplies [`facade::TrackerModule`] implementations;
//! call [`register_builtin`] once at startup.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use facade::{PlatformName, TrackerEvent, TrackerModule, TrackerRegistry};
use tracing::info;

/// Platforms with a built-in tracker.
pub const BUILTIN_PLATFORMS: &[&str] = &["aws", "openstack"];

/// Events kept per tracker before the oldest is dropped.
pub const DEFAULT_HISTORY: usize = 100;

/// Tracker that logs every event and remembers the latest ones.
#[derive(Debug)]
pub struct LogTracker {
    platform: PlatformName,
    capacity: usize,
    history: Mutex<VecDeque<TrackerEvent>>,
}

impl LogTracker {
    /// Creates a tracker for `platform` keeping up to `capacity` events.
    pub fn new(platform: PlatformName, capacity: usize) -> Self {
        Self {
            platform,
            capacity,
            history: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY))),
        }
    }

    /// Recorded events, oldest first.
    pub fn recent(&self) -> Vec<TrackerEvent> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl TrackerModule for LogTracker {
    fn platform(&self) -> &PlatformName {
        &self.platform
    }

    fn record(&self, event: &TrackerEvent) {
        info!(
            platform = %self.platform,
            resource = %event.resource,
            status = %event.status,
            observed_at = %event.observed_at,
            "Resource status changed"
        );
        if self.capacity == 0 {
            return;
        }
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(event.clone());
    }
}

/// Registers a [`LogTracker`] for every platform in [`BUILTIN_PLATFORMS`].
pub fn register_builtin(registry: &TrackerRegistry) {
    for platform in BUILTIN_PLATFORMS {
        registry.register(Arc::new(LogTracker::new(
            PlatformName::from_static(platform),
            DEFAULT_HISTORY,
        )));
    }
}

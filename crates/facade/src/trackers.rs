//! Platform tracker modules.
//!
//! A tracker module records lifecycle events for resources on one platform.
//! Modules are registered by platform name at startup; the
//! [`TrackerModuleLoader`] hands out the registered instance for a name. The
//! loader keeps no state of its own, so repeated loads of a name return the
//! same module.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{FacadeError, PlatformName, Timestamp};

/// One observed change to a tracked resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerEvent {
    /// Resource the event is about (e.g. a stack or volume id).
    pub resource: String,
    /// New state of the resource.
    pub status: String,
    /// Free-form details.
    #[serde(default)]
    pub detail: Value,
    /// When the change was observed.
    pub observed_at: Timestamp,
}

impl TrackerEvent {
    /// An event observed now, with no details.
    pub fn now(resource: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            status: status.into(),
            detail: Value::Null,
            observed_at: Timestamp::now(),
        }
    }

    /// Attaches `detail` to the event.
    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Records events for one platform.
pub trait TrackerModule: Send + Sync {
    /// Platform the module tracks.
    fn platform(&self) -> &PlatformName;

    /// Records `event`.
    fn record(&self, event: &TrackerEvent);
}

/// A loaded tracker module.
pub type TrackerModuleHandle = Arc<dyn TrackerModule>;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Tracker modules keyed by platform name.
#[derive(Default)]
pub struct TrackerRegistry {
    modules: RwLock<BTreeMap<PlatformName, TrackerModuleHandle>>,
}

impl TrackerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `module` under its platform name, returning the module it
    /// replaced, if any.
    pub fn register(&self, module: TrackerModuleHandle) -> Option<TrackerModuleHandle> {
        let platform = module.platform().clone();
        let previous = self
            .modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(platform.clone(), module);
        if previous.is_some() {
            warn!(platform = %platform, "Replacing registered tracker module");
        } else {
            debug!(platform = %platform, "Tracker module registered");
        }
        previous
    }

    /// Registered platform names, sorted.
    pub fn platforms(&self) -> Vec<PlatformName> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn get(&self, platform: &str) -> Option<TrackerModuleHandle> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(platform)
            .map(Arc::clone)
    }
}

impl std::fmt::Debug for TrackerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerRegistry")
            .field("platforms", &self.platforms())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Resolves platform names to tracker modules.
#[derive(Debug, Clone)]
pub struct TrackerModuleLoader {
    registry: Arc<TrackerRegistry>,
}

impl TrackerModuleLoader {
    /// Creates a loader reading from `registry`.
    pub fn new(registry: Arc<TrackerRegistry>) -> Self {
        Self { registry }
    }

    /// Returns the module registered for `platform`.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError::ModuleNotFound`] when no module is registered
    /// under that name.
    pub fn load(&self, platform: &str) -> Result<TrackerModuleHandle, FacadeError> {
        self.registry
            .get(platform)
            .ok_or_else(|| FacadeError::ModuleNotFound {
                platform: platform.to_owned(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording {
        platform: PlatformName,
        events: Mutex<Vec<TrackerEvent>>,
    }

    impl Recording {
        fn new(platform: &str) -> Arc<Self> {
            Arc::new(Self {
                platform: PlatformName::new(platform).unwrap(),
                events: Mutex::new(Vec::new()),
            })
        }
    }

    impl TrackerModule for Recording {
        fn platform(&self) -> &PlatformName {
            &self.platform
        }

        fn record(&self, event: &TrackerEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn loader_with(modules: &[Arc<Recording>]) -> TrackerModuleLoader {
        let registry = Arc::new(TrackerRegistry::new());
        for module in modules {
            registry.register(module.clone());
        }
        TrackerModuleLoader::new(registry)
    }

    #[test]
    fn loads_the_registered_module() {
        let aws = Recording::new("aws");
        let loader = loader_with(&[aws.clone(), Recording::new("openstack")]);

        let module = loader.load("aws").unwrap();
        assert_eq!(module.platform().as_str(), "aws");

        module.record(&TrackerEvent::now("stack-1", "CREATE_COMPLETE"));
        assert_eq!(aws.events.lock().unwrap()[0].resource, "stack-1");
    }

    #[test]
    fn repeated_loads_return_the_same_module() {
        let loader = loader_with(&[Recording::new("aws")]);
        let first = loader.load("aws").unwrap();
        let second = loader.load("aws").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn unknown_platform_is_module_not_found() {
        let loader = loader_with(&[Recording::new("aws")]);
        match loader.load("unknown-platform") {
            Err(FacadeError::ModuleNotFound { platform }) => {
                assert_eq!(platform, "unknown-platform")
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected ModuleNotFound"),
        }
        assert!(loader.load("").is_err());
    }

    #[test]
    fn registering_twice_replaces() {
        let registry = TrackerRegistry::new();
        assert!(registry.register(Recording::new("aws")).is_none());
        assert!(registry.register(Recording::new("aws")).is_some());
        assert_eq!(registry.platforms(), vec![PlatformName::new("aws").unwrap()]);
    }

    #[test]
    fn event_detail_round_trips_through_json() {
        let event = TrackerEvent::now("vol-9", "available")
            .with_detail(serde_json::json!({ "size_gb": 10 }));
        let text = serde_json::to_string(&event).unwrap();
        let back: TrackerEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
    }
}

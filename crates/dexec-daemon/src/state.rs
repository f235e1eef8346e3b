//! Shared runtime state for dexec-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. Every collaborator is
//! constructor-injected exactly once in `main` (or in a test harness); there
//! are no module-level singletons, which keeps tests isolated.

use std::sync::Arc;

use dexec_queue::JobQueue;
use dexec_registry::ConnectionRegistry;
use dexec_store::OrderStore;

/// Static build metadata included in health responses.
#[derive(Clone, Copy, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Handle shared across all Axum handlers and the worker pool wiring.
pub struct AppState {
    pub store: Arc<dyn OrderStore>,
    pub queue: Arc<JobQueue>,
    pub registry: ConnectionRegistry,
    pub build: BuildInfo,
}

impl AppState {
    pub fn new(
        store: Arc<dyn OrderStore>,
        queue: Arc<JobQueue>,
        registry: ConnectionRegistry,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            build: BuildInfo {
                service: "dexec-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }
}

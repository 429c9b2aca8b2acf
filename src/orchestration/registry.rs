//! # Service Registry
//!
//! Maps a service name to the processor that executes it.
//!
//! Processors are registered explicitly at startup; lookups happen on every
//! dispatch, so the map is a `DashMap` and never blocks the dispatcher behind a
//! registration.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let registry = ServiceRegistry::new();
//! registry.register(Arc::new(my_processor));
//! let processor = registry.lookup_service("runScript");
//! let metadata = registry.get_service_metadata("runScript");
//! ```

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::logging::log_registry_operation;
use crate::models::ServiceMetaData;
use crate::processors::ServiceProcessor;

/// Name to processor mapping used by the engine and dispatcher
#[derive(Default)]
pub struct ServiceRegistry {
    processors: DashMap<String, Arc<dyn ServiceProcessor>>,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.service_names())
            .finish()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        info!("Creating new ServiceRegistry");
        Self::default()
    }

    /// Register `processor` under its metadata name, returning the processor it replaced
    pub fn register(&self, processor: Arc<dyn ServiceProcessor>) -> Option<Arc<dyn ServiceProcessor>> {
        let name = processor.metadata().service_name;
        let previous = self.processors.insert(name.clone(), processor);
        if previous.is_some() {
            warn!(service = %name, "Replacing already registered service processor");
        }
        log_registry_operation("register", &name, "registered", None);
        previous
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<dyn ServiceProcessor>> {
        self.processors.remove(name).map(|(_, processor)| processor)
    }

    /// Processor registered under `name`
    pub fn lookup_service(&self, name: &str) -> Option<Arc<dyn ServiceProcessor>> {
        self.processors.get(name).map(|entry| entry.value().clone())
    }

    /// Metadata of the processor registered under `name`
    pub fn get_service_metadata(&self, name: &str) -> Option<ServiceMetaData> {
        self.processors.get(name).map(|entry| entry.value().metadata())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.processors.contains_key(name)
    }

    /// Registered names, sorted
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.processors.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Drop every processor; breaks the engine/processor reference cycle on shutdown
    pub fn clear(&self) {
        self.processors.clear();
    }
}

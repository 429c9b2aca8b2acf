//! # Service System Bootstrap
//!
//! Wires the engine, ready queue, registry, computation lanes and dispatcher
//! together from a loaded [`ConfigManager`].
//!
//! ## Key Features
//!
//! - **Store Selection**: PostgreSQL when `database` is configured (with the
//!   schema migrated on startup when `run_migrations` is set), the in-memory
//!   store otherwise
//! - **Lifecycle Management**: start/stop/status for the dispatch loop
//! - **Graceful Shutdown**: the dispatch loop is stopped and awaited before
//!   the registry is cleared and the computation lanes are shut down

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::dispatcher::JacsServiceDispatcher;
use super::engine::{JacsServiceEngine, ServerStats};
use super::registry::ServiceRegistry;
use super::service_queue::InMemoryServiceQueue;
use crate::computation::ServiceComputationFactory;
use crate::config::ConfigManager;
use crate::error::{JacsError, Result};
use crate::persistence::{
    InMemoryServiceDataPersistence, PgServiceDataPersistence, ServiceDataPersistence,
};
use crate::processors::{
    LifeCycleServiceProcessor, LocalProcessRunner, ProcessorContext, RunScriptProcessor,
    ServiceProcessor,
};

/// Where configuration is loaded from
#[derive(Debug, Clone, Default)]
pub struct BootstrapConfig {
    /// Custom configuration directory (None = auto-detect)
    pub config_directory: Option<PathBuf>,
    /// Environment override (None = auto-detect)
    pub environment_override: Option<String>,
}

impl BootstrapConfig {
    pub fn load_config_manager(&self) -> Result<Arc<ConfigManager>> {
        let manager = match &self.environment_override {
            Some(env) => ConfigManager::load_from_directory_with_env(self.config_directory.clone(), env)?,
            None => ConfigManager::load_from_directory(self.config_directory.clone())?,
        };
        Ok(manager)
    }
}

/// System status information
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub running: bool,
    pub environment: String,
    pub store: &'static str,
    pub registered_services: Vec<String>,
    pub stats: ServerStats,
}

/// Handle owning every part of a running service engine
#[derive(Debug)]
pub struct JacsServiceSystem {
    config_manager: Arc<ConfigManager>,
    engine: Arc<JacsServiceEngine>,
    dispatcher: JacsServiceDispatcher,
    factory: ServiceComputationFactory,
    store: &'static str,
    shutdown_sender: Option<watch::Sender<bool>>,
    dispatch_task: Option<JoinHandle<()>>,
}

impl JacsServiceSystem {
    /// Build the system, connecting to the configured store
    pub async fn bootstrap(config_manager: Arc<ConfigManager>) -> Result<Self> {
        info!(
            "🚀 BOOTSTRAP: Starting service engine for environment: {}",
            config_manager.environment()
        );
        let (persistence, store): (Arc<dyn ServiceDataPersistence>, &'static str) =
            match &config_manager.config().database {
                Some(database) => {
                    let url = database.database_url()?;
                    let pg = PgServiceDataPersistence::connect(&url, database.max_connections).await?;
                    if database.run_migrations {
                        pg.migrate().await?;
                        info!("🗄️ BOOTSTRAP: Service tables migrated");
                    }
                    (Arc::new(pg), "postgres")
                }
                None => (Arc::new(InMemoryServiceDataPersistence::new()), "in-memory"),
            };
        let mut system = Self::with_persistence(config_manager, persistence)?;
        system.store = store;
        Ok(system)
    }

    /// Build the system around an existing store
    pub fn with_persistence(
        config_manager: Arc<ConfigManager>,
        persistence: Arc<dyn ServiceDataPersistence>,
    ) -> Result<Self> {
        let config = config_manager.config();
        let factory = ServiceComputationFactory::new(&config.computation)?;
        let queue = Arc::new(InMemoryServiceQueue::new(persistence.clone(), &config.queue));
        let engine = Arc::new(JacsServiceEngine::new(
            persistence,
            queue,
            Arc::new(ServiceRegistry::new()),
            config.engine.processing_slots,
        ));
        let dispatcher = JacsServiceDispatcher::from_config(engine.clone(), config);

        info!(
            processing_slots = config.engine.processing_slots,
            main_pool_size = config.computation.main_pool_size,
            suspend_pool_size = config.computation.suspend_pool_size,
            "✅ BOOTSTRAP: Service engine assembled"
        );
        Ok(Self {
            config_manager,
            engine,
            dispatcher,
            factory,
            store: "custom",
            shutdown_sender: None,
            dispatch_task: None,
        })
    }

    pub fn engine(&self) -> &Arc<JacsServiceEngine> {
        &self.engine
    }

    pub fn dispatcher(&self) -> &JacsServiceDispatcher {
        &self.dispatcher
    }

    pub fn factory(&self) -> &ServiceComputationFactory {
        &self.factory
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }

    /// Context handed to processors built for this system
    pub fn processor_context(&self) -> ProcessorContext {
        ProcessorContext::new(
            self.engine.clone(),
            self.factory.clone(),
            self.config_manager.config().service.clone(),
        )
    }

    /// Register `processor` under its metadata name
    pub fn register_processor(&self, processor: Arc<dyn ServiceProcessor>) -> Result<()> {
        let name = processor.metadata().service_name;
        if name.trim().is_empty() {
            return Err(JacsError::Registry(
                "processor metadata has no service name".to_string(),
            ));
        }
        self.engine.registry().register(processor);
        Ok(())
    }

    /// Register `runScript` backed by the local process runner
    pub fn register_builtin_processors(&self) -> Result<()> {
        let lifecycle = RunScriptProcessor::lifecycle(vec![Arc::new(LocalProcessRunner::new())]);
        self.register_processor(Arc::new(LifeCycleServiceProcessor::new(
            lifecycle,
            self.processor_context(),
        )))?;
        info!("📚 BOOTSTRAP: Built-in processors registered");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_sender.is_some()
    }

    /// Spawn the dispatch loop
    pub fn start(&mut self) {
        if self.is_running() {
            warn!("Dispatch loop already running");
            return;
        }
        let (sender, receiver) = watch::channel(false);
        let dispatcher = self.dispatcher.clone();
        self.dispatch_task = Some(tokio::spawn(async move { dispatcher.run(receiver).await }));
        self.shutdown_sender = Some(sender);
        info!("🎉 BOOTSTRAP: Dispatch loop started");
    }

    /// Stop the dispatch loop, then the registry and computation lanes
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(sender) = self.shutdown_sender.take() {
            sender.send(true).map_err(|_| {
                JacsError::Runtime("Failed to send shutdown signal".to_string())
            })?;
            info!("🛑 BOOTSTRAP: Shutdown requested");
        } else {
            warn!("Service engine already stopped");
        }
        if let Some(task) = self.dispatch_task.take() {
            task.await
                .map_err(|e| JacsError::Runtime(format!("Dispatch loop failed: {e}")))?;
        }
        self.engine.registry().clear();
        self.factory.shutdown();
        info!("✅ BOOTSTRAP: Service engine stopped");
        Ok(())
    }

    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            running: self.is_running(),
            environment: self.config_manager.environment().to_string(),
            store: self.store,
            registered_services: self.engine.registry().service_names(),
            stats: self.engine.get_server_stats(),
        }
    }
}

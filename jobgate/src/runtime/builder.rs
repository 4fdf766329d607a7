use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use crate::config::{EngineConfig, ServiceConfig};
use crate::instance::{ProcessIdentity, ProcessInstance};
use crate::registry::JobTypeRegistry;
use crate::store::JobStore;

use super::engine::ExecutionEngine;
use super::handler::WorkHandler;

/// Builder for constructing an [`ExecutionEngine`] with explicit
/// dependencies.
///
/// The store, handler and job type registry are required. Without an
/// identity a fresh [`ProcessInstance`] is generated.
///
/// # Example
///
/// ```ignore
/// use jobgate::*;
///
/// let engine = EngineBuilder::new()
///     .with_store(store)
///     .with_handler(Arc::new(SimulatedWork))
///     .with_registry(registry)
///     .build()?;
/// ```
pub struct EngineBuilder<S, H>
where
    S: JobStore + 'static,
    H: WorkHandler + 'static,
{
    config: EngineConfig,
    store: Option<Arc<S>>,
    handler: Option<Arc<H>>,
    registry: Option<JobTypeRegistry>,
    identity: Option<Arc<dyn ProcessIdentity>>,
}

impl<S, H> fmt::Debug for EngineBuilder<S, H>
where
    S: JobStore + 'static,
    H: WorkHandler + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("EngineBuilder");
        debug.field("config", &self.config);
        debug.field("store_set", &self.store.is_some());
        debug.field("handler_set", &self.handler.is_some());
        debug.field("registry_set", &self.registry.is_some());
        debug.field("identity_set", &self.identity.is_some());

        if self.store.is_some() {
            debug.field("store_type", &type_name::<S>());
        }
        if self.handler.is_some() {
            debug.field("handler_type", &type_name::<H>());
        }

        debug.finish()
    }
}

impl<S, H> Default for EngineBuilder<S, H>
where
    S: JobStore + 'static,
    H: WorkHandler + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S, H> EngineBuilder<S, H>
where
    S: JobStore + 'static,
    H: WorkHandler + 'static,
{
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            store: None,
            handler: None,
            registry: None,
            identity: None,
        }
    }

    /// Take the registry and engine settings from a loaded service config.
    pub fn from_service_config(config: &ServiceConfig) -> anyhow::Result<Self> {
        Ok(Self::new()
            .with_config(config.engine.clone())
            .with_registry(config.registry()?))
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_store(mut self, store: Arc<S>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_handler(mut self, handler: Arc<H>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_registry(mut self, registry: JobTypeRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_identity(mut self, identity: Arc<dyn ProcessIdentity>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Build the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the store, handler or registry is missing.
    pub fn build(self) -> anyhow::Result<ExecutionEngine<S, H>> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store dependency missing"))?;
        let handler = self
            .handler
            .ok_or_else(|| anyhow::anyhow!("handler dependency missing"))?;
        let registry = self
            .registry
            .ok_or_else(|| anyhow::anyhow!("registry dependency missing"))?;
        let identity = self
            .identity
            .unwrap_or_else(|| Arc::new(ProcessInstance::new()));

        tracing::debug!(
            instance_id = %identity.current_instance_id(),
            job_types = registry.len(),
            "building execution engine"
        );

        Ok(ExecutionEngine::new(
            self.config,
            store,
            handler,
            Arc::new(registry),
            identity,
        ))
    }
}

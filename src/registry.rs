//! Connector registry.
//!
//! Two factory tables map type names to constructors, and one instance table
//! maps instance names to live connectors. Sources and sinks share the
//! instance namespace.
//!
//! All state sits behind a single reader/writer lock: `list_*` and
//! `get_instance` take it shared, everything else exclusive. `stop_all` holds
//! it for the whole shutdown, so no instance can be created or looked up
//! half-way through.
//!
//! # Example
//!
//! ```rust,no_run
//! use event_connect_core::{ConnectorOptions, Deadline, Registry};
//! use std::time::Duration;
//!
//! # async fn run() -> event_connect_core::ConnectorResult<()> {
//! let registry = Registry::with_builtin_connectors();
//! let options = ConnectorOptions::new().with("address", "127.0.0.1:0");
//! let source = registry.create_source("webhook", "ingest", &options).await?;
//! # let _ = source;
//! registry.stop_all(Deadline::after(Duration::from_secs(5))).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::{ConnectConfig, ConnectorOptions};
use crate::error::ConnectorKind;
use crate::runtime::Deadline;
use crate::{connectors, ConnectorError, ConnectorResult, Sink, Source};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Constructor for a source type: `(instance name, options)`
///
/// Must not perform network I/O.
pub type SourceFactory =
    Arc<dyn Fn(&str, &ConnectorOptions) -> ConnectorResult<Arc<dyn Source>> + Send + Sync>;

/// Constructor for a sink type: `(instance name, options)`
///
/// Must not perform network I/O.
pub type SinkFactory =
    Arc<dyn Fn(&str, &ConnectorOptions) -> ConnectorResult<Arc<dyn Sink>> + Send + Sync>;

/// A live connector instance
#[derive(Clone)]
pub enum Instance {
    Source(Arc<dyn Source>),
    Sink(Arc<dyn Sink>),
}

impl Instance {
    /// Instance name
    pub fn name(&self) -> &str {
        match self {
            Instance::Source(s) => s.name(),
            Instance::Sink(s) => s.name(),
        }
    }

    /// Registered type name
    pub fn connector_type(&self) -> &str {
        match self {
            Instance::Source(s) => s.connector_type(),
            Instance::Sink(s) => s.connector_type(),
        }
    }

    /// Which capability this instance provides
    pub fn kind(&self) -> ConnectorKind {
        match self {
            Instance::Source(_) => ConnectorKind::Source,
            Instance::Sink(_) => ConnectorKind::Sink,
        }
    }

    /// Check if the instance is running normally
    pub fn healthy(&self) -> bool {
        match self {
            Instance::Source(s) => s.healthy(),
            Instance::Sink(s) => s.healthy(),
        }
    }

    /// Stop the instance
    pub async fn stop(&self, deadline: Deadline) -> ConnectorResult<()> {
        match self {
            Instance::Source(s) => s.stop(deadline).await,
            Instance::Sink(s) => s.stop(deadline).await,
        }
    }

    /// The source capability, if this is a source
    pub fn as_source(&self) -> Option<&Arc<dyn Source>> {
        match self {
            Instance::Source(s) => Some(s),
            Instance::Sink(_) => None,
        }
    }

    /// The sink capability, if this is a sink
    pub fn as_sink(&self) -> Option<&Arc<dyn Sink>> {
        match self {
            Instance::Sink(s) => Some(s),
            Instance::Source(_) => None,
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .field("type", &self.connector_type())
            .finish()
    }
}

#[derive(Default)]
struct RegistryState {
    source_factories: HashMap<String, SourceFactory>,
    sink_factories: HashMap<String, SinkFactory>,
    instances: HashMap<String, Instance>,
}

impl RegistryState {
    fn insert_source_factory(
        &mut self,
        type_name: &str,
        factory: SourceFactory,
    ) -> ConnectorResult<()> {
        if self.source_factories.contains_key(type_name) {
            return Err(ConnectorError::DuplicateType {
                kind: ConnectorKind::Source,
                type_name: type_name.to_string(),
            });
        }
        self.source_factories.insert(type_name.to_string(), factory);
        Ok(())
    }

    fn insert_sink_factory(
        &mut self,
        type_name: &str,
        factory: SinkFactory,
    ) -> ConnectorResult<()> {
        if self.sink_factories.contains_key(type_name) {
            return Err(ConnectorError::DuplicateType {
                kind: ConnectorKind::Sink,
                type_name: type_name.to_string(),
            });
        }
        self.sink_factories.insert(type_name.to_string(), factory);
        Ok(())
    }

    fn ensure_name_free(&self, name: &str) -> ConnectorResult<()> {
        if self.instances.contains_key(name) {
            return Err(ConnectorError::DuplicateInstance {
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

/// In-process catalog of connector factories and live instances
///
/// Users create their own registry and register the connector types they
/// need, or start from [`Registry::with_builtin_connectors`].
#[derive(Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with every built-in connector type registered
    ///
    /// Sources: `webhook`, `sqs`, `postgres.cdc`, `redis.stream`.
    /// Sinks: `webhook`, `sqs`.
    ///
    /// The pull-based adapters are registered without a client; instances
    /// created through them fail `start` with a configuration error. Register
    /// a `factory_with_client` factory under your own type name to inject one.
    pub fn with_builtin_connectors() -> Self {
        let mut state = RegistryState::default();
        for (type_name, factory) in connectors::builtin_sources() {
            state.source_factories.insert(type_name.to_string(), factory);
        }
        for (type_name, factory) in connectors::builtin_sinks() {
            state.sink_factories.insert(type_name.to_string(), factory);
        }
        Self {
            state: RwLock::new(state),
        }
    }

    /// Register a source factory
    ///
    /// # Errors
    ///
    /// `ConnectorError::DuplicateType` if `type_name` already has a source factory
    pub async fn register_source<F>(&self, type_name: &str, factory: F) -> ConnectorResult<()>
    where
        F: Fn(&str, &ConnectorOptions) -> ConnectorResult<Arc<dyn Source>> + Send + Sync + 'static,
    {
        self.state
            .write()
            .await
            .insert_source_factory(type_name, Arc::new(factory))
    }

    /// Register a sink factory
    ///
    /// # Errors
    ///
    /// `ConnectorError::DuplicateType` if `type_name` already has a sink factory
    pub async fn register_sink<F>(&self, type_name: &str, factory: F) -> ConnectorResult<()>
    where
        F: Fn(&str, &ConnectorOptions) -> ConnectorResult<Arc<dyn Sink>> + Send + Sync + 'static,
    {
        self.state
            .write()
            .await
            .insert_sink_factory(type_name, Arc::new(factory))
    }

    /// Construct a source and store it under `name`
    ///
    /// # Errors
    ///
    /// - `UnknownType` if no source factory is registered for `type_name`
    /// - `DuplicateInstance` if `name` is already taken by a source or sink
    /// - `Construction` wrapping the factory's own error
    pub async fn create_source(
        &self,
        type_name: &str,
        name: &str,
        options: &ConnectorOptions,
    ) -> ConnectorResult<Arc<dyn Source>> {
        let mut state = self.state.write().await;

        let factory = state
            .source_factories
            .get(type_name)
            .cloned()
            .ok_or_else(|| ConnectorError::UnknownType {
                kind: ConnectorKind::Source,
                type_name: type_name.to_string(),
            })?;
        state.ensure_name_free(name)?;

        let source = factory(name, options).map_err(|e| ConnectorError::Construction {
            kind: ConnectorKind::Source,
            name: name.to_string(),
            type_name: type_name.to_string(),
            source: Box::new(e),
        })?;

        state
            .instances
            .insert(name.to_string(), Instance::Source(source.clone()));
        info!(connector = type_name, name, "source created");
        Ok(source)
    }

    /// Construct a sink and store it under `name`
    ///
    /// # Errors
    ///
    /// - `UnknownType` if no sink factory is registered for `type_name`
    /// - `DuplicateInstance` if `name` is already taken by a source or sink
    /// - `Construction` wrapping the factory's own error
    pub async fn create_sink(
        &self,
        type_name: &str,
        name: &str,
        options: &ConnectorOptions,
    ) -> ConnectorResult<Arc<dyn Sink>> {
        let mut state = self.state.write().await;

        let factory = state
            .sink_factories
            .get(type_name)
            .cloned()
            .ok_or_else(|| ConnectorError::UnknownType {
                kind: ConnectorKind::Sink,
                type_name: type_name.to_string(),
            })?;
        state.ensure_name_free(name)?;

        let sink = factory(name, options).map_err(|e| ConnectorError::Construction {
            kind: ConnectorKind::Sink,
            name: name.to_string(),
            type_name: type_name.to_string(),
            source: Box::new(e),
        })?;

        state
            .instances
            .insert(name.to_string(), Instance::Sink(sink.clone()));
        info!(connector = type_name, name, "sink created");
        Ok(sink)
    }

    /// Create every connector a configuration defines
    ///
    /// The configuration is validated first. Instances created before a
    /// failing definition stay registered; call [`Registry::stop_all`] to
    /// discard them.
    pub async fn create_from_config(
        &self,
        config: &ConnectConfig,
    ) -> ConnectorResult<Vec<Instance>> {
        config.validate()?;

        let mut created = Vec::with_capacity(config.sources.len() + config.sinks.len());
        for def in &config.sources {
            let source = self
                .create_source(&def.connector_type, &def.name, &def.options)
                .await?;
            created.push(Instance::Source(source));
        }
        for def in &config.sinks {
            let sink = self
                .create_sink(&def.connector_type, &def.name, &def.options)
                .await?;
            created.push(Instance::Sink(sink));
        }
        Ok(created)
    }

    /// Registered source type names
    pub async fn list_sources(&self) -> Vec<String> {
        self.state.read().await.source_factories.keys().cloned().collect()
    }

    /// Registered sink type names
    pub async fn list_sinks(&self) -> Vec<String> {
        self.state.read().await.sink_factories.keys().cloned().collect()
    }

    /// Look up a live instance by name
    pub async fn get_instance(&self, name: &str) -> Option<Instance> {
        self.state.read().await.instances.get(name).cloned()
    }

    /// Number of live instances
    pub async fn instance_count(&self) -> usize {
        self.state.read().await.instances.len()
    }

    /// Stop every live instance and clear the instance table
    ///
    /// Every instance is stopped even if an earlier one fails. The table is
    /// cleared unconditionally; the last error encountered (if any) is
    /// returned.
    pub async fn stop_all(&self, deadline: Deadline) -> ConnectorResult<()> {
        let mut state = self.state.write().await;
        let mut last_err = None;

        for (name, instance) in state.instances.drain() {
            if let Err(e) = instance.stop(deadline.clone()).await {
                warn!(
                    name = %name,
                    kind = %instance.kind(),
                    error = %e,
                    "failed to stop connector"
                );
                last_err = Some(e);
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

//! Model registry.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use crate::connection::Connection;
use crate::error::{OrmError, Result};
use crate::manager::Manager;
use crate::model::Model;
use crate::relations::RelationRegistry;

/// Registered models keyed by name, together with the connection they are
/// queried through.
#[derive(Debug, Clone)]
pub struct Registry {
    conn: Connection,
    models: IndexMap<String, Arc<Model>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            models: IndexMap::new(),
        }
    }

    /// Returns the connection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Registers a model and returns its shared handle.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Configuration`] when a model with the same name
    /// is already registered.
    pub fn register(&mut self, model: Model) -> Result<Arc<Model>> {
        if self.models.contains_key(model.name()) {
            return Err(OrmError::Configuration(format!(
                "model {} is already registered",
                model.name()
            )));
        }
        debug!(model = %model.name(), table = %model.table(), "registered model");
        let model = Arc::new(model);
        self.models
            .insert(model.name().to_string(), Arc::clone(&model));
        Ok(model)
    }

    /// Looks a model up by name.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::UnknownModel`] when no such model is registered.
    pub fn model(&self, name: &str) -> Result<&Arc<Model>> {
        self.models
            .get(name)
            .ok_or_else(|| OrmError::UnknownModel(name.to_string()))
    }

    /// Returns every model in registration order.
    pub fn models(&self) -> impl Iterator<Item = &Arc<Model>> {
        self.models.values()
    }

    /// Returns a fresh manager for the named model.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::UnknownModel`] when no such model is registered.
    pub fn manager(&self, name: &str) -> Result<Manager> {
        let model = self.model(name)?;
        Ok(Manager::new(Arc::clone(model), self.conn.clone()))
    }

    /// Builds the relation registry for every registered model.
    ///
    /// # Errors
    ///
    /// See [`RelationRegistry::register_models`].
    pub fn relations(&self) -> Result<RelationRegistry> {
        let models: Vec<Arc<Model>> = self.models.values().cloned().collect();
        let mut relations = RelationRegistry::new(self.conn.clone());
        relations.register_models(&models)?;
        Ok(relations)
    }
}

//! Registration table mapping plugin ids to module factories.
//!
//! Modules are resolved on demand: registering a factory is cheap, the
//! module itself is only built when the service first loads it.

use crate::module::CalculatorModule;
use crate::types::PluginId;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Builds a fresh module instance
pub type ModuleFactory = Arc<dyn Fn() -> Result<CalculatorModule> + Send + Sync>;

/// Table of known calculator plugins
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    factories: BTreeMap<PluginId, ModuleFactory>,
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("ids", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModuleRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in calculator registered
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::calculators::register_builtins(&mut registry);
        registry
    }

    /// Register (or replace) the factory for `id`
    pub fn register<F>(&mut self, id: impl Into<PluginId>, factory: F)
    where
        F: Fn() -> Result<CalculatorModule> + Send + Sync + 'static,
    {
        let id = id.into();
        if self.factories.insert(id.clone(), Arc::new(factory)).is_some() {
            tracing::warn!("Replaced factory for plugin {}", id);
        } else {
            tracing::debug!("Registered plugin {}", id);
        }
    }

    pub fn unregister(&mut self, id: &PluginId) -> bool {
        self.factories.remove(id).is_some()
    }

    pub fn contains(&self, id: &PluginId) -> bool {
        self.factories.contains_key(id)
    }

    /// Registered ids in sorted order
    pub fn ids(&self) -> Vec<PluginId> {
        self.factories.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Build the module registered for `id`
    ///
    /// The module's own metadata must agree with the id it was registered
    /// under; a mismatch is a validation failure, not a lookup failure.
    pub fn resolve(&self, id: &PluginId) -> Result<CalculatorModule> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| Error::PluginNotFound(id.clone()))?;

        let module = factory()?;
        let actual = module.plugin_id();
        if &actual != id {
            return Err(Error::PluginValidation {
                id: id.clone(),
                reason: format!("factory produced module '{}'", actual),
            });
        }
        Ok(module)
    }
}

//! Calculator service: the single entry point for running calculators.
//!
//! The service resolves a plugin id to a cached or freshly loaded module,
//! drives new modules through the lifecycle, and runs the
//! validate → calculate → format pipeline. All collaborators are owned by
//! the service instance; there is no global state.

use crate::cache::{CacheSweeper, CacheStats, ModuleCache};
use crate::clock::{Clock, SystemClock};
use crate::config::{CacheConfig, Config, MonitorConfig};
use crate::lifecycle::{PluginLifecycle, PluginState, RuntimeEnvironment};
use crate::locale::Locale;
use crate::module::CalculatorModule;
use crate::monitor::{LoadStats, PerformanceMonitor};
use crate::registry::ModuleRegistry;
use crate::types::*;
use crate::{Error, Result};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Combined cache and load statistics
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ServiceStats {
    pub cache: CacheStats,
    pub loads: LoadStats,
    pub issues: Vec<String>,
}

type LoadCell = Arc<OnceCell<Arc<CalculatorModule>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Orchestrates registry, cache, lifecycle and monitor
pub struct CalculatorService {
    registry: ModuleRegistry,
    cache: Arc<ModuleCache>,
    monitor: PerformanceMonitor,
    lifecycles: Mutex<HashMap<PluginId, PluginLifecycle>>,
    /// Reasons for plugins that could not even be built
    failures: Mutex<HashMap<PluginId, String>>,
    /// Configs applied through `update_config`, reapplied after eviction
    overrides: Mutex<HashMap<PluginId, CalculatorConfig>>,
    in_flight: Mutex<HashMap<PluginId, LoadCell>>,
    env: RuntimeEnvironment,
    clock: Arc<dyn Clock>,
    default_locale: Locale,
    sweep_interval: std::time::Duration,
}

/// Builder for [`CalculatorService`]
pub struct ServiceBuilder {
    registry: ModuleRegistry,
    cache: CacheConfig,
    max_age: Option<chrono::Duration>,
    monitor: MonitorConfig,
    env: RuntimeEnvironment,
    clock: Arc<dyn Clock>,
    default_locale: Locale,
}

impl ServiceBuilder {
    /// Apply every section of an application config
    pub fn config(mut self, config: &Config) -> Self {
        self.cache = config.cache.clone();
        self.monitor = config.monitor.clone();
        self.env = RuntimeEnvironment::from(&config.runtime);
        self.default_locale = config.runtime.default_locale;
        self
    }

    /// Cache capacity and TTL with sub-second precision
    pub fn cache_policy(mut self, max_entries: usize, max_age: chrono::Duration) -> Self {
        self.cache.max_entries = max_entries;
        self.max_age = Some(max_age);
        self
    }

    pub fn monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn environment(mut self, env: RuntimeEnvironment) -> Self {
        self.env = env;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn default_locale(mut self, locale: Locale) -> Self {
        self.default_locale = locale;
        self
    }

    pub fn build(self) -> CalculatorService {
        let max_age = self.max_age.unwrap_or_else(|| self.cache.max_age());
        let cache = ModuleCache::new(self.cache.max_entries, max_age, Arc::clone(&self.clock));
        CalculatorService {
            registry: self.registry,
            cache: Arc::new(cache),
            monitor: PerformanceMonitor::new(self.monitor),
            lifecycles: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            overrides: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            env: self.env,
            clock: self.clock,
            default_locale: self.default_locale,
            sweep_interval: self.cache.sweep_interval(),
        }
    }
}

impl CalculatorService {
    pub fn builder(registry: ModuleRegistry) -> ServiceBuilder {
        ServiceBuilder {
            registry,
            cache: CacheConfig::default(),
            max_age: None,
            monitor: MonitorConfig::default(),
            env: RuntimeEnvironment::default(),
            clock: Arc::new(SystemClock),
            default_locale: Locale::DEFAULT,
        }
    }

    pub fn new(registry: ModuleRegistry, config: &Config) -> Self {
        Self::builder(registry).config(config).build()
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ModuleCache> {
        &self.cache
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    pub fn default_locale(&self) -> Locale {
        self.default_locale
    }

    /// Registered plugin ids, sorted
    pub fn available_plugins(&self) -> Vec<PluginId> {
        self.registry.ids()
    }

    /// Current lifecycle state of `id`
    pub fn plugin_state(&self, id: &PluginId) -> PluginState {
        if lock(&self.failures).contains_key(id) {
            return PluginState::Failed;
        }
        lock(&self.lifecycles)
            .get(id)
            .map(PluginLifecycle::state)
            .unwrap_or(PluginState::Uninstalled)
    }

    /// Module for `id`, loading and activating it on a cache miss
    ///
    /// # Errors
    /// - `PluginNotFound` if nothing is registered for `id`
    /// - `PluginValidation` if the module fails install/validation, is not
    ///   compatible with this runtime, or failed on an earlier load
    pub fn load_calculator(&self, id: &PluginId) -> Result<Arc<CalculatorModule>> {
        let timer = self.monitor.start_module_load(id);

        if let Some(module) = self.cache.get(id) {
            self.monitor
                .end_module_load(timer, true, module.size_estimate());
            return Ok(module);
        }

        match self.load_shared(id, true) {
            Ok(module) => {
                self.monitor
                    .end_module_load(timer, false, module.size_estimate());
                Ok(module)
            }
            Err(e) => {
                self.monitor.cancel_module_load(timer);
                Err(e)
            }
        }
    }

    /// Load `id` once for all concurrent callers
    fn load_shared(&self, id: &PluginId, insert: bool) -> Result<Arc<CalculatorModule>> {
        let cell = Arc::clone(lock(&self.in_flight).entry(id.clone()).or_default());

        let result = cell
            .get_or_try_init(|| -> Result<Arc<CalculatorModule>> {
                // Another caller may have finished a load since our miss;
                // the miss is already counted, so look without touching stats
                if insert && self.cache.has(id) {
                    if let Some(entry) = self.cache.peek(id) {
                        return Ok(entry.module);
                    }
                }
                let module = self.load_uncached(id)?;
                if insert {
                    self.cache.set(id.clone(), Arc::clone(&module));
                }
                Ok(module)
            })
            .map(Arc::clone);

        let mut in_flight = lock(&self.in_flight);
        if in_flight.get(id).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
            in_flight.remove(id);
        }
        result
    }

    /// Resolve and run the lifecycle for `id`, bypassing the cache
    fn load_uncached(&self, id: &PluginId) -> Result<Arc<CalculatorModule>> {
        if let Some(reason) = self.previous_failure(id) {
            return Err(Error::PluginValidation {
                id: id.clone(),
                reason: format!("plugin previously failed: {}", reason),
            });
        }

        tracing::info!("Loading calculator {}", id);
        let module = match self.registry.resolve(id) {
            Ok(module) => module,
            Err(e @ Error::PluginNotFound(_)) => return Err(e),
            Err(e) => {
                let reason = match &e {
                    Error::PluginValidation { reason, .. } => reason.clone(),
                    other => other.to_string(),
                };
                lock(&self.failures).insert(id.clone(), reason.clone());
                return Err(Error::PluginValidation {
                    id: id.clone(),
                    reason,
                });
            }
        };

        let mut lifecycle = PluginLifecycle::new(module);
        let outcome = self.activate(&mut lifecycle);
        let module = Arc::clone(lifecycle.module());
        lock(&self.lifecycles).insert(id.clone(), lifecycle);
        outcome.map(|()| module)
    }

    fn previous_failure(&self, id: &PluginId) -> Option<String> {
        if let Some(reason) = lock(&self.failures).get(id) {
            return Some(reason.clone());
        }
        lock(&self.lifecycles)
            .get(id)
            .filter(|lc| lc.state() == PluginState::Failed)
            .map(|lc| lc.failure_reason().unwrap_or("unknown").to_string())
    }

    fn activate(&self, lifecycle: &mut PluginLifecycle) -> Result<()> {
        lifecycle.install()?;
        lifecycle.validate()?;

        let id = lifecycle.id().clone();
        if let Some(config) = lock(&self.overrides).get(&id).cloned() {
            lifecycle.on_config_update(config)?;
        }

        let report = lifecycle.activate(&self.env)?;
        if !report.compatible {
            let messages: Vec<_> = report.errors().map(|i| i.message.as_str()).collect();
            return Err(Error::PluginValidation {
                id,
                reason: format!("incompatible with runtime: {}", messages.join("; ")),
            });
        }
        Ok(())
    }

    /// Validate inputs against `id`
    ///
    /// Only load failures are errors; bad inputs come back as
    /// `ValidationResult::errors`.
    pub fn validate(&self, id: &PluginId, inputs: &Inputs) -> Result<ValidationResult> {
        let module = self.load_calculator(id)?;
        Ok(module.validate(inputs))
    }

    /// Validate, then calculate
    ///
    /// # Errors
    /// `CalculationPrecondition` (carrying the validation result) when the
    /// inputs are invalid; the calculator is not invoked in that case.
    pub fn calculate(&self, id: &PluginId, inputs: &Inputs) -> Result<CalculationResult> {
        let module = self.load_calculator(id)?;

        let validation = module.validate(inputs);
        if !validation.is_valid {
            tracing::debug!(
                "Refusing to calculate {} with {} invalid field(s)",
                id,
                validation.errors.len()
            );
            return Err(Error::CalculationPrecondition {
                id: id.clone(),
                errors: validation,
            });
        }

        let mut result = match catch_unwind(AssertUnwindSafe(|| module.calculate(inputs))) {
            Ok(result) => result?,
            Err(_) => {
                tracing::error!("Calculator {} panicked", id);
                return Err(Error::Calculation(format!("calculator {} panicked", id)));
            }
        };
        result.metadata.timestamp = Some(self.clock.now());
        Ok(result)
    }

    /// Project a result into `locale`
    pub fn format_result(&self, result: &CalculationResult, locale: Locale) -> FormattedResult {
        FormattedResult::project(result, locale)
    }

    /// Project a result with the module's own formatter
    pub fn format_result_with(
        &self,
        id: &PluginId,
        result: &CalculationResult,
        locale: Locale,
    ) -> Result<FormattedResult> {
        let module = self.load_calculator(id)?;
        Ok(module.format_result(result, locale))
    }

    /// Hot-swap the configuration of `id`
    ///
    /// A rejected config leaves the previous one active.
    pub fn update_config(&self, id: &PluginId, config: CalculatorConfig) -> Result<()> {
        self.load_calculator(id)?;

        let module = {
            let mut lifecycles = lock(&self.lifecycles);
            let lifecycle = lifecycles
                .get_mut(id)
                .ok_or_else(|| Error::PluginNotFound(id.clone()))?;
            lifecycle.on_config_update(config.clone())?;
            Arc::clone(lifecycle.module())
        };

        lock(&self.overrides).insert(id.clone(), config);
        self.cache.set(id.clone(), module);
        Ok(())
    }

    /// Uninstall `id` and drop it from the cache
    pub fn uninstall(&self, id: &PluginId) -> Result<()> {
        {
            let mut lifecycles = lock(&self.lifecycles);
            let lifecycle = lifecycles
                .get_mut(id)
                .ok_or_else(|| Error::PluginNotFound(id.clone()))?;
            lifecycle.uninstall()?;
        }
        self.cache.delete(id);
        Ok(())
    }

    /// Forget a failure so the next load tries again
    pub fn reset_plugin(&self, id: &PluginId) {
        lock(&self.failures).remove(id);
        lock(&self.lifecycles).remove(id);
        self.cache.delete(id);
        tracing::info!("Reset plugin {}", id);
    }

    /// Load several plugins in parallel; failures are logged and skipped
    pub fn preload(&self, ids: &[PluginId]) -> usize {
        self.cache.preload(ids, |id| self.load_shared(id, false))
    }

    /// Start the background TTL sweep; it stops when the handle is dropped
    pub fn start_sweeper(&self) -> Result<CacheSweeper> {
        CacheSweeper::spawn(&self.cache, self.sweep_interval)
    }

    pub fn get_stats(&self) -> ServiceStats {
        ServiceStats {
            cache: self.cache.stats(),
            loads: self.monitor.get_load_stats(),
            issues: self.monitor.check_performance_issues(),
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn reset_stats(&self) {
        self.cache.reset_stats();
        self.monitor.reset();
    }
}

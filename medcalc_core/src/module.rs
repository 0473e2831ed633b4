//! The plugin contract every calculator module implements.
//!
//! A module bundles immutable metadata and configuration with a pure
//! [`Calculator`]. Modules are built by a registered factory, checked by the
//! lifecycle controller and then shared read-only through `Arc`.

use crate::locale::Locale;
use crate::types::*;
use crate::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

/// Opaque presentation capability; the runtime only checks for its presence
pub type Dashboard = Arc<dyn Any + Send + Sync>;

/// Pure computation behind a calculator module
///
/// Implementations must be deterministic: equal `(config, inputs)` give
/// equal results, and no state is kept between calls.
pub trait Calculator: Send + Sync {
    /// Compute a result from inputs that already passed `validate`
    fn calculate(&self, config: &CalculatorConfig, inputs: &Inputs) -> Result<CalculationResult>;

    /// Check inputs; problems are reported as data, never as errors
    fn validate(&self, config: &CalculatorConfig, inputs: &Inputs) -> ValidationResult {
        validate_fields(config, inputs)
    }

    fn format_result(&self, result: &CalculationResult, locale: Locale) -> FormattedResult {
        FormattedResult::project(result, locale)
    }
}

/// A loaded calculator plugin
#[derive(Clone)]
pub struct CalculatorModule {
    pub metadata: PluginMetadata,
    pub config: CalculatorConfig,
    pub calculator: Arc<dyn Calculator>,
    pub dashboard: Option<Dashboard>,
    /// Representative inputs used by the install smoke test
    pub sample_inputs: Inputs,
}

impl fmt::Debug for CalculatorModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalculatorModule")
            .field("id", &self.plugin_id())
            .field("version", &self.metadata.version)
            .field("fields", &self.config.fields.len())
            .field("dashboard", &self.dashboard.is_some())
            .finish()
    }
}

impl CalculatorModule {
    pub fn plugin_id(&self) -> PluginId {
        self.metadata.plugin_id()
    }

    pub fn has_dashboard(&self) -> bool {
        self.dashboard.is_some()
    }

    pub fn validate(&self, inputs: &Inputs) -> ValidationResult {
        self.calculator.validate(&self.config, inputs)
    }

    pub fn calculate(&self, inputs: &Inputs) -> Result<CalculationResult> {
        self.calculator.calculate(&self.config, inputs)
    }

    pub fn format_result(&self, result: &CalculationResult, locale: Locale) -> FormattedResult {
        self.calculator.format_result(result, locale)
    }

    /// Same module with a replacement configuration
    pub fn with_config(&self, config: CalculatorConfig) -> Self {
        Self {
            config,
            ..self.clone()
        }
    }

    /// Rough in-memory footprint, based on the serialized config
    pub fn size_estimate(&self) -> usize {
        let config_bytes = serde_json::to_vec(&self.config).map(|v| v.len()).unwrap_or(0);
        let metadata_bytes = serde_json::to_vec(&self.metadata).map(|v| v.len()).unwrap_or(0);
        std::mem::size_of::<Self>() + config_bytes + metadata_bytes
    }

    /// Structural problems with this module, empty when sound
    pub fn structural_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let meta = &self.metadata;
        let config = &self.config;

        if meta.id.is_empty() {
            errors.push("Metadata has empty id".to_string());
        }
        if meta.namespace.is_empty() {
            errors.push("Metadata has empty namespace".to_string());
        }
        if meta.version.is_empty() {
            errors.push("Metadata has empty version".to_string());
        }
        if config.id != meta.id {
            errors.push(format!(
                "Config id '{}' doesn't match metadata id '{}'",
                config.id, meta.id
            ));
        }
        if config.fields.is_empty() {
            errors.push(format!("Config '{}' has no fields", config.id));
        }
        for dupe in config.duplicate_field_ids() {
            errors.push(format!("Duplicate field id '{}'", dupe));
        }

        for field in &config.fields {
            if field.id.is_empty() {
                errors.push("Field has empty id".to_string());
            }
            if let Some(cond) = &field.condition {
                if cond.field == field.id {
                    errors.push(format!("Field '{}' is conditional on itself", field.id));
                } else if config.field(&cond.field).is_none() {
                    errors.push(format!(
                        "Field '{}' is conditional on unknown field '{}'",
                        field.id, cond.field
                    ));
                }
            }

            let rules = &field.validation;
            if let (Some(min), Some(max)) = (rules.min, rules.max) {
                if min > max {
                    errors.push(format!("Field '{}': min {} > max {}", field.id, min, max));
                }
            }
            if let Some(step) = rules.step {
                if step <= 0.0 {
                    errors.push(format!("Field '{}': step must be positive", field.id));
                }
            }
            if let Some(pattern) = &rules.pattern {
                if let Err(e) = Regex::new(pattern) {
                    errors.push(format!("Field '{}': invalid pattern: {}", field.id, e));
                }
            }
            if field.field_type.has_options() && field.options.is_empty() {
                errors.push(format!("Field '{}' has no options", field.id));
            }

            if let Some(default) = &field.default_value {
                let mut check = ValidationResult::valid();
                check_value(field, default, &mut check);
                for e in check.errors {
                    errors.push(format!("Field '{}': invalid default: {}", field.id, e.message));
                }
            }
        }

        errors
    }

    /// Validate and calculate the sample inputs, catching panics
    pub fn smoke_test(&self) -> Result<CalculationResult> {
        let id = self.plugin_id();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let validation = self.validate(&self.sample_inputs);
            if !validation.is_valid {
                let fields: Vec<_> = validation.errors.iter().map(|e| e.field.as_str()).collect();
                return Err(Error::PluginValidation {
                    id: id.clone(),
                    reason: format!("sample inputs rejected for fields {:?}", fields),
                });
            }
            self.calculate(&self.sample_inputs)
        }));

        match outcome {
            Ok(Ok(result)) => {
                if !result.primary_value.is_finite() {
                    return Err(Error::PluginValidation {
                        id,
                        reason: "smoke test produced a non-finite value".to_string(),
                    });
                }
                Ok(result)
            }
            Ok(Err(e @ Error::PluginValidation { .. })) => Err(e),
            Ok(Err(e)) => Err(Error::PluginValidation {
                id,
                reason: format!("smoke test failed: {}", e),
            }),
            Err(panic) => Err(Error::PluginValidation {
                id,
                reason: format!("smoke test panicked: {}", panic_message(panic.as_ref())),
            }),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Field-driven validation shared by all calculators
///
/// Checks, in field order: required, type, option membership, min/max,
/// step and pattern. Fields hidden by an unmet display condition are
/// skipped entirely.
pub fn validate_fields(config: &CalculatorConfig, inputs: &Inputs) -> ValidationResult {
    let mut result = ValidationResult::valid();

    for field in &config.fields {
        if !is_visible(field, inputs) {
            continue;
        }

        match inputs.get(&field.id) {
            None => {
                if field.validation.required {
                    result.push(
                        &field.id,
                        ErrorCode::Required,
                        format!("{} is required", field.id),
                    );
                }
            }
            Some(InputValue::Text(s)) if s.trim().is_empty() => {
                if field.validation.required {
                    result.push(
                        &field.id,
                        ErrorCode::Required,
                        format!("{} is required", field.id),
                    );
                }
            }
            Some(value) => check_value(field, value, &mut result),
        }
    }

    result
}

/// Whether a field's display condition (if any) is met
pub fn is_visible(field: &Field, inputs: &Inputs) -> bool {
    match &field.condition {
        None => true,
        Some(cond) => inputs
            .get(&cond.field)
            .is_some_and(|v| v.matches(&cond.equals)),
    }
}

fn check_value(field: &Field, value: &InputValue, result: &mut ValidationResult) {
    let id = field.id.as_str();
    let rules = &field.validation;

    match field.field_type {
        FieldType::Checkbox => {
            if value.as_bool().is_none() {
                result.push(id, ErrorCode::InvalidType, format!("{} must be true or false", id));
            }
            return;
        }
        FieldType::Select | FieldType::Radio => {
            let text = value.to_text();
            if !field.options.iter().any(|o| value.matches(&InputValue::Text(o.value.clone()))) {
                result.push(
                    id,
                    ErrorCode::InvalidOption,
                    format!("'{}' is not a valid option for {}", text, id),
                );
                return;
            }
        }
        FieldType::Number | FieldType::Range => {
            let Some(n) = value.as_number().filter(|n| n.is_finite()) else {
                result.push(id, ErrorCode::InvalidType, format!("{} must be a number", id));
                return;
            };
            if let Some(min) = rules.min {
                if n < min {
                    result.push(id, ErrorCode::MinValue, format!("{} must be at least {}", id, min));
                }
            }
            if let Some(max) = rules.max {
                if n > max {
                    result.push(id, ErrorCode::MaxValue, format!("{} must be at most {}", id, max));
                }
            }
            if let Some(step) = rules.step.filter(|s| *s > 0.0) {
                let base = rules.min.unwrap_or(0.0);
                let steps = (n - base) / step;
                if (steps - steps.round()).abs() > 1e-9 {
                    result.push(
                        id,
                        ErrorCode::StepMismatch,
                        format!("{} must be in increments of {}", id, step),
                    );
                }
            }
        }
    }

    if let Some(pattern) = &rules.pattern {
        // Malformed patterns are reported by structural checks
        if let Some(re) = compiled_pattern(pattern) {
            if !re.is_match(&value.to_text()) {
                result.push(
                    id,
                    ErrorCode::PatternMismatch,
                    format!("{} has an invalid format", id),
                );
            }
        }
    }
}

/// Field patterns compiled once per distinct source; `None` if malformed
static PATTERNS: Lazy<Mutex<HashMap<String, Option<Regex>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn compiled_pattern(pattern: &str) -> Option<Regex> {
    let mut patterns = PATTERNS.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(compiled) = patterns.get(pattern) {
        return compiled.clone();
    }
    let compiled = Regex::new(pattern).ok();
    patterns.insert(pattern.to_string(), compiled.clone());
    compiled
}

//! Plugin lifecycle management.
//!
//! Every module goes through install and validation before the service
//! hands it out.
//!
//! ```text
//! uninstalled --install()--> installed --validate()--> validated --activate()--> active
//! installed/validated/active --uninstall()--> uninstalled
//! install()/validate() failure --> failed   (terminal)
//! ```

use crate::config::RuntimeConfig;
use crate::module::CalculatorModule;
use crate::types::{CalculatorConfig, PluginId};
use crate::locale::Locale;
use crate::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Major version of the calculator contract this runtime implements
pub const CONTRACT_MAJOR_VERSION: u64 = 1;

/// Plugin lifecycle state
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    Uninstalled,
    Installing,
    Installed,
    Validated,
    Active,
    Failed,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PluginState::Uninstalled => "uninstalled",
            PluginState::Installing => "installing",
            PluginState::Installed => "installed",
            PluginState::Validated => "validated",
            PluginState::Active => "active",
            PluginState::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl PluginState {
    /// Installed in some form and not failed
    pub fn is_installed(self) -> bool {
        matches!(
            self,
            PluginState::Installed | PluginState::Validated | PluginState::Active
        )
    }

    pub fn is_usable(self) -> bool {
        self == PluginState::Active
    }
}

/// How serious a compatibility issue is
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Blocks activation
    Error,
    /// Informational only
    Warning,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct CompatibilityIssue {
    pub severity: Severity,
    pub message: String,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct CompatibilityReport {
    pub compatible: bool,
    pub issues: Vec<CompatibilityIssue>,
}

impl CompatibilityReport {
    pub fn errors(&self) -> impl Iterator<Item = &CompatibilityIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &CompatibilityIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }
}

/// What the hosting environment can do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeEnvironment {
    pub ui_available: bool,
    pub contract_major_version: u64,
}

impl Default for RuntimeEnvironment {
    fn default() -> Self {
        Self {
            ui_available: false,
            contract_major_version: CONTRACT_MAJOR_VERSION,
        }
    }
}

impl From<&RuntimeConfig> for RuntimeEnvironment {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            ui_available: config.ui_available,
            ..Self::default()
        }
    }
}

/// Lifecycle controller for one plugin
#[derive(Debug)]
pub struct PluginLifecycle {
    id: PluginId,
    state: PluginState,
    module: Arc<CalculatorModule>,
    failure: Option<String>,
}

impl PluginLifecycle {
    pub fn new(module: CalculatorModule) -> Self {
        Self {
            id: module.plugin_id(),
            state: PluginState::Uninstalled,
            module: Arc::new(module),
            failure: None,
        }
    }

    pub fn id(&self) -> &PluginId {
        &self.id
    }

    pub fn state(&self) -> PluginState {
        self.state
    }

    pub fn module(&self) -> &Arc<CalculatorModule> {
        &self.module
    }

    /// Why the plugin entered `failed`, if it did
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    fn invalid(&self, action: &'static str) -> Error {
        Error::InvalidTransition {
            id: self.id.clone(),
            from: self.state,
            action,
        }
    }

    fn transition(&mut self, to: PluginState) {
        tracing::debug!("Plugin {}: {} -> {}", self.id, self.state, to);
        self.state = to;
    }

    fn fail(&mut self, error: Error) -> Error {
        tracing::warn!("Plugin {} failed: {}", self.id, error);
        self.failure = Some(error.to_string());
        self.transition(PluginState::Failed);
        error
    }

    /// Structural checks plus the smoke test
    fn run_checks(id: &PluginId, module: &CalculatorModule) -> Result<()> {
        let errors = module.structural_errors();
        if !errors.is_empty() {
            return Err(Error::PluginValidation {
                id: id.clone(),
                reason: errors.join("; "),
            });
        }
        module.smoke_test().map(|_| ())
    }

    /// `uninstalled -> installed`, or `failed` if the checks do not pass
    pub fn install(&mut self) -> Result<()> {
        if self.state != PluginState::Uninstalled {
            return Err(self.invalid("install"));
        }
        self.transition(PluginState::Installing);

        match Self::run_checks(&self.id, &self.module) {
            Ok(()) => {
                self.transition(PluginState::Installed);
                tracing::info!("Installed plugin {}", self.id);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Re-check the installed module; `installed -> validated`
    ///
    /// Also allowed from `validated` and `active`, which keep their state
    /// when the checks pass.
    pub fn validate(&mut self) -> Result<()> {
        if !self.state.is_installed() {
            return Err(self.invalid("validate"));
        }

        match Self::run_checks(&self.id, &self.module) {
            Ok(()) => {
                if self.state == PluginState::Installed {
                    self.transition(PluginState::Validated);
                }
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Inspect the environment; never changes state
    pub fn check_compatibility(&self, env: &RuntimeEnvironment) -> CompatibilityReport {
        let module = &self.module;
        let config = &module.config;
        let mut issues = Vec::new();
        let mut issue = |severity, message: String| {
            issues.push(CompatibilityIssue { severity, message })
        };

        match parse_version(&config.version) {
            None => issue(
                Severity::Error,
                format!("Config version '{}' is not MAJOR.MINOR.PATCH", config.version),
            ),
            Some((major, _, _)) if major > env.contract_major_version => issue(
                Severity::Error,
                format!(
                    "Config version {} needs contract v{}, runtime provides v{}",
                    config.version, major, env.contract_major_version
                ),
            ),
            Some(_) => {}
        }

        if !env.ui_available {
            if config.requires_dashboard {
                issue(
                    Severity::Error,
                    "Calculator requires a dashboard but no UI is available".to_string(),
                );
            } else if module.has_dashboard() {
                issue(
                    Severity::Warning,
                    "Dashboard will not be rendered without a UI".to_string(),
                );
            }
        }

        if !config.name.has(Locale::DEFAULT) {
            issue(
                Severity::Warning,
                format!("Config has no name for default locale {}", Locale::DEFAULT),
            );
        }

        let compatible = !issues.iter().any(|i| i.severity == Severity::Error);
        CompatibilityReport { compatible, issues }
    }

    /// `validated -> active` when the environment has no blocking issues
    ///
    /// An incompatible plugin stays `validated`; the report says why.
    pub fn activate(&mut self, env: &RuntimeEnvironment) -> Result<CompatibilityReport> {
        if self.state != PluginState::Validated {
            return Err(self.invalid("activate"));
        }

        let report = self.check_compatibility(env);
        for warning in report.warnings() {
            tracing::warn!("Plugin {}: {}", self.id, warning.message);
        }
        if report.compatible {
            self.transition(PluginState::Active);
        } else {
            tracing::warn!("Plugin {} is not compatible with this runtime", self.id);
        }
        Ok(report)
    }

    pub fn uninstall(&mut self) -> Result<()> {
        if !self.state.is_installed() {
            return Err(self.invalid("uninstall"));
        }
        self.transition(PluginState::Uninstalled);
        tracing::info!("Uninstalled plugin {}", self.id);
        Ok(())
    }

    /// Swap in a new configuration if the module still validates with it
    ///
    /// A rejected update leaves the previous configuration and state in
    /// place.
    pub fn on_config_update(&mut self, new_config: CalculatorConfig) -> Result<()> {
        if !self.state.is_installed() {
            return Err(self.invalid("update config of"));
        }

        let candidate = self.module.with_config(new_config);
        if let Err(e) = Self::run_checks(&self.id, &candidate) {
            tracing::warn!("Rejected config update for {}: {}", self.id, e);
            return Err(e);
        }

        self.module = Arc::new(candidate);
        tracing::info!(
            "Applied config update for {} (version {})",
            self.id,
            self.module.config.version
        );
        Ok(())
    }
}

fn parse_version(version: &str) -> Option<(u64, u64, u64)> {
    let mut parts = version.split('.').map(|p| p.parse::<u64>().ok());
    let major = parts.next()??;
    let minor = parts.next()??;
    let patch = parts.next()??;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::tests::{weight_module, Doubler, Panicker};
    use crate::module::Dashboard;

    fn healthy() -> PluginLifecycle {
        PluginLifecycle::new(weight_module("w", Arc::new(Doubler)))
    }

    fn activate(lifecycle: &mut PluginLifecycle) {
        lifecycle.install().unwrap();
        lifecycle.validate().unwrap();
        let report = lifecycle.activate(&RuntimeEnvironment::default()).unwrap();
        assert!(report.compatible);
    }

    #[test]
    fn test_happy_path_reaches_active() {
        let mut lifecycle = healthy();
        assert_eq!(lifecycle.state(), PluginState::Uninstalled);
        lifecycle.install().unwrap();
        assert_eq!(lifecycle.state(), PluginState::Installed);
        lifecycle.validate().unwrap();
        assert_eq!(lifecycle.state(), PluginState::Validated);
        lifecycle.activate(&RuntimeEnvironment::default()).unwrap();
        assert_eq!(lifecycle.state(), PluginState::Active);
    }

    #[test]
    fn test_failed_install_never_reaches_active() {
        let mut lifecycle = PluginLifecycle::new(weight_module("p", Arc::new(Panicker)));
        assert!(matches!(
            lifecycle.install(),
            Err(Error::PluginValidation { .. })
        ));
        assert_eq!(lifecycle.state(), PluginState::Failed);
        assert!(lifecycle.failure_reason().is_some());

        assert!(matches!(
            lifecycle.install(),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(lifecycle.validate().is_err());
        assert!(lifecycle.activate(&RuntimeEnvironment::default()).is_err());
        assert!(lifecycle.uninstall().is_err());
        assert_eq!(lifecycle.state(), PluginState::Failed);
    }

    #[test]
    fn test_structural_failure_fails_install() {
        let mut module = weight_module("w", Arc::new(Doubler));
        module.config.fields.clear();
        let mut lifecycle = PluginLifecycle::new(module);

        let err = lifecycle.install().unwrap_err();
        assert!(err.to_string().contains("has no fields"));
        assert_eq!(lifecycle.state(), PluginState::Failed);
    }

    #[test]
    fn test_uninstall_from_active() {
        let mut lifecycle = healthy();
        activate(&mut lifecycle);
        lifecycle.uninstall().unwrap();
        assert_eq!(lifecycle.state(), PluginState::Uninstalled);

        // Can be installed again
        lifecycle.install().unwrap();
        assert_eq!(lifecycle.state(), PluginState::Installed);
    }

    #[test]
    fn test_activate_requires_validation() {
        let mut lifecycle = healthy();
        lifecycle.install().unwrap();
        assert!(matches!(
            lifecycle.activate(&RuntimeEnvironment::default()),
            Err(Error::InvalidTransition { from: PluginState::Installed, .. })
        ));
    }

    #[test]
    fn test_dashboard_without_ui_is_a_warning() {
        let mut module = weight_module("w", Arc::new(Doubler));
        let dashboard: Dashboard = Arc::new("chart");
        module.dashboard = Some(dashboard);
        let lifecycle = PluginLifecycle::new(module);

        let report = lifecycle.check_compatibility(&RuntimeEnvironment::default());
        assert!(report.compatible);
        assert_eq!(report.warnings().count(), 1);

        let with_ui = RuntimeEnvironment {
            ui_available: true,
            ..RuntimeEnvironment::default()
        };
        assert!(lifecycle.check_compatibility(&with_ui).issues.is_empty());
    }

    #[test]
    fn test_error_issue_blocks_activation() {
        let mut module = weight_module("w", Arc::new(Doubler));
        module.config.requires_dashboard = true;
        let mut lifecycle = PluginLifecycle::new(module);
        lifecycle.install().unwrap();
        lifecycle.validate().unwrap();

        let report = lifecycle.activate(&RuntimeEnvironment::default()).unwrap();
        assert!(!report.compatible);
        assert_eq!(report.errors().count(), 1);
        assert_eq!(lifecycle.state(), PluginState::Validated);
    }

    #[test]
    fn test_version_checks() {
        let mut module = weight_module("w", Arc::new(Doubler));
        module.config.version = "2.0.0".into();
        let lifecycle = PluginLifecycle::new(module);
        assert!(!lifecycle
            .check_compatibility(&RuntimeEnvironment::default())
            .compatible);

        assert_eq!(parse_version("1.2.3"), Some((1, 2, 3)));
        assert_eq!(parse_version("1.2"), None);
        assert_eq!(parse_version("1.2.3.4"), None);
        assert_eq!(parse_version("v1.2.3"), None);
    }

    #[test]
    fn test_config_update_applied_when_valid() {
        let mut lifecycle = healthy();
        activate(&mut lifecycle);

        let mut config = lifecycle.module().config.clone();
        config.version = "1.1.0".into();
        lifecycle.on_config_update(config).unwrap();

        assert_eq!(lifecycle.module().config.version, "1.1.0");
        assert_eq!(lifecycle.state(), PluginState::Active);
    }

    #[test]
    fn test_rejected_config_update_keeps_old_config() {
        let mut lifecycle = healthy();
        activate(&mut lifecycle);

        let mut config = lifecycle.module().config.clone();
        // Sample weight of 70 no longer fits
        config.fields[0].validation.max = Some(50.0);
        assert!(lifecycle.on_config_update(config).is_err());

        assert_eq!(lifecycle.module().config.fields[0].validation.max, Some(300.0));
        assert_eq!(lifecycle.state(), PluginState::Active);
    }
}

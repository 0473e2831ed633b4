#![forbid(unsafe_code)]

//! Core runtime for pluggable medical calculators.
//!
//! This crate provides:
//! - The calculator plugin contract and field-driven validation
//! - A registry of module factories with the built-in calculators
//! - An LRU + TTL module cache with background sweeping
//! - The plugin lifecycle controller
//! - A performance monitor for module loads
//! - The calculator service tying these together
//! - CSV batch evaluation

pub mod types;
pub mod error;
pub mod locale;
pub mod clock;
pub mod config;
pub mod logging;
pub mod module;
pub mod registry;
pub mod cache;
pub mod lifecycle;
pub mod monitor;
pub mod service;
pub mod calculators;
pub mod batch;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use locale::{Locale, LocalizedText};
pub use config::Config;
pub use module::{Calculator, CalculatorModule};
pub use registry::ModuleRegistry;
pub use lifecycle::PluginState;
pub use service::{CalculatorService, ServiceStats};
pub use batch::run_batch;

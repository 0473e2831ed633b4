//! Built-in calculator modules.
//!
//! Each submodule provides a `module()` factory returning a complete
//! [`CalculatorModule`]; [`register_builtins`] adds them all to a registry.

pub mod bmi;
pub mod cha2ds2_vasc;
pub mod lipid;
pub mod pediatric_dosing;

use crate::locale::LocalizedText;
use crate::registry::ModuleRegistry;
use crate::types::PluginMetadata;
use chrono::{DateTime, NaiveDate, Utc};

/// Register every built-in calculator
pub fn register_builtins(registry: &mut ModuleRegistry) {
    registry.register(bmi::ID, bmi::module);
    registry.register(cha2ds2_vasc::ID, cha2ds2_vasc::module);
    registry.register(lipid::ID, lipid::module);
    registry.register(pediatric_dosing::ID, pediatric_dosing::module);
}

fn date(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or_default()
}

fn metadata(
    namespace: &str,
    id: &str,
    version: &str,
    name: LocalizedText,
    description: LocalizedText,
    tags: &[&str],
) -> PluginMetadata {
    PluginMetadata {
        id: id.to_string(),
        namespace: namespace.to_string(),
        version: version.to_string(),
        name,
        description,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        created_at: date(2024, 1, 15),
        updated_at: date(2024, 11, 1),
    }
}

/// Round to one decimal place
fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

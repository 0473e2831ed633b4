//! Core domain types for the calculator plugin runtime.
//!
//! This module defines the data shared by every calculator:
//! - Plugin identity and metadata
//! - Calculator configuration and field definitions
//! - Inputs, validation results and calculation results

use crate::locale::{Locale, LocalizedText};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

// ============================================================================
// Plugin Identity
// ============================================================================

/// Key of one calculator module, conventionally `<namespace>.<id>`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct PluginId(String);

impl PluginId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Part before the first `.`, if any
    pub fn namespace(&self) -> Option<&str> {
        self.0.split_once('.').map(|(ns, _)| ns)
    }

    /// Part after the first `.` (the whole id when there is no namespace)
    pub fn local_id(&self) -> &str {
        self.0.split_once('.').map(|(_, id)| id).unwrap_or(&self.0)
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PluginId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PluginId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Descriptive metadata carried by every plugin
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PluginMetadata {
    pub id: String,
    pub namespace: String,
    pub version: String,
    pub name: LocalizedText,
    pub description: LocalizedText,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PluginMetadata {
    /// The `<namespace>.<id>` key this metadata describes
    pub fn plugin_id(&self) -> PluginId {
        PluginId(format!("{}.{}", self.namespace, self.id))
    }
}

// ============================================================================
// Calculator Configuration
// ============================================================================

/// Kind of input control a field is rendered as
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Select,
    Number,
    Checkbox,
    Radio,
    Range,
}

impl FieldType {
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldType::Number | FieldType::Range)
    }

    pub fn has_options(self) -> bool {
        matches!(self, FieldType::Select | FieldType::Radio)
    }
}

/// Constraints checked against a field's input value
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FieldValidation {
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// Choice for select/radio fields
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FieldOption {
    pub value: String,
    pub label: LocalizedText,
}

/// Show a field only while another field has a given value
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FieldCondition {
    pub field: String,
    pub equals: InputValue,
}

/// A single input field definition
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Field {
    pub id: String,
    pub label: LocalizedText,
    pub field_type: FieldType,
    #[serde(default)]
    pub validation: FieldValidation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<InputValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<FieldOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<FieldCondition>,
}

impl Field {
    /// A field with no constraints; use the builder methods to add them
    pub fn new(id: impl Into<String>, field_type: FieldType, label: LocalizedText) -> Self {
        Self {
            id: id.into(),
            label,
            field_type,
            validation: FieldValidation::default(),
            default_value: None,
            options: Vec::new(),
            unit: None,
            condition: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.validation.required = true;
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.validation.min = Some(min);
        self.validation.max = Some(max);
        self
    }

    pub fn step(mut self, step: f64) -> Self {
        self.validation.step = Some(step);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.validation.pattern = Some(pattern.into());
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn default_value(mut self, value: InputValue) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn option(mut self, value: impl Into<String>, label: LocalizedText) -> Self {
        self.options.push(FieldOption {
            value: value.into(),
            label,
        });
        self
    }

    pub fn shown_when(mut self, field: impl Into<String>, equals: InputValue) -> Self {
        self.condition = Some(FieldCondition {
            field: field.into(),
            equals,
        });
        self
    }
}

/// Clinical context attached to a calculator
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MedicalMetadata {
    pub specialty: String,
    #[serde(default)]
    pub evidence_level: Option<String>,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub clinical_guidelines: Vec<String>,
    #[serde(default)]
    pub last_reviewed: Option<String>,
}

/// Immutable descriptor of one calculator
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CalculatorConfig {
    pub id: String,
    pub name: LocalizedText,
    pub description: LocalizedText,
    pub category: String,
    pub version: String,
    pub fields: Vec<Field>,
    pub medical: MedicalMetadata,
    #[serde(default)]
    pub requires_dashboard: bool,
}

impl CalculatorConfig {
    pub fn field(&self, id: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Field ids that occur more than once, in first-seen order
    pub fn duplicate_field_ids(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut dupes = Vec::new();
        for field in &self.fields {
            if !seen.insert(field.id.as_str()) && !dupes.contains(&field.id.as_str()) {
                dupes.push(field.id.as_str());
            }
        }
        dupes
    }

    /// Inputs made of every field's default value
    pub fn default_inputs(&self) -> Inputs {
        self.fields
            .iter()
            .filter_map(|f| f.default_value.clone().map(|v| (f.id.clone(), v)))
            .collect()
    }
}

// ============================================================================
// Inputs
// ============================================================================

/// A single submitted field value
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum InputValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl InputValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            InputValue::Number(n) => Some(*n),
            InputValue::Text(s) => s.trim().parse().ok(),
            InputValue::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            InputValue::Bool(b) => Some(*b),
            InputValue::Text(s) => match s.trim() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            InputValue::Number(_) => None,
        }
    }

    /// String form used for option matching and patterns
    pub fn to_text(&self) -> String {
        match self {
            InputValue::Bool(b) => b.to_string(),
            InputValue::Number(n) => n.to_string(),
            InputValue::Text(s) => s.clone(),
        }
    }

    /// Loose equality used by conditional display rules
    pub fn matches(&self, other: &InputValue) -> bool {
        match (self, other) {
            (InputValue::Number(a), b) | (b, InputValue::Number(a)) => b.as_number() == Some(*a),
            (InputValue::Bool(a), b) | (b, InputValue::Bool(a)) => b.as_bool() == Some(*a),
            (InputValue::Text(a), InputValue::Text(b)) => a == b,
        }
    }
}

impl From<f64> for InputValue {
    fn from(n: f64) -> Self {
        InputValue::Number(n)
    }
}

impl From<bool> for InputValue {
    fn from(b: bool) -> Self {
        InputValue::Bool(b)
    }
}

impl From<&str> for InputValue {
    fn from(s: &str) -> Self {
        InputValue::Text(s.to_string())
    }
}

/// Field id to submitted value
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Inputs(BTreeMap<String, InputValue>);

impl Inputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<InputValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<InputValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&InputValue> {
        self.0.get(key)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(InputValue::as_number)
    }

    /// Checkbox value; absent means unchecked
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).and_then(InputValue::as_bool).unwrap_or(false)
    }

    pub fn text(&self, key: &str) -> Option<String> {
        self.get(key).map(InputValue::to_text)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &InputValue)> {
        self.0.iter()
    }
}

impl FromIterator<(String, InputValue)> for Inputs {
    fn from_iter<T: IntoIterator<Item = (String, InputValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Machine-readable reason for a field error
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Required,
    InvalidType,
    MinValue,
    MaxValue,
    StepMismatch,
    PatternMismatch,
    InvalidOption,
    Custom,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Required => "REQUIRED",
            ErrorCode::InvalidType => "INVALID_TYPE",
            ErrorCode::MinValue => "MIN_VALUE",
            ErrorCode::MaxValue => "MAX_VALUE",
            ErrorCode::StepMismatch => "STEP_MISMATCH",
            ErrorCode::PatternMismatch => "PATTERN_MISMATCH",
            ErrorCode::InvalidOption => "INVALID_OPTION",
            ErrorCode::Custom => "CUSTOM",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One per-field input problem
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    pub code: ErrorCode,
}

/// Outcome of validating one set of inputs
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<FieldError>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    pub fn push(&mut self, field: impl Into<String>, code: ErrorCode, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
            code,
        });
        self.is_valid = false;
    }

    pub fn errors_for<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a FieldError> {
        self.errors.iter().filter(move |e| e.field == field)
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::valid()
    }
}

// ============================================================================
// Calculation Results
// ============================================================================

/// Clinical risk band
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    VeryHigh,
    Critical,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
            RiskLevel::VeryHigh => "very-high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One contributing term of a score
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BreakdownEntry {
    pub label: LocalizedText,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Provenance of a result
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ResultMetadata {
    pub algorithm: String,
    pub version: String,
    /// Set by the service when the result is produced
    pub timestamp: Option<DateTime<Utc>>,
}

/// Output of one calculator invocation
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CalculationResult {
    pub primary_value: f64,
    pub primary_unit: String,
    pub primary_label: LocalizedText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    pub interpretation: LocalizedText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Vec<LocalizedText>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<Vec<BreakdownEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualization: Option<serde_json::Value>,
    /// Calculator-specific outputs (targets, advice flags)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub details: serde_json::Map<String, serde_json::Value>,
    pub metadata: ResultMetadata,
}

impl CalculationResult {
    /// Result with only the required parts set
    pub fn new(
        primary_value: f64,
        primary_unit: impl Into<String>,
        primary_label: LocalizedText,
        interpretation: LocalizedText,
        algorithm: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            primary_value,
            primary_unit: primary_unit.into(),
            primary_label,
            risk_level: None,
            risk_score: None,
            interpretation,
            recommendations: None,
            breakdown: None,
            visualization: None,
            details: serde_json::Map::new(),
            metadata: ResultMetadata {
                algorithm: algorithm.into(),
                version: version.into(),
                timestamp: None,
            },
        }
    }

    pub fn detail(&self, key: &str) -> Option<&serde_json::Value> {
        self.details.get(key)
    }
}

/// A result projected into one locale for display
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FormattedResult {
    pub display_value: String,
    pub description: String,
    pub recommendations: Vec<String>,
}

impl FormattedResult {
    /// Generic projection used when a calculator has no custom formatter
    pub fn project(result: &CalculationResult, locale: Locale) -> Self {
        let display_value = if result.primary_unit.is_empty() {
            format_number(result.primary_value)
        } else {
            format!("{} {}", format_number(result.primary_value), result.primary_unit)
        };

        let mut description = result.interpretation.resolve(locale).to_string();
        if let Some(level) = result.risk_level {
            let label = result.primary_label.resolve(locale);
            description = format!("{} ({}: {})", description, label, level);
        }

        let recommendations = result
            .recommendations
            .iter()
            .flatten()
            .map(|r| r.resolve(locale).to_string())
            .collect();

        Self {
            display_value,
            description,
            recommendations,
        }
    }
}

/// Render without a trailing `.0` for whole numbers
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{:.1}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_id_parts() {
        let id = PluginId::from("cardiology.lipid-management");
        assert_eq!(id.namespace(), Some("cardiology"));
        assert_eq!(id.local_id(), "lipid-management");

        let bare = PluginId::from("bmi");
        assert_eq!(bare.namespace(), None);
        assert_eq!(bare.local_id(), "bmi");
    }

    #[test]
    fn test_inputs_deserialize_untagged() {
        let inputs: Inputs =
            serde_json::from_str(r#"{"ldl": 150, "hasASCVD": true, "drug": "ibuprofen"}"#)
                .unwrap();
        assert_eq!(inputs.number("ldl"), Some(150.0));
        assert!(inputs.flag("hasASCVD"));
        assert_eq!(inputs.text("drug").as_deref(), Some("ibuprofen"));
        assert!(!inputs.flag("missing"));
    }

    #[test]
    fn test_text_numbers_are_coerced() {
        let inputs = Inputs::new().with("weight", "72.5").with("smoker", "yes");
        assert_eq!(inputs.number("weight"), Some(72.5));
        assert!(inputs.flag("smoker"));
    }

    #[test]
    fn test_input_value_matches_loosely() {
        assert!(InputValue::from("custom").matches(&InputValue::from("custom")));
        assert!(InputValue::from(true).matches(&InputValue::from("true")));
        assert!(InputValue::from(2.0).matches(&InputValue::from("2")));
        assert!(!InputValue::from("a").matches(&InputValue::from("b")));
    }

    #[test]
    fn test_duplicate_field_ids() {
        let config = CalculatorConfig {
            id: "x".into(),
            name: LocalizedText::uniform("x"),
            description: LocalizedText::new(),
            category: "test".into(),
            version: "1.0.0".into(),
            fields: vec![
                Field::new("a", FieldType::Number, LocalizedText::uniform("a")),
                Field::new("b", FieldType::Number, LocalizedText::uniform("b")),
                Field::new("a", FieldType::Checkbox, LocalizedText::uniform("a")),
            ],
            medical: MedicalMetadata::default(),
            requires_dashboard: false,
        };
        assert_eq!(config.duplicate_field_ids(), vec!["a"]);
    }

    #[test]
    fn test_risk_level_wire_format() {
        let json = serde_json::to_string(&RiskLevel::VeryHigh).unwrap();
        assert_eq!(json, "\"very-high\"");
    }

    #[test]
    fn test_project_uses_locale_and_unit() {
        let mut result = CalculationResult::new(
            24.2,
            "kg/m²",
            LocalizedText::tri("BMI", "BMI", "BMI"),
            LocalizedText::tri("正常", "Normal weight", "普通体重"),
            "bmi",
            "1.0.0",
        );
        result.recommendations = Some(vec![LocalizedText::tri("維持", "Maintain", "維持")]);

        let formatted = FormattedResult::project(&result, Locale::En);
        assert_eq!(formatted.display_value, "24.2 kg/m²");
        assert_eq!(formatted.description, "Normal weight");
        assert_eq!(formatted.recommendations, vec!["Maintain".to_string()]);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(24.27), "24.3");
    }
}

//! CSV batch evaluation.
//!
//! Each input row becomes one [`Inputs`] set keyed by the header names. Cells
//! are typed loosely: empty cells are omitted, `true`/`false` become flags,
//! numbers become numbers and anything else stays text.

use crate::service::CalculatorService;
use crate::types::{InputValue, Inputs, PluginId, RiskLevel, ValidationResult};
use crate::{Error, Result};
use serde::Serialize;
use std::io::{Read, Write};

/// One output row
#[derive(Debug, Serialize, PartialEq)]
pub struct BatchRow {
    /// 1-based data row number
    pub row: usize,
    pub valid: bool,
    pub primary_value: Option<f64>,
    pub primary_unit: Option<String>,
    pub risk_level: Option<RiskLevel>,
    /// `field:CODE` pairs separated by `;`, or a calculation error message
    pub errors: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub rows: usize,
    pub calculated: usize,
    pub rejected: usize,
}

pub fn parse_cell(raw: &str) -> Option<InputValue> {
    let cell = raw.trim();
    if cell.is_empty() {
        return None;
    }
    match cell {
        "true" | "TRUE" | "True" => return Some(InputValue::Bool(true)),
        "false" | "FALSE" | "False" => return Some(InputValue::Bool(false)),
        _ => {}
    }
    match cell.parse::<f64>() {
        Ok(n) if n.is_finite() => Some(InputValue::Number(n)),
        _ => Some(InputValue::Text(cell.to_string())),
    }
}

/// Read every data row of a headed CSV into input sets
pub fn read_inputs<R: Read>(reader: R) -> Result<Vec<Inputs>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = csv_reader.headers()?.clone();

    let mut rows = Vec::new();
    for record in csv_reader.records() {
        let record = record?;
        let inputs: Inputs = headers
            .iter()
            .zip(record.iter())
            .filter_map(|(name, cell)| parse_cell(cell).map(|v| (name.to_string(), v)))
            .collect();
        rows.push(inputs);
    }
    Ok(rows)
}

fn summarize_errors(validation: &ValidationResult) -> String {
    validation
        .errors
        .iter()
        .map(|e| format!("{}:{}", e.field, e.code))
        .collect::<Vec<_>>()
        .join(";")
}

/// Evaluate every row of `input` with plugin `id` and write result rows
///
/// Fails up front if the plugin cannot be loaded. Invalid rows and rows whose
/// calculation fails are reported in the output, not as errors.
pub fn run_batch<R: Read, W: Write>(
    service: &CalculatorService,
    id: &PluginId,
    input: R,
    output: W,
) -> Result<BatchSummary> {
    service.load_calculator(id)?;
    let rows = read_inputs(input)?;
    let mut writer = csv::Writer::from_writer(output);
    let mut summary = BatchSummary::default();

    for (index, inputs) in rows.iter().enumerate() {
        let row = index + 1;
        summary.rows += 1;

        let out = match service.calculate(id, inputs) {
            Ok(result) => {
                summary.calculated += 1;
                BatchRow {
                    row,
                    valid: true,
                    primary_value: Some(result.primary_value),
                    primary_unit: Some(result.primary_unit),
                    risk_level: result.risk_level,
                    errors: String::new(),
                }
            }
            Err(Error::CalculationPrecondition { errors, .. }) => {
                summary.rejected += 1;
                BatchRow {
                    row,
                    valid: false,
                    primary_value: None,
                    primary_unit: None,
                    risk_level: None,
                    errors: summarize_errors(&errors),
                }
            }
            Err(Error::Calculation(message)) => {
                tracing::warn!("Batch row {} for {} failed: {}", row, id, message);
                summary.rejected += 1;
                BatchRow {
                    row,
                    valid: false,
                    primary_value: None,
                    primary_unit: None,
                    risk_level: None,
                    errors: message,
                }
            }
            Err(e) => return Err(e),
        };
        writer.serialize(out)?;
    }

    writer.flush()?;
    tracing::info!(
        "Batch for {}: {} rows, {} calculated, {} rejected",
        id,
        summary.rows,
        summary.calculated,
        summary.rejected
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::registry::ModuleRegistry;

    fn service() -> CalculatorService {
        CalculatorService::new(ModuleRegistry::with_builtins(), &Config::default())
    }

    #[test]
    fn test_parse_cell_types() {
        assert_eq!(parse_cell(""), None);
        assert_eq!(parse_cell("  "), None);
        assert_eq!(parse_cell("true"), Some(InputValue::Bool(true)));
        assert_eq!(parse_cell("72.5"), Some(InputValue::Number(72.5)));
        assert_eq!(parse_cell("female"), Some(InputValue::from("female")));
        assert_eq!(parse_cell("NaN"), Some(InputValue::from("NaN")));
    }

    #[test]
    fn test_read_inputs_skips_empty_cells() {
        let csv = "age,sex,diabetes\n70,male,true\n80,,\n";
        let rows = read_inputs(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), 3);
        assert!(rows[0].flag("diabetes"));
        assert_eq!(rows[1].len(), 1);
        assert_eq!(rows[1].number("age"), Some(80.0));
    }

    #[test]
    fn test_run_batch_reports_valid_and_invalid_rows() {
        let service = service();
        let input = "weight,height\n70,175\n,180\n";
        let mut output = Vec::new();

        let summary = run_batch(
            &service,
            &PluginId::from("general.bmi"),
            input.as_bytes(),
            &mut output,
        )
        .unwrap();

        assert_eq!(
            summary,
            BatchSummary {
                rows: 2,
                calculated: 1,
                rejected: 1
            }
        );
        let text = String::from_utf8(output).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "row,valid,primary_value,primary_unit,risk_level,errors");
        assert_eq!(lines[1], "1,true,22.9,kg/m²,low,");
        assert_eq!(lines[2], "2,false,,,,weight:REQUIRED");
    }

    #[test]
    fn test_run_batch_unknown_plugin_fails() {
        let service = service();
        let err = run_batch(
            &service,
            &PluginId::from("general.nope"),
            "a\n1\n".as_bytes(),
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::PluginNotFound(_)));
    }
}

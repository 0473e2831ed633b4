//! CHA₂DS₂-VASc stroke risk score for atrial fibrillation.

use super::metadata;
use crate::locale::LocalizedText;
use crate::module::{Calculator, CalculatorModule};
use crate::types::*;
use crate::{Error, Result};
use serde_json::json;
use std::sync::Arc;

pub const ID: &str = "cardiology.cha2ds2-vasc";

/// Adjusted annual stroke rate (%) by score, 0 through 9
const ANNUAL_STROKE_RISK: [f64; 10] = [0.0, 1.3, 2.2, 3.2, 4.0, 6.7, 9.8, 9.6, 6.7, 15.2];

/// Checkbox criteria and the points each contributes
const CRITERIA: [(&str, f64, &str, &str, &str); 5] = [
    ("chf", 1.0, "鬱血性心衰竭", "Congestive heart failure", "うっ血性心不全"),
    ("hypertension", 1.0, "高血壓", "Hypertension", "高血圧"),
    ("diabetes", 1.0, "糖尿病", "Diabetes mellitus", "糖尿病"),
    ("strokeTia", 2.0, "中風/TIA/血栓栓塞", "Stroke/TIA/thromboembolism", "脳卒中/TIA/血栓塞栓症"),
    ("vascular", 1.0, "血管疾病", "Vascular disease", "血管疾患"),
];

pub fn config() -> CalculatorConfig {
    let mut fields = vec![
        Field::new("age", FieldType::Number, LocalizedText::tri("年齡", "Age", "年齢"))
            .required()
            .range(18.0, 120.0)
            .step(1.0)
            .unit("years"),
        Field::new("sex", FieldType::Radio, LocalizedText::tri("性別", "Sex", "性別"))
            .required()
            .option("male", LocalizedText::tri("男", "Male", "男性"))
            .option("female", LocalizedText::tri("女", "Female", "女性")),
    ];
    for (id, _, zh, en, ja) in CRITERIA {
        fields.push(
            Field::new(id, FieldType::Checkbox, LocalizedText::tri(zh, en, ja))
                .default_value(InputValue::Bool(false)),
        );
    }

    CalculatorConfig {
        id: "cha2ds2-vasc".into(),
        name: LocalizedText::tri(
            "CHA₂DS₂-VASc 中風風險",
            "CHA₂DS₂-VASc Stroke Risk",
            "CHA₂DS₂-VASc 脳卒中リスク",
        ),
        description: LocalizedText::tri(
            "心房顫動病人的中風風險評估",
            "Stroke risk in atrial fibrillation",
            "心房細動患者の脳卒中リスク評価",
        ),
        category: "cardiology".into(),
        version: "1.0.0".into(),
        fields,
        medical: MedicalMetadata {
            specialty: "cardiology".into(),
            evidence_level: Some("A".into()),
            references: vec!["Lip GY et al. Chest 2010;137:263-272".into()],
            clinical_guidelines: vec!["2020 ESC Guidelines for atrial fibrillation".into()],
            last_reviewed: Some("2024-09-15".into()),
        },
        requires_dashboard: false,
    }
}

pub fn module() -> Result<CalculatorModule> {
    Ok(CalculatorModule {
        metadata: metadata(
            "cardiology",
            "cha2ds2-vasc",
            "1.0.0",
            LocalizedText::tri("CHA₂DS₂-VASc", "CHA₂DS₂-VASc", "CHA₂DS₂-VASc"),
            LocalizedText::tri(
                "心房顫動中風風險",
                "Atrial fibrillation stroke risk",
                "心房細動の脳卒中リスク",
            ),
            &["atrial-fibrillation", "stroke", "anticoagulation"],
        ),
        config: config(),
        calculator: Arc::new(Cha2ds2VascCalculator),
        dashboard: None,
        sample_inputs: Inputs::new()
            .with("age", 72.0)
            .with("sex", "female")
            .with("hypertension", true),
    })
}

pub struct Cha2ds2VascCalculator;

impl Calculator for Cha2ds2VascCalculator {
    fn calculate(&self, config: &CalculatorConfig, inputs: &Inputs) -> Result<CalculationResult> {
        let age = inputs
            .number("age")
            .ok_or_else(|| Error::Calculation("age is required".into()))?;
        let female = match inputs.text("sex").as_deref() {
            Some("female") => true,
            Some("male") => false,
            other => return Err(Error::Calculation(format!("unknown sex {:?}", other))),
        };

        let mut breakdown = Vec::new();
        let age_points = if age >= 75.0 {
            2.0
        } else if age >= 65.0 {
            1.0
        } else {
            0.0
        };
        if age_points > 0.0 {
            breakdown.push(BreakdownEntry {
                label: LocalizedText::tri("年齡", "Age", "年齢"),
                value: age_points,
                unit: Some("points".into()),
            });
        }
        if female {
            breakdown.push(BreakdownEntry {
                label: LocalizedText::tri("女性", "Female sex", "女性"),
                value: 1.0,
                unit: Some("points".into()),
            });
        }
        for (id, points, zh, en, ja) in CRITERIA {
            if inputs.flag(id) {
                breakdown.push(BreakdownEntry {
                    label: LocalizedText::tri(zh, en, ja),
                    value: points,
                    unit: Some("points".into()),
                });
            }
        }

        let score: f64 = breakdown.iter().map(|b| b.value).sum();
        // Female sex alone does not raise risk
        let adjusted = if female { score - 1.0 } else { score };
        let annual_risk = ANNUAL_STROKE_RISK[(score as usize).min(ANNUAL_STROKE_RISK.len() - 1)];

        let (risk, anticoagulation, interpretation, advice) = if adjusted <= 0.0 {
            (
                RiskLevel::Low,
                "not-recommended",
                LocalizedText::tri("低風險", "Low stroke risk", "低リスク"),
                LocalizedText::tri(
                    "不建議抗凝血治療",
                    "Anticoagulation not recommended",
                    "抗凝固療法は推奨されない",
                ),
            )
        } else if adjusted < 2.0 {
            (
                RiskLevel::Moderate,
                "consider",
                LocalizedText::tri("中度風險", "Moderate stroke risk", "中等度リスク"),
                LocalizedText::tri(
                    "考慮口服抗凝血劑",
                    "Consider oral anticoagulation",
                    "経口抗凝固薬を検討",
                ),
            )
        } else {
            (
                RiskLevel::High,
                "recommended",
                LocalizedText::tri("高風險", "High stroke risk", "高リスク"),
                LocalizedText::tri(
                    "建議口服抗凝血劑",
                    "Oral anticoagulation recommended",
                    "経口抗凝固薬を推奨",
                ),
            )
        };

        let mut result = CalculationResult::new(
            score,
            "points",
            LocalizedText::uniform("CHA₂DS₂-VASc"),
            interpretation,
            "cha2ds2-vasc",
            config.version.clone(),
        );
        result.risk_level = Some(risk);
        result.risk_score = Some(score);
        result.recommendations = Some(vec![advice]);
        result.breakdown = Some(breakdown);
        result
            .details
            .insert("annualStrokeRiskPercent".into(), json!(annual_risk));
        result
            .details
            .insert("anticoagulation".into(), json!(anticoagulation));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::validate_fields;

    fn score(inputs: &Inputs) -> CalculationResult {
        Cha2ds2VascCalculator.calculate(&config(), inputs).unwrap()
    }

    #[test]
    fn test_young_male_without_risk_factors() {
        let result = score(&Inputs::new().with("age", 50.0).with("sex", "male"));
        assert_eq!(result.primary_value, 0.0);
        assert_eq!(result.risk_level, Some(RiskLevel::Low));
        assert_eq!(result.details["anticoagulation"], "not-recommended");
        assert!(result.breakdown.unwrap().is_empty());
    }

    #[test]
    fn test_female_sex_alone_is_low_risk() {
        let result = score(&Inputs::new().with("age", 50.0).with("sex", "female"));
        assert_eq!(result.primary_value, 1.0);
        assert_eq!(result.risk_level, Some(RiskLevel::Low));
    }

    #[test]
    fn test_sample_patient() {
        // age 65-74 (1) + female (1) + hypertension (1)
        let result = score(&module().unwrap().sample_inputs);
        assert_eq!(result.primary_value, 3.0);
        assert_eq!(result.risk_level, Some(RiskLevel::High));
        assert_eq!(result.details["annualStrokeRiskPercent"], 3.2);
        assert_eq!(result.breakdown.unwrap().len(), 3);
    }

    #[test]
    fn test_maximum_score() {
        let inputs = Inputs::new()
            .with("age", 80.0)
            .with("sex", "female")
            .with("chf", true)
            .with("hypertension", true)
            .with("diabetes", true)
            .with("strokeTia", true)
            .with("vascular", true);
        let result = score(&inputs);
        assert_eq!(result.primary_value, 9.0);
        assert_eq!(result.details["annualStrokeRiskPercent"], 15.2);
    }

    #[test]
    fn test_invalid_sex_option() {
        let inputs = Inputs::new().with("age", 70.0).with("sex", "other");
        let result = validate_fields(&config(), &inputs);
        assert!(!result.is_valid);
        assert_eq!(result.errors[0].code, ErrorCode::InvalidOption);
    }

    #[test]
    fn test_fractional_age_is_step_mismatch() {
        let inputs = Inputs::new().with("age", 70.5).with("sex", "male");
        let result = validate_fields(&config(), &inputs);
        assert_eq!(result.errors[0].code, ErrorCode::StepMismatch);
    }
}

//! LDL-C target and statin advice by cardiovascular risk category.
//!
//! Risk categories follow the Taiwan lipid guideline: established ASCVD is
//! very high risk, diabetes, CKD or LDL-C >= 190 mg/dL are high risk.

use super::metadata;
use crate::locale::{Locale, LocalizedText};
use crate::module::{Calculator, CalculatorModule};
use crate::types::*;
use crate::{Error, Result};
use serde_json::json;
use std::sync::Arc;

pub const ID: &str = "cardiology.lipid-management";

struct Category {
    risk: RiskLevel,
    target: f64,
    intensity: &'static str,
    interpretation: LocalizedText,
}

fn categorize(inputs: &Inputs, ldl: f64) -> Category {
    if inputs.flag("hasASCVD") {
        Category {
            risk: RiskLevel::VeryHigh,
            target: 70.0,
            intensity: "high",
            interpretation: LocalizedText::tri(
                "極高風險：已確診動脈粥狀硬化心血管疾病",
                "Very high risk: established ASCVD",
                "超高リスク：動脈硬化性心血管疾患あり",
            ),
        }
    } else if inputs.flag("hasDiabetes") || inputs.flag("hasCKD") || ldl >= 190.0 {
        Category {
            risk: RiskLevel::High,
            target: 100.0,
            intensity: "moderate",
            interpretation: LocalizedText::tri(
                "高風險：糖尿病、慢性腎病或 LDL-C ≥ 190",
                "High risk: diabetes, CKD or LDL-C ≥ 190",
                "高リスク：糖尿病、CKD または LDL-C ≥ 190",
            ),
        }
    } else if ldl >= 160.0 {
        Category {
            risk: RiskLevel::Moderate,
            target: 130.0,
            intensity: "moderate",
            interpretation: LocalizedText::tri(
                "中度風險：LDL-C 偏高",
                "Moderate risk: elevated LDL-C",
                "中等度リスク：LDL-C 高値",
            ),
        }
    } else {
        Category {
            risk: RiskLevel::Low,
            target: 160.0,
            intensity: "none",
            interpretation: LocalizedText::tri("低風險", "Low risk", "低リスク"),
        }
    }
}

fn triglyceride_status(tg: f64) -> &'static str {
    if tg >= 500.0 {
        "very-high"
    } else if tg >= 200.0 {
        "high"
    } else if tg >= 150.0 {
        "borderline-high"
    } else {
        "normal"
    }
}

pub fn config() -> CalculatorConfig {
    CalculatorConfig {
        id: "lipid-management".into(),
        name: LocalizedText::tri("血脂管理", "Lipid Management", "脂質管理"),
        description: LocalizedText::tri(
            "依心血管風險決定 LDL-C 治療目標",
            "LDL-C treatment target by cardiovascular risk",
            "心血管リスクに基づく LDL-C 管理目標",
        ),
        category: "cardiology".into(),
        version: "1.0.0".into(),
        fields: vec![
            Field::new("ldl", FieldType::Number, LocalizedText::uniform("LDL-C"))
                .required()
                .range(10.0, 1000.0)
                .unit("mg/dL"),
            Field::new("tg", FieldType::Number, LocalizedText::tri("三酸甘油酯", "Triglycerides", "中性脂肪"))
                .range(10.0, 5000.0)
                .unit("mg/dL"),
            Field::new(
                "hasASCVD",
                FieldType::Checkbox,
                LocalizedText::tri("動脈粥狀硬化心血管疾病", "Established ASCVD", "動脈硬化性心血管疾患"),
            )
            .default_value(InputValue::Bool(false)),
            Field::new("hasDiabetes", FieldType::Checkbox, LocalizedText::tri("糖尿病", "Diabetes", "糖尿病"))
                .default_value(InputValue::Bool(false)),
            Field::new("hasCKD", FieldType::Checkbox, LocalizedText::tri("慢性腎臟病", "Chronic kidney disease", "慢性腎臓病"))
                .default_value(InputValue::Bool(false)),
        ],
        medical: MedicalMetadata {
            specialty: "cardiology".into(),
            evidence_level: Some("A".into()),
            references: vec!["2022 Taiwan Lipid Guidelines for High Risk Patients".into()],
            clinical_guidelines: vec!["2019 ESC/EAS Guidelines for dyslipidaemias".into()],
            last_reviewed: Some("2024-10-01".into()),
        },
        requires_dashboard: false,
    }
}

pub fn module() -> Result<CalculatorModule> {
    Ok(CalculatorModule {
        metadata: metadata(
            "cardiology",
            "lipid-management",
            "1.0.0",
            LocalizedText::tri("血脂管理", "Lipid Management", "脂質管理"),
            LocalizedText::tri("LDL-C 目標與藥物建議", "LDL-C targets and statin advice", "LDL-C 目標とスタチン推奨"),
            &["lipids", "statin", "ascvd"],
        ),
        config: config(),
        calculator: Arc::new(LipidCalculator),
        dashboard: None,
        sample_inputs: Inputs::new().with("ldl", 130.0).with("tg", 120.0),
    })
}

pub struct LipidCalculator;

impl Calculator for LipidCalculator {
    fn calculate(&self, config: &CalculatorConfig, inputs: &Inputs) -> Result<CalculationResult> {
        let ldl = inputs
            .number("ldl")
            .ok_or_else(|| Error::Calculation("ldl is required".into()))?;
        let category = categorize(inputs, ldl);

        let needed = ldl > category.target;
        let reduction = if needed {
            ((ldl - category.target) / ldl * 100.0).round()
        } else {
            0.0
        };

        let mut recommendations = Vec::new();
        if needed {
            recommendations.push(LocalizedText::tri(
                format!("建議使用{}強度 statin，LDL-C 需再降低 {}%", intensity_cjk(category.intensity), reduction),
                format!("Start {} intensity statin; LDL-C needs a {}% reduction", category.intensity, reduction),
                format!("{}強度スタチンを推奨、LDL-C を {}% 低下させる必要あり", intensity_cjk(category.intensity), reduction),
            ));
        } else {
            recommendations.push(LocalizedText::tri(
                "LDL-C 已達標，維持生活型態調整",
                "LDL-C at target; continue lifestyle measures",
                "LDL-C は目標達成、生活習慣改善を継続",
            ));
        }

        let tg_status = inputs.number("tg").map(triglyceride_status);
        match tg_status {
            Some("very-high") => recommendations.push(LocalizedText::tri(
                "三酸甘油酯 ≥ 500，需預防胰臟炎",
                "Triglycerides ≥ 500: address pancreatitis risk",
                "中性脂肪 ≥ 500：膵炎リスクに対処",
            )),
            Some("high") | Some("borderline-high") => recommendations.push(LocalizedText::tri(
                "三酸甘油酯偏高，建議減重與限制精緻醣類",
                "Elevated triglycerides: weight loss and reduced refined carbohydrates",
                "中性脂肪高値：減量と精製糖質の制限",
            )),
            _ => {}
        }

        let mut result = CalculationResult::new(
            ldl,
            "mg/dL",
            LocalizedText::uniform("LDL-C"),
            category.interpretation,
            "lipid-management",
            config.version.clone(),
        );
        result.risk_level = Some(category.risk);
        result.recommendations = Some(recommendations);
        result
            .details
            .insert("ldlTarget".into(), json!(format!("< {} mg/dL", category.target)));
        result
            .details
            .insert("ldlTargetValue".into(), json!(category.target));
        result.details.insert(
            "medicationAdvice".into(),
            json!({
                "needed": needed,
                "statinIntensity": if needed { category.intensity } else { "none" },
                "reductionPercent": reduction,
            }),
        );
        if let Some(status) = tg_status {
            result
                .details
                .insert("triglycerideStatus".into(), json!(status));
        }
        Ok(result)
    }

    fn format_result(&self, result: &CalculationResult, locale: Locale) -> FormattedResult {
        let mut formatted = FormattedResult::project(result, locale);
        if let Some(target) = result.detail("ldlTarget").and_then(|v| v.as_str()) {
            let label = match locale {
                Locale::ZhTw => "目標",
                Locale::En => "target",
                Locale::Ja => "目標",
            };
            formatted.display_value = format!("{} ({} {})", formatted.display_value, label, target);
        }
        formatted
    }
}

/// Intensity word shared by the zh-TW and ja texts
fn intensity_cjk(intensity: &str) -> &'static str {
    match intensity {
        "high" => "高",
        _ => "中",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc(inputs: &Inputs) -> CalculationResult {
        LipidCalculator.calculate(&config(), inputs).unwrap()
    }

    #[test]
    fn test_ascvd_is_very_high_risk() {
        let result = calc(
            &Inputs::new()
                .with("ldl", 150.0)
                .with("tg", 200.0)
                .with("hasASCVD", true),
        );
        assert_eq!(result.risk_level, Some(RiskLevel::VeryHigh));
        assert_eq!(result.details["ldlTarget"], "< 70 mg/dL");
        assert_eq!(result.details["medicationAdvice"]["needed"], true);
        assert_eq!(result.details["medicationAdvice"]["statinIntensity"], "high");
        assert_eq!(result.details["medicationAdvice"]["reductionPercent"], 53.0);
        assert_eq!(result.details["triglycerideStatus"], "high");
    }

    #[test]
    fn test_diabetes_is_high_risk() {
        let result = calc(&Inputs::new().with("ldl", 90.0).with("hasDiabetes", true));
        assert_eq!(result.risk_level, Some(RiskLevel::High));
        assert_eq!(result.details["ldlTarget"], "< 100 mg/dL");
        assert_eq!(result.details["medicationAdvice"]["needed"], false);
        assert!(result.detail("triglycerideStatus").is_none());
    }

    #[test]
    fn test_very_high_ldl_without_comorbidity_is_high_risk() {
        let result = calc(&Inputs::new().with("ldl", 195.0));
        assert_eq!(result.risk_level, Some(RiskLevel::High));
    }

    #[test]
    fn test_low_risk_at_target() {
        let result = calc(&module().unwrap().sample_inputs);
        assert_eq!(result.risk_level, Some(RiskLevel::Low));
        assert_eq!(result.details["medicationAdvice"]["statinIntensity"], "none");
        assert_eq!(result.details["triglycerideStatus"], "normal");
    }

    #[test]
    fn test_custom_format_shows_target() {
        let result = calc(&Inputs::new().with("ldl", 150.0).with("hasASCVD", true));
        let formatted = LipidCalculator.format_result(&result, Locale::En);
        assert_eq!(formatted.display_value, "150 mg/dL (target < 70 mg/dL)");
        assert!(formatted.recommendations[0].contains("high intensity statin"));
    }
}

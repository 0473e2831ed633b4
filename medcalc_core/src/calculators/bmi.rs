//! Body mass index with Taiwan HPA or WHO cut-offs.

use super::{metadata, round1};
use crate::locale::LocalizedText;
use crate::module::{Calculator, CalculatorModule};
use crate::types::*;
use crate::{Error, Result};
use serde_json::json;
use std::sync::Arc;

pub const ID: &str = "general.bmi";

/// Marker for the BMI gauge dashboard
#[derive(Debug)]
pub struct BmiGauge;

/// Classification cut-offs: (underweight below, overweight from, obese from)
fn cutoffs(standard: &str) -> (f64, f64, f64) {
    match standard {
        "who" => (18.5, 25.0, 30.0),
        _ => (18.5, 24.0, 27.0),
    }
}

pub fn config() -> CalculatorConfig {
    CalculatorConfig {
        id: "bmi".into(),
        name: LocalizedText::tri("身體質量指數 (BMI)", "Body Mass Index (BMI)", "体格指数 (BMI)"),
        description: LocalizedText::tri(
            "以體重與身高評估體位",
            "Weight status from weight and height",
            "体重と身長から体格を評価",
        ),
        category: "general".into(),
        version: "1.0.0".into(),
        fields: vec![
            Field::new("weight", FieldType::Number, LocalizedText::tri("體重", "Weight", "体重"))
                .required()
                .range(1.0, 500.0)
                .step(0.1)
                .unit("kg"),
            Field::new("height", FieldType::Number, LocalizedText::tri("身高", "Height", "身長"))
                .required()
                .range(50.0, 250.0)
                .step(0.1)
                .unit("cm"),
            Field::new(
                "standard",
                FieldType::Select,
                LocalizedText::tri("判讀標準", "Cut-offs", "判定基準"),
            )
            .option("taiwan", LocalizedText::tri("國健署", "Taiwan HPA", "台湾 HPA"))
            .option("who", LocalizedText::uniform("WHO"))
            .default_value(InputValue::from("taiwan")),
        ],
        medical: MedicalMetadata {
            specialty: "general".into(),
            evidence_level: Some("A".into()),
            references: vec!["WHO Technical Report Series 894".into()],
            clinical_guidelines: vec!["Taiwan HPA adult weight classification".into()],
            last_reviewed: Some("2024-11-01".into()),
        },
        requires_dashboard: false,
    }
}

pub fn module() -> Result<CalculatorModule> {
    Ok(CalculatorModule {
        metadata: metadata(
            "general",
            "bmi",
            "1.0.0",
            LocalizedText::tri("身體質量指數", "Body Mass Index", "体格指数"),
            LocalizedText::tri("成人體位評估", "Adult weight status", "成人の体格評価"),
            &["bmi", "obesity", "screening"],
        ),
        config: config(),
        calculator: Arc::new(BmiCalculator),
        dashboard: Some(Arc::new(BmiGauge)),
        sample_inputs: Inputs::new().with("weight", 70.0).with("height", 175.0),
    })
}

pub struct BmiCalculator;

impl Calculator for BmiCalculator {
    fn calculate(&self, config: &CalculatorConfig, inputs: &Inputs) -> Result<CalculationResult> {
        let weight = inputs
            .number("weight")
            .ok_or_else(|| Error::Calculation("weight is required".into()))?;
        let height_cm = inputs
            .number("height")
            .ok_or_else(|| Error::Calculation("height is required".into()))?;
        let standard = inputs.text("standard").unwrap_or_else(|| "taiwan".into());

        let height_m = height_cm / 100.0;
        let bmi = round1(weight / (height_m * height_m));
        let (under, over, obese) = cutoffs(&standard);

        let (category, risk, interpretation, advice) = if bmi < under {
            (
                "underweight",
                RiskLevel::Moderate,
                LocalizedText::tri("體重過輕", "Underweight", "低体重"),
                LocalizedText::tri(
                    "建議評估營養狀況",
                    "Assess nutritional status",
                    "栄養状態の評価を推奨",
                ),
            )
        } else if bmi < over {
            (
                "normal",
                RiskLevel::Low,
                LocalizedText::tri("健康體位", "Normal weight", "普通体重"),
                LocalizedText::tri(
                    "維持均衡飲食與規律運動",
                    "Maintain a balanced diet and regular exercise",
                    "バランスの良い食事と運動を継続",
                ),
            )
        } else if bmi < obese {
            (
                "overweight",
                RiskLevel::Moderate,
                LocalizedText::tri("過重", "Overweight", "過体重"),
                LocalizedText::tri(
                    "建議調整飲食並增加活動量",
                    "Adjust diet and increase physical activity",
                    "食事の見直しと活動量の増加を推奨",
                ),
            )
        } else {
            (
                "obese",
                if bmi >= obese + 8.0 {
                    RiskLevel::VeryHigh
                } else {
                    RiskLevel::High
                },
                LocalizedText::tri("肥胖", "Obese", "肥満"),
                LocalizedText::tri(
                    "建議轉介體重管理門診",
                    "Refer to a weight management clinic",
                    "体重管理外来への紹介を推奨",
                ),
            )
        };

        let mut result = CalculationResult::new(
            bmi,
            "kg/m²",
            LocalizedText::uniform("BMI"),
            interpretation,
            "bmi",
            config.version.clone(),
        );
        result.risk_level = Some(risk);
        result.recommendations = Some(vec![advice]);
        result.breakdown = Some(vec![
            BreakdownEntry {
                label: LocalizedText::tri("體重", "Weight", "体重"),
                value: weight,
                unit: Some("kg".into()),
            },
            BreakdownEntry {
                label: LocalizedText::tri("身高", "Height", "身長"),
                value: height_m,
                unit: Some("m".into()),
            },
        ]);
        result.visualization = Some(json!({
            "type": "gauge",
            "min": 10,
            "max": 40,
            "value": bmi,
            "bands": [under, over, obese],
        }));
        result.details.insert("category".into(), json!(category));
        result.details.insert("standard".into(), json!(standard));
        result.details.insert(
            "healthyWeightRange".into(),
            json!({
                "min": round1(under * height_m * height_m),
                "max": round1(over * height_m * height_m),
            }),
        );
        Ok(result)
    }
}

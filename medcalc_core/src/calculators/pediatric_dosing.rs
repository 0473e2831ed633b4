//! Weight-based pediatric single-dose calculation.

use super::{metadata, round1};
use crate::locale::LocalizedText;
use crate::module::{Calculator, CalculatorModule};
use crate::types::*;
use crate::{Error, Result};
use serde_json::json;
use std::sync::Arc;

pub const ID: &str = "pediatrics.dosing";

/// Dosing rule for one drug
#[derive(Clone, Copy, Debug, PartialEq)]
struct Regimen {
    mg_per_kg: f64,
    doses_per_day: f64,
    max_single_mg: Option<f64>,
    max_daily_mg: Option<f64>,
}

fn regimen(drug: &str) -> Option<Regimen> {
    match drug {
        "paracetamol" => Some(Regimen {
            mg_per_kg: 15.0,
            doses_per_day: 4.0,
            max_single_mg: Some(1000.0),
            max_daily_mg: Some(4000.0),
        }),
        "ibuprofen" => Some(Regimen {
            mg_per_kg: 10.0,
            doses_per_day: 3.0,
            max_single_mg: Some(400.0),
            max_daily_mg: Some(1200.0),
        }),
        "amoxicillin" => Some(Regimen {
            mg_per_kg: 25.0,
            doses_per_day: 2.0,
            max_single_mg: Some(1000.0),
            max_daily_mg: Some(2000.0),
        }),
        _ => None,
    }
}

pub fn config() -> CalculatorConfig {
    let custom = || InputValue::from("custom");
    CalculatorConfig {
        id: "dosing".into(),
        name: LocalizedText::tri("兒童藥物劑量", "Pediatric Dosing", "小児薬用量"),
        description: LocalizedText::tri(
            "依體重計算單次劑量",
            "Single dose from body weight",
            "体重から1回量を計算",
        ),
        category: "pediatrics".into(),
        version: "1.0.0".into(),
        fields: vec![
            Field::new("weight", FieldType::Number, LocalizedText::tri("體重", "Weight", "体重"))
                .required()
                .range(0.5, 150.0)
                .unit("kg"),
            Field::new("drug", FieldType::Select, LocalizedText::tri("藥物", "Drug", "薬剤"))
                .required()
                .option("paracetamol", LocalizedText::tri("乙醯胺酚", "Paracetamol", "アセトアミノフェン"))
                .option("ibuprofen", LocalizedText::tri("布洛芬", "Ibuprofen", "イブプロフェン"))
                .option("amoxicillin", LocalizedText::tri("安莫西林", "Amoxicillin", "アモキシシリン"))
                .option("custom", LocalizedText::tri("自訂", "Custom", "カスタム"))
                .default_value(InputValue::from("paracetamol")),
            Field::new(
                "customDose",
                FieldType::Number,
                LocalizedText::tri("每公斤劑量", "Dose per kg", "体重あたり用量"),
            )
            .required()
            .range(0.1, 100.0)
            .unit("mg/kg")
            .shown_when("drug", custom()),
            Field::new(
                "dosesPerDay",
                FieldType::Range,
                LocalizedText::tri("每日次數", "Doses per day", "1日回数"),
            )
            .required()
            .range(1.0, 6.0)
            .step(1.0)
            .shown_when("drug", custom()),
        ],
        medical: MedicalMetadata {
            specialty: "pediatrics".into(),
            evidence_level: Some("B".into()),
            references: vec!["BNF for Children 2024".into()],
            clinical_guidelines: vec![],
            last_reviewed: Some("2024-08-20".into()),
        },
        requires_dashboard: false,
    }
}

pub fn module() -> Result<CalculatorModule> {
    Ok(CalculatorModule {
        metadata: metadata(
            "pediatrics",
            "dosing",
            "1.0.0",
            LocalizedText::tri("兒童藥物劑量", "Pediatric Dosing", "小児薬用量"),
            LocalizedText::tri("體重換算劑量", "Weight-based dosing", "体重換算の用量"),
            &["pediatrics", "dosing"],
        ),
        config: config(),
        calculator: Arc::new(DosingCalculator),
        dashboard: None,
        sample_inputs: Inputs::new().with("weight", 20.0).with("drug", "paracetamol"),
    })
}

pub struct DosingCalculator;

impl Calculator for DosingCalculator {
    fn calculate(&self, config: &CalculatorConfig, inputs: &Inputs) -> Result<CalculationResult> {
        let weight = inputs
            .number("weight")
            .ok_or_else(|| Error::Calculation("weight is required".into()))?;
        let drug = inputs.text("drug").unwrap_or_else(|| "paracetamol".into());

        let regimen = match regimen(&drug) {
            Some(r) => r,
            None if drug == "custom" => Regimen {
                mg_per_kg: inputs
                    .number("customDose")
                    .ok_or_else(|| Error::Calculation("customDose is required".into()))?,
                doses_per_day: inputs
                    .number("dosesPerDay")
                    .ok_or_else(|| Error::Calculation("dosesPerDay is required".into()))?,
                max_single_mg: None,
                max_daily_mg: None,
            },
            None => return Err(Error::Calculation(format!("unknown drug '{}'", drug))),
        };

        let uncapped = weight * regimen.mg_per_kg;
        let mut dose = uncapped;
        if let Some(max) = regimen.max_single_mg {
            dose = dose.min(max);
        }
        if let Some(max_daily) = regimen.max_daily_mg {
            dose = dose.min(max_daily / regimen.doses_per_day);
        }
        let dose = round1(dose);
        let capped = dose < round1(uncapped);

        let mut recommendations = vec![LocalizedText::tri(
            format!("每日 {} 次", regimen.doses_per_day),
            format!("Give {} times daily", regimen.doses_per_day),
            format!("1日 {} 回", regimen.doses_per_day),
        )];
        if capped {
            recommendations.push(LocalizedText::tri(
                "已達成人最大劑量上限",
                "Capped at the adult maximum dose",
                "成人最大量で上限設定",
            ));
        }
        recommendations.push(LocalizedText::tri(
            "請核對藥品仿單",
            "Verify against the prescribing information",
            "添付文書で確認してください",
        ));

        let mut result = CalculationResult::new(
            dose,
            "mg",
            LocalizedText::tri("單次劑量", "Single dose", "1回量"),
            LocalizedText::tri(
                format!("{} 單次劑量", drug),
                format!("{} single dose", drug),
                format!("{} 1回量", drug),
            ),
            "pediatric-dosing",
            config.version.clone(),
        );
        result.recommendations = Some(recommendations);
        result.breakdown = Some(vec![BreakdownEntry {
            label: LocalizedText::tri("每公斤劑量", "Dose per kg", "体重あたり用量"),
            value: regimen.mg_per_kg,
            unit: Some("mg/kg".into()),
        }]);
        result.details.insert("drug".into(), json!(drug));
        result
            .details
            .insert("dosesPerDay".into(), json!(regimen.doses_per_day));
        result
            .details
            .insert("dailyDoseMg".into(), json!(round1(dose * regimen.doses_per_day)));
        result.details.insert("capped".into(), json!(capped));
        Ok(result)
    }
}

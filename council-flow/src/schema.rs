//! Structured-output schemas in the Gemini schema dialect.
//!
//! Each council step owns exactly one schema. Closed domains (evidence
//! level, urgency, specialist role, interaction severity) are enumerated so
//! the oracle cannot invent values.

use serde_json::{Value, json};

use crate::models::{EvidenceLevel, Urgency};
use crate::specialists::SpecialistRole;

pub const INTERACTION_SEVERITIES: [&str; 4] = ["High", "Moderate", "Low", "None"];

fn string() -> Value {
    json!({ "type": "STRING" })
}

fn number() -> Value {
    json!({ "type": "NUMBER" })
}

fn string_array() -> Value {
    json!({ "type": "ARRAY", "items": string() })
}

fn enumeration(values: &[&str]) -> Value {
    json!({ "type": "STRING", "enum": values })
}

fn array_of(items: Value) -> Value {
    json!({ "type": "ARRAY", "items": items })
}

fn object(properties: Value) -> Value {
    json!({ "type": "OBJECT", "properties": properties })
}

fn object_requiring(properties: Value, required: &[&str]) -> Value {
    json!({ "type": "OBJECT", "properties": properties, "required": required })
}

fn critical_finding() -> Value {
    object(json!({
        "finding": string(),
        "implication": string(),
        "urgency": enumeration(&Urgency::VALUES),
    }))
}

fn diagnosis() -> Value {
    object(json!({
        "name": string(),
        "probability": number(),
        "justification": string(),
        "evidenceLevel": enumeration(&EvidenceLevel::VALUES),
        "reasoningChain": string_array(),
        "uzbekProtocolMatch": string(),
    }))
}

fn rejected_hypothesis() -> Value {
    object(json!({ "name": string(), "reason": string() }))
}

pub fn clarifying_questions() -> Value {
    string_array()
}

pub fn specialist_recommendations() -> Value {
    let roles: Vec<&str> = SpecialistRole::ALL.iter().map(|r| r.label()).collect();
    object_requiring(
        json!({
            "recommendations": array_of(object_requiring(
                json!({ "model": enumeration(&roles), "reason": string() }),
                &["model", "reason"],
            )),
        }),
        &["recommendations"],
    )
}

pub fn initial_diagnoses() -> Value {
    let mut item = diagnosis();
    item["required"] = json!(["name", "probability", "justification", "evidenceLevel", "reasoningChain"]);
    array_of(item)
}

pub fn prognosis() -> Value {
    object(json!({
        "shortTermPrognosis": string(),
        "longTermPrognosis": string(),
        "keyFactors": string_array(),
        "confidenceScore": number(),
    }))
}

pub fn final_report() -> Value {
    object_requiring(
        json!({
            "criticalFinding": critical_finding(),
            "consensusDiagnosis": array_of(diagnosis()),
            "rejectedHypotheses": array_of(rejected_hypothesis()),
            "recommendedTests": string_array(),
            "treatmentPlan": string_array(),
            "medicationRecommendations": array_of(object(json!({
                "name": string(),
                "dosage": string(),
                "notes": string(),
                "localAvailability": string(),
                "priceEstimate": string(),
            }))),
            "unexpectedFindings": string(),
            "uzbekistanLegislativeNote": string(),
            "imageAnalysis": object(json!({ "findings": string(), "correlation": string() })),
        }),
        &[
            "consensusDiagnosis",
            "rejectedHypotheses",
            "recommendedTests",
            "treatmentPlan",
            "medicationRecommendations",
            "unexpectedFindings",
        ],
    )
}

/// Reduced report for "what if" scenarios
pub fn scenario_report() -> Value {
    object(json!({
        "consensusDiagnosis": array_of(object(json!({
            "name": string(),
            "probability": number(),
            "justification": string(),
            "evidenceLevel": enumeration(&EvidenceLevel::VALUES),
        }))),
        "treatmentPlan": string_array(),
        "medicationRecommendations": array_of(object(json!({
            "name": string(),
            "dosage": string(),
            "notes": string(),
        }))),
        "rejectedHypotheses": array_of(rejected_hypothesis()),
        "recommendedTests": string_array(),
        "unexpectedFindings": string(),
        "uzbekistanLegislativeNote": string(),
    }))
}

/// Single primary diagnosis with a short plan, for the fast path
pub fn fast_doctor_report() -> Value {
    object_requiring(
        json!({
            "primaryDiagnosis": object(json!({
                "name": string(),
                "probability": number(),
                "justification": string(),
                "reasoningChain": string_array(),
                "uzbekProtocolMatch": string(),
            })),
            "treatmentPlan": string_array(),
            "medications": array_of(object(json!({
                "name": string(),
                "dosage": string(),
                "frequency": string(),
                "duration": string(),
                "timing": string(),
                "instructions": string(),
            }))),
            "recommendedTests": string_array(),
            "criticalFinding": critical_finding(),
        }),
        &["primaryDiagnosis", "treatmentPlan", "medications"],
    )
}

pub fn drug_interaction() -> Value {
    object(json!({
        "severity": enumeration(&INTERACTION_SEVERITIES),
        "description": string(),
        "clinicalSignificance": string(),
        "recommendations": string_array(),
    }))
}

pub fn drug_info() -> Value {
    object(json!({
        "name": string(),
        "activeIngredient": string(),
        "dosage": string(),
        "indications": string_array(),
        "contraindications": string_array(),
        "sideEffects": string_array(),
        "dosageInstructions": string(),
        "availabilityInUzbekistan": string(),
        "priceRange": string(),
    }))
}

pub fn ecg_report() -> Value {
    let fields = [
        "rhythm",
        "heartRate",
        "prInterval",
        "qrsDuration",
        "qtInterval",
        "axis",
        "morphology",
        "interpretation",
    ];
    let properties: serde_json::Map<String, Value> =
        fields.iter().map(|f| (f.to_string(), string())).collect();
    object_requiring(Value::Object(properties), &fields)
}

pub fn icd10_codes() -> Value {
    array_of(object_requiring(
        json!({ "code": string(), "description": string() }),
        &["code", "description"],
    ))
}

pub fn pediatric_dose() -> Value {
    object_requiring(
        json!({
            "drugName": string(),
            "dose": string(),
            "calculation": string(),
            "warnings": string_array(),
        }),
        &["drugName", "dose", "calculation", "warnings"],
    )
}

pub fn risk_score() -> Value {
    object_requiring(
        json!({ "name": string(), "score": string(), "interpretation": string() }),
        &["name", "score", "interpretation"],
    )
}

pub fn education_topics() -> Value {
    array_of(object_requiring(
        json!({ "title": string(), "content": string(), "language": string() }),
        &["title", "content"],
    ))
}

pub fn cme_topics() -> Value {
    array_of(object_requiring(
        json!({ "topic": string(), "relevance": string() }),
        &["topic", "relevance"],
    ))
}

pub fn dynamic_suggestions() -> Value {
    object(json!({
        "relatedSymptoms": string_array(),
        "diagnosticQuestions": string_array(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_report_enumerates_closed_sets() {
        let schema = final_report();
        let props = &schema["properties"];
        assert_eq!(
            props["criticalFinding"]["properties"]["urgency"]["enum"],
            json!(Urgency::VALUES)
        );
        assert_eq!(
            props["consensusDiagnosis"]["items"]["properties"]["evidenceLevel"]["enum"],
            json!(["High", "Moderate", "Low"])
        );
        assert!(schema["required"]
            .as_array()
            .unwrap()
            .contains(&json!("treatmentPlan")));
    }

    #[test]
    fn test_recommendation_schema_lists_every_role() {
        let schema = specialist_recommendations();
        let roles = &schema["properties"]["recommendations"]["items"]["properties"]["model"]["enum"];
        assert_eq!(roles.as_array().unwrap().len(), SpecialistRole::ALL.len());
    }
}

//! Defensive mapping from loosely-typed oracle JSON into fixed shapes.
//!
//! Missing or ill-typed arrays become `[]`, strings become `""`, numbers are
//! read from JSON numbers or numeric strings. Nothing here ever fails.

use serde_json::Value;

use crate::models::{
    CriticalFinding, Diagnosis, DiagnosisSource, EvidenceLevel, FinalReport, ImageAnalysis,
    Medication, PrognosisReport, RejectedHypothesis, Urgency,
};

/// Infallible conversion from oracle output
pub trait Coerce: Sized {
    fn coerce(value: &Value) -> Self;
}

pub fn string(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Like [`string`] but falls back to `default` when the field is blank
pub fn string_or(value: &Value, key: &str, default: &str) -> String {
    let s = string(value, key);
    if s.trim().is_empty() {
        default.to_string()
    } else {
        s
    }
}

pub fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .map(string_items)
        .unwrap_or_default()
}

/// Elements of a top-level array rendered as non-empty strings
pub fn string_items(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.trim().is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

pub fn number(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
}

pub fn list<T: Coerce>(value: &Value, key: &str) -> Vec<T> {
    match value.get(key) {
        Some(Value::Array(items)) => items.iter().filter(|i| i.is_object()).map(T::coerce).collect(),
        _ => Vec::new(),
    }
}

pub fn object<T: Coerce>(value: &Value, key: &str) -> Option<T> {
    value.get(key).filter(|v| v.is_object()).map(T::coerce)
}

impl Coerce for Diagnosis {
    fn coerce(value: &Value) -> Self {
        let source = match value.get("source").and_then(Value::as_str) {
            Some("user_injected") => DiagnosisSource::UserInjected,
            _ => DiagnosisSource::Model,
        };
        let protocol = string(value, "uzbekProtocolMatch");
        Diagnosis {
            name: string(value, "name"),
            probability: number(value, "probability").unwrap_or(0.0),
            justification: string(value, "justification"),
            evidence_level: EvidenceLevel::parse_lenient(&string(value, "evidenceLevel")),
            reasoning_chain: string_list(value, "reasoningChain"),
            uzbek_protocol_match: (!protocol.trim().is_empty()).then_some(protocol),
            source,
        }
    }
}

impl Coerce for RejectedHypothesis {
    fn coerce(value: &Value) -> Self {
        RejectedHypothesis {
            name: string(value, "name"),
            reason: string(value, "reason"),
        }
    }
}

impl Coerce for Medication {
    fn coerce(value: &Value) -> Self {
        Medication {
            name: string(value, "name"),
            dosage: string(value, "dosage"),
            frequency: string(value, "frequency"),
            timing: string(value, "timing"),
            duration: string(value, "duration"),
            instructions: string(value, "instructions"),
            notes: string(value, "notes"),
            local_availability: string(value, "localAvailability"),
            price_estimate: string(value, "priceEstimate"),
        }
    }
}

impl Coerce for CriticalFinding {
    fn coerce(value: &Value) -> Self {
        CriticalFinding {
            finding: string(value, "finding"),
            implication: string(value, "implication"),
            urgency: Urgency::parse_lenient(&string(value, "urgency")),
        }
    }
}

impl Coerce for ImageAnalysis {
    fn coerce(value: &Value) -> Self {
        ImageAnalysis {
            findings: string(value, "findings"),
            correlation: string(value, "correlation"),
        }
    }
}

impl Coerce for FinalReport {
    fn coerce(value: &Value) -> Self {
        let mut medications: Vec<Medication> = list(value, "medicationRecommendations");
        if medications.is_empty() {
            medications = list(value, "medications");
        }
        let mut report = FinalReport {
            consensus_diagnosis: list(value, "consensusDiagnosis"),
            rejected_hypotheses: list(value, "rejectedHypotheses"),
            treatment_plan: string_list(value, "treatmentPlan"),
            medication_recommendations: medications,
            recommended_tests: string_list(value, "recommendedTests"),
            critical_finding: object(value, "criticalFinding"),
            image_analysis: object(value, "imageAnalysis"),
            uzbekistan_legislative_note: string(value, "uzbekistanLegislativeNote"),
            unexpected_findings: string(value, "unexpectedFindings"),
        };
        report.sort_consensus();
        report
    }
}

impl Coerce for PrognosisReport {
    fn coerce(value: &Value) -> Self {
        PrognosisReport {
            short_term_prognosis: string(value, "shortTermPrognosis"),
            long_term_prognosis: string(value, "longTermPrognosis"),
            key_factors: string_list(value, "keyFactors"),
            confidence_score: number(value, "confidenceScore").unwrap_or(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_report() -> FinalReport {
        FinalReport {
            consensus_diagnosis: vec![
                Diagnosis {
                    name: "Acute coronary syndrome".to_string(),
                    probability: 70.0,
                    justification: "ST changes".to_string(),
                    evidence_level: EvidenceLevel::High,
                    reasoning_chain: vec!["pain".to_string(), "ECG".to_string()],
                    uzbek_protocol_match: Some("SSV ACS protocol".to_string()),
                    source: DiagnosisSource::Model,
                },
                Diagnosis {
                    name: "Pericarditis".to_string(),
                    probability: 20.0,
                    ..Default::default()
                },
            ],
            rejected_hypotheses: vec![RejectedHypothesis {
                name: "GERD".to_string(),
                reason: "no relation to meals".to_string(),
            }],
            treatment_plan: vec!["Aspirin loading".to_string()],
            medication_recommendations: vec![Medication {
                name: "Aspirin".to_string(),
                dosage: "300 mg".to_string(),
                ..Default::default()
            }],
            recommended_tests: vec!["Troponin".to_string()],
            critical_finding: Some(CriticalFinding {
                finding: "ST elevation".to_string(),
                implication: "STEMI".to_string(),
                urgency: Urgency::Immediate,
            }),
            image_analysis: None,
            uzbekistan_legislative_note: "SSV".to_string(),
            unexpected_findings: String::new(),
        }
    }

    #[test]
    fn test_report_survives_coercion_unchanged() {
        let report = sample_report();
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(FinalReport::coerce(&value), report);
    }

    #[test]
    fn test_missing_fields_materialize_as_defaults() {
        let report = FinalReport::coerce(&json!({
            "consensusDiagnosis": [{"name": "Migraine"}],
            "treatmentPlan": null,
            "recommendedTests": "not a list"
        }));

        assert_eq!(report.consensus_diagnosis.len(), 1);
        assert!(report.consensus_diagnosis[0].reasoning_chain.is_empty());
        assert_eq!(report.consensus_diagnosis[0].justification, "");
        assert!(report.treatment_plan.is_empty());
        assert!(report.recommended_tests.is_empty());
        assert!(report.rejected_hypotheses.is_empty());
        assert_eq!(report.unexpected_findings, "");
        assert!(report.critical_finding.is_none());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["treatmentPlan"], json!([]));
        assert_eq!(json["unexpectedFindings"], json!(""));
    }

    #[test]
    fn test_numbers_accepted_from_strings() {
        let diagnosis = Diagnosis::coerce(&json!({"name": "x", "probability": "65%"}));
        assert_eq!(diagnosis.probability, 65.0);
    }

    #[test]
    fn test_consensus_sorted_and_probabilities_untouched() {
        let report = FinalReport::coerce(&json!({
            "consensusDiagnosis": [
                {"name": "a", "probability": 40},
                {"name": "b", "probability": 90},
                {"name": "c", "probability": 60}
            ]
        }));
        let names: Vec<_> = report.consensus_diagnosis.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "a"]);
        let total: f64 = report.consensus_diagnosis.iter().map(|d| d.probability).sum();
        assert_eq!(total, 190.0);
    }
}

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::specialists::SpecialistRole;

/// Binary payloads travel as base64 text in JSON
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.trim()).map_err(D::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub mime_type: String,
    #[serde(with = "base64_bytes", alias = "base64Data")]
    pub data: Vec<u8>,
}

/// Clinician feedback on one diagnosis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosisFeedback {
    MoreLikely,
    LessLikely,
    NeedsReview,
    InjectedHypothesis,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PatientData {
    pub first_name: String,
    pub last_name: String,
    pub age: String,
    pub gender: String,
    pub complaints: String,
    pub history: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objective_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lab_results: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allergies: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_medications: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_history: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis_feedback: Option<HashMap<String, DiagnosisFeedback>>,
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or_default().is_empty()
}

impl PatientData {
    /// All non-binary fields as JSON, the form every prompt embeds
    pub fn text_snapshot(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.remove("attachments");
        }
        value
    }

    pub fn has_allergy_info(&self) -> bool {
        !is_blank(&self.allergies)
    }

    pub fn has_medication_info(&self) -> bool {
        !is_blank(&self.current_medications)
    }

    /// Returns an enriched copy with clarifying answers appended to `additional_info`
    pub fn with_clarifications(&self, answers: &[(String, String)]) -> PatientData {
        let mut enriched = self.clone();
        let block = answers
            .iter()
            .filter(|(_, answer)| !answer.trim().is_empty())
            .map(|(question, answer)| format!("Q: {}\nA: {}", question.trim(), answer.trim()))
            .collect::<Vec<_>>()
            .join("\n");
        if block.is_empty() {
            return enriched;
        }
        enriched.additional_info = Some(match &self.additional_info {
            Some(existing) if !existing.trim().is_empty() => format!("{}\n{}", existing, block),
            _ => block,
        });
        enriched
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EvidenceLevel {
    High,
    #[default]
    #[serde(alias = "Medium")]
    Moderate,
    Low,
}

impl EvidenceLevel {
    pub const VALUES: [&'static str; 3] = ["High", "Moderate", "Low"];

    pub fn parse_lenient(raw: &str) -> EvidenceLevel {
        match raw.trim().to_lowercase().as_str() {
            "high" | "a" | "yuqori" | "высокий" => EvidenceLevel::High,
            "low" | "c" | "past" | "низкий" => EvidenceLevel::Low,
            _ => EvidenceLevel::Moderate,
        }
    }
}

/// Who proposed a diagnosis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisSource {
    #[default]
    Model,
    UserInjected,
}

fn is_model_source(source: &DiagnosisSource) -> bool {
    *source == DiagnosisSource::Model
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Diagnosis {
    pub name: String,
    /// Independent likelihood estimate, not part of a normalized distribution
    pub probability: f64,
    pub justification: String,
    pub evidence_level: EvidenceLevel,
    pub reasoning_chain: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uzbek_protocol_match: Option<String>,
    #[serde(skip_serializing_if = "is_model_source")]
    pub source: DiagnosisSource,
}

impl Diagnosis {
    /// A clinician-supplied hypothesis, tagged apart from model output
    pub fn injected(name: impl Into<String>, justification: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            justification: justification.into(),
            source: DiagnosisSource::UserInjected,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub author: SpecialistRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_system_message: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_user_intervention: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_thinking: bool,
}

impl ChatMessage {
    pub fn chair(prefix: &str, content: impl Into<String>) -> Self {
        Self {
            id: format!("{}-{}", prefix, Uuid::new_v4()),
            author: SpecialistRole::Orchestrator,
            content: content.into(),
            is_system_message: true,
            is_user_intervention: false,
            is_thinking: false,
        }
    }

    pub fn specialist(role: SpecialistRole, content: impl Into<String>) -> Self {
        Self {
            id: format!("{}-{}", role.label(), Uuid::new_v4()),
            author: role,
            content: content.into(),
            is_system_message: false,
            is_user_intervention: false,
            is_thinking: false,
        }
    }

    pub fn user_answer(answer: &str) -> Self {
        Self {
            id: format!("user-{}", Uuid::new_v4()),
            author: SpecialistRole::Orchestrator,
            content: format!("User Answer: {}", answer),
            is_system_message: true,
            is_user_intervention: true,
            is_thinking: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Urgency {
    Immediate,
    #[default]
    High,
    Moderate,
    Low,
}

impl Urgency {
    pub const VALUES: [&'static str; 4] = ["Immediate", "High", "Moderate", "Low"];

    /// Unknown labels map to `High`
    pub fn parse_lenient(raw: &str) -> Urgency {
        match raw.trim().to_lowercase().as_str() {
            "immediate" | "critical" | "emergency" | "shoshilinch" | "срочно" => Urgency::Immediate,
            "moderate" | "medium" => Urgency::Moderate,
            "low" => Urgency::Low,
            _ => Urgency::High,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CriticalFinding {
    pub finding: String,
    pub implication: String,
    pub urgency: Urgency,
}

impl CriticalFinding {
    pub fn is_active(&self) -> bool {
        !self.finding.trim().is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RejectedHypothesis {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Medication {
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    pub timing: String,
    pub duration: String,
    pub instructions: String,
    pub notes: String,
    pub local_availability: String,
    pub price_estimate: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageAnalysis {
    pub findings: String,
    pub correlation: String,
}

/// Terminal artifact of a council session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FinalReport {
    pub consensus_diagnosis: Vec<Diagnosis>,
    pub rejected_hypotheses: Vec<RejectedHypothesis>,
    pub treatment_plan: Vec<String>,
    pub medication_recommendations: Vec<Medication>,
    pub recommended_tests: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critical_finding: Option<CriticalFinding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_analysis: Option<ImageAnalysis>,
    pub uzbekistan_legislative_note: String,
    pub unexpected_findings: String,
}

impl FinalReport {
    /// Orders consensus diagnoses by probability, highest first
    pub fn sort_consensus(&mut self) {
        self.consensus_diagnosis
            .sort_by(|a, b| b.probability.total_cmp(&a.probability));
    }

    pub fn active_critical_finding(&self) -> Option<&CriticalFinding> {
        self.critical_finding.as_ref().filter(|f| f.is_active())
    }

    /// Replaces only the fields present in `patch`
    pub fn apply_patch(&mut self, patch: ReportPatch) {
        if let Some(v) = patch.consensus_diagnosis {
            self.consensus_diagnosis = v;
            self.sort_consensus();
        }
        if let Some(v) = patch.rejected_hypotheses {
            self.rejected_hypotheses = v;
        }
        if let Some(v) = patch.treatment_plan {
            self.treatment_plan = v;
        }
        if let Some(v) = patch.medication_recommendations {
            self.medication_recommendations = v;
        }
        if let Some(v) = patch.recommended_tests {
            self.recommended_tests = v;
        }
        if let Some(v) = patch.critical_finding {
            self.critical_finding = Some(v);
        }
        if let Some(v) = patch.image_analysis {
            self.image_analysis = Some(v);
        }
        if let Some(v) = patch.uzbekistan_legislative_note {
            self.uzbekistan_legislative_note = v;
        }
        if let Some(v) = patch.unexpected_findings {
            self.unexpected_findings = v;
        }
    }
}

/// User-initiated partial edit of a finished report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportPatch {
    pub consensus_diagnosis: Option<Vec<Diagnosis>>,
    pub rejected_hypotheses: Option<Vec<RejectedHypothesis>>,
    pub treatment_plan: Option<Vec<String>>,
    pub medication_recommendations: Option<Vec<Medication>>,
    pub recommended_tests: Option<Vec<String>>,
    pub critical_finding: Option<CriticalFinding>,
    pub image_analysis: Option<ImageAnalysis>,
    pub uzbekistan_legislative_note: Option<String>,
    pub unexpected_findings: Option<String>,
}

/// Live prognosis snapshot, replaced after every debate round
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrognosisReport {
    pub short_term_prognosis: String,
    pub long_term_prognosis: String,
    pub key_factors: Vec<String>,
    pub confidence_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialistRecommendation {
    pub model: SpecialistRole,
    pub reason: String,
}

/// One confirmed panel seat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelMember {
    pub role: SpecialistRole,
    #[serde(default, alias = "backEndModel", skip_serializing_if = "Option::is_none")]
    pub backend_model: Option<String>,
}

impl PanelMember {
    pub fn new(role: SpecialistRole) -> Self {
        Self {
            role,
            backend_model: None,
        }
    }
}

/// Persisted outcome of one council session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub id: String,
    pub patient_data: PatientData,
    pub debate_history: Vec<ChatMessage>,
    pub final_report: FinalReport,
    #[serde(default)]
    pub selected_specialists: Vec<SpecialistRole>,
    pub created_at: DateTime<Utc>,
}

impl AnalysisRecord {
    pub fn new(
        patient_data: PatientData,
        debate_history: Vec<ChatMessage>,
        final_report: FinalReport,
        selected_specialists: Vec<SpecialistRole>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            patient_data,
            debate_history,
            final_report,
            selected_specialists,
            created_at: Utc::now(),
        }
    }

    /// Identity-free summary used for prior-case matching
    pub fn anonymize(&self) -> AnonymizedCase {
        let final_diagnosis = self
            .final_report
            .consensus_diagnosis
            .first()
            .map(|d| d.name.clone())
            .unwrap_or_default();

        let mut tags: Vec<String> = self
            .final_report
            .consensus_diagnosis
            .iter()
            .map(|d| d.name.to_lowercase())
            .collect();
        tags.extend(
            self.patient_data
                .complaints
                .to_lowercase()
                .split_whitespace()
                .filter(|w| w.chars().count() > 4)
                .map(str::to_string),
        );
        tags.dedup();

        let outcome = self
            .final_report
            .treatment_plan
            .first()
            .cloned()
            .unwrap_or_default();

        AnonymizedCase {
            tags,
            final_diagnosis,
            outcome,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymizedCase {
    pub tags: Vec<String>,
    pub final_diagnosis: String,
    pub outcome: String,
}

//! Stateless single-shot clinical utilities.
//!
//! Each tool builds one prompt, makes one gateway call (the drug tools may
//! make a second with a larger output ceiling) and coerces the answer into a
//! fixed shape. A malformed oracle answer yields empty fields, never an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::coerce::{self, Coerce};
use crate::council::CouncilSettings;
use crate::error::{CouncilError, Result};
use crate::gateway::{DeviceProfile, Gateway, GatewayRequest, Prompt};
use crate::language::Language;
use crate::models::{AnalysisRecord, Attachment, FinalReport, PatientData};
use crate::oracle::{ContentPart, GroundingSource};
use crate::prompts;
use crate::schema;

/// Complaints shorter than this get no suggestions
const MIN_SUGGESTION_COMPLAINT_CHARS: usize = 15;
const DRUG_TOOL_TOKENS: u32 = 640;
const DRUG_TOOL_RETRY_TOKENS: u32 = 960;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InteractionSeverity {
    High,
    Moderate,
    Low,
    #[default]
    None,
}

impl InteractionSeverity {
    /// Exact labels only; anything else is `None`
    pub fn parse(raw: &str) -> Self {
        match raw {
            "High" => InteractionSeverity::High,
            "Moderate" => InteractionSeverity::Moderate,
            "Low" => InteractionSeverity::Low,
            _ => InteractionSeverity::None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrugInteraction {
    pub severity: InteractionSeverity,
    pub description: String,
    pub clinical_significance: String,
    pub recommendations: Vec<String>,
}

impl Coerce for DrugInteraction {
    fn coerce(value: &Value) -> Self {
        DrugInteraction {
            severity: InteractionSeverity::parse(&coerce::string(value, "severity")),
            description: coerce::string(value, "description"),
            clinical_significance: coerce::string(value, "clinicalSignificance"),
            recommendations: coerce::string_list(value, "recommendations"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrugInfo {
    pub name: String,
    pub active_ingredient: String,
    pub dosage: String,
    pub indications: Vec<String>,
    pub contraindications: Vec<String>,
    pub side_effects: Vec<String>,
    pub dosage_instructions: String,
    pub availability_in_uzbekistan: String,
    pub price_range: String,
}

impl Coerce for DrugInfo {
    fn coerce(value: &Value) -> Self {
        DrugInfo {
            name: coerce::string(value, "name"),
            active_ingredient: coerce::string(value, "activeIngredient"),
            dosage: coerce::string(value, "dosage"),
            indications: coerce::string_list(value, "indications"),
            contraindications: coerce::string_list(value, "contraindications"),
            side_effects: coerce::string_list(value, "sideEffects"),
            dosage_instructions: coerce::string(value, "dosageInstructions"),
            availability_in_uzbekistan: coerce::string(value, "availabilityInUzbekistan"),
            price_range: coerce::string(value, "priceRange"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcgReport {
    pub rhythm: String,
    pub heart_rate: String,
    pub pr_interval: String,
    pub qrs_duration: String,
    pub qt_interval: String,
    pub axis: String,
    pub morphology: String,
    pub interpretation: String,
}

impl Coerce for EcgReport {
    fn coerce(value: &Value) -> Self {
        EcgReport {
            rhythm: coerce::string(value, "rhythm"),
            heart_rate: coerce::string(value, "heartRate"),
            pr_interval: coerce::string(value, "prInterval"),
            qrs_duration: coerce::string(value, "qrsDuration"),
            qt_interval: coerce::string(value, "qtInterval"),
            axis: coerce::string(value, "axis"),
            morphology: coerce::string(value, "morphology"),
            interpretation: coerce::string(value, "interpretation"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Icd10Code {
    pub code: String,
    pub description: String,
}

impl Coerce for Icd10Code {
    fn coerce(value: &Value) -> Self {
        Icd10Code {
            code: coerce::string(value, "code"),
            description: coerce::string(value, "description"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PediatricDose {
    pub drug_name: String,
    pub dose: String,
    pub calculation: String,
    pub warnings: Vec<String>,
}

impl Coerce for PediatricDose {
    fn coerce(value: &Value) -> Self {
        PediatricDose {
            drug_name: coerce::string(value, "drugName"),
            dose: coerce::string(value, "dose"),
            calculation: coerce::string(value, "calculation"),
            warnings: coerce::string_list(value, "warnings"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    pub name: String,
    pub score: String,
    pub interpretation: String,
}

impl Coerce for RiskScore {
    fn coerce(value: &Value) -> Self {
        RiskScore {
            name: coerce::string(value, "name"),
            score: coerce::string(value, "score"),
            interpretation: coerce::string(value, "interpretation"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EducationTopic {
    pub title: String,
    pub content: String,
    pub language: String,
}

impl Coerce for EducationTopic {
    fn coerce(value: &Value) -> Self {
        EducationTopic {
            title: coerce::string(value, "title"),
            content: coerce::string(value, "content"),
            language: coerce::string(value, "language"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CmeTopic {
    pub topic: String,
    pub relevance: String,
}

impl Coerce for CmeTopic {
    fn coerce(value: &Value) -> Self {
        CmeTopic {
            topic: coerce::string(value, "topic"),
            relevance: coerce::string(value, "relevance"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicSuggestions {
    pub related_symptoms: Vec<String>,
    pub diagnostic_questions: Vec<String>,
}

impl Coerce for DynamicSuggestions {
    fn coerce(value: &Value) -> Self {
        DynamicSuggestions {
            related_symptoms: coerce::string_list(value, "relatedSymptoms"),
            diagnostic_questions: coerce::string_list(value, "diagnosticQuestions"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuidelineSearchResult {
    pub summary: String,
    pub sources: Vec<GroundingSource>,
}

/// Top-level JSON array items coerced one by one
fn items<T: Coerce>(value: &Value) -> Vec<T> {
    match value {
        Value::Array(items) => items.iter().filter(|i| i.is_object()).map(T::coerce).collect(),
        _ => Vec::new(),
    }
}

fn drug_info_template() -> &'static str {
    r#"Return ONLY this JSON:
{
  "name": "Trade name",
  "activeIngredient": "Active substance",
  "dosage": "Dose (e.g. 500 mg, 1 tablet twice daily)",
  "indications": ["Main indications"],
  "contraindications": ["Main contraindications"],
  "sideEffects": ["Main side effects"],
  "dosageInstructions": "How and how often to take it, before or after meals",
  "availabilityInUzbekistan": "Prescription or OTC, available analogues",
  "priceRange": "Approximate price (UZS)"
}
UZBEKISTAN CONTEXT: give information only about medicines available in the country."#
}

#[derive(Clone)]
pub struct ClinicalTools {
    gateway: Gateway,
    settings: CouncilSettings,
    profile: Option<DeviceProfile>,
}

impl ClinicalTools {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            settings: CouncilSettings::default(),
            profile: None,
        }
    }

    pub fn with_settings(mut self, settings: CouncilSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Same tools, retrying per the caller's device instead of the gateway default
    pub fn for_profile(&self, profile: Option<DeviceProfile>) -> Self {
        Self {
            profile,
            ..self.clone()
        }
    }

    fn request(&self, prompt: impl Into<Prompt>, model: &str, language: Language) -> GatewayRequest {
        GatewayRequest::new(prompt, model)
            .with_system_instruction(prompts::system_instruction(language))
            .with_language(language)
            .with_profile(self.profile)
    }

    fn fast(&self, prompt: impl Into<Prompt>, language: Language) -> GatewayRequest {
        self.request(prompt, &self.settings.fast_model, language)
    }

    fn pro(&self, prompt: impl Into<Prompt>, language: Language) -> GatewayRequest {
        self.request(prompt, &self.settings.pro_model, language)
    }

    fn drug(&self, prompt: impl Into<Prompt>, language: Language) -> GatewayRequest {
        GatewayRequest::new(prompt, self.settings.drug_model.as_str())
            .with_system_instruction(prompts::drug_tool_instruction(language))
            .with_language(language)
            .with_profile(self.profile)
    }

    pub async fn structure_dictated_notes(&self, notes: &str, language: Language) -> Result<String> {
        let prompt = format!(
            "Take the following unstructured clinical notes and organize them into clear, standard medical sections (Complaints, History, Objective, etc.). Correct obvious transcription errors but preserve the original medical meaning. Notes: \"{}\". Output MUST be in {}.",
            notes,
            language.prompt_name()
        );
        self.gateway.text(self.fast(prompt, language)).await
    }

    /// Related symptoms and follow-up questions while a complaint is typed
    pub async fn get_dynamic_suggestions(
        &self,
        complaint: &str,
        language: Language,
    ) -> Result<DynamicSuggestions> {
        if complaint.trim().chars().count() < MIN_SUGGESTION_COMPLAINT_CHARS {
            return Ok(DynamicSuggestions::default());
        }
        let prompt = format!(
            "Based on the patient's complaints: \"{}\", suggest 3 related symptoms and 3 key diagnostic questions a doctor might ask. Return JSON {{ \"relatedSymptoms\": [\"...\"], \"diagnosticQuestions\": [\"...\"] }}. Output MUST be in {}.",
            complaint.trim(),
            language.prompt_name()
        );
        let value = self
            .gateway
            .structured(self.fast(prompt, language).with_schema(schema::dynamic_suggestions()))
            .await?;
        Ok(DynamicSuggestions::coerce(&value))
    }

    pub async fn analyze_ecg_image(&self, image: &Attachment, language: Language) -> Result<EcgReport> {
        let parts = vec![
            ContentPart::Text(format!(
                "Analyze the ECG image. Return a structured JSON report (rhythm, heartRate, prInterval, qrsDuration, qtInterval, axis, morphology, interpretation). Output Language: {}.",
                language.prompt_name()
            )),
            ContentPart::Inline {
                mime_type: image.mime_type.clone(),
                data: image.data.clone(),
            },
        ];
        let value = self
            .gateway
            .structured(self.fast(parts, language).with_schema(schema::ecg_report()))
            .await?;
        Ok(EcgReport::coerce(&value))
    }

    pub async fn get_icd10_codes(&self, diagnosis: &str, language: Language) -> Result<Vec<Icd10Code>> {
        let prompt = format!(
            "Provide ICD-10 codes for \"{}\". ICD-10 is used in Uzbekistan for official statistics and documentation. Return JSON array [{{code, description}}]. Output Language: {}.",
            diagnosis,
            language.prompt_name()
        );
        let value = self
            .gateway
            .structured(self.fast(prompt, language).with_schema(schema::icd10_codes()))
            .await?;
        Ok(items(&value))
    }

    /// Search-grounded guideline summary with its web citations
    pub async fn search_clinical_guidelines(
        &self,
        query: &str,
        language: Language,
    ) -> Result<GuidelineSearchResult> {
        let prompt = format!(
            "Summarize clinical guidelines for \"{}\". Prefer and prioritize: (1) national clinical protocols approved by the Uzbekistan Ministry of Health (SSV), (2) WHO and international guidelines adopted in Uzbekistan. Output Language: {}.",
            query,
            language.prompt_name()
        );
        let response = self.gateway.grounded(self.fast(prompt, language)).await?;
        let sources = response
            .grounding
            .into_iter()
            .map(|source| GroundingSource {
                title: if source.title.trim().is_empty() {
                    source.uri.clone()
                } else {
                    source.title
                },
                uri: source.uri,
            })
            .collect::<Vec<_>>();
        info!(sources = sources.len(), "Guideline search grounded");

        Ok(GuidelineSearchResult {
            summary: response.text,
            sources,
        })
    }

    pub async fn interpret_lab_value(&self, lab_value: &str, language: Language) -> Result<String> {
        let prompt = format!(
            "Interpret the lab value: \"{}\". Explain its clinical significance using Uzbekistan laboratory standards and SI units; when no unit is given assume the units customary in Uzbekistan. Output Language: {}.",
            lab_value,
            language.prompt_name()
        );
        self.gateway.text(self.pro(prompt, language)).await
    }

    pub async fn generate_patient_explanation(
        &self,
        clinical_text: &str,
        language: Language,
    ) -> Result<String> {
        let prompt = format!(
            "Translate the clinical text into simple patient language. Text: \"{}\". Output Language: {}.",
            clinical_text,
            language.prompt_name()
        );
        self.gateway.text(self.fast(prompt, language)).await
    }

    pub async fn expand_abbreviation(&self, abbreviation: &str, language: Language) -> Result<String> {
        let prompt = format!(
            "Expand the medical abbreviation \"{}\". Output Language: {}.",
            abbreviation,
            language.prompt_name()
        );
        self.gateway.text(self.fast(prompt, language)).await
    }

    pub async fn generate_discharge_summary(
        &self,
        patient: &PatientData,
        report: &FinalReport,
        language: Language,
    ) -> Result<String> {
        let prompt = format!(
            "Generate a Discharge Summary. Patient: {}. Report: {}. Output Language: {}.",
            patient.text_snapshot(),
            prompts::report_json(report),
            language.prompt_name()
        );
        self.gateway.text(self.pro(prompt, language)).await
    }

    pub async fn generate_insurance_pre_auth(
        &self,
        patient: &PatientData,
        report: &FinalReport,
        procedure: &str,
        language: Language,
    ) -> Result<String> {
        let prompt = format!(
            "Write an insurance pre-authorization letter for \"{}\". Patient: {}. Report: {}. Output Language: {}.",
            procedure,
            patient.text_snapshot(),
            prompts::report_json(report),
            language.prompt_name()
        );
        self.gateway.text(self.pro(prompt, language)).await
    }

    pub async fn calculate_pediatric_dose(
        &self,
        drug_name: &str,
        weight_kg: f64,
        language: Language,
    ) -> Result<PediatricDose> {
        if !(weight_kg.is_finite() && weight_kg > 0.0) {
            return Err(CouncilError::InvalidRequest(format!(
                "weight must be a positive number of kilograms, got {}",
                weight_kg
            )));
        }
        let prompt = format!(
            "Calculate the pediatric dose of {} for a child weighing {} kg. Return JSON {{drugName, dose, calculation, warnings}}. Output Language: {}.",
            drug_name,
            weight_kg,
            language.prompt_name()
        );
        let value = self
            .gateway
            .structured(self.pro(prompt, language).with_schema(schema::pediatric_dose()))
            .await?;
        Ok(PediatricDose::coerce(&value))
    }

    pub async fn calculate_risk_score(
        &self,
        score_type: &str,
        patient: &PatientData,
        language: Language,
    ) -> Result<RiskScore> {
        let prompt = format!(
            "Calculate the {} score. Patient: {}. Return JSON {{name, score, interpretation}}. Output Language: {}.",
            score_type,
            patient.text_snapshot(),
            language.prompt_name()
        );
        let value = self
            .gateway
            .structured(self.pro(prompt, language).with_schema(schema::risk_score()))
            .await?;
        Ok(RiskScore::coerce(&value))
    }

    pub async fn generate_patient_education_content(
        &self,
        report: &FinalReport,
        language: Language,
    ) -> Result<Vec<EducationTopic>> {
        let prompt = format!(
            "Create 3-4 patient education topics based on the report. Return JSON array [{{title, content}}]. Output Language: {}. Report: {}.",
            language.prompt_name(),
            prompts::report_json(report)
        );
        let value = self
            .gateway
            .structured(self.fast(prompt, language).with_schema(schema::education_topics()))
            .await?;
        Ok(items(&value))
    }

    /// Continuing-education topics drawn from the leading diagnosis of each past analysis
    pub async fn suggest_cme_topics(
        &self,
        history: &[AnalysisRecord],
        language: Language,
    ) -> Result<Vec<CmeTopic>> {
        if history.is_empty() {
            return Ok(Vec::new());
        }
        let diagnoses: Vec<Option<&str>> = history
            .iter()
            .map(|record| {
                record
                    .final_report
                    .consensus_diagnosis
                    .first()
                    .map(|d| d.name.as_str())
            })
            .collect();
        let prompt = format!(
            "Suggest 2-3 CME topics based on history. Return JSON array [{{topic, relevance}}]. LANGUAGE: {}. History: {}.",
            language.prompt_name(),
            serde_json::to_string(&diagnoses)?
        );
        let value = self
            .gateway
            .structured(self.fast(prompt, language).with_schema(schema::cme_topics()))
            .await?;
        Ok(items(&value))
    }

    pub async fn check_drug_interactions(
        &self,
        drugs: &[String],
        language: Language,
    ) -> Result<DrugInteraction> {
        let drugs: Vec<&str> = drugs.iter().map(|d| d.trim()).filter(|d| !d.is_empty()).collect();
        if drugs.is_empty() {
            return Err(CouncilError::InvalidRequest(
                "at least one drug is required".to_string(),
            ));
        }
        let prompt = format!(
            r#"Is it safe to take these medicines together? Medicines: {}.

Return ONLY this JSON:
{{
  "severity": "High | Moderate | Low | None",
  "description": "Short description of the interaction (2-3 sentences)",
  "clinicalSignificance": "Clinical significance for the patient (what to watch for)",
  "recommendations": [
    "Which dose to change or which drug to stop",
    "Monitoring advice (blood pressure, ECG, INR, etc.)",
    "When to seek urgent medical help"
  ]
}}

Output Language: {}."#,
            drugs.join(", "),
            language.prompt_name()
        );
        let value = self
            .gateway
            .structured_escalating(
                self.drug(prompt, language).with_schema(schema::drug_interaction()),
                DRUG_TOOL_TOKENS,
                DRUG_TOOL_RETRY_TOKENS,
            )
            .await?;
        Ok(DrugInteraction::coerce(&value))
    }

    pub async fn identify_drug_by_name(&self, drug_name: &str, language: Language) -> Result<DrugInfo> {
        let prompt = format!(
            "Medicine: \"{}\".\n\n{}\nOutput Language: {}.",
            drug_name.trim(),
            drug_info_template(),
            language.prompt_name()
        );
        let value = self
            .gateway
            .structured_escalating(
                self.drug(prompt, language).with_schema(schema::drug_info()),
                DRUG_TOOL_TOKENS,
                DRUG_TOOL_RETRY_TOKENS,
            )
            .await?;
        Ok(DrugInfo::coerce(&value))
    }

    pub async fn identify_drug_by_image(&self, image: &Attachment, language: Language) -> Result<DrugInfo> {
        let parts = vec![
            ContentPart::Text(format!(
                "Identify the medicine in the photo.\n\n{}\nOutput Language: {}.",
                drug_info_template(),
                language.prompt_name()
            )),
            ContentPart::Inline {
                mime_type: image.mime_type.clone(),
                data: image.data.clone(),
            },
        ];
        let value = self
            .gateway
            .structured_escalating(
                self.drug(parts, language).with_schema(schema::drug_info()),
                DRUG_TOOL_TOKENS,
                DRUG_TOOL_RETRY_TOKENS,
            )
            .await?;
        Ok(DrugInfo::coerce(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Diagnosis;
    use crate::oracle::OracleResponse;
    use crate::testing::{ScriptedOracle, reply};
    use std::sync::Arc;

    fn tools(oracle: Arc<ScriptedOracle>) -> ClinicalTools {
        ClinicalTools::new(Gateway::new(oracle))
    }

    #[tokio::test]
    async fn test_short_complaint_skips_oracle() {
        let oracle = ScriptedOracle::new(|_, _| reply("{}"));
        let suggestions = tools(oracle.clone())
            .get_dynamic_suggestions("  headache  ", Language::English)
            .await
            .unwrap();

        assert_eq!(suggestions, DynamicSuggestions::default());
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_history_has_no_cme_topics() {
        let oracle = ScriptedOracle::new(|_, _| reply("[]"));
        let topics = tools(oracle.clone())
            .suggest_cme_topics(&[], Language::English)
            .await
            .unwrap();

        assert!(topics.is_empty());
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_cme_topics_use_leading_diagnosis() {
        let oracle = ScriptedOracle::new(|req, _| {
            let prompt = req.prompt_text();
            assert!(prompt.contains("\"Angina\""));
            assert!(!prompt.contains("Reflux"));
            reply(r#"[{"topic": "Chest pain triage", "relevance": "recent cases"}, "noise"]"#)
        });
        let record = AnalysisRecord::new(
            PatientData::default(),
            Vec::new(),
            FinalReport {
                consensus_diagnosis: vec![
                    Diagnosis {
                        name: "Angina".to_string(),
                        ..Default::default()
                    },
                    Diagnosis {
                        name: "Reflux".to_string(),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            },
            Vec::new(),
        );

        let topics = tools(oracle)
            .suggest_cme_topics(&[record], Language::English)
            .await
            .unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].topic, "Chest pain triage");
    }

    #[tokio::test]
    async fn test_interaction_check_coerces_severity() {
        let oracle = ScriptedOracle::new(|req, _| {
            assert_eq!(req.model, "gemini-2.5-flash");
            assert_eq!(req.max_output_tokens, Some(DRUG_TOOL_TOKENS));
            assert!(req.system_instruction.as_deref().unwrap_or_default().contains("STRICT JSON"));
            reply(r#"{"severity": "Severe", "description": "Bleeding risk", "recommendations": ["Monitor INR", "", null]}"#)
        });
        let result = tools(oracle)
            .check_drug_interactions(
                &["Warfarin".to_string(), "Aspirin".to_string()],
                Language::English,
            )
            .await
            .unwrap();

        assert_eq!(result.severity, InteractionSeverity::None);
        assert_eq!(result.description, "Bleeding risk");
        assert_eq!(result.clinical_significance, "");
        assert_eq!(result.recommendations, vec!["Monitor INR"]);
    }

    #[tokio::test]
    async fn test_interaction_check_requires_a_drug() {
        let oracle = ScriptedOracle::new(|_, _| reply("{}"));
        let result = tools(oracle.clone())
            .check_drug_interactions(&[" ".to_string()], Language::English)
            .await;

        assert!(matches!(result, Err(CouncilError::InvalidRequest(_))));
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drug_lookup_escalates_after_truncation() {
        let oracle = ScriptedOracle::new(|req, _| match req.max_output_tokens {
            Some(DRUG_TOOL_RETRY_TOKENS) => reply(r#"{"name": "Nimesil", "sideEffects": ["Nausea"]}"#),
            _ => reply(r#"{"name": "Nime"#),
        });
        let info = tools(oracle.clone())
            .identify_drug_by_name("Nimesil", Language::UzbekLatin)
            .await
            .unwrap();

        assert_eq!(info.name, "Nimesil");
        assert_eq!(info.side_effects, vec!["Nausea"]);
        assert!(info.indications.is_empty());
        assert_eq!(
            oracle.requests().last().unwrap().max_output_tokens,
            Some(DRUG_TOOL_RETRY_TOKENS)
        );
    }

    #[tokio::test]
    async fn test_guideline_search_keeps_citations() {
        let oracle = ScriptedOracle::new(|req, _| {
            assert!(req.use_search);
            Ok(OracleResponse {
                text: "Start with lifestyle changes.".to_string(),
                grounding: vec![
                    GroundingSource {
                        title: "SSV hypertension protocol".to_string(),
                        uri: "https://example.uz/ah".to_string(),
                    },
                    GroundingSource {
                        title: String::new(),
                        uri: "https://who.int/ht".to_string(),
                    },
                ],
            })
        });
        let result = tools(oracle)
            .search_clinical_guidelines("arterial hypertension", Language::English)
            .await
            .unwrap();

        assert_eq!(result.summary, "Start with lifestyle changes.");
        assert_eq!(result.sources.len(), 2);
        assert_eq!(result.sources[1].title, "https://who.int/ht");
    }

    #[tokio::test]
    async fn test_ecg_image_sent_inline() {
        let oracle = ScriptedOracle::new(|req, _| {
            assert_eq!(req.inline_count(), 1);
            reply(r#"{"rhythm": "Sinus", "heartRate": 72}"#)
        });
        let image = Attachment {
            name: None,
            mime_type: "image/jpeg".to_string(),
            data: vec![0xff, 0xd8],
        };
        let report = tools(oracle)
            .analyze_ecg_image(&image, Language::English)
            .await
            .unwrap();

        assert_eq!(report.rhythm, "Sinus");
        assert_eq!(report.heart_rate, "72");
        assert_eq!(report.axis, "");
    }

    #[tokio::test]
    async fn test_pediatric_dose_rejects_bad_weight() {
        let oracle = ScriptedOracle::new(|_, _| reply("{}"));
        let result = tools(oracle.clone())
            .calculate_pediatric_dose("Paracetamol", 0.0, Language::English)
            .await;

        assert!(matches!(result, Err(CouncilError::InvalidRequest(_))));
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_icd10_lookup_coerces_items() {
        let oracle = ScriptedOracle::new(|_, _| {
            reply("```json\n[{\"code\": \"I20.8\", \"description\": \"Other angina\"}, {\"code\": 1}]\n```")
        });
        let codes = tools(oracle)
            .get_icd10_codes("angina", Language::English)
            .await
            .unwrap();

        assert_eq!(codes.len(), 2);
        assert_eq!(codes[0].code, "I20.8");
        assert_eq!(codes[1].code, "1");
        assert_eq!(codes[1].description, "");
    }
}

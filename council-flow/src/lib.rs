pub mod coerce;
pub mod config;
pub mod council;
pub mod error;
pub mod events;
pub mod gateway;
pub mod intervention;
pub mod language;
pub mod models;
pub mod oracle;
pub mod prompts;
pub mod retry;
pub mod schema;
pub mod specialists;
pub mod storage;
pub mod tools;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::{CouncilConfig, Provider};
pub use council::{Council, CouncilSettings, DebateOutcome, DebateState, validate_patient_data};
pub use error::{CouncilError, Result};
pub use events::{ProgressCallback, ProgressUpdate};
pub use gateway::{DeviceProfile, Gateway, GatewayRequest};
pub use intervention::{InterventionSlot, UserIntervention};
pub use language::Language;
pub use models::{
    AnalysisRecord, Attachment, ChatMessage, Diagnosis, FinalReport, PanelMember, PatientData,
    PrognosisReport, ReportPatch, SpecialistRecommendation,
};
pub use oracle::{GeminiOracle, Oracle, OracleRequest, OracleResponse};
#[cfg(feature = "rig")]
pub use oracle::RigOracle;
pub use retry::{RetryOptions, retry};
pub use specialists::SpecialistRole;
pub use storage::{FallbackBackend, LocalBackend, PersistenceBackend, RemoteBackend};
pub use tools::ClinicalTools;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedOracle, reply};
    use std::sync::{Arc, Mutex};

    fn patient() -> PatientData {
        PatientData {
            age: "58".to_string(),
            gender: "male".to_string(),
            complaints: "Pressing chest pain on exertion".to_string(),
            allergies: Some("none".to_string()),
            current_medications: Some("none".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_consultation_end_to_end() {
        let oracle = ScriptedOracle::new(|req, _| {
            let Some(schema) = &req.response_schema else {
                return reply("Noted.");
            };
            if schema["properties"].get("consensusDiagnosis").is_some() {
                return reply(r#"{"consensusDiagnosis": [{"name": "Stable angina", "probability": 80}],
                    "rejectedHypotheses": [], "recommendedTests": ["ECG"], "treatmentPlan": [],
                    "medicationRecommendations": [], "unexpectedFindings": ""}"#);
            }
            if schema["properties"].get("shortTermPrognosis").is_some() {
                return reply(r#"{"shortTermPrognosis": "Good", "confidenceScore": 70}"#);
            }
            reply(r#"[{"name": "Stable angina", "probability": 70}]"#)
        });
        let cases: Arc<dyn PersistenceBackend> = Arc::new(LocalBackend::new());
        let council = Council::new(Gateway::new(oracle), cases.clone());

        let diagnoses = council
            .generate_initial_diagnoses(&patient(), Language::English)
            .await
            .unwrap();
        assert_eq!(diagnoses[0].name, "Stable angina");

        let panel: Vec<PanelMember> = [SpecialistRole::Cardiologist, SpecialistRole::Pulmonologist]
            .into_iter()
            .map(PanelMember::new)
            .collect();
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let sink = kinds.clone();
        let on_progress = move |update: ProgressUpdate| sink.lock().unwrap().push(update.kind());
        let slot = InterventionSlot::new();

        let outcome = council
            .run_council_debate(&patient(), &diagnoses, &panel, &on_progress, &slot, Language::English)
            .await
            .unwrap();
        assert_eq!(outcome.report.recommended_tests, vec!["ECG"]);
        assert_eq!(kinds.lock().unwrap().last(), Some(&"report"));

        let roles = panel.iter().map(|m| m.role).collect();
        let record = AnalysisRecord::new(patient(), outcome.messages, outcome.report, roles);
        cases.save_analysis(record.clone()).await.unwrap();
        let stored = cases.list_analyses().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, record.id);
    }
}

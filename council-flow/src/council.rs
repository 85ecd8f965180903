//! The medical council.
//!
//! A session moves strictly forward through clarifying questions, panel
//! recommendation, the initial differential, a fixed number of debate rounds
//! and a final synthesis. Every oracle call is awaited in turn; the only
//! suspension besides oracle calls is the wait for a clinician's answer when
//! the chair asks for information only a human can supply.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::coerce::{self, Coerce};
use crate::error::{CouncilError, Result};
use crate::events::{ProgressCallback, ProgressUpdate};
use crate::gateway::{DeviceProfile, Gateway, GatewayRequest, Prompt};
use crate::intervention::UserIntervention;
use crate::language::Language;
use crate::models::{
    AnonymizedCase, ChatMessage, Diagnosis, DiagnosisSource, EvidenceLevel, FinalReport,
    Medication, PanelMember, PatientData, PrognosisReport, SpecialistRecommendation,
};
use crate::prompts;
use crate::schema;
use crate::specialists::SpecialistRole;
use crate::storage::PersistenceBackend;

pub const DEBATE_ROUNDS: usize = 3;

/// Messages from the end of the log that feed each prognosis update
const PROGNOSIS_WINDOW: usize = 5;
const MAX_CLARIFYING_QUESTIONS: usize = 5;
const FAST_DOCTOR_TOKENS: u32 = 1024;
const FAST_DOCTOR_RETRY_TOKENS: u32 = 1280;

const ALLERGY_TERMS: &[&str] = &["allerg", "аллерг"];
const MEDICATION_TERMS: &[&str] = &[
    "medication",
    "medicine",
    "drugs",
    "dori",
    "дори",
    "препарат",
    "лекарств",
];

/// Model selection and pacing for a council
#[derive(Debug, Clone, PartialEq)]
pub struct CouncilSettings {
    /// Chair turns, clarifying questions, panel selection, prognosis
    pub fast_model: String,
    /// Specialist turns, initial differential, synthesis
    pub pro_model: String,
    pub fast_doctor_model: String,
    pub drug_model: String,
    pub debate_rounds: usize,
    pub intervention_poll: Duration,
}

impl Default for CouncilSettings {
    fn default() -> Self {
        Self {
            fast_model: "gemini-3-flash-preview".to_string(),
            pro_model: "gemini-3-pro-preview".to_string(),
            fast_doctor_model: "gemini-2.5-flash-lite".to_string(),
            drug_model: "gemini-2.5-flash".to_string(),
            debate_rounds: DEBATE_ROUNDS,
            intervention_poll: Duration::from_secs(1),
        }
    }
}

/// Everything a finished debate produced
#[derive(Debug, Clone, PartialEq)]
pub struct DebateOutcome {
    pub messages: Vec<ChatMessage>,
    pub report: FinalReport,
    pub prognosis: Option<PrognosisReport>,
}

/// Rejects input no council step can work with
pub fn validate_patient_data(patient: &PatientData) -> Result<()> {
    if patient.complaints.trim().is_empty() {
        return Err(CouncilError::InsufficientData(
            "complaints must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// True when a question only asks for fields the patient record already has
fn asks_for_known_field(question: &str, patient: &PatientData) -> bool {
    let lowered = question.to_lowercase();
    let mentions = |terms: &[&str]| terms.iter().any(|t| lowered.contains(t));
    let asks_allergy = mentions(ALLERGY_TERMS);
    let asks_medication = mentions(MEDICATION_TERMS);

    (asks_allergy || asks_medication)
        && (!asks_allergy || patient.has_allergy_info())
        && (!asks_medication || patient.has_medication_info())
}

/// Debate progress between steps. Serializable so a workflow can park a
/// debate while the chair waits for the clinician.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebateState {
    /// Chair topic for the next round
    pub topic: String,
    /// Rounds fully completed
    pub round: usize,
    pub messages: Vec<ChatMessage>,
    pub prognosis: Option<PrognosisReport>,
    /// Question the current round is blocked on
    pub pending_question: Option<String>,
    pub cases: Vec<AnonymizedCase>,
}

impl DebateState {
    fn push(&mut self, message: ChatMessage, on_progress: ProgressCallback<'_>) {
        on_progress(ProgressUpdate::Message {
            message: message.clone(),
        });
        self.messages.push(message);
    }

    fn tail(&self, len: usize) -> &[ChatMessage] {
        &self.messages[self.messages.len().saturating_sub(len)..]
    }

    pub fn is_waiting(&self) -> bool {
        self.pending_question.is_some()
    }
}

#[derive(Clone)]
pub struct Council {
    gateway: Gateway,
    cases: Arc<dyn PersistenceBackend>,
    settings: CouncilSettings,
    profile: Option<DeviceProfile>,
}

impl Council {
    pub fn new(gateway: Gateway, cases: Arc<dyn PersistenceBackend>) -> Self {
        Self {
            gateway,
            cases,
            settings: CouncilSettings::default(),
            profile: None,
        }
    }

    pub fn with_settings(mut self, settings: CouncilSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Same council, retrying per the caller's device instead of the gateway default
    pub fn for_profile(&self, profile: Option<DeviceProfile>) -> Self {
        Self {
            profile,
            ..self.clone()
        }
    }

    pub fn settings(&self) -> &CouncilSettings {
        &self.settings
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    fn request(&self, prompt: impl Into<Prompt>, model: &str, language: Language) -> GatewayRequest {
        GatewayRequest::new(prompt, model)
            .with_system_instruction(prompts::system_instruction(language))
            .with_language(language)
            .with_profile(self.profile)
    }

    async fn prior_cases(&self) -> Vec<AnonymizedCase> {
        match self.cases.anonymized_cases().await {
            Ok(cases) => cases,
            Err(e) => {
                warn!(error = %e, "Prior cases unavailable, continuing without them");
                Vec::new()
            }
        }
    }

    pub async fn generate_clarifying_questions(
        &self,
        patient: &PatientData,
        language: Language,
    ) -> Result<Vec<String>> {
        validate_patient_data(patient)?;
        let cases = self.prior_cases().await;
        let prompt =
            prompts::build_multimodal_prompt(&prompts::clarifying_questions(language), patient, &cases);

        let value = self
            .gateway
            .structured(
                self.request(prompt, &self.settings.fast_model, language)
                    .with_schema(schema::clarifying_questions()),
            )
            .await?;

        let questions: Vec<String> = coerce::string_items(&value)
            .into_iter()
            .filter(|q| !asks_for_known_field(q, patient))
            .take(MAX_CLARIFYING_QUESTIONS)
            .collect();
        info!(count = questions.len(), "Clarifying questions generated");
        Ok(questions)
    }

    /// Advisory panel; unknown roles and the chair are dropped
    pub async fn recommend_specialists(
        &self,
        patient: &PatientData,
        language: Language,
    ) -> Result<Vec<SpecialistRecommendation>> {
        validate_patient_data(patient)?;
        let cases = self.prior_cases().await;
        let prompt =
            prompts::build_multimodal_prompt(&prompts::recommend_specialists(language), patient, &cases);

        let value = self
            .gateway
            .structured(
                self.request(prompt, &self.settings.fast_model, language)
                    .with_schema(schema::specialist_recommendations()),
            )
            .await?;

        let mut recommendations: Vec<SpecialistRecommendation> = Vec::new();
        let items = value
            .get("recommendations")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for item in &items {
            let label = coerce::string(item, "model");
            match label.parse::<SpecialistRole>() {
                Ok(role) if !role.is_chair() => {
                    if recommendations.iter().all(|r| r.model != role) {
                        recommendations.push(SpecialistRecommendation {
                            model: role,
                            reason: coerce::string(item, "reason"),
                        });
                    }
                }
                _ => warn!(model = %label, "Skipping unusable specialist recommendation"),
            }
        }

        info!(count = recommendations.len(), "Specialist panel recommended");
        Ok(recommendations)
    }

    /// Ranked differential; probabilities are independent scores and are
    /// neither normalized nor clamped
    pub async fn generate_initial_diagnoses(
        &self,
        patient: &PatientData,
        language: Language,
    ) -> Result<Vec<Diagnosis>> {
        validate_patient_data(patient)?;
        let cases = self.prior_cases().await;
        let prompt =
            prompts::build_multimodal_prompt(&prompts::initial_diagnoses(language), patient, &cases);

        let value = self
            .gateway
            .structured(
                self.request(prompt, &self.settings.pro_model, language)
                    .with_schema(schema::initial_diagnoses()),
            )
            .await?;

        let mut diagnoses: Vec<Diagnosis> = match &value {
            Value::Array(items) => items
                .iter()
                .filter(|item| item.is_object())
                .map(Diagnosis::coerce)
                .collect(),
            other => coerce::list(other, "diagnoses"),
        };
        diagnoses.retain(|d| !d.name.trim().is_empty());
        diagnoses.sort_by(|a, b| b.probability.total_cmp(&a.probability));

        info!(count = diagnoses.len(), "Initial differential generated");
        Ok(diagnoses)
    }

    /// Runs the full debate and synthesis for a confirmed panel.
    ///
    /// Events reach `on_progress` one at a time in emission order. When a
    /// chair topic carries a user-question marker the call waits, with no
    /// timeout, until `intervention` yields an answer. Specialist and
    /// prognosis failures are logged and skipped; a failed chair or synthesis
    /// call emits an `error` event and ends the session.
    pub async fn run_council_debate(
        &self,
        patient: &PatientData,
        diagnoses: &[Diagnosis],
        panel: &[PanelMember],
        on_progress: ProgressCallback<'_>,
        intervention: &dyn UserIntervention,
        language: Language,
    ) -> Result<DebateOutcome> {
        let mut state = self
            .open_debate(patient, diagnoses, panel, on_progress, language)
            .await?;

        while !self.debate_finished(&state) {
            let answer = match self.begin_round(&mut state, on_progress, language) {
                Some(_) => Some(self.await_user_answer(intervention).await),
                None => None,
            };
            self.finish_round(&mut state, patient, panel, answer.as_deref(), on_progress, language)
                .await?;
        }

        self.synthesize(state, patient, on_progress, language).await
    }

    /// Chair introduction and opening topic
    pub async fn open_debate(
        &self,
        patient: &PatientData,
        diagnoses: &[Diagnosis],
        panel: &[PanelMember],
        on_progress: ProgressCallback<'_>,
        language: Language,
    ) -> Result<DebateState> {
        validate_patient_data(patient)?;
        info!(panel_size = panel.len(), language = language.code(), "Council debate starting");

        on_progress(ProgressUpdate::Status {
            message: language.council_gathering().to_string(),
        });
        let mut state = DebateState {
            cases: self.prior_cases().await,
            ..Default::default()
        };

        let intro = self
            .chair_text(prompts::chair_intro(language), language, on_progress)
            .await?;
        state.push(ChatMessage::chair("sys-intro", intro), on_progress);

        state.topic = self
            .chair_text(prompts::opening_topic(diagnoses, language), language, on_progress)
            .await?;
        Ok(state)
    }

    pub fn debate_finished(&self, state: &DebateState) -> bool {
        state.round >= self.settings.debate_rounds
    }

    /// Opens the next round by posting the chair topic. When the topic asks
    /// the clinician something, posts the question instead and returns it;
    /// the round then needs an answer in `finish_round`.
    pub fn begin_round(
        &self,
        state: &mut DebateState,
        on_progress: ProgressCallback<'_>,
        language: Language,
    ) -> Option<String> {
        let round = state.round + 1;
        on_progress(ProgressUpdate::Status {
            message: language.round_starting(round),
        });
        let prefix = format!("sys-round{}", round);

        match prompts::extract_user_question(&state.topic) {
            Some(question) => {
                state.push(ChatMessage::chair(&prefix, question.clone()), on_progress);
                info!(round, "Council is waiting for the clinician");
                on_progress(ProgressUpdate::UserQuestion {
                    question: question.clone(),
                });
                state.pending_question = Some(question.clone());
                Some(question)
            }
            None => {
                let topic = state.topic.clone();
                state.push(ChatMessage::chair(&prefix, topic), on_progress);
                None
            }
        }
    }

    /// Specialist turns, prognosis update and, unless this was the last
    /// round, the chair's next topic
    pub async fn finish_round(
        &self,
        state: &mut DebateState,
        patient: &PatientData,
        panel: &[PanelMember],
        answer: Option<&str>,
        on_progress: ProgressCallback<'_>,
        language: Language,
    ) -> Result<()> {
        if state.is_waiting() {
            let answer = answer.ok_or_else(|| {
                CouncilError::InvalidRequest("the council is waiting for an answer".to_string())
            })?;
            state.push(ChatMessage::user_answer(answer), on_progress);
            state.pending_question = None;
        }
        let round = state.round + 1;

        for member in panel {
            on_progress(ProgressUpdate::Thinking { model: member.role });
            let turn = prompts::specialist_turn(member.role, &state.topic, &state.messages, language);
            let prompt = prompts::build_multimodal_prompt(&turn, patient, &state.cases);
            let model = member
                .backend_model
                .as_deref()
                .unwrap_or(&self.settings.pro_model);

            match self.gateway.text(self.request(prompt, model, language)).await {
                Ok(reply) => state.push(ChatMessage::specialist(member.role, reply), on_progress),
                Err(e) => warn!(
                    specialist = %member.role,
                    round,
                    error = %e,
                    "Specialist turn failed, continuing without it"
                ),
            }
        }

        let prognosis_prompt =
            prompts::prognosis_update(state.tail(PROGNOSIS_WINDOW), patient, language);
        match self
            .gateway
            .structured(
                self.request(prognosis_prompt, &self.settings.fast_model, language)
                    .with_schema(schema::prognosis()),
            )
            .await
        {
            Ok(value) => {
                let update = PrognosisReport::coerce(&value);
                on_progress(ProgressUpdate::PrognosisUpdate {
                    data: update.clone(),
                });
                state.prognosis = Some(update);
            }
            Err(e) => warn!(round, error = %e, "Prognosis update failed"),
        }

        state.round = round;
        if !self.debate_finished(state) {
            state.topic = self
                .chair_text(
                    prompts::round_summary(&state.messages, language),
                    language,
                    on_progress,
                )
                .await?;
        }
        Ok(())
    }

    /// Final report from the whole debate log
    pub async fn synthesize(
        &self,
        state: DebateState,
        patient: &PatientData,
        on_progress: ProgressCallback<'_>,
        language: Language,
    ) -> Result<DebateOutcome> {
        on_progress(ProgressUpdate::Status {
            message: language.preparing_report().to_string(),
        });
        let synthesis = prompts::build_multimodal_prompt(
            &prompts::final_report(&state.messages, language),
            patient,
            &state.cases,
        );
        let value = match self
            .gateway
            .structured(
                self.request(synthesis, &self.settings.pro_model, language)
                    .with_schema(schema::final_report()),
            )
            .await
        {
            Ok(value) => value,
            Err(e) => {
                on_progress(ProgressUpdate::Error {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let report = FinalReport::coerce(&value);
        if let Some(finding) = report.active_critical_finding() {
            warn!(finding = %finding.finding, "Critical finding reported by the council");
            on_progress(ProgressUpdate::CriticalFinding {
                data: finding.clone(),
            });
        }
        on_progress(ProgressUpdate::Report {
            data: report.clone(),
        });
        info!(
            messages = state.messages.len(),
            diagnoses = report.consensus_diagnosis.len(),
            "Council debate finished"
        );

        Ok(DebateOutcome {
            messages: state.messages,
            report,
            prognosis: state.prognosis,
        })
    }

    async fn chair_text(
        &self,
        prompt: String,
        language: Language,
        on_progress: ProgressCallback<'_>,
    ) -> Result<String> {
        match self
            .gateway
            .text(self.request(prompt, &self.settings.fast_model, language))
            .await
        {
            Ok(text) => Ok(text),
            Err(e) => {
                on_progress(ProgressUpdate::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn await_user_answer(&self, intervention: &dyn UserIntervention) -> String {
        loop {
            tokio::time::sleep(self.settings.intervention_poll).await;
            if let Some(answer) = intervention.get() {
                intervention.clear();
                return answer;
            }
        }
    }

    /// Chair reply to a free-form clinician remark after the debate
    pub async fn continue_debate(
        &self,
        patient: &PatientData,
        history: &[ChatMessage],
        remark: &str,
        language: Language,
    ) -> Result<ChatMessage> {
        if remark.trim().is_empty() {
            return Err(CouncilError::InvalidRequest(
                "intervention text must not be empty".to_string(),
            ));
        }
        let cases = self.prior_cases().await;
        let prompt = prompts::build_multimodal_prompt(
            &prompts::continue_debate(remark, history, language),
            patient,
            &cases,
        );
        let reply = self
            .gateway
            .text(self.request(prompt, &self.settings.fast_model, language))
            .await?;
        Ok(ChatMessage::chair("sys-continue", reply))
    }

    /// "What if" report over an existing debate
    pub async fn run_scenario_analysis(
        &self,
        patient: &PatientData,
        history: &[ChatMessage],
        scenario: &str,
        language: Language,
    ) -> Result<FinalReport> {
        if scenario.trim().is_empty() {
            return Err(CouncilError::InvalidRequest(
                "scenario must not be empty".to_string(),
            ));
        }
        let cases = self.prior_cases().await;
        let prompt = prompts::build_multimodal_prompt(
            &prompts::scenario_analysis(scenario, history, language),
            patient,
            &cases,
        );
        let value = self
            .gateway
            .structured(
                self.request(prompt, &self.settings.pro_model, language)
                    .with_schema(schema::scenario_report()),
            )
            .await?;
        Ok(FinalReport::coerce(&value))
    }

    pub async fn explain_rationale(
        &self,
        message: &ChatMessage,
        patient: &PatientData,
        language: Language,
    ) -> Result<String> {
        self.gateway
            .text(self.request(
                prompts::explain_rationale(message, patient, language),
                &self.settings.pro_model,
                language,
            ))
            .await
    }

    /// Low-latency single-doctor report.
    ///
    /// The first attempt runs with a tight output ceiling; a truncated or
    /// unparseable answer is retried once with a larger one.
    pub async fn generate_fast_doctor_consultation(
        &self,
        patient: &PatientData,
        language: Language,
    ) -> Result<FinalReport> {
        validate_patient_data(patient)?;
        let request = GatewayRequest::new(
            prompts::build_fast_doctor_prompt(&prompts::fast_doctor(language), patient),
            self.settings.fast_doctor_model.as_str(),
        )
        .with_schema(schema::fast_doctor_report())
        .with_system_instruction(prompts::fast_doctor_instruction(language))
        .with_language(language)
        .with_profile(self.profile);

        let value = self
            .gateway
            .structured_escalating(request, FAST_DOCTOR_TOKENS, FAST_DOCTOR_RETRY_TOKENS)
            .await?;
        Ok(fast_doctor_report(&value))
    }
}

/// Maps the single-diagnosis fast schema onto a full report
fn fast_doctor_report(value: &Value) -> FinalReport {
    let consensus_diagnosis = value
        .get("primaryDiagnosis")
        .filter(|d| d.is_object())
        .map(|d| {
            vec![Diagnosis {
                name: coerce::string_or(d, "name", "Tashxis"),
                probability: coerce::number(d, "probability").unwrap_or(85.0),
                justification: coerce::string(d, "justification"),
                evidence_level: EvidenceLevel::High,
                reasoning_chain: coerce::string_list(d, "reasoningChain"),
                uzbek_protocol_match: Some(coerce::string_or(
                    d,
                    "uzbekProtocolMatch",
                    "SSV protokoliga muvofiq",
                )),
                source: DiagnosisSource::Model,
            }]
        })
        .unwrap_or_default();

    let medication_recommendations = coerce::list::<Medication>(value, "medications")
        .into_iter()
        .map(|medication| Medication {
            notes: String::new(),
            local_availability: "O'zbekistonda mavjud".to_string(),
            price_estimate: String::new(),
            ..medication
        })
        .collect();

    FinalReport {
        consensus_diagnosis,
        rejected_hypotheses: Vec::new(),
        treatment_plan: coerce::string_list(value, "treatmentPlan"),
        medication_recommendations,
        recommended_tests: coerce::string_list(value, "recommendedTests"),
        critical_finding: coerce::object(value, "criticalFinding"),
        image_analysis: None,
        uzbekistan_legislative_note: "SSV klinik protokollariga muvofiq".to_string(),
        unexpected_findings: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intervention::InterventionSlot;
    use crate::models::Urgency;
    use crate::oracle::{OracleRequest, OracleResponse};
    use crate::storage::LocalBackend;
    use crate::testing::{ScriptedOracle, fail, reply};
    use std::sync::Mutex;

    const REPORT: &str = r#"{
        "consensusDiagnosis": [
            {"name": "Stable angina", "probability": 55, "evidenceLevel": "Moderate"},
            {"name": "Acute coronary syndrome", "probability": 75, "evidenceLevel": "High"}
        ],
        "treatmentPlan": ["ECG within 10 minutes"],
        "recommendedTests": ["Troponin"]
    }"#;

    const REPORT_WITH_FINDING: &str = r#"{
        "criticalFinding": {"finding": "ST elevation", "implication": "STEMI", "urgency": "Immediate"},
        "consensusDiagnosis": [{"name": "STEMI", "probability": 90}],
        "treatmentPlan": ["Cath lab activation"]
    }"#;

    fn patient() -> PatientData {
        PatientData {
            age: "54".to_string(),
            gender: "male".to_string(),
            complaints: "chest pain radiating to left arm".to_string(),
            ..Default::default()
        }
    }

    fn panel() -> Vec<PanelMember> {
        vec![
            PanelMember::new(SpecialistRole::Cardiologist),
            PanelMember::new(SpecialistRole::Neurologist),
            PanelMember::new(SpecialistRole::Pulmonologist),
        ]
    }

    fn council(oracle: Arc<ScriptedOracle>) -> Council {
        Council::new(Gateway::new(oracle), Arc::new(LocalBackend::new()))
    }

    /// Answers each debate step by the phrase its prompt carries
    fn debate_step(request: &OracleRequest, report: &str, summary: &str) -> Result<OracleResponse> {
        let prompt = request.prompt_text();
        if prompt.contains("Create the Final Report") {
            reply(report)
        } else if prompt.contains("Summarize the round") {
            reply(summary)
        } else if prompt.contains("update prognosis") {
            reply(r#"{"shortTermPrognosis": "guarded", "keyFactors": ["age"], "confidenceScore": 70}"#)
        } else if prompt.contains("Answer the Chair's question") {
            let role = prompt.lines().next().unwrap_or_default().to_string();
            reply(format!("Opinion. {}", role))
        } else if prompt.contains("Summarize the initial state") {
            reply("Opening topic: evaluate red flags")
        } else if prompt.contains("intro message for the Council Chair") {
            reply("The council is open")
        } else {
            fail("unexpected prompt")
        }
    }

    fn authors(events: &[ProgressUpdate]) -> Vec<SpecialistRole> {
        events
            .iter()
            .filter_map(|e| match e {
                ProgressUpdate::Message { message } => Some(message.author),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_debate_messages_follow_round_and_panel_order() {
        let oracle = ScriptedOracle::new(|req, _| debate_step(req, REPORT, "Next question for the panel"));
        let council = council(oracle.clone());
        let slot = InterventionSlot::new();
        let events = Mutex::new(Vec::new());
        let on_progress = |e: ProgressUpdate| events.lock().unwrap().push(e);

        let outcome = council
            .run_council_debate(&patient(), &[], &panel(), &on_progress, &slot, Language::English)
            .await
            .unwrap();

        let events = events.into_inner().unwrap();
        let chair = SpecialistRole::Orchestrator;
        let (c, n, p) = (
            SpecialistRole::Cardiologist,
            SpecialistRole::Neurologist,
            SpecialistRole::Pulmonologist,
        );
        assert_eq!(
            authors(&events),
            vec![chair, chair, c, n, p, chair, c, n, p, chair, c, n, p]
        );
        assert_eq!(outcome.messages.len(), 13);

        assert!(matches!(&events[0], ProgressUpdate::Status { .. }));
        assert!(matches!(events.last(), Some(ProgressUpdate::Report { .. })));
        let prognosis_updates = events.iter().filter(|e| e.kind() == "prognosis_update").count();
        assert_eq!(prognosis_updates, 3);
        let thinking = events.iter().filter(|e| e.kind() == "thinking").count();
        assert_eq!(thinking, 9);

        assert_eq!(outcome.report.consensus_diagnosis[0].name, "Acute coronary syndrome");
        assert_eq!(outcome.prognosis.unwrap().short_term_prognosis, "guarded");
        assert!(!events.iter().any(|e| e.kind() == "critical_finding"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_question_blocks_until_answered() {
        // only the first round summary asks; later ones see the answer in the history
        let oracle = ScriptedOracle::new(|req, _| {
            let prompt = req.prompt_text();
            if prompt.contains("Summarize the round") && !prompt.contains("User Answer") {
                return reply("FOYDALANUVCHI UCHUN SAVOL: What is the blood pressure?");
            }
            debate_step(req, REPORT, "Next question for the panel")
        });
        let council = council(oracle.clone());
        let slot = Arc::new(InterventionSlot::new());
        let events = Arc::new(Mutex::new(Vec::new()));

        let handle = tokio::spawn({
            let slot = slot.clone();
            let events = events.clone();
            async move {
                let on_progress = move |e: ProgressUpdate| events.lock().unwrap().push(e);
                council
                    .run_council_debate(
                        &patient(),
                        &[],
                        &panel(),
                        &on_progress,
                        slot.as_ref(),
                        Language::English,
                    )
                    .await
            }
        });

        tokio::time::sleep(Duration::from_secs(30)).await;
        // intro, opening topic, three specialists, prognosis, round summary
        assert_eq!(oracle.calls(), 7);
        assert!(events.lock().unwrap().iter().any(|e| matches!(
            e,
            ProgressUpdate::UserQuestion { question } if question == "What is the blood pressure?"
        )));

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(oracle.calls(), 7);
        assert!(!handle.is_finished());

        slot.provide("150/95");
        let outcome = handle.await.unwrap().unwrap();

        assert!(oracle.calls() > 7);
        assert!(slot.get().is_none());
        let answer = outcome
            .messages
            .iter()
            .find(|m| m.is_user_intervention)
            .unwrap();
        assert_eq!(answer.content, "User Answer: 150/95");
        assert_eq!(answer.author, SpecialistRole::Orchestrator);
    }

    #[tokio::test]
    async fn test_parked_debate_resumes_from_serialized_state() {
        let oracle = ScriptedOracle::new(|req, _| {
            let prompt = req.prompt_text();
            if prompt.contains("Summarize the initial state") {
                return reply("FOYDALANUVCHI UCHUN SAVOL: Any prior stents?");
            }
            debate_step(req, REPORT, "Next question for the panel")
        });
        let council = council(oracle.clone());
        let events = Mutex::new(Vec::new());
        let on_progress = |e: ProgressUpdate| events.lock().unwrap().push(e);

        let mut state = council
            .open_debate(&patient(), &[], &panel(), &on_progress, Language::English)
            .await
            .unwrap();
        let question = council.begin_round(&mut state, &on_progress, Language::English);
        assert_eq!(question.as_deref(), Some("Any prior stents?"));
        assert!(state.is_waiting());

        let parked = serde_json::to_value(&state).unwrap();
        let mut state: DebateState = serde_json::from_value(parked).unwrap();
        let calls = oracle.calls();

        let err = council
            .finish_round(&mut state, &patient(), &panel(), None, &on_progress, Language::English)
            .await
            .unwrap_err();
        assert!(matches!(err, CouncilError::InvalidRequest(_)));
        assert_eq!(oracle.calls(), calls);

        council
            .finish_round(&mut state, &patient(), &panel(), Some("Two, in 2019"), &on_progress, Language::English)
            .await
            .unwrap();
        assert!(!state.is_waiting());
        assert_eq!(state.round, 1);
        assert_eq!(state.topic, "Next question for the panel");
        assert!(state.messages.iter().any(|m| m.content == "User Answer: Two, in 2019"));
        assert!(!council.debate_finished(&state));
    }

    #[tokio::test(start_paused = true)]
    async fn test_profile_override_reaches_every_call() {
        let oracle = ScriptedOracle::new(|_, _| fail("connection reset by peer"));
        let council = council(oracle.clone()).for_profile(Some(DeviceProfile::Mobile));
        let slot = InterventionSlot::new();
        let on_progress = |_: ProgressUpdate| {};

        let result = council
            .run_council_debate(&patient(), &[], &panel(), &on_progress, &slot, Language::English)
            .await;

        assert!(result.is_err());
        assert_eq!(oracle.calls(), 5);
    }

    #[tokio::test]
    async fn test_critical_finding_precedes_report() {
        let oracle = ScriptedOracle::new(|req, _| debate_step(req, REPORT_WITH_FINDING, "Next"));
        let council = council(oracle);
        let slot = InterventionSlot::new();
        let events = Mutex::new(Vec::new());
        let on_progress = |e: ProgressUpdate| events.lock().unwrap().push(e);

        council
            .run_council_debate(&patient(), &[], &panel(), &on_progress, &slot, Language::English)
            .await
            .unwrap();

        let kinds: Vec<&str> = events.lock().unwrap().iter().map(|e| e.kind()).collect();
        let finding = kinds.iter().position(|k| *k == "critical_finding").unwrap();
        let report = kinds.iter().position(|k| *k == "report").unwrap();
        assert_eq!(finding + 1, report);

        let events = events.into_inner().unwrap();
        let ProgressUpdate::CriticalFinding { data } = &events[finding] else {
            panic!("expected critical finding");
        };
        assert_eq!(data.urgency, Urgency::Immediate);
    }

    #[tokio::test]
    async fn test_failed_specialist_turn_is_skipped() {
        let oracle = ScriptedOracle::new(|req, _| {
            if req.prompt_text().starts_with("Role: Neurologist") {
                return fail("model refused the request");
            }
            debate_step(req, REPORT, "Next")
        });
        let council = council(oracle);
        let slot = InterventionSlot::new();
        let events = Mutex::new(Vec::new());
        let on_progress = |e: ProgressUpdate| events.lock().unwrap().push(e);

        let outcome = council
            .run_council_debate(&patient(), &[], &panel(), &on_progress, &slot, Language::English)
            .await
            .unwrap();

        assert!(!outcome.messages.iter().any(|m| m.author == SpecialistRole::Neurologist));
        assert_eq!(outcome.messages.len(), 10);
        let events = events.into_inner().unwrap();
        assert!(!events.iter().any(|e| e.kind() == "error"));
        assert!(matches!(events.last(), Some(ProgressUpdate::Report { .. })));
    }

    #[tokio::test]
    async fn test_failed_synthesis_ends_with_error_event() {
        let oracle = ScriptedOracle::new(|req, _| {
            if req.prompt_text().contains("Create the Final Report") {
                return fail("permission denied for model");
            }
            debate_step(req, REPORT, "Next")
        });
        let council = council(oracle);
        let slot = InterventionSlot::new();
        let events = Mutex::new(Vec::new());
        let on_progress = |e: ProgressUpdate| events.lock().unwrap().push(e);

        let result = council
            .run_council_debate(&patient(), &[], &panel(), &on_progress, &slot, Language::English)
            .await;

        assert!(matches!(result, Err(CouncilError::UserFacing(_))));
        let events = events.into_inner().unwrap();
        let ProgressUpdate::Error { message } = events.last().unwrap() else {
            panic!("expected a terminal error event");
        };
        assert!(!message.contains("permission denied"));
        assert!(!events.iter().any(|e| e.kind() == "report"));
    }

    #[tokio::test]
    async fn test_failed_chair_intro_propagates() {
        let oracle = ScriptedOracle::new(|_, _| fail("bad api key"));
        let council = council(oracle.clone());
        let slot = InterventionSlot::new();
        let events = Mutex::new(Vec::new());
        let on_progress = |e: ProgressUpdate| events.lock().unwrap().push(e);

        let result = council
            .run_council_debate(&patient(), &[], &panel(), &on_progress, &slot, Language::English)
            .await;

        assert!(result.is_err());
        assert_eq!(oracle.calls(), 1);
        let kinds: Vec<&str> = events.lock().unwrap().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["status", "error"]);
    }

    fn honoring_priorities(req: &OracleRequest) -> Result<OracleResponse> {
        let prompt = req.prompt_text();
        assert!(prompt.contains("PRIORITY 1"));
        let mut questions = Vec::new();
        if !prompt.contains("\"allergies\"") {
            questions.push("Does the patient have any drug allergies?");
        }
        if !prompt.contains("\"currentMedications\"") {
            questions.push("Which medications is the patient currently taking?");
        }
        questions.push("How long does each episode of pain last?");
        reply(serde_json::to_string(&questions).unwrap())
    }

    #[tokio::test]
    async fn test_chest_pain_without_allergies_asks_about_them() {
        let oracle = ScriptedOracle::new(|req, _| honoring_priorities(req));
        let questions = council(oracle)
            .generate_clarifying_questions(&patient(), Language::English)
            .await
            .unwrap();

        assert!(questions.iter().any(|q| q.to_lowercase().contains("allerg")));
        assert!(questions.len() <= MAX_CLARIFYING_QUESTIONS);
    }

    #[tokio::test]
    async fn test_clarifying_questions_skip_known_fields() {
        // ignores the instructions and re-asks everything
        let oracle = ScriptedOracle::new(|_, _| {
            reply(
                r#"["Any known allergies?", "What medications do you take?",
                    "Any allergies or current medications?", "Is the pain exertional?"]"#,
            )
        });
        let mut known = patient();
        known.allergies = Some("Penicillin".to_string());
        known.current_medications = Some("Aspirin 75 mg".to_string());

        let questions = council(oracle)
            .generate_clarifying_questions(&known, Language::English)
            .await
            .unwrap();

        assert_eq!(questions, vec!["Is the pain exertional?"]);
    }

    #[tokio::test]
    async fn test_blank_complaints_rejected_without_oracle_call() {
        let oracle = ScriptedOracle::new(|_, _| reply("[]"));
        let result = council(oracle.clone())
            .generate_clarifying_questions(&PatientData::default(), Language::English)
            .await;

        assert!(matches!(result, Err(CouncilError::InsufficientData(_))));
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_recommendations_drop_unknown_roles_and_chair() {
        let oracle = ScriptedOracle::new(|_, _| {
            reply(
                r#"{"recommendations": [
                    {"model": "Gemini", "reason": "chest pain"},
                    {"model": "Orchestrator", "reason": "chair"},
                    {"model": "Witch Doctor", "reason": "?"},
                    {"model": "gemini", "reason": "duplicate"},
                    {"model": "Pulmonologist", "reason": "dyspnea"}
                ]}"#,
            )
        });
        let recommendations = council(oracle)
            .recommend_specialists(&patient(), Language::English)
            .await
            .unwrap();

        let roles: Vec<_> = recommendations.iter().map(|r| r.model).collect();
        assert_eq!(roles, vec![SpecialistRole::Cardiologist, SpecialistRole::Pulmonologist]);
        assert_eq!(recommendations[0].reason, "chest pain");
    }

    #[tokio::test]
    async fn test_initial_diagnoses_ranked_not_normalized() {
        let oracle = ScriptedOracle::new(|req, _| {
            assert_eq!(req.model, "gemini-3-pro-preview");
            reply(
                r#"[{"name": "GERD", "probability": 30},
                    {"name": "Angina", "probability": 80, "evidenceLevel": "High"},
                    {"name": "", "probability": 99}]"#,
            )
        });
        let diagnoses = council(oracle)
            .generate_initial_diagnoses(&patient(), Language::English)
            .await
            .unwrap();

        let names: Vec<_> = diagnoses.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Angina", "GERD"]);
        assert_eq!(diagnoses[0].probability + diagnoses[1].probability, 110.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_consultation_escalates_token_ceiling() {
        let oracle = ScriptedOracle::new(|req, _| match req.max_output_tokens {
            Some(FAST_DOCTOR_RETRY_TOKENS) => reply(
                r#"{"primaryDiagnosis": {"probability": "70", "reasoningChain": ["a", "b"]},
                    "treatmentPlan": ["Rest"],
                    "medications": [{"name": "Nimesil", "dosage": "100 mg", "notes": "ignored"}]}"#,
            ),
            _ => reply(r#"{"primaryDiagnosis": {"name": "Mig"#),
        });
        let report = council(oracle.clone())
            .generate_fast_doctor_consultation(&patient(), Language::UzbekLatin)
            .await
            .unwrap();

        let requests = oracle.requests();
        assert!(requests[..requests.len() - 1]
            .iter()
            .all(|r| r.max_output_tokens == Some(FAST_DOCTOR_TOKENS)));
        assert_eq!(requests.last().unwrap().max_output_tokens, Some(FAST_DOCTOR_RETRY_TOKENS));
        assert_eq!(requests[0].model, "gemini-2.5-flash-lite");

        let diagnosis = &report.consensus_diagnosis[0];
        assert_eq!(diagnosis.name, "Tashxis");
        assert_eq!(diagnosis.probability, 70.0);
        assert_eq!(diagnosis.evidence_level, EvidenceLevel::High);
        assert_eq!(diagnosis.uzbek_protocol_match.as_deref(), Some("SSV protokoliga muvofiq"));
        assert_eq!(report.medication_recommendations[0].local_availability, "O'zbekistonda mavjud");
        assert_eq!(report.medication_recommendations[0].notes, "");
        assert_eq!(report.uzbekistan_legislative_note, "SSV klinik protokollariga muvofiq");
    }

    #[tokio::test]
    async fn test_continue_debate_returns_chair_message() {
        let oracle = ScriptedOracle::new(|req, _| {
            assert!(req.prompt_text().contains("Respond to the user and continue"));
            reply("Noted, adding troponin to the plan")
        });
        let message = council(oracle)
            .continue_debate(&patient(), &[], "What about troponin?", Language::English)
            .await
            .unwrap();

        assert_eq!(message.author, SpecialistRole::Orchestrator);
        assert!(message.is_system_message);
        assert!(message.id.starts_with("sys-continue"));
    }

    #[tokio::test]
    async fn test_scenario_analysis_coerces_partial_report() {
        let oracle = ScriptedOracle::new(|_, _| {
            reply(r#"{"consensusDiagnosis": [{"name": "Pneumonia", "probability": 60}]}"#)
        });
        let report = council(oracle)
            .run_scenario_analysis(&patient(), &[], "What if SpO2 drops to 88%?", Language::English)
            .await
            .unwrap();

        assert_eq!(report.consensus_diagnosis[0].name, "Pneumonia");
        assert!(report.treatment_plan.is_empty());
    }
}

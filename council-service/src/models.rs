use council_flow::{
    Attachment, ChatMessage, DeviceProfile, Diagnosis, FinalReport, Language, PanelMember,
    PatientData, PrognosisReport, ProgressUpdate,
};
use serde::{Deserialize, Serialize};

/// Smallest and largest panel the service accepts for a debate
pub const MIN_PANEL_SIZE: usize = 4;
pub const MAX_PANEL_SIZE: usize = 10;

#[derive(Debug, Serialize, Deserialize)]
pub struct PatientRequest {
    pub patient: PatientData,
    #[serde(default)]
    pub language: Language,
    /// Caller's connection class; the configured default applies when absent
    #[serde(default)]
    pub profile: Option<DeviceProfile>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DebateRequest {
    pub patient: PatientData,
    #[serde(default)]
    pub diagnoses: Vec<Diagnosis>,
    pub panel: Vec<PanelMember>,
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub profile: Option<DeviceProfile>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResumeRequest {
    pub answer: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ContinueRequest {
    pub remark: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScenarioRequest {
    pub scenario: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    WaitingForInput,
    Completed,
    Failed,
}

/// Inputs of one debate session, fixed when the session starts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateCase {
    pub patient: PatientData,
    pub diagnoses: Vec<Diagnosis>,
    pub panel: Vec<PanelMember>,
    pub language: Language,
    pub profile: Option<DeviceProfile>,
}

impl From<DebateRequest> for DebateCase {
    fn from(request: DebateRequest) -> Self {
        Self {
            patient: request.patient,
            diagnoses: request.diagnoses,
            panel: request.panel,
            language: request.language,
            profile: request.profile,
        }
    }
}

/// Client-facing state of a debate session, folded from its progress events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateView {
    pub status: SessionStatus,
    pub language: Language,
    pub events: Vec<ProgressUpdate>,
    pub messages: Vec<ChatMessage>,
    pub pending_question: Option<String>,
    pub prognosis: Option<PrognosisReport>,
    pub report: Option<FinalReport>,
    pub analysis_id: Option<String>,
    pub error: Option<String>,
}

impl DebateView {
    pub fn new(language: Language) -> Self {
        Self {
            status: SessionStatus::Running,
            language,
            events: Vec::new(),
            messages: Vec::new(),
            pending_question: None,
            prognosis: None,
            report: None,
            analysis_id: None,
            error: None,
        }
    }

    pub fn apply(&mut self, update: ProgressUpdate) {
        match &update {
            ProgressUpdate::Message { message } => {
                if message.is_user_intervention {
                    self.pending_question = None;
                    self.status = SessionStatus::Running;
                }
                self.messages.push(message.clone());
            }
            ProgressUpdate::UserQuestion { question } => {
                self.pending_question = Some(question.clone());
                self.status = SessionStatus::WaitingForInput;
            }
            ProgressUpdate::PrognosisUpdate { data } => self.prognosis = Some(data.clone()),
            ProgressUpdate::Report { data } => self.report = Some(data.clone()),
            ProgressUpdate::Error { message } => self.error = Some(message.clone()),
            ProgressUpdate::Status { .. }
            | ProgressUpdate::Thinking { .. }
            | ProgressUpdate::CriticalFinding { .. } => {}
        }
        self.events.push(update);
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, SessionStatus::Completed | SessionStatus::Failed)
    }

    pub fn to_response(&self, session_id: &str) -> SessionResponse {
        SessionResponse {
            session_id: session_id.to_string(),
            status: self.status,
            language: self.language,
            pending_question: self.pending_question.clone(),
            waiting_for_input: self.status == SessionStatus::WaitingForInput,
            events: self.events.clone(),
            messages: self.messages.clone(),
            prognosis: self.prognosis.clone(),
            report: self.report.clone(),
            analysis_id: self.analysis_id.clone(),
            error: self.error.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub language: Language,
    pub pending_question: Option<String>,
    pub waiting_for_input: bool,
    pub events: Vec<ProgressUpdate>,
    pub messages: Vec<ChatMessage>,
    pub prognosis: Option<PrognosisReport>,
    pub report: Option<FinalReport>,
    pub analysis_id: Option<String>,
    pub error: Option<String>,
}

/// Body of `POST /tools/{tool_name}`: the tool's own fields plus `language`
#[derive(Debug, Deserialize)]
pub struct ToolRequest<T> {
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub profile: Option<DeviceProfile>,
    #[serde(flatten)]
    pub args: T,
}

#[derive(Debug, Deserialize)]
pub struct TextArgs {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ImageArgs {
    pub image: Attachment,
}

#[derive(Debug, Deserialize)]
pub struct DrugListArgs {
    pub drugs: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct PediatricDoseArgs {
    pub drug_name: String,
    pub weight_kg: f64,
}

#[derive(Debug, Deserialize)]
pub struct RiskScoreArgs {
    pub score_type: String,
    pub patient: PatientData,
}

#[derive(Debug, Deserialize)]
pub struct ReportArgs {
    #[serde(default)]
    pub patient: PatientData,
    pub report: FinalReport,
    #[serde(default)]
    pub procedure: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NoArgs {}

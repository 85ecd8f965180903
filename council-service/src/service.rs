use anyhow::Context;
use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, patch, post},
};
use council_flow::{
    AnalysisRecord, ChatMessage, ClinicalTools, Council, CouncilConfig, CouncilError, Diagnosis,
    FinalReport, Language, PersistenceBackend, ReportPatch, SpecialistRecommendation,
    language::user_friendly_message,
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::{
    models::{
        ContinueRequest, DebateRequest, DrugListArgs, ImageArgs, MAX_PANEL_SIZE, MIN_PANEL_SIZE,
        NoArgs, PatientRequest, PediatricDoseArgs, ReportArgs, ResumeRequest, RiskScoreArgs,
        ScenarioRequest, SessionResponse, TextArgs, ToolRequest,
    },
    workflow::DebateSessions,
};

/// How often finished debate sessions are swept
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": message,
            "id": id
        })),
    )
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

/// Oracle failures surface only the friendly message
fn bad_gateway_error(message: &str) -> ApiError {
    (StatusCode::BAD_GATEWAY, Json(json!({ "error": message })))
}

fn council_error(e: CouncilError, language: Language) -> ApiError {
    match e {
        CouncilError::InvalidRequest(message) | CouncilError::InsufficientData(message) => {
            bad_request_error(&message)
        }
        CouncilError::SessionNotFound(id) => not_found_error("Session not found", &id),
        CouncilError::UserFacing(message) => bad_gateway_error(&message),
        CouncilError::Oracle(_) | CouncilError::ParseFailure { .. } => {
            bad_gateway_error(&user_friendly_message(&e.to_string(), language))
        }
        other => {
            error!(error = %other, "Request failed");
            internal_error("Internal error", &other.to_string())
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub council: Council,
    pub tools: ClinicalTools,
    pub cases: Arc<dyn PersistenceBackend>,
    pub sessions: DebateSessions,
}

impl AppState {
    pub fn new(council: Council, cases: Arc<dyn PersistenceBackend>) -> Self {
        let tools = ClinicalTools::new(council.gateway().clone()).with_settings(council.settings().clone());
        let sessions = DebateSessions::new(council.clone(), cases.clone());
        Self {
            council,
            tools,
            cases,
            sessions,
        }
    }
}

pub async fn create_app(config: &CouncilConfig) -> anyhow::Result<Router> {
    let app_state = create_app_state(config)?;
    app_state.sessions.spawn_sweeper(SESSION_SWEEP_INTERVAL);
    Ok(build_router(app_state))
}

fn create_app_state(config: &CouncilConfig) -> anyhow::Result<AppState> {
    let cases = config.build_persistence();
    let council = config
        .build_council(cases.clone())
        .context("Failed to build the council")?;
    Ok(AppState::new(council, cases))
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/council/clarify", post(clarifying_questions))
        .route("/council/specialists", post(recommend_specialists))
        .route("/council/diagnoses", post(initial_diagnoses))
        .route("/council/fast", post(fast_consultation))
        .route("/council/debate", post(start_council_debate))
        .route("/council/{session_id}", get(get_session_status))
        .route("/council/{session_id}/resume", post(provide_answer))
        .route("/council/{session_id}/continue", post(continue_session))
        .route("/council/{session_id}/scenario", post(scenario_analysis))
        .route("/analyses", get(list_analyses))
        .route("/analyses/{id}", get(get_analysis))
        .route("/analyses/{id}/report", patch(update_report))
        .route("/tools/{tool_name}", post(run_tool))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Medical Council Service",
        "version": "1.0.0",
        "description": "Multi-specialist diagnostic council with clinician-in-the-loop questions",
        "endpoints": {
            "POST /council/clarify": "Clarifying questions for missing patient data",
            "POST /council/specialists": "Recommend a specialist panel",
            "POST /council/diagnoses": "Initial ranked differential",
            "POST /council/fast": "Single-doctor fast consultation",
            "POST /council/debate": "Start a council debate session",
            "GET /council/{session_id}": "Debate status, events and report",
            "POST /council/{session_id}/resume": "Answer the council's question",
            "POST /council/{session_id}/continue": "Follow-up remark to the chair",
            "POST /council/{session_id}/scenario": "What-if scenario report",
            "GET /analyses": "Saved analyses, newest first",
            "GET /analyses/{id}": "One saved analysis",
            "PATCH /analyses/{id}/report": "Edit fields of a saved report",
            "POST /tools/{tool_name}": "Clinical utility tools",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn clarifying_questions(
    State(state): State<AppState>,
    Json(request): Json<PatientRequest>,
) -> ApiResult<Vec<String>> {
    state
        .council
        .for_profile(request.profile)
        .generate_clarifying_questions(&request.patient, request.language)
        .await
        .map(Json)
        .map_err(|e| council_error(e, request.language))
}

async fn recommend_specialists(
    State(state): State<AppState>,
    Json(request): Json<PatientRequest>,
) -> ApiResult<Vec<SpecialistRecommendation>> {
    state
        .council
        .for_profile(request.profile)
        .recommend_specialists(&request.patient, request.language)
        .await
        .map(Json)
        .map_err(|e| council_error(e, request.language))
}

async fn initial_diagnoses(
    State(state): State<AppState>,
    Json(request): Json<PatientRequest>,
) -> ApiResult<Vec<Diagnosis>> {
    state
        .council
        .for_profile(request.profile)
        .generate_initial_diagnoses(&request.patient, request.language)
        .await
        .map(Json)
        .map_err(|e| council_error(e, request.language))
}

async fn fast_consultation(
    State(state): State<AppState>,
    Json(request): Json<PatientRequest>,
) -> ApiResult<FinalReport> {
    state
        .council
        .for_profile(request.profile)
        .generate_fast_doctor_consultation(&request.patient, request.language)
        .await
        .map(Json)
        .map_err(|e| council_error(e, request.language))
}

fn validate_panel(request: &DebateRequest) -> Result<(), ApiError> {
    let size = request.panel.len();
    if !(MIN_PANEL_SIZE..=MAX_PANEL_SIZE).contains(&size) {
        return Err(bad_request_error(&format!(
            "Panel must have between {} and {} specialists, got {}",
            MIN_PANEL_SIZE, MAX_PANEL_SIZE, size
        )));
    }
    if request.panel.iter().any(|member| member.role.is_chair()) {
        return Err(bad_request_error("The chair cannot sit on the panel"));
    }
    Ok(())
}

async fn start_council_debate(
    State(state): State<AppState>,
    Json(request): Json<DebateRequest>,
) -> ApiResult<Value> {
    validate_panel(&request)?;
    council_flow::validate_patient_data(&request.patient)
        .map_err(|e| council_error(e, request.language))?;

    let language = request.language;
    let session_id = state
        .sessions
        .start(request)
        .await
        .map_err(|e| council_error(e, language))?;
    info!(session_id = %session_id, "Council debate session started");

    Ok(Json(json!({
        "session_id": session_id,
        "status": "started",
        "message": "Council debate started"
    })))
}

async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    state
        .sessions
        .get(&session_id)
        .await
        .map(Json)
        .map_err(|e| council_error(e, Language::default()))
}

async fn provide_answer(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<ResumeRequest>,
) -> ApiResult<Value> {
    if request.answer.trim().is_empty() {
        return Err(bad_request_error("Answer cannot be empty"));
    }
    state
        .sessions
        .resume(&session_id, &request.answer)
        .await
        .map_err(|e| council_error(e, Language::default()))?;

    Ok(Json(json!({
        "session_id": session_id,
        "status": "resumed",
        "message": "Answer received, the council continues"
    })))
}

async fn continue_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<ContinueRequest>,
) -> ApiResult<ChatMessage> {
    let (case, history) = state
        .sessions
        .completed_context(&session_id)
        .await
        .map_err(|e| council_error(e, Language::default()))?;

    let reply = state
        .council
        .for_profile(case.profile)
        .continue_debate(&case.patient, &history, &request.remark, case.language)
        .await
        .map_err(|e| council_error(e, case.language))?;
    state
        .sessions
        .append_message(&session_id, reply.clone())
        .await
        .map_err(|e| council_error(e, case.language))?;
    Ok(Json(reply))
}

async fn scenario_analysis(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<ScenarioRequest>,
) -> ApiResult<FinalReport> {
    let (case, history) = state
        .sessions
        .completed_context(&session_id)
        .await
        .map_err(|e| council_error(e, Language::default()))?;

    state
        .council
        .for_profile(case.profile)
        .run_scenario_analysis(&case.patient, &history, &request.scenario, case.language)
        .await
        .map(Json)
        .map_err(|e| council_error(e, case.language))
}

async fn list_analyses(State(state): State<AppState>) -> ApiResult<Vec<AnalysisRecord>> {
    state.cases.list_analyses().await.map(Json).map_err(|e| {
        error!(error = %e, "Failed to list analyses");
        internal_error("Failed to list analyses", &e.to_string())
    })
}

async fn get_analysis(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<AnalysisRecord> {
    match state.cases.get_analysis(&id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(not_found_error("Analysis not found", &id)),
        Err(e) => {
            error!(analysis_id = %id, error = %e, "Failed to load analysis");
            Err(internal_error("Failed to load analysis", &e.to_string()))
        }
    }
}

async fn update_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<ReportPatch>,
) -> ApiResult<AnalysisRecord> {
    match state.cases.update_report(&id, patch).await {
        Ok(Some(record)) => {
            info!(analysis_id = %id, "Report updated");
            Ok(Json(record))
        }
        Ok(None) => Err(not_found_error("Analysis not found", &id)),
        Err(e) => {
            error!(analysis_id = %id, error = %e, "Failed to update report");
            Err(internal_error("Failed to update report", &e.to_string()))
        }
    }
}

fn tool_args<T: DeserializeOwned>(body: Value) -> Result<ToolRequest<T>, ApiError> {
    serde_json::from_value(body).map_err(|e| bad_request_error(&format!("Invalid tool input: {}", e)))
}

fn tool_output<T: Serialize>(result: council_flow::Result<T>, language: Language) -> Result<Value, ApiError> {
    let output = result.map_err(|e| council_error(e, language))?;
    serde_json::to_value(output).map_err(|e| internal_error("Failed to encode tool output", &e.to_string()))
}

async fn run_tool(
    State(state): State<AppState>,
    Path(tool_name): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Value> {
    info!(tool = %tool_name, "Running clinical tool");
    let profile = tool_args::<NoArgs>(body.clone())?.profile;
    let tools = state.tools.for_profile(profile);

    let output = match tool_name.as_str() {
        "structure-notes" => {
            let ToolRequest { language, args, .. } = tool_args::<TextArgs>(body)?;
            tool_output(tools.structure_dictated_notes(&args.text, language).await, language)
        }
        "dynamic-suggestions" => {
            let ToolRequest { language, args, .. } = tool_args::<TextArgs>(body)?;
            tool_output(tools.get_dynamic_suggestions(&args.text, language).await, language)
        }
        "analyze-ecg" => {
            let ToolRequest { language, args, .. } = tool_args::<ImageArgs>(body)?;
            tool_output(tools.analyze_ecg_image(&args.image, language).await, language)
        }
        "icd10-codes" => {
            let ToolRequest { language, args, .. } = tool_args::<TextArgs>(body)?;
            tool_output(tools.get_icd10_codes(&args.text, language).await, language)
        }
        "search-guidelines" => {
            let ToolRequest { language, args, .. } = tool_args::<TextArgs>(body)?;
            tool_output(tools.search_clinical_guidelines(&args.text, language).await, language)
        }
        "interpret-lab" => {
            let ToolRequest { language, args, .. } = tool_args::<TextArgs>(body)?;
            tool_output(tools.interpret_lab_value(&args.text, language).await, language)
        }
        "patient-explanation" => {
            let ToolRequest { language, args, .. } = tool_args::<TextArgs>(body)?;
            tool_output(tools.generate_patient_explanation(&args.text, language).await, language)
        }
        "expand-abbreviation" => {
            let ToolRequest { language, args, .. } = tool_args::<TextArgs>(body)?;
            tool_output(tools.expand_abbreviation(&args.text, language).await, language)
        }
        "discharge-summary" => {
            let ToolRequest { language, args, .. } = tool_args::<ReportArgs>(body)?;
            tool_output(
                tools
                    .generate_discharge_summary(&args.patient, &args.report, language)
                    .await,
                language,
            )
        }
        "insurance-pre-auth" => {
            let ToolRequest { language, args, .. } = tool_args::<ReportArgs>(body)?;
            let procedure = args
                .procedure
                .filter(|p| !p.trim().is_empty())
                .ok_or_else(|| bad_request_error("procedure is required"))?;
            tool_output(
                tools
                    .generate_insurance_pre_auth(&args.patient, &args.report, &procedure, language)
                    .await,
                language,
            )
        }
        "pediatric-dose" => {
            let ToolRequest { language, args, .. } = tool_args::<PediatricDoseArgs>(body)?;
            tool_output(
                tools
                    .calculate_pediatric_dose(&args.drug_name, args.weight_kg, language)
                    .await,
                language,
            )
        }
        "risk-score" => {
            let ToolRequest { language, args, .. } = tool_args::<RiskScoreArgs>(body)?;
            tool_output(
                tools
                    .calculate_risk_score(&args.score_type, &args.patient, language)
                    .await,
                language,
            )
        }
        "patient-education" => {
            let ToolRequest { language, args, .. } = tool_args::<ReportArgs>(body)?;
            tool_output(
                tools.generate_patient_education_content(&args.report, language).await,
                language,
            )
        }
        "cme-topics" => {
            let ToolRequest { language, .. } = tool_args::<NoArgs>(body)?;
            let history = state.cases.list_analyses().await.unwrap_or_else(|e| {
                warn!(error = %e, "Analysis history unavailable for CME topics");
                Vec::new()
            });
            tool_output(tools.suggest_cme_topics(&history, language).await, language)
        }
        "check-drug-interactions" => {
            let ToolRequest { language, args, .. } = tool_args::<DrugListArgs>(body)?;
            tool_output(tools.check_drug_interactions(&args.drugs, language).await, language)
        }
        "identify-drug" => {
            let ToolRequest { language, args, .. } = tool_args::<TextArgs>(body)?;
            tool_output(tools.identify_drug_by_name(&args.text, language).await, language)
        }
        "identify-drug-image" => {
            let ToolRequest { language, args, .. } = tool_args::<ImageArgs>(body)?;
            tool_output(tools.identify_drug_by_image(&args.image, language).await, language)
        }
        other => return Err(not_found_error("Unknown tool", other)),
    }?;

    Ok(Json(output))
}

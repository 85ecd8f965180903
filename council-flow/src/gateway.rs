//! Single choke point for every oracle call.
//!
//! The gateway builds the oracle request, strips code fences, parses and
//! repairs structured output, retries transient failures (including parse
//! failures) and finally converts whatever is left into a short localized
//! message. The original cause is only ever logged.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, warn};

use crate::error::{CouncilError, PARSE_FAILURE_MARKER, Result};
use crate::language::{Language, user_friendly_message};
use crate::oracle::{ContentPart, Oracle, OracleRequest, OracleResponse};
use crate::retry::{RetryOptions, retry};

/// Sampling temperature for every council call
pub const TEMPERATURE: f32 = 0.15;

pub const GATEWAY_RETRYABLE_KEYWORDS: &[&str] = &[
    "network",
    "timeout",
    "fetch",
    "connection",
    "503",
    "unavailable",
    "overloaded",
    PARSE_FAILURE_MARKER,
    "invalid json",
    "failed to parse",
];

/// Closings tried, in order, on structured output that fails to parse
const REPAIR_CLOSINGS: &[&str] = &[
    r#"[],"medications":[],"recommendedTests":[]}"#,
    "[]}",
    "]}",
    "}",
];

static LEADING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*```(?:json)?\s*").expect("static regex"));
static TRAILING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```\s*$").expect("static regex"));
static DANGLING_TREATMENT_PLAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)"treatmentPlan"\s*:\s*$"#).expect("static regex"));
static DANGLING_MEDICATIONS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)"medications"\s*:\s*$"#).expect("static regex"));

/// Caller connection class; constrained links truncate more often
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceProfile {
    #[default]
    Desktop,
    Mobile,
}

impl DeviceProfile {
    pub fn retry_options(&self) -> RetryOptions {
        let (max_retries, initial_delay) = match self {
            DeviceProfile::Desktop => (2, Duration::from_secs(2)),
            DeviceProfile::Mobile => (4, Duration::from_secs(3)),
        };
        RetryOptions::default()
            .with_max_retries(max_retries)
            .with_initial_delay(initial_delay)
            .with_retryable_errors(GATEWAY_RETRYABLE_KEYWORDS.iter().copied())
    }
}

impl std::str::FromStr for DeviceProfile {
    type Err = CouncilError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "desktop" => Ok(DeviceProfile::Desktop),
            "mobile" => Ok(DeviceProfile::Mobile),
            other => Err(CouncilError::Configuration(format!(
                "unknown device profile '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Prompt {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl From<String> for Prompt {
    fn from(text: String) -> Self {
        Prompt::Text(text)
    }
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Prompt::Text(text.to_string())
    }
}

impl From<Vec<ContentPart>> for Prompt {
    fn from(parts: Vec<ContentPart>) -> Self {
        Prompt::Parts(parts)
    }
}

impl Prompt {
    fn into_parts(self) -> Vec<ContentPart> {
        match self {
            Prompt::Text(text) => vec![ContentPart::Text(text)],
            Prompt::Parts(parts) => parts,
        }
    }
}

/// Everything one gateway call needs
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub prompt: Prompt,
    pub model: String,
    pub schema: Option<Value>,
    pub use_search: bool,
    pub system_instruction: String,
    pub retry: bool,
    pub max_output_tokens: Option<u32>,
    pub language: Language,
    /// Overrides the gateway's retry profile for this call only
    pub profile: Option<DeviceProfile>,
}

impl GatewayRequest {
    pub fn new(prompt: impl Into<Prompt>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            schema: None,
            use_search: false,
            system_instruction: String::new(),
            retry: true,
            max_output_tokens: None,
            language: Language::default(),
            profile: None,
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_search(mut self) -> Self {
        self.use_search = true;
        self
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = instruction.into();
        self
    }

    pub fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = Some(max);
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    pub fn with_profile(mut self, profile: Option<DeviceProfile>) -> Self {
        self.profile = profile;
        self
    }

    pub fn without_retry(mut self) -> Self {
        self.retry = false;
        self
    }

    fn to_oracle_request(&self) -> OracleRequest {
        OracleRequest {
            model: self.model.clone(),
            parts: self.prompt.clone().into_parts(),
            system_instruction: Some(self.system_instruction.clone())
                .filter(|s| !s.trim().is_empty()),
            temperature: TEMPERATURE,
            max_output_tokens: self.max_output_tokens,
            response_schema: self.schema.clone(),
            use_search: self.use_search,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayOutput {
    Text(String),
    Json(Value),
    /// Raw response kept whole so callers can read grounding citations
    Grounded(OracleResponse),
}

#[derive(Clone)]
pub struct Gateway {
    oracle: Arc<dyn Oracle>,
    profile: DeviceProfile,
}

impl Gateway {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self {
            oracle,
            profile: DeviceProfile::default(),
        }
    }

    pub fn with_profile(mut self, profile: DeviceProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn profile(&self) -> DeviceProfile {
        self.profile
    }

    /// Issues the request, retrying when enabled, and translates any final
    /// failure into a user-presentable message.
    pub async fn call(&self, request: GatewayRequest) -> Result<GatewayOutput> {
        let language = request.language;
        self.try_call(&request)
            .await
            .map_err(|e| self.present(&request.model, e, language))
    }

    async fn try_call(&self, request: &GatewayRequest) -> Result<GatewayOutput> {
        if request.retry {
            let options = request.profile.unwrap_or(self.profile).retry_options();
            retry(|| self.execute(request), &options).await
        } else {
            self.execute(request).await
        }
    }

    fn present(&self, model: &str, cause: CouncilError, language: Language) -> CouncilError {
        error!(model = %model, error = %cause, "Oracle call failed");
        if cause.is_request_logic() {
            return cause;
        }
        CouncilError::UserFacing(user_friendly_message(&cause.to_string(), language))
    }

    async fn execute(&self, request: &GatewayRequest) -> Result<GatewayOutput> {
        let response = self.oracle.generate(&request.to_oracle_request()).await?;

        if request.schema.is_some() {
            return parse_structured(&response.text).map(GatewayOutput::Json);
        }
        if request.use_search {
            return Ok(GatewayOutput::Grounded(response));
        }
        Ok(GatewayOutput::Text(response.text))
    }

    pub async fn text(&self, request: GatewayRequest) -> Result<String> {
        Ok(match self.call(request).await? {
            GatewayOutput::Text(text) => text,
            GatewayOutput::Json(value) => value.to_string(),
            GatewayOutput::Grounded(response) => response.text,
        })
    }

    pub async fn structured(&self, request: GatewayRequest) -> Result<Value> {
        let language = request.language;
        let model = request.model.clone();
        match self.call(request).await? {
            GatewayOutput::Json(value) => Ok(value),
            GatewayOutput::Text(text) => parse_structured(&text)
                .map_err(|e| self.present(&model, e, language)),
            GatewayOutput::Grounded(response) => parse_structured(&response.text)
                .map_err(|e| self.present(&model, e, language)),
        }
    }

    /// Structured call under a tight output ceiling, repeated once with
    /// `retry_ceiling` when the answer comes back truncated or unparseable.
    pub async fn structured_escalating(
        &self,
        request: GatewayRequest,
        first_ceiling: u32,
        retry_ceiling: u32,
    ) -> Result<Value> {
        let model = request.model.clone();
        let language = request.language;

        let first = self
            .try_call(&request.clone().with_max_output_tokens(first_ceiling))
            .await;
        let output = match first {
            Ok(output) => output,
            Err(e) if is_truncation(&e) => {
                warn!(
                    model = %model,
                    first_ceiling,
                    retry_ceiling,
                    "Structured output truncated, retrying with a larger ceiling"
                );
                self.try_call(&request.with_max_output_tokens(retry_ceiling))
                    .await
                    .map_err(|e| self.present(&model, e, language))?
            }
            Err(e) => return Err(self.present(&model, e, language)),
        };

        let text = match output {
            GatewayOutput::Json(value) => return Ok(value),
            GatewayOutput::Text(text) => text,
            GatewayOutput::Grounded(response) => response.text,
        };
        parse_structured(&text).map_err(|e| self.present(&model, e, language))
    }

    pub async fn grounded(&self, request: GatewayRequest) -> Result<OracleResponse> {
        Ok(match self.call(request.with_search()).await? {
            GatewayOutput::Grounded(response) => response,
            GatewayOutput::Text(text) => OracleResponse::text(text),
            GatewayOutput::Json(value) => OracleResponse::text(value.to_string()),
        })
    }
}

fn is_truncation(error: &CouncilError) -> bool {
    if matches!(error, CouncilError::ParseFailure { .. }) {
        return true;
    }
    let message = error.to_string().to_lowercase();
    message.contains(PARSE_FAILURE_MARKER) || message.contains("invalid json")
}

/// Removes a leading ```json fence and a trailing ``` fence
pub fn strip_code_fences(raw: &str) -> String {
    let without_lead = LEADING_FENCE.replace(raw, "");
    TRAILING_FENCE.replace(&without_lead, "").trim().to_string()
}

/// Tries the fixed closing sequence, then the two targeted completions
pub fn repair_truncated_json(raw: &str) -> Option<Value> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    for closing in REPAIR_CLOSINGS {
        if let Ok(value) = serde_json::from_str(&format!("{}{}", s, closing)) {
            return Some(value);
        }
    }
    if DANGLING_TREATMENT_PLAN.is_match(s) {
        let candidate = format!(r#"{}[],"medications":[],"recommendedTests":[]}}"#, s);
        if let Ok(value) = serde_json::from_str(&candidate) {
            return Some(value);
        }
    }
    if DANGLING_MEDICATIONS.is_match(s) {
        let candidate = format!(r#"{}[],"recommendedTests":[]}}"#, s);
        if let Ok(value) = serde_json::from_str(&candidate) {
            return Some(value);
        }
    }
    None
}

pub fn parse_structured(raw: &str) -> Result<Value> {
    let cleaned = strip_code_fences(raw);
    if let Ok(value) = serde_json::from_str(&cleaned) {
        return Ok(value);
    }
    match repair_truncated_json(&cleaned) {
        Some(value) => {
            warn!(length = cleaned.len(), "Recovered truncated structured output");
            Ok(value)
        }
        None => {
            let snippet: String = cleaned.chars().take(500).collect();
            error!(snippet = %snippet, "Failed to parse structured output");
            Err(CouncilError::parse_failure(&cleaned))
        }
    }
}

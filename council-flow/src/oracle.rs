//! Completion oracle clients.
//!
//! The oracle is an opaque text/JSON completion service. Every client is an
//! explicit object constructed once at startup and injected into the
//! [`Gateway`](crate::gateway::Gateway); nothing here is global.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{CouncilError, Result};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// One segment of a multimodal prompt
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    Inline { mime_type: String, data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OracleRequest {
    pub model: String,
    pub parts: Vec<ContentPart>,
    pub system_instruction: Option<String>,
    pub temperature: f32,
    pub max_output_tokens: Option<u32>,
    pub response_schema: Option<Value>,
    pub use_search: bool,
}

impl OracleRequest {
    /// All text parts joined with blank lines
    pub fn prompt_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(text) => Some(text.as_str()),
                ContentPart::Inline { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn inline_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| matches!(p, ContentPart::Inline { .. }))
            .count()
    }
}

/// A web citation attached to a search-grounded response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundingSource {
    pub title: String,
    pub uri: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OracleResponse {
    pub text: String,
    pub grounding: Vec<GroundingSource>,
}

impl OracleResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            grounding: Vec::new(),
        }
    }
}

/// Request/response contract every completion backend implements
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn generate(&self, request: &OracleRequest) -> Result<OracleResponse>;
}

/// Google Generative Language REST client
pub struct GeminiOracle {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiOracle {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

pub(crate) fn gemini_body(request: &OracleRequest) -> Value {
    let parts: Vec<Value> = request
        .parts
        .iter()
        .map(|part| match part {
            ContentPart::Text(text) => json!({ "text": text }),
            ContentPart::Inline { mime_type, data } => json!({
                "inlineData": { "mimeType": mime_type, "data": STANDARD.encode(data) }
            }),
        })
        .collect();

    let mut generation_config = json!({ "temperature": request.temperature });
    if let Some(max) = request.max_output_tokens {
        generation_config["maxOutputTokens"] = json!(max);
    }
    if let Some(schema) = &request.response_schema {
        generation_config["responseMimeType"] = json!("application/json");
        generation_config["responseSchema"] = schema.clone();
    }

    let mut body = json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": generation_config,
    });
    if let Some(instruction) = request
        .system_instruction
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        body["systemInstruction"] = json!({ "parts": [{ "text": instruction }] });
    }
    if request.use_search {
        body["tools"] = json!([{ "googleSearch": {} }]);
    }
    body
}

pub(crate) fn parse_gemini_response(body: &Value) -> OracleResponse {
    let candidate = &body["candidates"][0];
    let text = candidate["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .collect::<String>()
        })
        .unwrap_or_default();

    let grounding = candidate["groundingMetadata"]["groundingChunks"]
        .as_array()
        .map(|chunks| {
            chunks
                .iter()
                .filter_map(|chunk| {
                    let uri = chunk["web"]["uri"].as_str()?;
                    let title = chunk["web"]["title"]
                        .as_str()
                        .filter(|t| !t.is_empty())
                        .unwrap_or(uri);
                    Some(GroundingSource {
                        title: title.to_string(),
                        uri: uri.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    OracleResponse { text, grounding }
}

fn transport_error(error: reqwest::Error) -> CouncilError {
    let kind = if error.is_timeout() {
        "timeout"
    } else if error.is_connect() {
        "connection refused"
    } else {
        "network failure"
    };
    CouncilError::Oracle(format!("Gemini request {}: {}", kind, error))
}

#[async_trait]
impl Oracle for GeminiOracle {
    async fn generate(&self, request: &OracleRequest) -> Result<OracleResponse> {
        let url = format!("{}/models/{}:generateContent", self.base_url, request.model);
        debug!(model = %request.model, parts = request.parts.len(), "Calling Gemini");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&gemini_body(request))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail: String = detail.chars().take(300).collect();
            let message = if status.as_u16() == 503 {
                format!("Gemini API error (503 unavailable, model overloaded): {}", detail)
            } else {
                format!("Gemini API error ({}): {}", status, detail)
            };
            return Err(CouncilError::Oracle(message));
        }

        let body: Value = response.json().await.map_err(transport_error)?;
        Ok(parse_gemini_response(&body))
    }
}

#[cfg(feature = "rig")]
pub use self::rig_oracle::RigOracle;

#[cfg(feature = "rig")]
mod rig_oracle {
    use super::*;
    use rig::client::CompletionClient;
    use rig::completion::Prompt;
    use rig::providers::openrouter;
    use tracing::warn;

    /// OpenRouter chat client built on rig. Text only: inline attachments
    /// are replaced by a note and schemas are appended to the prompt.
    pub struct RigOracle {
        client: openrouter::Client,
    }

    impl RigOracle {
        pub fn new(api_key: &str) -> Self {
            Self {
                client: openrouter::Client::new(api_key),
            }
        }
    }

    #[async_trait]
    impl Oracle for RigOracle {
        async fn generate(&self, request: &OracleRequest) -> Result<OracleResponse> {
            let mut prompt = request.prompt_text();

            let attachments = request.inline_count();
            if attachments > 0 {
                warn!(
                    model = %request.model,
                    attachments,
                    "OpenRouter client is text-only, dropping inline attachments"
                );
                prompt.push_str(&format!(
                    "\n\n[{} attached file(s) could not be transmitted to this model.]",
                    attachments
                ));
            }
            if request.use_search {
                warn!(model = %request.model, "Search grounding is not available over OpenRouter");
            }
            if let Some(schema) = &request.response_schema {
                prompt.push_str(&format!(
                    "\n\nRespond ONLY with JSON conforming to this schema, no prose:\n{}",
                    schema
                ));
            }

            let mut builder = self
                .client
                .agent(&request.model)
                .temperature(request.temperature as f64);
            if let Some(instruction) = &request.system_instruction {
                builder = builder.preamble(instruction);
            }
            if let Some(max) = request.max_output_tokens {
                builder = builder.max_tokens(max as u64);
            }
            let agent = builder.build();

            let text = agent
                .prompt(prompt.as_str())
                .await
                .map_err(|e| CouncilError::Oracle(format!("OpenRouter request failed: {}", e)))?;
            Ok(OracleResponse::text(text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> OracleRequest {
        OracleRequest {
            model: "gemini-3-flash-preview".to_string(),
            parts: vec![
                ContentPart::Text("hello".to_string()),
                ContentPart::Inline {
                    mime_type: "image/png".to_string(),
                    data: vec![1, 2, 3],
                },
            ],
            system_instruction: Some("be brief".to_string()),
            temperature: 0.15,
            max_output_tokens: Some(640),
            response_schema: Some(json!({"type": "OBJECT"})),
            use_search: true,
        }
    }

    #[test]
    fn test_gemini_body_shape() {
        let body = gemini_body(&request());
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["contents"][0]["parts"][1]["inlineData"]["data"], "AQID");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 640);
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert!(body["tools"][0]["googleSearch"].is_object());
    }

    #[test]
    fn test_plain_request_omits_optional_config() {
        let mut plain = request();
        plain.response_schema = None;
        plain.use_search = false;
        plain.max_output_tokens = None;
        plain.system_instruction = None;

        let body = gemini_body(&plain);
        assert!(body.get("tools").is_none());
        assert!(body.get("systemInstruction").is_none());
        assert!(body["generationConfig"].get("responseSchema").is_none());
        assert!(body["generationConfig"].get("maxOutputTokens").is_none());
    }

    #[test]
    fn test_response_text_and_grounding() {
        let body = json!({
            "candidates": [{
                "content": {"parts": [{"text": "Guideline "}, {"text": "summary"}]},
                "groundingMetadata": {"groundingChunks": [
                    {"web": {"uri": "https://who.int/a", "title": "WHO"}},
                    {"web": {"uri": "https://ssv.uz/b"}},
                    {"retrievedContext": {}}
                ]}
            }]
        });
        let response = parse_gemini_response(&body);
        assert_eq!(response.text, "Guideline summary");
        assert_eq!(response.grounding.len(), 2);
        assert_eq!(response.grounding[1].title, "https://ssv.uz/b");
    }
}

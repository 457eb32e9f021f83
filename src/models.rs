use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::GatewaySettings;

// One chat message; content is relayed as-is (string or multi-part array)
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: Value,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
}

impl ResponseFormat {
    pub fn json_object() -> Self {
        Self {
            kind: "json_object".to_string(),
        }
    }
}

// Payload accepted from the browser
#[derive(Debug, Deserialize, Clone)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    #[serde(default)]
    pub stream: bool,
    pub response_format: Option<ResponseFormat>,
    pub use_case: Option<String>,
}

impl ChatRequest {
    pub fn wants_json(&self) -> bool {
        self.response_format
            .as_ref()
            .is_some_and(|f| f.kind == "json_object")
    }
}

// Payload sent to the upstream aggregator
#[derive(Debug, Serialize)]
pub struct UpstreamRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub max_tokens: u32,
    pub temperature: f64,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

impl<'a> UpstreamRequest<'a> {
    pub fn build(req: &'a ChatRequest, settings: &'a GatewaySettings) -> Self {
        Self {
            model: &settings.model,
            messages: &req.messages,
            max_tokens: req.max_tokens.unwrap_or(settings.default_max_tokens),
            temperature: req.temperature.unwrap_or(settings.default_temperature),
            stream: req.stream,
            response_format: req.wants_json().then(ResponseFormat::json_object),
        }
    }
}

// Structured error object some upstream failures carry
#[derive(Debug, Deserialize)]
pub struct UpstreamErrorBody {
    pub error: UpstreamErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct UpstreamErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<Value>,
}

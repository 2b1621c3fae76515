use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::RgbImage;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::retry::{RetryPolicy, classify_failure, retry_after, with_backoff};
use super::{SemanticFuture, SemanticSource, encode_page, parse_semantic_value};
use crate::error::{RemoteError, RemoteResult};
use crate::settings::RemoteSettings;

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const TOOL_NAME: &str = "report_balloons";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Gemini vision model asked, through a forced function call, to list every
/// speech balloon with its text, translation and rough box.
#[derive(Debug, Clone)]
pub struct Gemini {
    key: String,
    model: String,
    target_lang: String,
    max_dimension: u32,
    jpeg_quality: u8,
    retry: RetryPolicy,
    base_url: String,
}

impl Gemini {
    pub fn new(key: impl Into<String>, settings: &RemoteSettings) -> Self {
        Self {
            key: key.into(),
            model: settings.model.clone(),
            target_lang: settings.target_lang.clone(),
            max_dimension: settings.max_dimension,
            jpeg_quality: settings.jpeg_quality,
            retry: RetryPolicy::new(
                settings.max_attempts,
                Duration::from_millis(settings.base_delay_ms),
            ),
            base_url: BASE_URL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request_body(&self, jpeg: &[u8]) -> Value {
        json!({
            "contents": [
                {
                    "role": "user",
                    "parts": [
                        {"text": user_prompt(&self.target_lang)},
                        {
                            "inline_data": {
                                "mime_type": "image/jpeg",
                                "data": BASE64.encode(jpeg)
                            }
                        }
                    ]
                }
            ],
            "systemInstruction": {"parts": [{"text": SYSTEM_PROMPT}]},
            "tools": [
                {
                    "function_declarations": [
                        {
                            "name": TOOL_NAME,
                            "description": "Report every speech balloon found on the page.",
                            "parameters": tool_parameters()
                        }
                    ]
                }
            ],
            "tool_config": {
                "function_calling_config": {
                    "mode": "ANY",
                    "allowed_function_names": [TOOL_NAME]
                }
            }
        })
    }
}

impl SemanticSource for Gemini {
    fn analyze(&self, image: Arc<RgbImage>) -> SemanticFuture {
        let this = self.clone();
        Box::pin(async move {
            let jpeg = encode_page(&image, this.max_dimension, this.jpeg_quality)?;
            let body = this.request_body(&jpeg);
            let url = format!("{}/{}:generateContent", this.base_url, this.model);
            let client = reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()?;
            info!(model = %this.model, bytes = jpeg.len(), "requesting balloon analysis");

            let args = with_backoff("Gemini", this.retry, |attempt| {
                let request = client
                    .post(&url)
                    .header("x-goog-api-key", this.key.clone())
                    .json(&body);
                async move {
                    debug!(attempt, "Gemini request");
                    let response = request.send().await?;
                    let status = response.status();
                    let hint = retry_after(response.headers());
                    let text = response.text().await.unwrap_or_default();
                    if status.is_success() {
                        return extract_tool_args(&text, TOOL_NAME);
                    }
                    let message = extract_gemini_error(&text).unwrap_or_else(|| text.clone());
                    Err(classify_failure(status, &text, message, hint))
                }
            })
            .await?;

            parse_semantic_value(args)
        })
    }
}

const SYSTEM_PROMPT: &str = "You read comic and manga pages. Find every speech balloon, \
thought bubble and caption box. Ignore sound effects drawn into the artwork. Report boxes \
as [ymin, xmin, ymax, xmax] on a 0-1000 grid relative to the full page.";

fn user_prompt(target_lang: &str) -> String {
    format!(
        "List the balloons on this page in reading order. For each one give the original \
text, a natural translation into '{}', whether it should be translated (false for \
untranslatable sound effects or signatures), its shape (oval, rectangle, cloud or jagged), \
box_2d and, if you can tell, the center_point as [y, x].",
        target_lang
    )
}

fn tool_parameters() -> Value {
    json!({
        "type": "object",
        "properties": {
            "balloons": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "original_text": {"type": "string"},
                        "translated_text": {"type": "string"},
                        "should_translate": {"type": "boolean"},
                        "shape": {
                            "type": "string",
                            "enum": ["oval", "rectangle", "cloud", "jagged"]
                        },
                        "box_2d": {
                            "type": "array",
                            "items": {"type": "integer"}
                        },
                        "center_point": {
                            "type": "array",
                            "items": {"type": "integer"}
                        }
                    },
                    "required": [
                        "original_text",
                        "translated_text",
                        "should_translate",
                        "shape",
                        "box_2d"
                    ]
                }
            }
        },
        "required": ["balloons"]
    })
}

fn extract_tool_args(text: &str, tool_name: &str) -> RemoteResult<Value> {
    let payload: GeminiResponse = serde_json::from_str(text).map_err(|err| {
        RemoteError::InvalidResponse(format!("failed to parse Gemini response JSON: {}", err))
    })?;
    let candidate = payload
        .candidates
        .first()
        .and_then(|candidate| candidate.content.as_ref())
        .ok_or_else(|| RemoteError::InvalidResponse("no candidate returned".to_string()))?;

    for part in &candidate.parts {
        if let Some(function_call) = &part.function_call
            && function_call.name == tool_name
        {
            if let Some(usage) = &payload.usage_metadata {
                debug!(
                    prompt = ?usage.prompt_token_count,
                    total = ?usage.total_token_count,
                    "Gemini usage"
                );
            }
            return Ok(function_call.args.clone());
        }
    }

    Err(RemoteError::InvalidResponse(
        "no tool call returned from Gemini".to_string(),
    ))
}

fn extract_gemini_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<GeminiError>,
    }

    #[derive(Deserialize)]
    struct GeminiError {
        message: Option<String>,
        status: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    let mut parts = Vec::new();
    if let Some(message) = error.message
        && !message.trim().is_empty()
    {
        parts.push(message);
    }
    if let Some(status) = error.status
        && !status.trim().is_empty()
    {
        parts.push(format!("status: {}", status));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" | "))
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u64>,
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(rename = "functionCall")]
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

use std::env;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use vignette_contracts::images::ImageRef;
use vignette_contracts::providers::NamedProvider;

use super::{
    non_empty_env, BackendModels, EditOptions, GenerativeBackend, ImageRequestOptions, OutputKind,
    ReplyPart,
};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_TIMEOUT_S: f64 = 120.0;
const DEFAULT_TRANSPORT_RETRIES: usize = 2;
const DEFAULT_RETRY_BACKOFF_S: f64 = 1.2;
const SQUARE_ASPECT_RATIO: &str = "1:1";

pub struct GeminiBackend {
    api_base: String,
    http: HttpClient,
    models: BackendModels,
    timeout_s: f64,
    transport_retries: usize,
    retry_backoff_s: f64,
}

impl GeminiBackend {
    pub fn new(models: BackendModels) -> Self {
        Self {
            api_base: env::var("GEMINI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            http: HttpClient::new(),
            models,
            timeout_s: env_f64("GEMINI_REQUEST_TIMEOUT", DEFAULT_TIMEOUT_S, 15.0, 600.0),
            transport_retries: env_f64(
                "GEMINI_TRANSPORT_RETRIES",
                DEFAULT_TRANSPORT_RETRIES as f64,
                0.0,
                4.0,
            )
            .round() as usize,
            retry_backoff_s: env_f64("GEMINI_RETRY_BACKOFF", DEFAULT_RETRY_BACKOFF_S, 0.1, 10.0),
        }
    }

    pub fn models(&self) -> &BackendModels {
        &self.models
    }

    fn api_key() -> Option<String> {
        non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    fn require_api_key() -> Result<String> {
        let Some(api_key) = Self::api_key() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        Ok(api_key)
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn default_safety_settings() -> Vec<Value> {
        [
            "HARM_CATEGORY_HARASSMENT",
            "HARM_CATEGORY_HATE_SPEECH",
            "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            "HARM_CATEGORY_DANGEROUS_CONTENT",
        ]
        .into_iter()
        .map(|category| {
            json!({
                "category": category,
                "threshold": "BLOCK_ONLY_HIGH",
            })
        })
        .collect()
    }

    /// Sprite sheet requests (image + text out) also pin a square aspect.
    fn edit_payload(image: &ImageRef, instruction: &str, options: &EditOptions) -> Value {
        let parts = vec![
            json!({
                "inlineData": {
                    "mimeType": image.mime_type(),
                    "data": image.to_base64(),
                }
            }),
            json!({ "text": instruction }),
        ];
        match options.output {
            OutputKind::ImageOnly => Self::build_payload(parts, &["IMAGE"], None),
            OutputKind::ImageWithText => {
                Self::build_payload(parts, &["TEXT", "IMAGE"], Some(SQUARE_ASPECT_RATIO))
            }
        }
    }

    fn build_payload(parts: Vec<Value>, modalities: &[&str], aspect_ratio: Option<&str>) -> Value {
        let mut generation_config = Map::new();
        generation_config.insert(
            "responseModalities".to_string(),
            Value::Array(
                modalities
                    .iter()
                    .map(|value| Value::String((*value).to_string()))
                    .collect(),
            ),
        );
        if let Some(aspect_ratio) = aspect_ratio {
            generation_config.insert(
                "imageConfig".to_string(),
                json!({ "aspectRatio": aspect_ratio }),
            );
        }
        json!({
            "contents": [{
                "role": "user",
                "parts": parts,
            }],
            "generationConfig": generation_config,
            "safetySettings": Self::default_safety_settings(),
        })
    }

    fn post_with_transport_retries(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
    ) -> Result<HttpResponse> {
        for attempt in 0..=self.transport_retries {
            let response = self
                .http
                .post(endpoint)
                .query(&[("key", api_key)])
                .timeout(Duration::from_secs_f64(self.timeout_s))
                .json(payload)
                .send();

            match response {
                Ok(ok) => return Ok(ok),
                Err(raw) => {
                    let err = anyhow::Error::new(raw)
                        .context(format!("Gemini request failed ({endpoint})"));
                    if !is_retryable_transport_error(&err) || attempt >= self.transport_retries {
                        return Err(err);
                    }
                    warn!(
                        attempt = attempt + 1,
                        max = self.transport_retries,
                        "Gemini transport retry after transient request failure"
                    );
                    let delay_s = self.retry_backoff_s * (attempt as f64 + 1.0);
                    thread::sleep(Duration::from_secs_f64(delay_s));
                }
            }
        }

        unreachable!("Gemini transport retry loop should always return a response or error")
    }

    fn call(&self, model: &str, payload: &Value) -> Result<Vec<ReplyPart>> {
        let api_key = Self::require_api_key()?;
        let endpoint = self.endpoint_for_model(model);
        debug!(%model, "Gemini generateContent");
        let response = self.post_with_transport_retries(&endpoint, &api_key, payload)?;
        let response_payload = response_json_or_error("Gemini", response)?;
        extract_reply_parts(&response_payload)
    }
}

impl NamedProvider for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }
}

impl GenerativeBackend for GeminiBackend {
    fn compose_text(&self, prompt: &str) -> Result<String> {
        let payload = Self::build_payload(vec![json!({ "text": prompt })], &["TEXT"], None);
        let parts = self.call(&self.models.text, &payload)?;
        let text = parts
            .into_iter()
            .filter_map(|part| match part {
                ReplyPart::Text(text) => Some(text),
                ReplyPart::Image(_) => None,
            })
            .collect::<Vec<String>>()
            .join("\n");
        Ok(text.trim().to_string())
    }

    fn generate_image(
        &self,
        prompt: &str,
        options: &ImageRequestOptions,
    ) -> Result<Vec<ImageRef>> {
        let payload = Self::build_payload(
            vec![json!({ "text": prompt })],
            &["IMAGE"],
            Some(options.aspect_ratio.as_str()),
        );
        let images = self
            .call(&self.models.image, &payload)?
            .into_iter()
            .filter_map(|part| match part {
                ReplyPart::Image(image) => Some(image),
                ReplyPart::Text(_) => None,
            })
            .take(options.count.max(1) as usize)
            .collect();
        Ok(images)
    }

    fn edit_image(
        &self,
        image: &ImageRef,
        instruction: &str,
        options: &EditOptions,
    ) -> Result<Vec<ReplyPart>> {
        let payload = Self::edit_payload(image, instruction, options);
        self.call(&self.models.edit, &payload)
    }
}

/// Flattens `candidates[].content.parts[]` into reply parts, keeping order.
fn extract_reply_parts(response_payload: &Value) -> Result<Vec<ReplyPart>> {
    let candidates = response_payload
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut out = Vec::new();

    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(Value::as_object)
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                if !text.trim().is_empty() {
                    out.push(ReplyPart::Text(text.to_string()));
                }
                continue;
            }
            let inline = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .unwrap_or("image/png");
            let image = ImageRef::from_base64(mime_type, data)
                .context("Gemini image base64 decode failed")?;
            out.push(ReplyPart::Image(image));
        }
    }

    Ok(out)
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn is_retryable_transport_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|reqwest_err| {
                reqwest_err.is_timeout() || reqwest_err.is_connect() || reqwest_err.is_request()
            })
            .unwrap_or(false)
    })
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn env_f64(key: &str, default: f64, min: f64, max: f64) -> f64 {
    non_empty_env(key)
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}

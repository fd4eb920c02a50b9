use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{error, info};

use crate::error::ApiError;
use crate::models::Alternatives;

const RETRY_BACKOFF: Duration = Duration::from_millis(500);
const MAX_ATTEMPTS: u32 = 2;

/// Source of budget-friendly alternatives for a medicine name.
#[async_trait]
pub trait AlternativesProvider: Send + Sync {
    async fn fetch_alternatives(&self, medicine_name: &str) -> Result<Alternatives, ApiError>;
}

#[derive(Clone)]
pub struct GeminiClient {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    client: Client,
}

enum Attempt {
    Retryable(String),
    Fatal(ApiError),
}

impl GeminiClient {
    pub fn new(
        endpoint: &str,
        model: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    async fn generate(&self, api_key: &str, body: &Value) -> Result<Value, Attempt> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let resp = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .json(body)
            .send()
            .await
            .map_err(|e| Attempt::Retryable(format!("Gemini request err: {}", e)))?;

        let status = resp.status();
        info!("Gemini status: {}", status);

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            error!("Gemini Http {}: {}", status, text);
            if !is_retryable(status) {
                return Err(Attempt::Fatal(ApiError::UpstreamError(format!(
                    "Failed to fetch alternatives: {}",
                    status.as_u16()
                ))));
            }
            return Err(Attempt::Retryable(format!("Gemini Http {}", status)));
        }

        resp.json::<Value>()
            .await
            .map_err(|e| Attempt::Retryable(format!("Gemini JSON decode err: {}", e)))
    }
}

#[async_trait]
impl AlternativesProvider for GeminiClient {
    async fn fetch_alternatives(&self, medicine_name: &str) -> Result<Alternatives, ApiError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ApiError::ServiceUnavailable("Search is not configured".to_string()))?;
        let body = request_body(medicine_name);

        let mut attempt = 1;
        let response = loop {
            match self.generate(api_key, &body).await {
                Ok(value) => break value,
                Err(Attempt::Fatal(err)) => return Err(err),
                Err(Attempt::Retryable(reason)) => {
                    error!("Gemini attempt {} failed: {}", attempt, reason);
                    if attempt >= MAX_ATTEMPTS {
                        return Err(ApiError::UpstreamError(
                            "Failed to fetch alternatives".to_string(),
                        ));
                    }
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
            }
        };

        let text = model_text(&response).ok_or_else(|| {
            error!("Unexpected Gemini response shape: {}", response);
            ApiError::UpstreamError("Unexpected response structure from Gemini API".to_string())
        })?;

        parse_alternatives(text)
    }
}

/// Client errors, 429 included, are not retried.
fn is_retryable(status: StatusCode) -> bool {
    !status.is_client_error()
}

fn prompt(medicine_name: &str) -> String {
    format!(
        r#"ACT AS A MEDICAL EXPERT AND PHARMACIST. Find 3-5 BUDGET-FRIENDLY brand name alternatives for the medicine: "{medicine_name}".

RETURN PURE JSON ONLY - NO MARKDOWN, NO EXPLANATIONS, NO CODE BLOCKS.

REQUIRED JSON FORMAT:
{{
  "alternatives": [
    {{"name": "Brand Name 1", "price": "XXX INR", "link": null}},
    {{"name": "Brand Name 2", "price": "XXX INR", "link": null}}
  ]
}}

CRITICAL RULES:
1. Return only BRAND NAMES (commercial names), not chemical/generic names
2. All medicines must be available in Indian market
3. PRIORITIZE BUDGET/ECONOMY brands and generic manufacturers
4. Price should be in INR format like "80-120 INR", "150 INR"
5. Focus on alternatives that cost UNDER 200 INR when possible
6. Include brands from manufacturers like: Sun Pharma, Cipla, Dr. Reddy's, Lupin, Mankind, Alkem, etc.
7. Avoid premium/expensive brands unless no cheaper options exist
8. Always return at least 3-4 alternatives
9. If no link available, use "link": null
10. NO ADDITIONAL TEXT - ONLY VALID JSON"#
    )
}

fn request_body(medicine_name: &str) -> Value {
    json!({
        "contents": [
            { "parts": [ { "text": prompt(medicine_name) } ] }
        ]
    })
}

fn model_text(response: &Value) -> Option<&str> {
    response
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .or_else(|| response.get("text").and_then(Value::as_str))
}

fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}

/// Parses model output into alternatives, tolerating prose around the JSON.
pub fn parse_alternatives(text: &str) -> Result<Alternatives, ApiError> {
    let cleaned = strip_code_fence(text);
    let value: Value = serde_json::from_str(cleaned)
        .ok()
        .or_else(|| embedded_json(cleaned))
        .ok_or_else(|| {
            ApiError::UpstreamError("Could not parse JSON from model output".to_string())
        })?;

    // A bare array is accepted as the alternatives list.
    let value = match value {
        Value::Array(items) => json!({ "alternatives": items }),
        other => other,
    };

    serde_json::from_value(value).map_err(|e| {
        ApiError::UpstreamError(format!("Model output has unexpected shape: {}", e))
    })
}

fn embedded_json(text: &str) -> Option<Value> {
    let start = text.find(['{', '['])?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_are_not_retried() {
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
        assert!(!is_retryable(StatusCode::FORBIDDEN));
        assert!(!is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[test]
    fn test_model_text_shapes() {
        let nested = json!({"candidates":[{"content":{"parts":[{"text":"hello"}]}}]});
        assert_eq!(model_text(&nested), Some("hello"));
        let flat = json!({"text":"flat"});
        assert_eq!(model_text(&flat), Some("flat"));
        assert_eq!(model_text(&json!({"other":1})), None);
    }

    #[test]
    fn test_parse_fenced_output() {
        let text = "```json\n{\"alternatives\":[{\"name\":\"Calpol\",\"price\":\"30 INR\",\"link\":null}]}\n```";
        let parsed = parse_alternatives(text).unwrap();
        assert_eq!(parsed.alternatives.len(), 1);
        assert_eq!(parsed.alternatives[0].name, "Calpol");
        assert_eq!(parsed.alternatives[0].price, "30 INR");
    }

    #[test]
    fn test_parse_json_wrapped_in_prose() {
        let text = "Sure! Here you go: {\"alternatives\":[{\"name\":\"Pacimol\",\"price\":\"25 INR\"}]} Hope this helps.";
        let parsed = parse_alternatives(text).unwrap();
        assert_eq!(parsed.alternatives[0].name, "Pacimol");
    }

    #[test]
    fn test_parse_bare_array() {
        let parsed = parse_alternatives(r#"[{"name":"Dolo 650","price":"30 INR"}]"#).unwrap();
        assert_eq!(parsed.alternatives[0].name, "Dolo 650");
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(matches!(
            parse_alternatives("no json here"),
            Err(ApiError::UpstreamError(_))
        ));
    }

    #[test]
    fn test_prompt_mentions_medicine() {
        let body = request_body("Crocin");
        let text = body
            .pointer("/contents/0/parts/0/text")
            .and_then(Value::as_str)
            .unwrap();
        assert!(text.contains("\"Crocin\""));
    }

    #[tokio::test]
    async fn test_missing_api_key_is_unavailable() {
        let client =
            GeminiClient::new("http://127.0.0.1:9", "m", None, Duration::from_secs(1)).unwrap();
        assert!(matches!(
            client.fetch_alternatives("Crocin").await,
            Err(ApiError::ServiceUnavailable(_))
        ));
    }
}

//! LLM duplicate judge.
//!
//! Implements the core's [`Verifier`] against an OpenAI-compatible chat
//! completions endpoint (`OpenAI`, `DeepSeek`, Ollama). The model sees both
//! reports and answers with one word. Anything other than a clear
//! `DUPLICATE` or `DISTINCT` is `Unknown`, which the deduplicator treats as
//! "fall back to the fingerprint".

use async_trait::async_trait;
use geofusion_core::config::VerificationConfig;
use geofusion_core::verify::{Verdict, Verifier, VerifyError};
use geofusion_types::Event;

use crate::error::EngineError;

const SYSTEM_PROMPT: &str = "You compare two intelligence reports that were filed \
for the same place and time. Answer DUPLICATE if they describe the same real-world \
occurrence, DISTINCT if they describe different occurrences, or UNKNOWN if you \
cannot tell. Answer with exactly one word.";

/// Duplicate judge backed by a chat completions API.
pub struct LlmJudge {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl LlmJudge {
    /// Build a judge from the verification settings.
    ///
    /// The HTTP client carries no timeout of its own; the core's guard
    /// enforces `verification.timeout_ms` around every call.
    pub fn new(config: &VerificationConfig) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| EngineError::Http {
                message: format!("judge client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Verifier for LlmJudge {
    async fn judge(&self, a: &Event, b: &Event) -> Result<Verdict, VerifyError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": render_pair(a, b)}
            ],
            "temperature": 0.0,
            "max_tokens": 4
        });

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| VerifyError::Backend(format!("judge request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_owned());
            return Err(VerifyError::Backend(format!(
                "judge returned {status}: {error_body}"
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| VerifyError::Backend(format!("judge response parse failed: {e}")))?;

        let content = extract_content(&json)?;
        Ok(parse_verdict(&content))
    }
}

fn render_pair(a: &Event, b: &Event) -> String {
    format!(
        "Report A ({source_a}, {time_a}): {title_a}\n{desc_a}\n\n\
         Report B ({source_b}, {time_b}): {title_b}\n{desc_b}",
        source_a = a.source,
        time_a = a.timestamp.to_rfc3339(),
        title_a = a.title,
        desc_a = a.description,
        source_b = b.source,
        time_b = b.timestamp.to_rfc3339(),
        title_b = b.title,
        desc_b = b.description,
    )
}

/// Extract the text content from a chat completions response.
fn extract_content(json: &serde_json::Value) -> Result<String, VerifyError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(serde_json::Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| {
            VerifyError::Backend("judge response missing choices[0].message.content".to_owned())
        })
}

/// Map the model's answer onto a verdict. Ambiguous answers are `Unknown`.
fn parse_verdict(answer: &str) -> Verdict {
    let answer = answer.to_ascii_uppercase();
    match (answer.contains("DUPLICATE"), answer.contains("DISTINCT")) {
        (true, false) => Verdict::Duplicate,
        (false, true) => Verdict::Distinct,
        _ => Verdict::Unknown,
    }
}

// =============================================================================
// LLM chat-completion client — streaming + non-streaming
// =============================================================================
//
// The provider itself is out of scope: this models only the operations named
// (§6 "LLM provider"): a chat-completion call taking `messages`, `temperature`,
// `use_json_mode`, `stream`, `timeout`, `session_id`, with streaming chunks
// shaped `choices[0].delta.content`. Built in the same request/decode idiom as
// `okx::client` rather than pulling in a dedicated LLM SDK crate.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use serde::Serialize;
use tracing::{instrument, warn};

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

/// Chat-completion client shared by the streaming decision engine (C8) and
/// the review generator (C10).
#[derive(Clone)]
pub struct LlmClient {
    config: LlmConfig,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let client = reqwest::Client::builder().build().expect("failed to build reqwest client");
        Self { config, client }
    }

    fn request(&self, system: &str, user: &str, temperature: f64, stream: bool, use_json_mode: bool, session_id: &str) -> ChatRequest<'_> {
        ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage { role: "system", content: system }, ChatMessage { role: "user", content: user }],
            temperature,
            stream,
            response_format: use_json_mode.then_some(ResponseFormat { kind: "json_object" }),
            user: Some(session_id),
        }
    }

    /// Non-streaming call used by the review generator (fixed 60s timeout).
    #[instrument(skip(self, system, user), fields(model = %self.config.model))]
    pub async fn complete(&self, system: &str, user: &str, session_id: &str, timeout: Duration) -> Result<String> {
        let body = self.request(system, user, 0.3, false, false, session_id);
        let url = format!("{}/chat/completions", self.config.api_base);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .context("LLM completion request failed")?;

        let status = resp.status();
        let value: serde_json::Value = resp.json().await.context("failed to parse LLM response body")?;
        if !status.is_success() {
            anyhow::bail!("LLM completion returned status {status}: {value}");
        }

        value["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .context("LLM response missing choices[0].message.content")
    }

    /// Streaming call used by the decision engine. Invokes `on_chunk` for
    /// every non-empty `delta.content` fragment as it arrives and returns the
    /// fully accumulated text once the stream closes.
    #[instrument(skip(self, system, user, on_chunk), fields(model = %self.config.model))]
    pub async fn stream_complete<F>(&self, system: &str, user: &str, session_id: &str, mut on_chunk: F) -> Result<String>
    where
        F: FnMut(&str) + Send,
    {
        let body = self.request(system, user, 0.3, true, true, session_id);
        let url = format!("{}/chat/completions", self.config.api_base);
        let timeout = Duration::from_secs(self.config.timeout_secs);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .context("LLM stream request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("LLM stream returned status {status}: {text}");
        }

        let mut accumulated = String::new();
        let mut byte_stream = resp.bytes_stream();
        let mut carry = String::new();

        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.context("LLM stream read error")?;
            carry.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(idx) = carry.find('\n') {
                let line = carry[..idx].trim().to_string();
                carry.drain(..=idx);
                if line.is_empty() {
                    continue;
                }
                let Some(payload) = line.strip_prefix("data:") else { continue };
                let payload = payload.trim();
                if payload == "[DONE]" {
                    return Ok(accumulated);
                }
                match serde_json::from_str::<serde_json::Value>(payload) {
                    Ok(event) => {
                        if let Some(delta) = event["choices"][0]["delta"]["content"].as_str() {
                            if !delta.is_empty() {
                                accumulated.push_str(delta);
                                on_chunk(delta);
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to decode LLM stream event"),
                }
            }
        }

        Ok(accumulated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_sets_json_mode_only_when_requested() {
        let config = LlmConfig { api_base: "https://api.example.com".to_string(), api_key: "k".to_string(), model: "m".to_string(), timeout_secs: 30 };
        let client = LlmClient::new(config);
        let with_json = client.request("sys", "usr", 0.3, true, true, "s1");
        assert!(with_json.response_format.is_some());
        let without_json = client.request("sys", "usr", 0.3, false, false, "s1");
        assert!(without_json.response_format.is_none());
    }
}

//! LLM HTTP client for OpenAI-compatible chat-completion and embeddings APIs.

use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;

use crate::config::LlmConfig;

use super::models::*;

/// Stateless HTTP client bound to one configured provider endpoint. Unlike
/// the multi-provider admin surface this is descended from, there is no
/// provider CRUD or DB-backed response cache here — caching at the
/// query/session level is the Query Cache's job, not the LLM client's.
pub struct LlmClient {
    http: Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.llm_timeout_secs))
            .build()
            .expect("failed to build LLM HTTP client");
        Self { http, config }
    }

    /// Call chat completion with a system prompt plus a serialized user payload,
    /// deserializing the model's JSON response into `Resp`.
    pub async fn chat_json<Req, Resp>(
        &self,
        system_prompt: &str,
        request: &Req,
    ) -> Result<Resp, LlmError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let user_prompt = serde_json::to_string_pretty(request)?;
        self.chat_json_raw(system_prompt, &user_prompt).await
    }

    /// Same as [`chat_json`](Self::chat_json) but takes the user message as a
    /// plain string (used where the prompt is assembled by hand rather than
    /// serialized from a request struct, e.g. schema + memory + question).
    ///
    /// If the model's content doesn't parse as the expected JSON shape, this
    /// makes exactly one repair attempt: it re-sends the same messages plus
    /// the unparseable content and the parse error, asking for a corrected
    /// JSON response. A second failure surfaces as `ParseError` rather than
    /// retrying again.
    pub async fn chat_json_raw<Resp>(&self, system_prompt: &str, user_prompt: &str) -> Result<Resp, LlmError>
    where
        Resp: DeserializeOwned,
    {
        let content = self.complete(system_prompt, user_prompt).await?;
        match serde_json::from_str(&content) {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                tracing::warn!(error = %e, "LLM response did not parse as JSON, attempting one repair round-trip");
                let repair_prompt = format!(
                    "{user_prompt}\n\nYour previous response could not be parsed as JSON: {e}\n\
                     Previous response:\n{content}\n\n\
                     Return only corrected, valid JSON matching the expected shape."
                );
                let repaired = self.complete(system_prompt, &repair_prompt).await?;
                serde_json::from_str(&repaired).map_err(|e2| {
                    LlmError::ParseError(format!("failed to parse LLM response after one repair attempt: {e2}. content: {repaired}"))
                })
            },
        }
    }

    /// Issues one chat-completion call and returns the raw message content.
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError> {
        let body = ChatCompletionRequest {
            model: self.config.chat_model.clone(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: system_prompt.to_string() },
                ChatMessage { role: "user".to_string(), content: user_prompt.to_string() },
            ],
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
            response_format: Some(ResponseFormat { r#type: "json_object".to_string() }),
        };

        let url = format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'));
        tracing::debug!(url = %url, model = %self.config.chat_model, "calling LLM chat completion");

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.config.llm_timeout_secs)
                } else {
                    LlmError::Transport(e)
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited(retry_after));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
            return Err(LlmError::ApiError(format!("API error {}: {}", status, text)));
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(LlmError::Transport)?;
        parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| LlmError::ParseError("empty response from LLM".to_string()))
    }

    /// Embed a batch of texts via the configured embeddings model.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingsRequest { model: self.config.embeddings_model.clone(), input: texts.to_vec() };
        let url = format!("{}/embeddings", self.config.api_base.trim_end_matches('/'));

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.config.llm_timeout_secs)
                } else {
                    LlmError::Transport(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
            return Err(LlmError::ApiError(format!("embeddings API error {}: {}", status, text)));
        }

        let mut parsed: EmbeddingsResponse = response.json().await.map_err(LlmError::Transport)?;
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Serialize)]
    struct Req {
        question: String,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Resp {
        sql: String,
    }

    fn config_for(base: &str) -> LlmConfig {
        LlmConfig {
            api_base: base.to_string(),
            api_key: "test-key".to_string(),
            chat_model: "gpt-test".to_string(),
            embeddings_model: "embed-test".to_string(),
            llm_timeout_secs: 5,
            max_tokens: 256,
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn chat_json_parses_model_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "{\"sql\": \"SELECT 1\"}"}}],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5}
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(config_for(&server.uri()));
        let resp: Resp = client
            .chat_json("system prompt", &Req { question: "show rows".into() })
            .await
            .unwrap();
        assert_eq!(resp, Resp { sql: "SELECT 1".into() });
    }

    #[tokio::test]
    async fn chat_json_surfaces_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
            .mount(&server)
            .await;

        let client = LlmClient::new(config_for(&server.uri()));
        let err = client.chat_json::<_, Resp>("p", &Req { question: "x".into() }).await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimited(3)));
    }

    #[tokio::test]
    async fn embed_reorders_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"embedding": [0.2], "index": 1},
                    {"embedding": [0.1], "index": 0}
                ]
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(config_for(&server.uri()));
        let vectors = client.embed(&["a".into(), "b".into()]).await.unwrap();
        assert_eq!(vectors, vec![vec![0.1], vec![0.2]]);
    }
}

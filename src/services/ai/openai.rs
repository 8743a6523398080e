use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};

use super::{ChatOutcome, ChatRequest, EmbeddingProvider, LlmProvider, ToolInvocation};
use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::services::retry::{self, RetryPolicy};

const SERVICE: &str = "openai";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// OpenAI-compatible chat, vision and embeddings client.
///
/// Every call runs through the bounded retry helper; only transient
/// failures (timeouts, 408/429/5xx) are retried.
pub struct OpenAiProvider {
    api_key: String,
    base_url: String,
    model: String,
    vision_model: String,
    embedding_model: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl OpenAiProvider {
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        vision_model: String,
        embedding_model: String,
    ) -> Self {
        Self {
            api_key,
            base_url,
            model,
            vision_model,
            embedding_model,
            client: reqwest::Client::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.openai_api_key.clone(),
            config.openai_base_url.clone(),
            config.model_default.clone(),
            config.model_vision.clone(),
            config.embedding_model.clone(),
        )
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ServiceError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(body)
            .send()
            .await
            .map_err(|e| ServiceError::from_reqwest(SERVICE, e))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ServiceError::from_reqwest(SERVICE, e))?;

        if !status.is_success() {
            return Err(ServiceError::from_status(SERVICE, status, &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| ServiceError::permanent(SERVICE, format!("invalid JSON response: {e}")))
    }

    fn chat_body(&self, request: &ChatRequest) -> Value {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let mut body = json!({
            "model": model,
            "messages": request.messages,
            "temperature": request.temperature,
        });
        if let Some(tools) = &request.tools {
            body["tools"] = Value::Array(tools.clone());
            body["tool_choice"] = Value::String("auto".to_string());
        }
        if request.json_response {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }
}

/// Turn a completion payload into the explicit outcome variant. Anything
/// that does not parse cleanly is `Malformed`, never a panic or a guess.
fn interpret_completion(data: &Value) -> ChatOutcome {
    let message = &data["choices"][0]["message"];
    if !message.is_object() {
        return ChatOutcome::Malformed(data.to_string());
    }

    if let Some(calls) = message["tool_calls"].as_array() {
        if !calls.is_empty() {
            let mut invocations = Vec::with_capacity(calls.len());
            for call in calls {
                let id = call["id"].as_str().unwrap_or_default().to_string();
                let name = call["function"]["name"].as_str().unwrap_or_default();
                let raw = call["function"]["arguments"].as_str().unwrap_or("{}");
                let Ok(arguments) = serde_json::from_str::<Value>(raw) else {
                    return ChatOutcome::Malformed(data.to_string());
                };
                if name.is_empty() {
                    return ChatOutcome::Malformed(data.to_string());
                }
                invocations.push(ToolInvocation {
                    id,
                    name: name.to_string(),
                    arguments,
                    raw_arguments: raw.to_string(),
                });
            }
            return ChatOutcome::ToolCalls(invocations);
        }
    }

    match message["content"].as_str() {
        Some(content) => ChatOutcome::Text(content.to_string()),
        None => ChatOutcome::Malformed(data.to_string()),
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatOutcome, ServiceError> {
        let body = self.chat_body(request);
        let data = retry::with_backoff(&self.retry, ServiceError::is_transient, || {
            self.post_json("/chat/completions", &body)
        })
        .await?;
        Ok(interpret_completion(&data))
    }

    async fn analyze_image(
        &self,
        image: &[u8],
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, ServiceError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let body = json!({
            "model": self.vision_model,
            "temperature": 0.3,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": [
                    {"type": "text", "text": user_prompt},
                    {"type": "image_url", "image_url": {
                        "url": format!("data:image/jpeg;base64,{encoded}")
                    }}
                ]}
            ],
        });

        let data = retry::with_backoff(&self.retry, ServiceError::is_transient, || {
            self.post_json("/chat/completions", &body)
        })
        .await?;

        data["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| ServiceError::permanent(SERVICE, "vision response missing content"))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let body = json!({
            "model": self.embedding_model,
            "input": text,
        });

        let data = retry::with_backoff(&self.retry, ServiceError::is_transient, || {
            self.post_json("/embeddings", &body)
        })
        .await?;

        let vector = data["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| ServiceError::permanent(SERVICE, "embedding response missing vector"))?
            .iter()
            .filter_map(|v| v.as_f64())
            .map(|v| v as f32)
            .collect();
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ai::ChatMessage;

    #[test]
    fn test_interpret_text_response() {
        let data = json!({
            "choices": [{"message": {"role": "assistant", "content": "Hello there"}}]
        });
        match interpret_completion(&data) {
            ChatOutcome::Text(text) => assert_eq!(text, "Hello there"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn test_interpret_tool_calls() {
        let data = json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {
                        "name": "check_calendar_availability",
                        "arguments": "{\"start_date\":\"2025-06-16\"}"
                    }
                }]
            }}]
        });
        match interpret_completion(&data) {
            ChatOutcome::ToolCalls(calls) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].name, "check_calendar_availability");
                assert_eq!(calls[0].arguments["start_date"], "2025-06-16");
            }
            other => panic!("expected tool calls, got {other:?}"),
        }
    }

    #[test]
    fn test_interpret_malformed() {
        let data = json!({"error": {"message": "upstream hiccup"}});
        assert!(matches!(
            interpret_completion(&data),
            ChatOutcome::Malformed(_)
        ));

        let bad_args = json!({
            "choices": [{"message": {
                "role": "assistant",
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "f", "arguments": "{not json"}
                }]
            }}]
        });
        assert!(matches!(
            interpret_completion(&bad_args),
            ChatOutcome::Malformed(_)
        ));
    }

    #[test]
    fn test_chat_body_shape() {
        let provider = OpenAiProvider::new(
            "key".into(),
            "https://api.openai.com/v1".into(),
            "gpt-4o".into(),
            "gpt-4o-mini".into(),
            "text-embedding-3-small".into(),
        );
        let request = ChatRequest {
            messages: vec![ChatMessage::system("sys"), ChatMessage::user("hi")],
            temperature: 0.0,
            tools: None,
            json_response: true,
            model: Some("gpt-4o-mini".into()),
        };
        let body = provider.chat_body(&request);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert!(body.get("tools").is_none());
    }
}

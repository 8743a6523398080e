pub mod intent;
pub mod openai;
pub mod prompts;
pub mod tools;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ServiceError;

/// One turn in a chat request, in OpenAI wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Echo of an assistant turn that requested tool calls.
    pub fn assistant_tool_calls(calls: &[ToolInvocation]) -> Self {
        Self {
            role: "assistant".to_string(),
            content: None,
            tool_calls: Some(calls.iter().map(ToolInvocation::to_ref).collect()),
            tool_call_id: None,
        }
    }

    /// A tool result keyed to the call that produced it.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRef {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionRef {
    pub name: String,
    pub arguments: String,
}

/// A tool call the model asked for, with its arguments already parsed.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    pub raw_arguments: String,
}

impl ToolInvocation {
    fn to_ref(&self) -> ToolCallRef {
        ToolCallRef {
            id: self.id.clone(),
            kind: "function".to_string(),
            function: FunctionRef {
                name: self.name.clone(),
                arguments: self.raw_arguments.clone(),
            },
        }
    }
}

/// What a chat completion turned into. `Malformed` carries the raw payload
/// so callers can log it; every call site handles all three variants.
#[derive(Debug, Clone)]
pub enum ChatOutcome {
    Text(String),
    ToolCalls(Vec<ToolInvocation>),
    Malformed(String),
}

impl ChatOutcome {
    /// Safe extraction: the reply text, or `fallback` when the model
    /// produced tool calls, nothing, or garbage.
    pub fn text_or(&self, fallback: &str) -> String {
        match self {
            ChatOutcome::Text(text) if !text.trim().is_empty() => text.trim().to_string(),
            ChatOutcome::Text(_) => fallback.to_string(),
            ChatOutcome::ToolCalls(_) => fallback.to_string(),
            ChatOutcome::Malformed(raw) => {
                tracing::warn!(raw = %raw, "malformed model response, using fallback");
                fallback.to_string()
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub tools: Option<Vec<Value>>,
    pub json_response: bool,
    /// Overrides the provider's default model (e.g. the classifier model).
    pub model: Option<String>,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatOutcome, ServiceError>;

    /// Vision call: describe a tattoo photo. Returns the raw analysis text.
    async fn analyze_image(
        &self,
        image: &[u8],
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, ServiceError>;
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_or_prefers_real_text() {
        let outcome = ChatOutcome::Text("  hello  ".to_string());
        assert_eq!(outcome.text_or("fallback"), "hello");
    }

    #[test]
    fn test_text_or_falls_back() {
        assert_eq!(
            ChatOutcome::Text("   ".to_string()).text_or("fallback"),
            "fallback"
        );
        assert_eq!(
            ChatOutcome::Malformed("{broken".to_string()).text_or("fallback"),
            "fallback"
        );
        assert_eq!(
            ChatOutcome::ToolCalls(vec![]).text_or("fallback"),
            "fallback"
        );
    }

    #[test]
    fn test_tool_call_wire_shape() {
        let invocation = ToolInvocation {
            id: "call_1".to_string(),
            name: "check_calendar_availability".to_string(),
            arguments: serde_json::json!({"start_date": "2025-06-16"}),
            raw_arguments: r#"{"start_date": "2025-06-16"}"#.to_string(),
        };
        let msg = ChatMessage::assistant_tool_calls(std::slice::from_ref(&invocation));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["tool_calls"][0]["type"], "function");
        assert_eq!(
            json["tool_calls"][0]["function"]["name"],
            "check_calendar_availability"
        );
        assert!(json.get("content").is_none());
    }
}

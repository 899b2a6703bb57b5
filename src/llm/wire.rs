//! OpenAI-compatible chat-completions payloads.

use crate::error::ResponseError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub response_format: ResponseFormat,
    pub max_completion_tokens: u32,
    pub temperature: f32,
}

impl ChatRequest {
    pub fn new(
        model: &str,
        system: &str,
        prompt: &str,
        format: ResponseFormat,
        max_completion_tokens: u32,
        temperature: f32,
    ) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            messages: vec![ChatMessage::new("system", system), ChatMessage::new("user", prompt)],
            response_format: format,
            max_completion_tokens,
            temperature,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: &str) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

/// `response_format` with a strict JSON schema.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub json_schema: JsonSchemaSpec,
}

impl ResponseFormat {
    pub fn strict_schema(name: &'static str, schema: serde_json::Value) -> ResponseFormat {
        ResponseFormat {
            kind: "json_schema",
            json_schema: JsonSchemaSpec {
                name,
                strict: true,
                schema,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonSchemaSpec {
    pub name: &'static str,
    pub strict: bool,
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: TokenUsage,
}

impl ChatResponse {
    /// Content of choice 0.
    pub fn first_content(&self) -> Result<&str, ResponseError> {
        self.choices
            .iter()
            .min_by_key(|c| c.index)
            .and_then(|c| c.message.content.as_deref())
            .filter(|c| !c.trim().is_empty())
            .ok_or(ResponseError::EmptyChoices)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: ResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Body of a non-success response: `{"error": {"message", "type"}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

const SNIPPET_CHARS: usize = 300;

/// Human-readable message from an error response body.
pub fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) if !envelope.error.message.is_empty() => envelope.error.message,
        _ => {
            let snippet: String = body.trim().chars().take(SNIPPET_CHARS).collect();
            if snippet.is_empty() {
                "no response body".to_string()
            } else {
                snippet
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_shape() {
        let format = ResponseFormat::strict_schema("analysis", json!({"type": "object"}));
        let req = ChatRequest::new("gpt-4o-mini", "sys", "hello", format, 2000, 0.2);
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["model"], "gpt-4o-mini");
        assert_eq!(v["messages"][0]["role"], "system");
        assert_eq!(v["messages"][1]["content"], "hello");
        assert_eq!(v["response_format"]["type"], "json_schema");
        assert_eq!(v["response_format"]["json_schema"]["name"], "analysis");
        assert_eq!(v["response_format"]["json_schema"]["strict"], true);
        assert_eq!(v["max_completion_tokens"], 2000);
    }

    #[test]
    fn test_response_parsing() {
        let body = json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini-2024",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "{\"a\":1}"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        let resp: ChatResponse = serde_json::from_value(body).unwrap();
        assert_eq!(resp.first_content().unwrap(), "{\"a\":1}");
        assert_eq!(resp.usage.total_tokens, 15);
        assert_eq!(resp.model, "gpt-4o-mini-2024");
    }

    #[test]
    fn test_empty_choices() {
        let resp: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(resp.first_content(), Err(ResponseError::EmptyChoices)));

        let null_content =
            json!({"choices": [{"message": {"role": "assistant", "content": null}}]});
        let resp: ChatResponse = serde_json::from_value(null_content).unwrap();
        assert!(matches!(resp.first_content(), Err(ResponseError::EmptyChoices)));
    }

    #[test]
    fn test_error_message() {
        let body = r#"{"error":{"message":"Rate limit reached for requests","type":"requests"}}"#;
        assert_eq!(error_message(body), "Rate limit reached for requests");
        assert_eq!(error_message("<html>bad gateway</html>"), "<html>bad gateway</html>");
        assert_eq!(error_message(""), "no response body");
    }
}

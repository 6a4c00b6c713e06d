use crate::config::CHAT_TEMPERATURE;
use crate::llm::http_utils::{create_http_client, extract_text_content, send_json_request};
use crate::llm::{CompletionApi, CompletionRequest, InlineMedia, LlmError};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde_json::{json, Value};

const OPENROUTER_CHAT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// LLM provider implementation for `OpenRouter`
pub struct OpenRouterProvider {
    http_client: HttpClient,
    api_key: String,
}

impl OpenRouterProvider {
    /// Create a new `OpenRouter` provider instance
    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self {
            http_client: create_http_client(),
            api_key,
        }
    }

    fn media_part(media: &InlineMedia) -> Value {
        if media.is_audio() {
            json!({
                "type": "input_audio",
                "input_audio": {
                    "data": media.base64(),
                    "format": audio_format(&media.mime_type)
                }
            })
        } else {
            json!({
                "type": "image_url",
                "image_url": {"url": media.data_uri()}
            })
        }
    }

    fn build_body(request: &CompletionRequest) -> Value {
        let mut messages = vec![json!({"role": "system", "content": request.system_prompt})];
        for turn in &request.history {
            messages.push(json!({"role": turn.role.as_str(), "content": turn.content}));
        }

        let content = match &request.media {
            None => json!(request.user_text),
            Some(media) => {
                let mut parts = Vec::new();
                if !request.user_text.is_empty() {
                    parts.push(json!({"type": "text", "text": request.user_text}));
                }
                parts.push(Self::media_part(media));
                Value::Array(parts)
            }
        };
        messages.push(json!({"role": "user", "content": content}));

        json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": CHAT_TEMPERATURE
        })
    }
}

/// `audio/ogg` -> `ogg`, `audio/mpeg` -> `mp3`
fn audio_format(mime_type: &str) -> &str {
    match mime_type.split_once('/').map_or(mime_type, |(_, sub)| sub) {
        "mpeg" => "mp3",
        "x-wav" | "wave" => "wav",
        other => other,
    }
}

#[async_trait]
impl CompletionApi for OpenRouterProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let body = Self::build_body(&request);
        let auth = format!("Bearer {}", self.api_key);
        let res_json =
            send_json_request(&self.http_client, OPENROUTER_CHAT_URL, &body, Some(&auth)).await?;
        extract_text_content(&res_json, &["choices", "0", "message", "content"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Role, Turn};

    fn request(media: Option<InlineMedia>) -> CompletionRequest {
        CompletionRequest {
            system_prompt: "sys".into(),
            history: vec![Turn::new(Role::User, "a"), Turn::new(Role::Assistant, "b")],
            user_text: "look".into(),
            media,
            model: "google/gemini-flash-1.5".into(),
            max_tokens: 500,
        }
    }

    #[test]
    fn test_plain_text_request() {
        let body = OpenRouterProvider::build_body(&request(None));
        let messages = body["messages"].as_array().expect("messages array");
        let roles: Vec<_> = messages.iter().map(|m| m["role"].as_str()).collect();
        assert_eq!(
            roles,
            vec![Some("system"), Some("user"), Some("assistant"), Some("user")]
        );
        assert_eq!(messages[3]["content"], "look");
        assert_eq!(body["max_tokens"], 500);
    }

    #[test]
    fn test_image_becomes_data_uri() {
        let media = InlineMedia::new("image/jpeg", vec![0xff, 0xd8]);
        let body = OpenRouterProvider::build_body(&request(Some(media)));
        let parts = &body["messages"][3]["content"];
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/jpeg;base64,/9g=");
    }

    #[test]
    fn test_audio_uses_input_audio() {
        let media = InlineMedia::new("audio/ogg", vec![1, 2, 3]);
        let body = OpenRouterProvider::build_body(&request(Some(media)));
        let part = &body["messages"][3]["content"][1];
        assert_eq!(part["type"], "input_audio");
        assert_eq!(part["input_audio"]["format"], "ogg");
        assert_eq!(audio_format("audio/mpeg"), "mp3");
    }
}

use crate::config::CHAT_TEMPERATURE;
use crate::llm::http_utils::{create_http_client, extract_text_content, send_json_request};
use crate::llm::{CompletionApi, CompletionRequest, LlmError};
use crate::session::Role;
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde_json::{json, Value};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// LLM provider implementation for Google Gemini
pub struct GeminiProvider {
    http_client: HttpClient,
    api_key: String,
}

impl GeminiProvider {
    /// Create a new Gemini provider instance
    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self {
            http_client: create_http_client(),
            api_key,
        }
    }

    fn build_body(request: &CompletionRequest) -> Value {
        let mut contents: Vec<Value> = request
            .history
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                };
                json!({"role": role, "parts": [{"text": turn.content}]})
            })
            .collect();

        let mut parts = Vec::new();
        if !request.user_text.is_empty() {
            parts.push(json!({"text": request.user_text}));
        }
        if let Some(media) = &request.media {
            parts.push(json!({
                "inline_data": {
                    "mime_type": media.mime_type,
                    "data": media.base64()
                }
            }));
        }
        contents.push(json!({"role": "user", "parts": parts}));

        json!({
            "contents": contents,
            "system_instruction": {
                "parts": [{"text": request.system_prompt}]
            },
            "generationConfig": {
                "temperature": CHAT_TEMPERATURE,
                "maxOutputTokens": request.max_tokens
            }
        })
    }
}

#[async_trait]
impl CompletionApi for GeminiProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let url = format!(
            "{GEMINI_API_BASE}/{}:generateContent?key={}",
            request.model, self.api_key
        );
        let body = Self::build_body(&request);

        let res_json = send_json_request(&self.http_client, &url, &body, None).await?;
        extract_text_content(
            &res_json,
            &["candidates", "0", "content", "parts", "0", "text"],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::InlineMedia;
    use crate::session::Turn;

    fn request(media: Option<InlineMedia>, user_text: &str) -> CompletionRequest {
        CompletionRequest {
            system_prompt: "be brief".into(),
            history: vec![
                Turn::new(Role::User, "hi"),
                Turn::new(Role::Assistant, "hello"),
            ],
            user_text: user_text.into(),
            media,
            model: "gemini-1.5-flash".into(),
            max_tokens: 500,
        }
    }

    #[test]
    fn test_history_roles_are_mapped() {
        let body = GeminiProvider::build_body(&request(None, "what now"));
        let contents = body["contents"].as_array().expect("contents array");
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["parts"][0]["text"], "what now");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 500);
        assert_eq!(body["system_instruction"]["parts"][0]["text"], "be brief");
    }

    #[test]
    fn test_media_is_inlined() {
        let media = InlineMedia::new("audio/ogg", vec![1, 2, 3]);
        let body = GeminiProvider::build_body(&request(Some(media), ""));
        let parts = body["contents"][2]["parts"].as_array().expect("parts array");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0]["inline_data"]["mime_type"], "audio/ogg");
        assert_eq!(parts[0]["inline_data"]["data"], "AQID");
    }
}

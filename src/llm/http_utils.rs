//! HTTP helpers shared by the providers

use crate::config::LLM_HTTP_TIMEOUT_SECS;
use crate::llm::LlmError;
use crate::utils::truncate_str;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client as HttpClient, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// Longest provider error body kept in an error message
const ERROR_BODY_LIMIT: usize = 500;

/// Creates an HTTP client with the completion timeout applied.
#[must_use]
pub fn create_http_client() -> HttpClient {
    HttpClient::builder()
        .timeout(Duration::from_secs(LLM_HTTP_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|_| HttpClient::new())
}

/// Sends a JSON POST and returns the parsed JSON response.
///
/// # Errors
///
/// Returns `LlmError::NetworkError` on connectivity issues, `LlmError::RateLimit`
/// on 429, `LlmError::ApiError` on other non-success status codes, or
/// `LlmError::JsonError` if parsing fails.
pub async fn send_json_request(
    client: &HttpClient,
    url: &str,
    body: &Value,
    auth_header: Option<&str>,
) -> Result<Value, LlmError> {
    let mut request = client.post(url).json(body);
    if let Some(auth) = auth_header {
        request = request.header("Authorization", auth);
    }

    // reqwest errors embed the URL, which carries the Gemini key
    let response = request
        .send()
        .await
        .map_err(|e| LlmError::NetworkError(e.without_url().to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let wait_secs = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let error_text = response.text().await.unwrap_or_default();
        let message = describe_error_body(status, &error_text);

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimit { wait_secs, message });
        }
        return Err(LlmError::ApiError(message));
    }

    response
        .json()
        .await
        .map_err(|e| LlmError::JsonError(e.without_url().to_string()))
}

fn describe_error_body(status: StatusCode, error_text: &str) -> String {
    let trimmed = error_text.trim_start();
    // Proxies answer with HTML pages
    if trimmed.starts_with("<!DOCTYPE") || trimmed.to_lowercase().starts_with("<html") {
        return format!("{status} (Server returned HTML error page)");
    }
    if error_text.chars().count() > ERROR_BODY_LIMIT {
        format!(
            "{status} - {}... (truncated)",
            truncate_str(error_text, ERROR_BODY_LIMIT)
        )
    } else {
        format!("{status} - {error_text}")
    }
}

/// Extracts a string from a JSON response by navigating a path.
///
/// Numeric segments index into arrays, the rest are object keys.
///
/// # Errors
///
/// Returns `LlmError::ApiError` if the path is invalid or the target is not a string.
pub fn extract_text_content(response: &Value, path: &[&str]) -> Result<String, LlmError> {
    let mut current = response;

    for segment in path {
        current = if let Ok(index) = segment.parse::<usize>() {
            current.get(index).ok_or_else(|| {
                LlmError::ApiError(format!("Invalid response: missing index {index}"))
            })?
        } else {
            current.get(*segment).ok_or_else(|| {
                LlmError::ApiError(format!("Invalid response: missing key {segment}"))
            })?
        };
    }

    current
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| LlmError::ApiError(format!("Expected string in response, got: {current}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_nested_text() {
        let response = json!({"choices": [{"message": {"content": "hello"}}]});
        let text = extract_text_content(&response, &["choices", "0", "message", "content"]);
        assert_eq!(text.expect("present"), "hello");
    }

    #[test]
    fn test_extract_missing_path() {
        let response = json!({"candidates": []});
        let err = extract_text_content(&response, &["candidates", "0", "content"])
            .expect_err("empty candidates");
        assert!(err.to_string().contains("missing index 0"));
    }

    #[test]
    fn test_extract_non_string() {
        let response = json!({"text": 5});
        assert!(extract_text_content(&response, &["text"]).is_err());
    }

    #[test]
    fn test_error_body_description() {
        let html = describe_error_body(StatusCode::BAD_GATEWAY, "<html><body>oops</body></html>");
        assert!(html.contains("HTML error page"));
        assert!(!html.contains("oops"));

        let long = describe_error_body(StatusCode::BAD_REQUEST, &"e".repeat(2000));
        assert!(long.ends_with("(truncated)"));
        assert!(long.len() < 600);
    }
}

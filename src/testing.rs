//! Testing helpers and mock utilities.
//!
//! Provides ready-made [`MockCompletionApi`] instances for orchestrator tests.

use crate::llm::{LlmError, MockCompletionApi};

/// Create a mock completion API that answers every request with `reply`.
///
/// # Example
///
/// ```rust,ignore
/// use oxide_chat::testing::mock_llm_reply;
///
/// let llm = mock_llm_reply("Hello, world!");
/// ```
#[must_use]
pub fn mock_llm_reply(reply: &'static str) -> MockCompletionApi {
    let mut mock = MockCompletionApi::new();
    mock.expect_complete()
        .returning(move |_| Ok(reply.to_string()));
    mock
}

/// Create a mock completion API whose every call fails with an API error.
///
/// Also handy when a test never reaches the model at all.
#[must_use]
pub fn mock_llm_error() -> MockCompletionApi {
    let mut mock = MockCompletionApi::new();
    mock.expect_complete()
        .returning(|_| Err(LlmError::ApiError("model unavailable".to_string())));
    mock
}

//! Message orchestration
//!
//! Glues the session store, the completion API and the sandbox together.
//! Every method returns the replies to send, already cut to the transport's
//! message limit; nothing here fails.

use crate::config::{Settings, TELEGRAM_MESSAGE_LIMIT};
use crate::llm::{CompletionApi, CompletionRequest, InlineMedia};
use crate::sandbox::{chunk_report, extract, SandboxExecutor};
use crate::session::{Role, SessionStore};
use crate::utils::{split_long_message, truncate_str};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Sent for documents that are neither images nor audio
pub const UNSUPPORTED_ATTACHMENT_REPLY: &str =
    "That's not an image. I can look at pictures and listen to voice messages, nothing else.";
/// Sent when a handler fails outside the orchestrator
pub const GENERIC_FAILURE_REPLY: &str = "Something broke on my side. Please try again.";
/// Sent when `/run` finds nothing to execute
pub const NO_CODE_BLOCKS_REPLY: &str = "No fenced code blocks found. Wrap the code in ``` fences.";
/// Sent when every block is in a language the sandbox cannot run
pub const NO_RUNNABLE_BLOCKS_REPLY: &str =
    "None of these code blocks are bash, python or javascript, so there is nothing to run.";
/// Sent for messages without text or attachment
pub const EMPTY_MESSAGE_REPLY: &str = "Send me some text, an image or a voice message.";

const IMAGE_HISTORY_MARKER: &str = "[Sent an image]";
const VOICE_HISTORY_MARKER: &str = "[Sent a voice message]";
const IMAGE_DEFAULT_PROMPT: &str = "Analyze this image. If it shows commands or code, \
    give them back as fenced code blocks.";
const VOICE_DEFAULT_PROMPT: &str = "Listen to this voice message and reply to it.";

/// Message received from the transport
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Stable sender identifier
    pub sender_id: i64,
    /// Text or caption, empty when absent
    pub text: String,
    /// Downloaded attachment
    pub attachment: Option<InlineMedia>,
}

impl InboundMessage {
    /// Plain text message
    #[must_use]
    pub fn text(sender_id: i64, text: impl Into<String>) -> Self {
        Self {
            sender_id,
            text: text.into(),
            attachment: None,
        }
    }

    /// Message carrying an attachment and an optional caption
    #[must_use]
    pub fn with_attachment(sender_id: i64, caption: Option<String>, media: InlineMedia) -> Self {
        Self {
            sender_id,
            text: caption.unwrap_or_default(),
            attachment: Some(media),
        }
    }
}

/// Whether code may be executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    /// The user asked for execution
    Confirmed,
    /// Execution still needs the user's go-ahead
    Pending,
}

/// Routes inbound messages to the model and the sandbox
pub struct Orchestrator {
    settings: Arc<Settings>,
    sessions: Arc<SessionStore<i64>>,
    llm: Arc<dyn CompletionApi>,
    executor: SandboxExecutor,
}

impl Orchestrator {
    /// Wire the collaborators together
    #[must_use]
    pub fn new(
        settings: Arc<Settings>,
        sessions: Arc<SessionStore<i64>>,
        llm: Arc<dyn CompletionApi>,
        executor: SandboxExecutor,
    ) -> Self {
        Self {
            settings,
            sessions,
            llm,
            executor,
        }
    }

    /// Shared session store
    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionStore<i64>> {
        &self.sessions
    }

    /// Answer a user message.
    ///
    /// The user turn is recorded before the model is called, the assistant
    /// turn only on success. Code blocks in the reply are executed when
    /// `auto_execute_code` is set; otherwise a `/run` hint follows the reply.
    #[instrument(skip(self, message), fields(user_id = message.sender_id))]
    pub async fn handle_message(&self, message: InboundMessage) -> Vec<String> {
        let InboundMessage {
            sender_id,
            text,
            attachment,
        } = message;
        let text = text.trim().to_string();

        let (history_entry, prompt) = match &attachment {
            Some(media) if media.is_image() => (
                with_caption(IMAGE_HISTORY_MARKER, &text),
                or_default(&text, IMAGE_DEFAULT_PROMPT),
            ),
            Some(media) if media.is_audio() => (
                with_caption(VOICE_HISTORY_MARKER, &text),
                or_default(&text, VOICE_DEFAULT_PROMPT),
            ),
            Some(media) => {
                info!(mime_type = %media.mime_type, "Unsupported attachment");
                return vec![UNSUPPORTED_ATTACHMENT_REPLY.to_string()];
            }
            None if text.is_empty() => return vec![EMPTY_MESSAGE_REPLY.to_string()],
            None => (text.clone(), text.clone()),
        };

        debug!(text = %truncate_str(&text, 100), "Processing message");
        let history = self.sessions.get_or_reset(&sender_id).await;
        self.sessions
            .append(&sender_id, Role::User, history_entry)
            .await;

        let request = CompletionRequest {
            system_prompt: self.settings.system_message().to_string(),
            history,
            user_text: prompt,
            media: attachment,
            model: self.settings.chat_model.clone(),
            max_tokens: self.settings.max_output_tokens,
        };

        let reply = match self.llm.complete(request).await {
            Ok(reply) if !reply.trim().is_empty() => reply,
            Ok(_) => {
                warn!("Model returned an empty reply");
                return vec!["Well, that didn't work. Error: the model returned nothing".to_string()];
            }
            Err(e) => {
                warn!(error = %e, "Completion failed");
                return vec![format!("Well, that didn't work. Error: {e}")];
            }
        };
        self.sessions
            .append(&sender_id, Role::Assistant, reply.clone())
            .await;

        let mut messages = split_long_message(&reply, TELEGRAM_MESSAGE_LIMIT);
        if extract(&reply).iter().any(|b| b.language.is_supported()) {
            let approval = if self.settings.auto_execute_code {
                Approval::Confirmed
            } else {
                Approval::Pending
            };
            messages.extend(self.run_code(&reply, approval).await);
        }
        messages
    }

    /// Extract, screen and run the code blocks in `text`.
    ///
    /// With [`Approval::Pending`] nothing runs and a hint is returned instead.
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    pub async fn run_code(&self, text: &str, approval: Approval) -> Vec<String> {
        let blocks = extract(text);
        if blocks.is_empty() {
            return vec![NO_CODE_BLOCKS_REPLY.to_string()];
        }
        if approval == Approval::Pending {
            let runnable = blocks.iter().filter(|b| b.language.is_supported()).count();
            debug!(blocks = blocks.len(), runnable, "Execution awaits confirmation");
            if runnable == 0 {
                return vec![NO_RUNNABLE_BLOCKS_REPLY.to_string()];
            }
            return vec![format!(
                "Found {runnable} code block(s). Send /run to execute them."
            )];
        }

        info!(blocks = blocks.len(), "Executing code blocks");
        let results = self.executor.execute_all(&blocks).await;
        chunk_report(&results, TELEGRAM_MESSAGE_LIMIT)
    }

    /// Run the code blocks of the user's latest assistant reply
    pub async fn run_last_reply(&self, user_id: i64) -> Vec<String> {
        let history = self.sessions.get_or_reset(&user_id).await;
        match history.iter().rev().find(|turn| turn.role == Role::Assistant) {
            Some(turn) => self.run_code(&turn.content, Approval::Confirmed).await,
            None => vec![
                "Nothing to run yet. Use /run followed by a fenced code block.".to_string(),
            ],
        }
    }

    /// Forget the user's conversation
    pub async fn clear(&self, user_id: i64) {
        self.sessions.clear(&user_id).await;
        info!(user_id, "Conversation cleared");
    }
}

fn with_caption(marker: &str, caption: &str) -> String {
    if caption.is_empty() {
        marker.to_string()
    } else {
        format!("{marker} {caption}")
    }
}

fn or_default(text: &str, default: &str) -> String {
    let chosen = if text.is_empty() { default } else { text };
    chosen.to_string()
}

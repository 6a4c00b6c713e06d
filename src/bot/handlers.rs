use crate::bot::messaging::{send_parts, send_plain};
use crate::llm::InlineMedia;
use crate::orchestrator::{
    Approval, InboundMessage, Orchestrator, GENERIC_FAILURE_REPLY, UNSUPPORTED_ATTACHMENT_REPLY,
};
use crate::utils::{retry_telegram_operation, truncate_str};
use anyhow::Result;
use std::sync::Arc;
use teloxide::{
    net::Download,
    prelude::*,
    types::{ChatAction, FileId, ParseMode},
    utils::command::BotCommands,
};
use tracing::{error, info, warn};

const PHOTO_MIME_TYPE: &str = "image/jpeg";
const VOICE_MIME_TYPE: &str = "audio/ogg";

// Helper function to get user name from Message
fn get_user_name(msg: &Message) -> String {
    if let Some(ref user) = msg.from {
        if let Some(ref username) = user.username {
            return username.clone();
        }
        if !user.first_name.is_empty() {
            return user.first_name.clone();
        }
    }
    "Unknown".to_string()
}

/// Safe extraction of user ID from a message.
/// Returns 0 if the user information is missing.
pub fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

/// Supported commands for the bot
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Show the welcome message
    #[command(description = "Start the bot.")]
    Start,
    /// List the commands
    #[command(description = "Show this help.")]
    Help,
    /// Forget the conversation
    #[command(description = "Clear chat history.")]
    Clear,
    /// Execute fenced code, or the code of the last reply when empty
    #[command(description = "Run the code blocks that follow, or those of my last reply.")]
    Run(String),
}

/// Start handler
///
/// # Errors
///
/// Returns an error if the welcome message cannot be sent.
pub async fn start(bot: Bot, msg: Message) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    info!("User {user_id} ({}) initiated /start command.", get_user_name(&msg));

    let text = "👋 <b>Hi! I am a chat assistant with a code sandbox.</b>\n\n\
         • Ask me anything, send a photo or a voice message\n\
         • Code blocks in my answers can be executed with /run\n\
         • /run followed by a fenced block executes your own code\n\n\
         <i>I remember the last few messages for five minutes. /clear forgets them sooner.</i>";

    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

/// Help handler
///
/// # Errors
///
/// Returns an error if the command list cannot be sent.
pub async fn help(bot: Bot, msg: Message) -> Result<()> {
    send_plain(&bot, msg.chat.id, &Command::descriptions().to_string()).await
}

/// Clear context handler
///
/// # Errors
///
/// Returns an error if the confirmation cannot be sent.
pub async fn clear(bot: Bot, msg: Message, orchestrator: Arc<Orchestrator>) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    info!("User {user_id} ({}) initiated context clear.", get_user_name(&msg));

    orchestrator.clear(user_id).await;
    bot.send_message(msg.chat.id, "<b>Chat history cleared.</b>")
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

/// `/run` handler. An explicit command counts as the user's confirmation.
///
/// # Errors
///
/// Returns an error if the report cannot be sent.
pub async fn run(
    bot: Bot,
    msg: Message,
    orchestrator: Arc<Orchestrator>,
    code: String,
) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    info!(
        "User {user_id} requested execution ({} chars).",
        code.chars().count()
    );
    send_typing(&bot, &msg).await;

    let parts = if code.trim().is_empty() {
        orchestrator.run_last_reply(user_id).await
    } else {
        orchestrator.run_code(&code, Approval::Confirmed).await
    };
    send_parts(&bot, msg.chat.id, &parts).await
}

/// Text, photo, voice and document handler.
///
/// Failures while fetching attachments are reported to the user with a
/// generic notice.
///
/// # Errors
///
/// Returns an error if no reply can be delivered.
pub async fn handle_message(
    bot: Bot,
    msg: Message,
    orchestrator: Arc<Orchestrator>,
) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    info!(
        "Handling message from user {user_id} ({}). Text: '{}'",
        get_user_name(&msg),
        truncate_str(msg.text().or_else(|| msg.caption()).unwrap_or(""), 100)
    );

    send_typing(&bot, &msg).await;

    let inbound = match to_inbound(&bot, &msg).await {
        Ok(Some(inbound)) => inbound,
        Ok(None) => {
            return send_plain(&bot, msg.chat.id, UNSUPPORTED_ATTACHMENT_REPLY).await;
        }
        Err(e) => {
            error!("Failed to prepare message from user {user_id}: {e}");
            return send_plain(&bot, msg.chat.id, GENERIC_FAILURE_REPLY).await;
        }
    };

    let parts = orchestrator.handle_message(inbound).await;
    send_parts(&bot, msg.chat.id, &parts).await
}

async fn send_typing(bot: &Bot, msg: &Message) {
    if let Err(e) = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await {
        warn!("Failed to send typing action: {e}");
    }
}

/// Builds the transport-neutral message, downloading any attachment.
/// Returns `None` for documents that are neither images nor audio.
async fn to_inbound(bot: &Bot, msg: &Message) -> Result<Option<InboundMessage>> {
    let user_id = get_user_id_safe(msg);
    let caption = msg.caption().map(str::to_string);

    if let Some(photo) = msg.photo().and_then(<[_]>::last) {
        let bytes = download(bot, &photo.file.id).await?;
        let media = InlineMedia::new(PHOTO_MIME_TYPE, bytes);
        return Ok(Some(InboundMessage::with_attachment(user_id, caption, media)));
    }

    if let Some(voice) = msg.voice() {
        let bytes = download(bot, &voice.file.id).await?;
        let media = InlineMedia::new(VOICE_MIME_TYPE, bytes);
        return Ok(Some(InboundMessage::with_attachment(user_id, caption, media)));
    }

    if let Some(document) = msg.document() {
        let mime_type = document.mime_type.as_ref().map(|m| m.essence_str());
        let Some(mime_type) = accepted_document_type(mime_type) else {
            info!("Refusing document of type {mime_type:?} from user {user_id}.");
            return Ok(None);
        };
        let bytes = download(bot, &document.file.id).await?;
        let media = InlineMedia::new(mime_type, bytes);
        return Ok(Some(InboundMessage::with_attachment(user_id, caption, media)));
    }

    let text = msg.text().unwrap_or_default();
    Ok(Some(InboundMessage::text(user_id, text)))
}

/// Whether text is a slash command. Commands that did not parse as
/// [`Command`] are answered with the command list instead of reaching the
/// model.
#[must_use]
pub fn looks_like_command(text: &str) -> bool {
    text.trim_start().starts_with('/')
}

/// Documents are accepted only when they carry an image or audio type
fn accepted_document_type(mime_type: Option<&str>) -> Option<&str> {
    mime_type.filter(|m| m.starts_with("image/") || m.starts_with("audio/"))
}

async fn download(bot: &Bot, file_id: &FileId) -> Result<Vec<u8>> {
    retry_telegram_operation(|| async {
        let file = bot.get_file(file_id.clone()).await?;
        let mut buf = Vec::new();
        bot.download_file(&file.path, &mut buf).await?;
        Ok(buf)
    })
    .await
}

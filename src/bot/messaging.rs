//! Common messaging utilities for Telegram bot.
//!
//! Replies arrive already split to the Telegram limit; each part is converted
//! to HTML and sent, falling back to plain text when Telegram rejects the
//! markup.

use crate::utils::{self, retry_telegram_operation};
use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ParseMode};
use teloxide::RequestError;
use tracing::warn;

/// Sends every part as its own message, in order.
///
/// # Errors
///
/// Returns an error if a part cannot be delivered even as plain text.
///
/// # Examples
///
/// ```ignore
/// use oxide_chat::bot::messaging::send_parts;
///
/// let parts = orchestrator.handle_message(inbound).await;
/// send_parts(&bot, chat_id, &parts).await?;
/// ```
pub async fn send_parts(bot: &Bot, chat_id: ChatId, parts: &[String]) -> Result<()> {
    for part in parts.iter().filter(|part| !part.trim().is_empty()) {
        send_part(bot, chat_id, part).await?;
    }
    Ok(())
}

/// Sends a short notice without formatting.
///
/// # Errors
///
/// Returns an error if the message fails to send after retries.
pub async fn send_plain(bot: &Bot, chat_id: ChatId, text: &str) -> Result<()> {
    retry_telegram_operation(|| async move {
        bot.send_message(chat_id, text).await?;
        Ok(())
    })
    .await
}

async fn send_part(bot: &Bot, chat_id: ChatId, part: &str) -> Result<()> {
    // Format after splitting so every part carries balanced tags
    let html = utils::format_text(part);
    match bot
        .send_message(chat_id, html.as_str())
        .parse_mode(ParseMode::Html)
        .await
    {
        Ok(_) => Ok(()),
        Err(RequestError::Api(e)) => {
            warn!(error = %e, "Telegram rejected HTML, resending as plain text");
            send_plain(bot, chat_id, part).await
        }
        Err(e) => {
            warn!(error = %e, "Sending formatted message failed, retrying");
            let html = html.as_str();
            retry_telegram_operation(|| async move {
                bot.send_message(chat_id, html)
                    .parse_mode(ParseMode::Html)
                    .await?;
                Ok(())
            })
            .await
        }
    }
}

//! Text helpers: markdown to Telegram HTML, message splitting, truncation
//! and retrying of transport calls.

// lazy_regex! validates patterns at compile time and initializes them on first use
#![allow(clippy::non_std_lazy_statics)]

use anyhow::Result;
use lazy_regex::lazy_regex;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::{
    TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
};

/// Fenced block with an optional language and the rest of the opening line
static RE_FENCE: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"```(\w*)[^\n`]*\n?([\s\S]*?)```");

/// Inline code span
static RE_INLINE_CODE: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"`([^`\n]+)`");

/// `**bold**`
static RE_BOLD: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"\*\*([^*\n]+?)\*\*");

/// `*italic*` or `_italic_`, not inside words and not padded with spaces
static RE_ITALIC: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"\B\*([^*\s](?:[^*\n]*?[^*\s])?)\*\B|\b_([^_\s](?:[^_\n]*?[^_\s])?)_\b");

/// `# Heading` lines
static RE_HEADING: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"(?m)^#{1,6}[ \t]+(.+?)[ \t]*#*$");

/// Bullet markers at start of line
static RE_BULLET: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?m)^([ \t]*)[*-] ");

/// 3+ consecutive newlines
static RE_MULTI_NEWLINE: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"\n{3,}");

/// Converts model markdown into Telegram-compatible HTML.
///
/// Everything is HTML-escaped first, so stray `<` or `&` in the reply can
/// never produce an invalid entity. Code is emitted verbatim (escaped) and
/// never receives inline formatting.
///
/// # Examples
///
/// ```
/// use oxide_chat::utils::format_text;
///
/// assert_eq!(
///     format_text("**Bold**, *italic* and `a < b`"),
///     "<b>Bold</b>, <i>italic</i> and <code>a &lt; b</code>"
/// );
/// assert_eq!(
///     format_text("```python\nprint(1)\n```"),
///     "<pre><code class=\"language-python\">print(1)</code></pre>"
/// );
/// ```
#[must_use]
pub fn format_text(text: &str) -> String {
    let mut html = String::with_capacity(text.len() + text.len() / 4);
    let mut last_end = 0;

    for caps in RE_FENCE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        html.push_str(&format_prose(&text[last_end..whole.start()]));

        let lang = caps.get(1).map_or("", |m| m.as_str());
        let code = caps.get(2).map_or("", |m| m.as_str()).trim_end();
        let code = html_escape::encode_text(code);
        if lang.is_empty() {
            html.push_str(&format!("<pre>{code}</pre>"));
        } else {
            html.push_str(&format!(
                "<pre><code class=\"language-{lang}\">{code}</code></pre>"
            ));
        }
        last_end = whole.end();
    }
    html.push_str(&format_prose(&text[last_end..]));

    RE_MULTI_NEWLINE
        .replace_all(&html, "\n\n")
        .trim()
        .to_string()
}

fn format_prose(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_end = 0;
    for caps in RE_INLINE_CODE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&format_inline(&text[last_end..whole.start()]));
        let code = caps.get(1).map_or("", |m| m.as_str());
        out.push_str(&format!("<code>{}</code>", html_escape::encode_text(code)));
        last_end = whole.end();
    }
    out.push_str(&format_inline(&text[last_end..]));
    out
}

fn format_inline(text: &str) -> String {
    let escaped = html_escape::encode_text(text);
    let text = RE_HEADING.replace_all(&escaped, "<b>$1</b>");
    let text = RE_BULLET.replace_all(&text, "$1• ");
    let text = RE_BOLD.replace_all(&text, "<b>$1</b>");
    let text = RE_ITALIC.replace_all(&text, |caps: &regex::Captures| {
        let inner = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        format!("<i>{inner}</i>")
    });
    text.into_owned()
}

/// Splits a long markdown message into parts of at most `max_chars`
/// characters, cutting at line boundaries.
///
/// An open code fence is closed at the end of a part and reopened (with its
/// language) at the start of the next one, so every part renders on its own.
/// Lines longer than a part are cut at grapheme boundaries.
///
/// # Examples
///
/// ```
/// use oxide_chat::utils::split_long_message;
///
/// let reply = format!("```python\n{}```", "print(1)\n".repeat(1000));
/// let parts = split_long_message(&reply, 4000);
/// assert!(parts.len() > 1);
/// assert!(parts.iter().all(|p| p.chars().count() <= 4000));
/// assert!(parts[1].starts_with("```python\n"));
/// ```
#[must_use]
pub fn split_long_message(message: &str, max_chars: usize) -> Vec<String> {
    if message.trim().is_empty() {
        return Vec::new();
    }
    if message.chars().count() <= max_chars {
        return vec![message.to_string()];
    }

    let mut splitter = FenceAwareSplitter::new(max_chars.max(FENCE.len() + 2));
    for line in message.lines() {
        splitter.push_line(line);
    }
    splitter.finish()
}

const FENCE: &str = "```";

struct FenceAwareSplitter {
    max_chars: usize,
    parts: Vec<String>,
    current: String,
    current_chars: usize,
    has_body: bool,
    /// Opening line of the fence that is open at the end of `current`
    open_fence: Option<String>,
}

impl FenceAwareSplitter {
    const fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            parts: Vec::new(),
            current: String::new(),
            current_chars: 0,
            has_body: false,
            open_fence: None,
        }
    }

    fn fits(&self, chars: usize, fence_open: bool) -> bool {
        // Closing fence plus its line break
        let reserve = if fence_open { FENCE.len() + 1 } else { 0 };
        self.current_chars + chars + reserve <= self.max_chars
    }

    fn push_line(&mut self, line: &str) {
        let line_chars = line.chars().count();
        let is_fence = line.trim_start().starts_with(FENCE);
        let fence_after = if is_fence {
            self.open_fence.is_none()
        } else {
            self.open_fence.is_some()
        };

        if !self.fits(line_chars + 1, fence_after) && self.has_body {
            self.flush();
        }

        if self.fits(line_chars + 1, fence_after) || is_fence {
            self.current.push_str(line);
            self.current_chars += line_chars;
        } else {
            for grapheme in line.graphemes(true) {
                let len = grapheme.chars().count();
                if !self.fits(len + 1, fence_after) && self.has_body {
                    self.flush();
                }
                self.current.push_str(grapheme);
                self.current_chars += len;
                self.has_body = true;
            }
        }
        self.current.push('\n');
        self.current_chars += 1;
        self.has_body = true;

        if is_fence {
            self.open_fence = match self.open_fence {
                Some(_) => None,
                None => Some(line.trim().to_string()),
            };
        }
    }

    fn flush(&mut self) {
        if self.open_fence.is_some() {
            self.current.push_str(FENCE);
        }
        self.parts.push(self.current.trim_end().to_string());
        self.current.clear();
        self.current_chars = 0;
        self.has_body = false;
        if let Some(header) = &self.open_fence {
            self.current.push_str(header);
            self.current.push('\n');
            self.current_chars = header.chars().count() + 1;
        }
    }

    fn finish(mut self) -> Vec<String> {
        if self.has_body {
            self.flush();
        }
        self.parts
    }
}

/// Safely truncates a string to a maximum character length (not bytes).
///
/// # Examples
///
/// ```
/// use oxide_chat::utils::truncate_str;
/// let s = "Привет, мир!";
/// assert_eq!(truncate_str(s, 6), "Привет");
/// ```
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Retry a Telegram API call with exponential backoff and jitter.
///
/// Used for file downloads and message sends that may fail on transient
/// network errors: 500 ms initial delay, 4 s cap, 3 retries.
///
/// # Errors
///
/// Returns the last error once all attempts fail.
pub async fn retry_telegram_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let retry_strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TELEGRAM_API_MAX_RETRIES);

    Retry::start(retry_strategy, operation).await.map_err(|e| {
        warn!(
            retries = TELEGRAM_API_MAX_RETRIES,
            error = %e,
            "Telegram API operation failed"
        );
        e
    })
}

//! Fenced code block extraction
//!
//! Pulls ```` ```lang ... ``` ```` segments out of free text, user-written or
//! model-generated, and resolves their language tag once.

// lazy_regex! validates patterns at compile time and initializes them on first use
#![allow(clippy::non_std_lazy_statics)]

use lazy_regex::lazy_regex;
use std::fmt;

/// Match fenced code blocks with an optional word-only language tag
static RE_FENCED_BLOCK: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"```(\w+)?\s*([\s\S]*?)```");

/// Language tag used when a fence carries none
pub const DEFAULT_LANGUAGE_TAG: &str = "bash";

/// Languages the sandbox knows how to launch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Language {
    /// `bash`, `sh`
    Bash,
    /// `python`, `py`
    Python,
    /// `javascript`, `js`, `node`
    JavaScript,
    /// Anything else, holding the lowercased tag
    Unsupported(String),
}

impl Language {
    /// Resolve a language tag (case-insensitive)
    ///
    /// # Examples
    ///
    /// ```
    /// use oxide_chat::sandbox::Language;
    ///
    /// assert_eq!(Language::from_tag("PY"), Language::Python);
    /// assert_eq!(Language::from_tag("ruby"), Language::Unsupported("ruby".into()));
    /// ```
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        let tag = tag.trim().to_lowercase();
        match tag.as_str() {
            "bash" | "sh" => Self::Bash,
            "python" | "py" => Self::Python,
            "javascript" | "js" | "node" => Self::JavaScript,
            _ => Self::Unsupported(tag),
        }
    }

    /// Whether a launcher exists for this language
    #[must_use]
    pub const fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported(_))
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bash => f.write_str("bash"),
            Self::Python => f.write_str("python"),
            Self::JavaScript => f.write_str("javascript"),
            Self::Unsupported(tag) => f.write_str(tag),
        }
    }
}

/// A fenced snippet with its language
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Lowercased tag as written after the opening fence (or `bash`)
    pub tag: String,
    /// Tag resolved to a launchable language
    pub language: Language,
    /// Trimmed source, never empty
    pub body: String,
}

impl CodeBlock {
    /// Build a block from a tag and a body.
    ///
    /// Returns `None` when the trimmed body is empty.
    #[must_use]
    pub fn new(tag: &str, body: &str) -> Option<Self> {
        let body = body.trim();
        if body.is_empty() {
            return None;
        }
        let tag = match tag.trim() {
            "" => DEFAULT_LANGUAGE_TAG.to_string(),
            t => t.to_lowercase(),
        };
        Some(Self {
            language: Language::from_tag(&tag),
            tag,
            body: body.to_string(),
        })
    }
}

/// Extract every non-empty fenced code block, in order of appearance.
///
/// # Examples
///
/// ```
/// use oxide_chat::sandbox::{extract, Language};
///
/// let blocks = extract("Try:\n```python\nprint(1)\n```");
/// assert_eq!(blocks.len(), 1);
/// assert_eq!(blocks[0].language, Language::Python);
/// assert_eq!(blocks[0].body, "print(1)");
///
/// assert!(extract("no code here").is_empty());
/// ```
#[must_use]
pub fn extract(text: &str) -> Vec<CodeBlock> {
    RE_FENCED_BLOCK
        .captures_iter(text)
        .filter_map(|caps| {
            let tag = caps.get(1).map_or("", |m| m.as_str());
            let body = caps.get(2).map_or("", |m| m.as_str());
            CodeBlock::new(tag, body)
        })
        .collect()
}

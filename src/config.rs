//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines
//! the fixed limits of the session store and the code sandbox.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_token: String,

    /// Comma-separated list of allowed user IDs (empty means nobody)
    #[serde(rename = "allowed_users")]
    pub allowed_users_str: Option<String>,

    /// Completion provider: `gemini` or `openrouter`
    #[serde(default = "default_llm_provider")]
    pub llm_provider: String,
    /// Gemini API key
    pub gemini_api_key: Option<String>,
    /// `OpenRouter` API key
    pub openrouter_api_key: Option<String>,
    /// Model identifier passed to the provider
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    /// Maximum output tokens per completion
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// System message prepended to every completion
    pub system_message: Option<String>,

    /// Run code blocks found in model replies without an explicit `/run`
    #[serde(default)]
    pub auto_execute_code: bool,
    /// Shell used for `bash`/`sh` blocks
    #[serde(default = "default_shell_bin")]
    pub shell_bin: String,
    /// Python interpreter used for `python`/`py` blocks
    #[serde(default = "default_python_bin")]
    pub python_bin: String,
    /// JavaScript runtime used for `js`/`javascript`/`node` blocks
    #[serde(default = "default_node_bin")]
    pub node_bin: String,
    /// Working directory for executed code (process cwd when unset)
    pub sandbox_workdir: Option<PathBuf>,
}

fn default_llm_provider() -> String {
    "gemini".to_string()
}

fn default_chat_model() -> String {
    DEFAULT_CHAT_MODEL.to_string()
}

const fn default_max_output_tokens() -> u32 {
    DEFAULT_MAX_OUTPUT_TOKENS
}

fn default_shell_bin() -> String {
    "bash".to_string()
}

fn default_python_bin() -> String {
    "python3".to_string()
}

fn default_node_bin() -> String {
    "node".to_string()
}

/// Build the layered configuration source shared by [`Settings::new`].
///
/// # Errors
///
/// Returns a `ConfigError` if any source fails to load.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Not checked into git
        .add_source(File::with_name("config/local").required(false))
        // Eg.. `APP__CHAT_MODEL=x ./target/app`
        .add_source(Environment::with_prefix("APP").separator("__"))
        // UPPER_SNAKE_CASE env vars map to snake_case keys; empty values count as unset
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use oxide_chat::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        build_config()?.try_deserialize()
    }

    /// Returns the set of Telegram IDs allowed to use the bot.
    #[must_use]
    pub fn allowed_users(&self) -> HashSet<i64> {
        self.allowed_users_str
            .as_ref()
            .map(|s| {
                s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                    .filter(|token| !token.is_empty())
                    .filter_map(|id| id.parse::<i64>().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Check whether a user may talk to the bot.
    ///
    /// The bot executes code on its host, so an empty list admits nobody.
    #[must_use]
    pub fn is_user_allowed(&self, user_id: i64) -> bool {
        self.allowed_users().contains(&user_id)
    }

    /// System message for completions, falling back to [`DEFAULT_SYSTEM_MESSAGE`]
    #[must_use]
    pub fn system_message(&self) -> &str {
        self.system_message
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_SYSTEM_MESSAGE)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            telegram_token: String::new(),
            allowed_users_str: None,
            llm_provider: default_llm_provider(),
            gemini_api_key: None,
            openrouter_api_key: None,
            chat_model: default_chat_model(),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            system_message: None,
            auto_execute_code: false,
            shell_bin: default_shell_bin(),
            python_bin: default_python_bin(),
            node_bin: default_node_bin(),
            sandbox_workdir: None,
        }
    }
}

// Chat configuration
/// Default completion model
pub const DEFAULT_CHAT_MODEL: &str = "gemini-1.5-flash";
/// Default output budget per completion
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 500;
/// System message used when none is configured
pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are a concise, helpful assistant. \
    When the answer involves commands or code, put them in fenced markdown blocks \
    tagged with their language.";
/// Temperature for chat completions
pub const CHAT_TEMPERATURE: f32 = 0.7;
/// Timeout for completion HTTP requests
pub const LLM_HTTP_TIMEOUT_SECS: u64 = 60;
/// Attempts per completion request, including the first
pub const LLM_MAX_RETRIES: u32 = 3;
/// Base delay for retrying transient completion failures
pub const LLM_INITIAL_BACKOFF_MS: u64 = 1000;

// Session memory configuration
/// Maximum number of turns kept per user
pub const SESSION_HISTORY_LIMIT: usize = 10;
/// Idle time after which a conversation starts over
pub const SESSION_IDLE_TIMEOUT_SECS: u64 = 5 * 60;
/// Interval of the background sweep removing idle sessions
pub const SESSION_SWEEP_INTERVAL_SECS: u64 = 60;

// Sandbox configuration
/// Wall-clock limit for a single code block
pub const SANDBOX_EXEC_TIMEOUT_SECS: u64 = 30;
/// Grace period for reaping a killed child and draining its pipes
pub const SANDBOX_REAP_TIMEOUT_MS: u64 = 2000;
/// Maximum characters of captured output rendered per block
pub const SANDBOX_OUTPUT_RENDER_LIMIT: usize = 3000;
/// Bytes kept per captured stream, the rest is drained and discarded
pub const SANDBOX_CAPTURE_LIMIT_BYTES: usize = 1024 * 1024;

// Telegram configuration
/// Maximum message length with a safety margin below Telegram's 4096
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4000;
/// Initial backoff for Telegram API retries
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Maximum backoff for Telegram API retries
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
/// Maximum attempts for Telegram API retries
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;

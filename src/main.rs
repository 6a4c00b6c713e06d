use dotenvy::dotenv;
use oxide_chat::bot;
use oxide_chat::bot::handlers::{get_user_id_safe, looks_like_command, Command};
use oxide_chat::config::{Settings, SESSION_SWEEP_INTERVAL_SECS};
use oxide_chat::llm::LlmClient;
use oxide_chat::orchestrator::Orchestrator;
use oxide_chat::sandbox::{ExecutorConfig, SandboxExecutor};
use oxide_chat::session::SessionStore;
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting sensitive data
struct RedactionPatterns {
    token1: Regex,
    token2: Regex,
    token3: Regex,
    api_key: Regex,
    bearer: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token1: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            token2: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            token3: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
            api_key: Regex::new(r"([?&]key=)[^\s&]+")?,
            bearer: Regex::new(r"(Bearer\s+)[A-Za-z0-9._~+/=-]+")?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let mut output = input.to_string();
        output = self
            .token1
            .replace_all(&output, "$1[TELEGRAM_TOKEN]$3")
            .to_string();
        output = self
            .token2
            .replace_all(&output, "[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .token3
            .replace_all(&output, "$1[TELEGRAM_TOKEN]")
            .to_string();
        output = self.api_key.replace_all(&output, "$1[MASKED]").to_string();
        output = self.bearer.replace_all(&output, "$1[MASKED]").to_string();
        output
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // The caller's buffer was consumed in full even if the redacted text differs in length
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Redaction must be ready before the first log line
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);
    init_logging(patterns);

    info!("Starting Oxide Chat bot...");

    let settings = init_settings();

    let llm_client = LlmClient::new(&settings);
    if llm_client.is_configured() {
        info!("LLM Client initialized (provider: {}).", llm_client.provider_name());
    } else {
        warn!(
            "No API key for provider '{}'; replies will report the missing configuration.",
            llm_client.provider_name()
        );
    }

    let sessions = Arc::new(SessionStore::new());
    spawn_session_sweeper(Arc::clone(&sessions));

    let executor = SandboxExecutor::new(ExecutorConfig::from_settings(&settings));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&settings),
        sessions,
        Arc::new(llm_client),
        executor,
    ));

    let bot = Bot::new(settings.telegram_token.clone());
    let handler = setup_handler();

    info!("Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![orchestrator, settings])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Arc<Settings> {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            if s.allowed_users().is_empty() {
                warn!("ALLOWED_USERS is empty; every message will be ignored.");
            }
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

fn spawn_session_sweeper(sessions: Arc<SessionStore<i64>>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SESSION_SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let evicted = sessions.evict_idle().await;
            if evicted > 0 {
                debug!(evicted, "Evicted idle sessions");
            }
        }
    });
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    Update::filter_message()
        .branch(
            dptree::filter(|msg: Message, settings: Arc<Settings>| {
                settings.is_user_allowed(get_user_id_safe(&msg))
            })
            .branch(
                dptree::entry()
                    .filter_command::<Command>()
                    .endpoint(handle_command),
            )
            .branch(
                dptree::filter(|msg: Message| msg.text().is_some_and(looks_like_command))
                    .endpoint(handle_unknown_command),
            )
            .branch(
                dptree::filter(|msg: Message| {
                    msg.text().is_some()
                        || msg.photo().is_some()
                        || msg.voice().is_some()
                        || msg.document().is_some()
                })
                .endpoint(handle_message),
            ),
        )
        .branch(
            dptree::filter(|msg: Message, settings: Arc<Settings>| {
                !settings.is_user_allowed(get_user_id_safe(&msg))
            })
            .endpoint(handle_unauthorized),
        )
}

async fn handle_unauthorized(msg: Message) -> Result<(), teloxide::RequestError> {
    info!(
        "⛔️ Ignoring message from unauthorized user {}.",
        get_user_id_safe(&msg)
    );
    respond(())
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    orchestrator: Arc<Orchestrator>,
) -> Result<(), teloxide::RequestError> {
    let res = match cmd {
        Command::Start => bot::handlers::start(bot, msg).await,
        Command::Help => bot::handlers::help(bot, msg).await,
        Command::Clear => bot::handlers::clear(bot, msg, orchestrator).await,
        Command::Run(code) => bot::handlers::run(bot, msg, orchestrator, code).await,
    };
    if let Err(e) = res {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_unknown_command(bot: Bot, msg: Message) -> Result<(), teloxide::RequestError> {
    info!(
        "Unknown command from user {}: '{}'",
        get_user_id_safe(&msg),
        msg.text().unwrap_or_default()
    );
    if let Err(e) = bot::handlers::help(bot, msg).await {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_message(
    bot: Bot,
    msg: Message,
    orchestrator: Arc<Orchestrator>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = Box::pin(bot::handlers::handle_message(bot, msg, orchestrator)).await {
        error!("Message handler error: {}", e);
    }
    respond(())
}

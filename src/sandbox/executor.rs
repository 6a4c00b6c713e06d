//! Child-process runner for screened code blocks
//!
//! Each block runs as its own process (in its own process group on unix)
//! with stdin closed and both output streams captured. A block that outlives
//! its budget is killed together with everything it spawned.

use super::block::{CodeBlock, Language};
use super::policy::{CommandPolicy, PolicyDecision};
use super::report::ExecutionResult;
use super::SandboxError;
use crate::config::{
    Settings, SANDBOX_CAPTURE_LIMIT_BYTES, SANDBOX_EXEC_TIMEOUT_SECS, SANDBOX_REAP_TIMEOUT_MS,
};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Interpreters and limits used by [`SandboxExecutor`]
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Shell for `bash`/`sh` blocks, invoked as `<bin> -c <code>`
    pub shell_bin: String,
    /// Interpreter for python blocks, invoked as `<bin> -c <code>`
    pub python_bin: String,
    /// Runtime for javascript blocks, invoked as `<bin> -e <code>`
    pub node_bin: String,
    /// Working directory of the child, inherited when `None`
    pub working_dir: Option<PathBuf>,
    /// Wall-clock budget per block
    pub timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shell_bin: "bash".to_string(),
            python_bin: "python3".to_string(),
            node_bin: "node".to_string(),
            working_dir: None,
            timeout: Duration::from_secs(SANDBOX_EXEC_TIMEOUT_SECS),
        }
    }
}

impl ExecutorConfig {
    /// Take interpreter paths and the working directory from settings
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            shell_bin: settings.shell_bin.clone(),
            python_bin: settings.python_bin.clone(),
            node_bin: settings.node_bin.clone(),
            working_dir: settings.sandbox_workdir.clone(),
            ..Self::default()
        }
    }

    fn launcher(&self, language: &Language) -> Option<(&str, &'static str)> {
        match language {
            Language::Bash => Some((self.shell_bin.as_str(), "-c")),
            Language::Python => Some((self.python_bin.as_str(), "-c")),
            Language::JavaScript => Some((self.node_bin.as_str(), "-e")),
            Language::Unsupported(_) => None,
        }
    }
}

/// Screens and runs code blocks one at a time
#[derive(Debug, Clone, Default)]
pub struct SandboxExecutor {
    config: ExecutorConfig,
    policy: CommandPolicy,
}

impl SandboxExecutor {
    /// Create an executor
    #[must_use]
    pub const fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            policy: CommandPolicy::new(),
        }
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Policy applied before every run
    #[must_use]
    pub const fn policy(&self) -> &CommandPolicy {
        &self.policy
    }

    /// Screen and run a single block.
    ///
    /// Never fails: every outcome, including refusal and launcher errors, is
    /// folded into the returned [`ExecutionResult`].
    #[instrument(skip(self, block), fields(tag = %block.tag))]
    pub async fn execute(&self, block: &CodeBlock) -> ExecutionResult {
        if let PolicyDecision::Deny(reason) = self.policy.evaluate(block) {
            info!(reason = %reason, "Code block refused");
            return ExecutionResult::from_error(block, reason.into(), Duration::ZERO);
        }

        let started = Instant::now();
        let outcome = self.run(block).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(stdout) => {
                info!(elapsed_ms = elapsed.as_millis(), "Code block finished");
                ExecutionResult::success(block, stdout, elapsed)
            }
            Err(e) => {
                warn!(error = %e, elapsed_ms = elapsed.as_millis(), "Code block did not succeed");
                ExecutionResult::from_error(block, e, elapsed)
            }
        }
    }

    /// Run blocks sequentially, results in input order
    pub async fn execute_all(&self, blocks: &[CodeBlock]) -> Vec<ExecutionResult> {
        let mut results = Vec::with_capacity(blocks.len());
        for block in blocks {
            results.push(self.execute(block).await);
        }
        results
    }

    async fn run(&self, block: &CodeBlock) -> Result<String, SandboxError> {
        let (program, flag) = self
            .config
            .launcher(&block.language)
            .ok_or_else(|| SandboxError::UnsupportedLanguage(block.tag.clone()))?;

        let mut command = Command::new(program);
        command
            .arg(flag)
            .arg(&block.body)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|source| SandboxError::SpawnFailure {
                program: program.to_string(),
                source,
            })?;
        debug!(program, pid = ?child.id(), "Child spawned");

        let stdout = child.stdout.take().map(|s| tokio::spawn(read_capped(s)));
        let stderr = child.stderr.take().map(|s| tokio::spawn(read_capped(s)));
        let mut guard = ChildGuard::new(child);

        let waited = tokio::time::timeout(self.config.timeout, guard.child.wait()).await;
        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(source)) => {
                guard.terminate().await;
                abort_readers([&stdout, &stderr]);
                return Err(SandboxError::SpawnFailure {
                    program: program.to_string(),
                    source,
                });
            }
            Err(_) => {
                guard.terminate().await;
                abort_readers([&stdout, &stderr]);
                return Err(SandboxError::TimedOut(self.config.timeout.as_secs()));
            }
        };

        // Leftover background processes would keep the pipes open
        guard.kill_group();

        let stdout = collect(stdout).await;
        let stderr = collect(stderr).await;
        into_outcome(status, stdout, stderr)
    }
}

fn into_outcome(status: ExitStatus, stdout: String, stderr: String) -> Result<String, SandboxError> {
    if status.success() {
        Ok(stdout)
    } else {
        Err(SandboxError::NonZeroExit {
            code: status.code(),
            stderr,
            stdout,
        })
    }
}

async fn read_capped<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut kept = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = SANDBOX_CAPTURE_LIMIT_BYTES.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }
    String::from_utf8_lossy(&kept).into_owned()
}

async fn collect(reader: Option<JoinHandle<String>>) -> String {
    let Some(mut handle) = reader else {
        return String::new();
    };
    match tokio::time::timeout(Duration::from_millis(SANDBOX_REAP_TIMEOUT_MS), &mut handle).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            warn!(error = %e, "Output reader task failed");
            String::new()
        }
        Err(_) => {
            warn!("Output stream still open after exit, discarding");
            handle.abort();
            String::new()
        }
    }
}

fn abort_readers(readers: [&Option<JoinHandle<String>>; 2]) {
    for handle in readers.into_iter().flatten() {
        handle.abort();
    }
}

/// Owns a running child and kills its whole process group when done
struct ChildGuard {
    child: Child,
    pgid: Option<u32>,
    cleaned: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        let pgid = child.id();
        Self {
            child,
            pgid,
            cleaned: false,
        }
    }

    fn kill_group(&mut self) {
        self.cleaned = true;
        #[cfg(unix)]
        if let Some(raw) = self.pgid.and_then(|pgid| i32::try_from(pgid).ok()) {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            // ESRCH just means the group is already gone
            if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
                debug!(pgid = raw, error = %e, "killpg skipped");
            }
        }
    }

    async fn terminate(&mut self) {
        self.kill_group();
        if let Err(e) = self.child.start_kill() {
            debug!(error = %e, "start_kill on exited child");
        }
        let reap = Duration::from_millis(SANDBOX_REAP_TIMEOUT_MS);
        if tokio::time::timeout(reap, self.child.wait()).await.is_err() {
            warn!(pid = ?self.pgid, "Killed child was not reaped in time");
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.cleaned {
            self.kill_group();
            let _ = self.child.start_kill();
        }
    }
}

//! Code execution sandbox
//!
//! Extracts fenced code blocks, screens them with [`CommandPolicy`], runs the
//! survivors as timeout-bounded child processes and renders the results.

mod block;
mod executor;
mod policy;
mod report;

pub use block::{extract, CodeBlock, Language, DEFAULT_LANGUAGE_TAG};
pub use executor::{ExecutorConfig, SandboxExecutor};
pub use policy::{CommandPolicy, DenyReason, DenyRule, PolicyDecision, DENY_RULES};
pub use report::{chunk_report, chunk_text, render_report, ExecutionResult, ExecutionStatus};

use thiserror::Error;

/// Failures of a single block, always folded into an [`ExecutionResult`]
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The block's language has no launcher
    #[error("unsupported language `{0}`")]
    UnsupportedLanguage(String),
    /// The block matched a deny rule
    #[error("blocked by policy: {0}")]
    PolicyBlocked(String),
    /// The block ran past its wall-clock budget and was killed
    #[error("timed out after {0}s")]
    TimedOut(u64),
    /// The process finished with a failing status
    #[error("exited with status {code:?}")]
    NonZeroExit {
        /// Exit code, `None` when terminated by a signal
        code: Option<i32>,
        /// Captured standard error
        stderr: String,
        /// Captured standard output
        stdout: String,
    },
    /// The process could not be started or awaited
    #[error("failed to run `{program}`: {source}")]
    SpawnFailure {
        /// Program that was launched
        program: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl From<DenyReason> for SandboxError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::UnsupportedLanguage(tag) => Self::UnsupportedLanguage(tag),
            reason @ DenyReason::UnsafePattern { .. } => Self::PolicyBlocked(reason.to_string()),
        }
    }
}

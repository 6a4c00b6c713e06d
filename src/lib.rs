#![deny(missing_docs)]
//! Oxide Chat library.
//!
//! Telegram chat assistant with short-lived per-user memory and a sandbox
//! that runs the code blocks found in model replies.

/// Telegram transport: commands, handlers and message delivery.
pub mod bot;
/// Configuration management.
pub mod config;
/// LLM providers and client.
pub mod llm;
/// Message flow between sessions, the model and the sandbox.
pub mod orchestrator;
/// Code block extraction, screening and execution.
pub mod sandbox;
/// Bounded per-user conversation memory.
pub mod session;
/// Utility functions.
pub mod utils;

#[cfg(test)]
pub mod testing;

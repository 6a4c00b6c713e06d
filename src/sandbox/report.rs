//! Execution results and their user-facing rendering

use super::block::CodeBlock;
use super::SandboxError;
use crate::config::SANDBOX_OUTPUT_RENDER_LIMIT;
use crate::utils::truncate_str;
use std::time::Duration;
use unicode_segmentation::UnicodeSegmentation;

/// Shown instead of an empty standard output
pub const NO_OUTPUT_MARKER: &str = "(no output)";
/// Shown instead of an empty standard error
pub const NO_ERROR_OUTPUT_MARKER: &str = "(no error output)";

/// How a block ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Exited with status 0
    Success,
    /// Exited with a non-zero status or was killed by a signal
    Failure,
    /// Refused before running
    Blocked,
    /// Killed after exceeding the time budget
    TimedOut,
    /// The launcher itself failed
    ExecutionError,
}

impl ExecutionStatus {
    /// Glyph leading the rendered message
    #[must_use]
    pub const fn glyph(self) -> &'static str {
        match self {
            Self::Success => "✅",
            Self::Failure => "❌",
            Self::Blocked => "🚫",
            Self::TimedOut => "⏱",
            Self::ExecutionError => "⚠️",
        }
    }
}

/// Outcome of one code block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Language tag of the block
    pub tag: String,
    /// How it ended
    pub status: ExecutionStatus,
    /// Stdout on success, stderr on failure, reason otherwise
    pub output: String,
    /// Exit code when the process exited normally
    pub exit_code: Option<i32>,
    /// Wall-clock time spent, zero when nothing ran
    pub elapsed: Duration,
}

impl ExecutionResult {
    /// Successful run
    #[must_use]
    pub fn success(block: &CodeBlock, stdout: String, elapsed: Duration) -> Self {
        let output = if stdout.trim().is_empty() {
            NO_OUTPUT_MARKER.to_string()
        } else {
            stdout
        };
        Self {
            tag: block.tag.clone(),
            status: ExecutionStatus::Success,
            output,
            exit_code: Some(0),
            elapsed,
        }
    }

    /// Fold a sandbox error into a result
    #[must_use]
    pub fn from_error(block: &CodeBlock, error: SandboxError, elapsed: Duration) -> Self {
        let (status, output, exit_code) = match error {
            SandboxError::UnsupportedLanguage(_) | SandboxError::PolicyBlocked(_) => {
                (ExecutionStatus::Blocked, error.to_string(), None)
            }
            SandboxError::TimedOut(secs) => (
                ExecutionStatus::TimedOut,
                format!("stopped after {secs}s"),
                None,
            ),
            SandboxError::NonZeroExit { code, stderr, .. } => {
                let output = if stderr.trim().is_empty() {
                    NO_ERROR_OUTPUT_MARKER.to_string()
                } else {
                    stderr
                };
                (ExecutionStatus::Failure, output, code)
            }
            SandboxError::SpawnFailure { .. } => {
                (ExecutionStatus::ExecutionError, error.to_string(), None)
            }
        };
        Self {
            tag: block.tag.clone(),
            status,
            output,
            exit_code,
            elapsed,
        }
    }

    /// Whether the block ran to a zero exit
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// Markdown message for the transport
    ///
    /// Captured output is truncated and fenced; fences inside it are broken
    /// up so they cannot close the surrounding block.
    #[must_use]
    pub fn rendered_message(&self) -> String {
        let glyph = self.status.glyph();
        let tag = &self.tag;
        match self.status {
            ExecutionStatus::Success => format!(
                "{glyph} `{tag}` ran successfully:\n```\n{}\n```",
                fenced_output(&self.output)
            ),
            ExecutionStatus::Failure => {
                let how = self
                    .exit_code
                    .map_or_else(|| "killed by a signal".to_string(), |c| format!("exit code {c}"));
                format!(
                    "{glyph} `{tag}` ran but failed ({how}):\n```\n{}\n```",
                    fenced_output(&self.output)
                )
            }
            ExecutionStatus::Blocked => {
                format!("{glyph} `{tag}` was not run. {}", self.output)
            }
            ExecutionStatus::TimedOut => {
                format!("{glyph} `{tag}` took too long and was {}", self.output)
            }
            ExecutionStatus::ExecutionError => {
                format!("{glyph} `{tag}` could not be run: {}", self.output)
            }
        }
    }
}

fn fenced_output(output: &str) -> String {
    let trimmed = output.trim_end();
    let mut text = truncate_str(trimmed, SANDBOX_OUTPUT_RENDER_LIMIT);
    if text.len() < trimmed.len() {
        text.push_str("\n… (output truncated)");
    }
    text.replace("```", "`\u{200b}``")
}

const SECTION_SEPARATOR: &str = "\n\n";

fn report_sections(results: &[ExecutionResult]) -> Vec<String> {
    let total = results.len();
    results
        .iter()
        .enumerate()
        .map(|(i, result)| format!("**Block {}/{total}**\n{}", i + 1, result.rendered_message()))
        .collect()
}

/// Render all results with block-index labels, in order
#[must_use]
pub fn render_report(results: &[ExecutionResult]) -> String {
    report_sections(results).join(SECTION_SEPARATOR)
}

/// Render the report as messages of at most `max_chars` characters.
///
/// Cuts fall between blocks so each message keeps its fences balanced; only
/// a block longer than `max_chars` on its own goes through [`chunk_text`].
/// Concatenating the messages gives back [`render_report`] exactly.
#[must_use]
pub fn chunk_report(results: &[ExecutionResult], max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let sections = report_sections(results);
    let last = sections.len().saturating_sub(1);

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;
    for (i, mut section) in sections.into_iter().enumerate() {
        if i < last {
            section.push_str(SECTION_SEPARATOR);
        }
        let len = section.chars().count();
        if current_chars + len > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        if len > max_chars {
            chunks.extend(chunk_text(&section, max_chars));
        } else {
            current.push_str(&section);
            current_chars += len;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Split text into chunks of at most `max_chars` characters.
///
/// Chunks are cut at grapheme boundaries, preferably right after a newline
/// in the second half of the window. Concatenating the chunks in order gives
/// back the input exactly.
///
/// # Examples
///
/// ```
/// use oxide_chat::sandbox::chunk_text;
///
/// let text = "line\n".repeat(2000);
/// let chunks = chunk_text(&text, 4000);
/// assert!(chunks.iter().all(|c| c.chars().count() <= 4000));
/// assert_eq!(chunks.concat(), text);
/// ```
#[must_use]
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunker = Chunker::new(max_chars.max(1));
    for grapheme in text.graphemes(true) {
        let len = grapheme.chars().count();
        if len > chunker.max_chars {
            // Oversized cluster, fall back to scalar values
            for (i, c) in grapheme.char_indices() {
                chunker.push(&grapheme[i..i + c.len_utf8()], 1);
            }
        } else {
            chunker.push(grapheme, len);
        }
    }
    chunker.finish()
}

struct Chunker {
    max_chars: usize,
    chunks: Vec<String>,
    current: String,
    current_chars: usize,
    /// Byte offset and char count right after the last newline in `current`
    last_newline: Option<(usize, usize)>,
}

impl Chunker {
    const fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            chunks: Vec::new(),
            current: String::new(),
            current_chars: 0,
            last_newline: None,
        }
    }

    fn push(&mut self, unit: &str, len: usize) {
        while self.current_chars + len > self.max_chars && !self.current.is_empty() {
            self.flush();
        }
        self.current.push_str(unit);
        self.current_chars += len;
        if unit.contains('\n') {
            self.last_newline = Some((self.current.len(), self.current_chars));
        }
    }

    fn flush(&mut self) {
        match self.last_newline.take() {
            Some((at, chars)) if chars * 2 >= self.max_chars && at < self.current.len() => {
                let rest = self.current.split_off(at);
                self.chunks.push(std::mem::replace(&mut self.current, rest));
                self.current_chars -= chars;
            }
            _ => {
                self.chunks.push(std::mem::take(&mut self.current));
                self.current_chars = 0;
            }
        }
    }

    fn finish(mut self) -> Vec<String> {
        if !self.current.is_empty() {
            self.chunks.push(self.current);
        }
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(tag: &str) -> CodeBlock {
        let Some(block) = CodeBlock::new(tag, "true") else {
            panic!("non-empty body");
        };
        block
    }

    #[test]
    fn test_success_without_output_uses_marker() {
        let result = ExecutionResult::success(&block("bash"), "\n".into(), Duration::ZERO);
        assert_eq!(result.output, NO_OUTPUT_MARKER);
        assert!(result.rendered_message().starts_with("✅ `bash` ran successfully"));
    }

    #[test]
    fn test_statuses_are_distinguishable() {
        let b = block("python");
        let blocked = ExecutionResult::from_error(
            &b,
            SandboxError::PolicyBlocked("privilege escalation".into()),
            Duration::ZERO,
        );
        let failed = ExecutionResult::from_error(
            &b,
            SandboxError::NonZeroExit {
                code: Some(1),
                stderr: "Traceback".into(),
                stdout: String::new(),
            },
            Duration::ZERO,
        );
        let timed_out =
            ExecutionResult::from_error(&b, SandboxError::TimedOut(30), Duration::from_secs(30));

        assert!(blocked.rendered_message().contains("blocked by policy"));
        assert!(failed.rendered_message().contains("ran but failed (exit code 1)"));
        assert!(failed.rendered_message().contains("Traceback"));
        assert!(timed_out.rendered_message().contains("took too long"));
        assert!(timed_out.rendered_message().contains("30s"));
    }

    #[test]
    fn test_failure_without_stderr_uses_marker() {
        let result = ExecutionResult::from_error(
            &block("bash"),
            SandboxError::NonZeroExit {
                code: None,
                stderr: String::new(),
                stdout: "partial".into(),
            },
            Duration::ZERO,
        );
        assert_eq!(result.status, ExecutionStatus::Failure);
        assert_eq!(result.output, NO_ERROR_OUTPUT_MARKER);
        assert!(result.rendered_message().contains("killed by a signal"));
    }

    #[test]
    fn test_output_fences_are_neutralized() {
        let result =
            ExecutionResult::success(&block("bash"), "```\nfake\n```".into(), Duration::ZERO);
        let rendered = result.rendered_message();
        assert_eq!(rendered.matches("```").count(), 2);
    }

    #[test]
    fn test_long_output_is_truncated() {
        let result = ExecutionResult::success(
            &block("python"),
            "x".repeat(SANDBOX_OUTPUT_RENDER_LIMIT * 2),
            Duration::ZERO,
        );
        let rendered = result.rendered_message();
        assert!(rendered.contains("(output truncated)"));
        assert!(rendered.chars().count() < SANDBOX_OUTPUT_RENDER_LIMIT + 100);
    }

    #[test]
    fn test_report_labels_every_block() {
        let b = block("bash");
        let results = vec![
            ExecutionResult::success(&b, "one".into(), Duration::ZERO),
            ExecutionResult::from_error(&b, SandboxError::TimedOut(30), Duration::ZERO),
        ];
        let report = render_report(&results);
        assert!(report.starts_with("**Block 1/2**\n✅"));
        assert!(report.contains("\n\n**Block 2/2**\n⏱"));
    }

    fn loud_result(lines: usize) -> ExecutionResult {
        let stdout = (0..lines).map(|i| format!("line {i}\n")).collect();
        ExecutionResult::success(&block("python"), stdout, Duration::ZERO)
    }

    #[test]
    fn test_report_chunks_cut_between_blocks() {
        // The first two sections are about 3000 characters each, the third is short
        let results = vec![loud_result(400), loud_result(400), loud_result(3)];
        let chunks = chunk_report(&results, 4000);

        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].starts_with("**Block 2/3**"));
        assert!(chunks[1].contains("**Block 3/3**"));
        assert_eq!(chunks.concat(), render_report(&results));
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 4000);
            assert!(chunk.starts_with("**Block "), "{chunk}");
            assert_eq!(chunk.matches("```").count() % 2, 0, "unbalanced fences: {chunk}");
        }
    }

    #[test]
    fn test_report_chunks_pack_small_blocks() {
        let results = vec![loud_result(1), loud_result(1), loud_result(1)];
        let chunks = chunk_report(&results, 4000);
        assert_eq!(chunks, vec![render_report(&results)]);
    }

    #[test]
    fn test_oversized_block_falls_back_to_text_chunks() {
        let results = vec![loud_result(1), loud_result(400)];
        let chunks = chunk_report(&results, 500);
        assert!(chunks.len() > 2);
        assert!(chunks.iter().all(|c| c.chars().count() <= 500));
        assert!(chunks[1].starts_with("**Block 2/2**"));
        assert_eq!(chunks.concat(), render_report(&results));
    }

    #[test]
    fn test_chunk_short_text_is_single_chunk() {
        assert_eq!(chunk_text("hello", 4000), vec!["hello".to_string()]);
        assert!(chunk_text("", 4000).is_empty());
    }

    #[test]
    fn test_chunk_prefers_newlines() {
        let text = "aaaa\nbbbb\ncccc";
        let chunks = chunk_text(text, 7);
        assert_eq!(chunks, vec!["aaaa\n", "bbbb\n", "cccc"]);
    }

    #[test]
    fn test_chunk_long_line_is_hard_split() {
        let text = "z".repeat(10_001);
        let chunks = chunk_text(&text, 4000);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 4000);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_chunk_counts_characters_not_bytes() {
        let text = "я".repeat(4000);
        assert_eq!(chunk_text(&text, 4000).len(), 1);
        let emoji = "🔥".repeat(4001);
        let chunks = chunk_text(&emoji, 4000);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.chars().count() <= 4000));
    }
}

//! Structured error kinds for the grizzly language server.
//!
//! Each variant carries a machine-readable tag (its variant name) plus
//! enough context to build the diagnostic or log line described in the
//! error-handling design: a single bad step definition never fails the
//! whole inventory, and a single bad document never affects another.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error kind for the server.
///
/// `PatternMalformed`, `UnknownStep` and `ArgumentInvalid` are collected as
/// data (pushed into a result's error list) rather than ever appearing
/// behind a `Result::Err`; `SourceLoadFailed` and `RenderFailed` are real
/// failures that `?`-propagate up to the rebuild/diagnostics orchestration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GrizzlyError {
    /// A single step-definition pattern could not be compiled. Non-fatal:
    /// the offending definition is skipped and the rebuild continues.
    #[error("malformed step pattern `{pattern}`: {reason}")]
    PatternMalformed { pattern: String, reason: String },

    /// The external step-definition library failed to load entirely.
    /// The previous inventory, if any, remains active.
    #[error("failed to load step definitions from {source_path}: {reason}")]
    SourceLoadFailed { source_path: String, reason: String },

    /// The Gherkin parser rejected the current document text.
    #[error("failed to parse feature file: {reason}")]
    ParseFailed { reason: String, line: u32 },

    /// Template preprocessing raised before the document could be parsed.
    #[error("failed to render template fragments: {reason}")]
    RenderFailed { reason: String, line: u32 },

    /// A parsed step has no matching catalogue entry.
    #[error("no step definition matches `{text}`")]
    UnknownStep {
        text: String,
        verb: String,
        suggestion: Option<String>,
    },

    /// A matched step's argument failed validation.
    #[error("invalid argument `{value}` for step `{text}`: {reason}")]
    ArgumentInvalid {
        text: String,
        value: String,
        reason: String,
    },

    /// Anything else; logged at error severity, never crashes the request.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error produced while preparing or invoking the workspace's Python-style
/// virtual environment for the step library.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("environment root {0} does not exist")]
    MissingRoot(PathBuf),

    #[error("failed to spawn installer process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("installer exited with non-zero status: {0}")]
    InstallFailed(i32),

    #[error("timed out waiting for environment preparation after {0:?}")]
    Timeout(std::time::Duration),

    #[error("manifest file {0} could not be read: {1}")]
    ManifestUnreadable(PathBuf, String),

    #[error("manifest file {0} is not valid JSON: {1}")]
    ManifestMalformed(PathBuf, String),
}

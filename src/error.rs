//! Defines the error types used throughout commit-pilot.
//!
//! Each domain has its own enum ([`GitError`], [`ValidationError`],
//! [`ResponseError`], [`LlmError`], [`ConfigError`]) and the root [`Error`]
//! wraps them so `?` works across the pipeline. Callers branch on the variant,
//! never on rendered text.
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A specialized `Result` type for commit-pilot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error for the decision pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The caller-supplied budget for an analysis or execution expired.
    #[error("{operation} timed out after {budget:?}")]
    Timeout {
        operation: &'static str,
        budget: Duration,
    },

    /// Terminal I/O failed while asking the user for a selection.
    #[error("terminal I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Represents errors that can occur during Git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Failed to execute the external 'git' process.
    #[error("Unable to execute git process: {0}")]
    Execution(String),

    /// The output (stdout or stderr) from the 'git' process was not valid UTF-8.
    #[error("Unable to decode output from git executable")]
    Undecodable,

    /// The provided string is not a valid Git reference name (e.g., branch name).
    #[error("Ref name is invalid: {0}")]
    InvalidRefName(String),

    /// The 'git' command executed but reported an error.
    /// Contains the captured stdout and stderr from the failed command.
    #[error("git failed with the following stdout: {stdout} stderr: {stderr}")]
    GitError { stdout: String, stderr: String },

    /// The path is not inside a Git work tree.
    #[error("Not a git repository: {0:?}")]
    NotAVcsRepository(PathBuf),

    /// `git commit` found nothing staged.
    #[error("Nothing to commit: no staged changes")]
    NothingToCommit,

    #[error("Branch '{0}' already exists")]
    BranchExists(String),

    #[error("Cannot merge branch '{0}' into itself")]
    SelfMerge(String),

    /// A merge stopped on conflicts. The working tree has been aborted back to a clean state.
    #[error("Merge conflict in {} file(s): {}", files.len(), files.join(", "))]
    MergeConflict { files: Vec<String> },

    /// Tracked files have uncommitted changes, so a merge would mix them into its result.
    #[error(
        "Cannot merge with uncommitted changes in {} file(s): {}",
        files.len(),
        files.join(", ")
    )]
    DirtyWorkingTree { files: Vec<String> },

    /// The chosen action is not something the executor can carry out.
    #[error("Action '{0}' cannot be executed automatically")]
    UnsupportedAction(String),

    /// The 'git' executable was not found in the system's PATH.
    #[error("'git' command not found. Please ensure Git is installed and that its executable is included in your system's PATH environment variable.")]
    GitNotFound,
}

/// A domain value failed one of its construction invariants.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("confidence {0} is outside 0.0..=1.0")]
    ConfidenceOutOfRange(f64),

    #[error("reasoning must not be empty")]
    EmptyReasoning,

    #[error("alternative description must not be empty")]
    EmptyDescription,

    #[error("create-branch requires a branch name")]
    MissingBranchName,

    #[error("commit-direct requires a commit message")]
    MissingCommitMessage,

    #[error("merge requires a target branch")]
    MissingMergeTarget,

    #[error("commit title must not be empty")]
    EmptyTitle,

    #[error("commit title must not end with a period")]
    TrailingPeriod,

    #[error("conventional commit title is {len} characters, limit is {max}")]
    TitleTooLong { len: usize, max: usize },

    #[error("invalid branch name: {0}")]
    InvalidBranchName(String),
}

/// The model's payload could not be turned into a Decision.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("model returned malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("model response failed validation: {0}")]
    Invalid(#[from] ValidationError),

    #[error("model returned no choices")]
    EmptyChoices,
}

/// Failures of the LLM client.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The service throttled this key. Never retried within the invocation.
    #[error("rate limited: {message} (retry in {}s)", retry_after.as_secs())]
    RateLimited {
        message: String,
        retry_after: Duration,
    },

    /// Non-success HTTP status carrying the service's error envelope, if any.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Transport-level failure (DNS, connect, reset, timeout).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The connection failed while the response body was being read.
    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),

    /// Every attempt failed with a retryable error.
    #[error("analysis failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<LlmError> },

    /// The payload parsed but did not describe a valid result.
    #[error(transparent)]
    Response(#[from] ResponseError),

    #[error("missing API key for provider '{0}'")]
    MissingApiKey(String),

    #[error("API key contains characters not allowed in an HTTP header")]
    InvalidApiKey,

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl LlmError {
    /// Transient transport failures and HTTP 500/502/503 are worth retrying.
    /// Requests that could not be built are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Transport(e) => {
                if e.is_builder() || e.is_redirect() || e.is_decode() {
                    return false;
                }
                e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
            }
            LlmError::Body(_) => true,
            LlmError::Http { status, .. } => matches!(status, 500 | 502 | 503),
            _ => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, LlmError::RateLimited { .. })
    }
}

/// Configuration load/save failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration directory available on this platform")]
    NoConfigDir,

    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write config {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("no API key configured; run `commit-pilot config` or set COMMIT_PILOT_API_KEY")]
    MissingApiKey,

    #[error("unknown value '{value}' for {field}")]
    UnknownValue { field: &'static str, value: String },
}

//! The version-control operations port.
//!
//! The decision pipeline only ever talks to [`Vcs`]. [`crate::Repository`]
//! implements it by shelling out to `git`; tests use a scripted fake.

use crate::error::GitError;
use crate::models::CommitSummary;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Result of a single VCS operation.
pub type GitResult<T> = std::result::Result<T, GitError>;

/// How a ready branch is folded into its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    Squash,
    #[default]
    Regular,
    FastForward,
    Rebase,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Squash => "squash",
            MergeStrategy::Regular => "regular",
            MergeStrategy::FastForward => "fast-forward",
            MergeStrategy::Rebase => "rebase",
        }
    }
}

impl FromStr for MergeStrategy {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self, GitError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "squash" => Ok(MergeStrategy::Squash),
            "regular" | "merge" | "no-ff" => Ok(MergeStrategy::Regular),
            "fast-forward" | "ff" | "ff-only" => Ok(MergeStrategy::FastForward),
            "rebase" => Ok(MergeStrategy::Rebase),
            other => Err(GitError::UnsupportedAction(format!("merge strategy {other}"))),
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags for a single `git merge` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode<'a> {
    /// `--squash`; the caller commits separately.
    Squash,
    /// `--ff-only`
    FastForwardOnly,
    /// `--no-ff -m <message>`
    NoFastForward { message: &'a str },
    /// `--no-commit --no-ff`, used by the conflict preview. Always aborted afterwards.
    Preview,
}

/// Capability set the core needs from a version-control tool.
///
/// Every method operates on the repository the implementation was built for.
/// Methods returning counts or optional metadata treat "absent" as `Ok(None)`
/// or zero wherever the underlying tool reports absence as a failure.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Path the implementation was opened on.
    fn location(&self) -> &Path;

    async fn is_repository(&self) -> GitResult<bool>;

    /// Absolute path of the work tree root.
    async fn root(&self) -> GitResult<std::path::PathBuf>;

    /// Current branch name, `None` when HEAD is detached.
    async fn current_branch(&self) -> GitResult<Option<String>>;

    /// Whether HEAD points at any commit yet.
    async fn has_commits(&self) -> GitResult<bool>;

    /// Raw `git status --porcelain` output, lines untouched.
    async fn status_porcelain(&self) -> GitResult<String>;

    async fn diff(&self, staged: bool) -> GitResult<String>;

    async fn diff_numstat(&self, staged: bool) -> GitResult<String>;

    /// Most recent commits, newest first. `range` is a revision range such as `main..HEAD`.
    async fn log(&self, range: Option<&str>, limit: usize) -> GitResult<Vec<CommitSummary>>;

    async fn add_all(&self) -> GitResult<()>;

    /// Commits the index. Fails with [`GitError::NothingToCommit`] when it is empty.
    async fn commit(&self, message: &str) -> GitResult<()>;

    async fn head_hash(&self, short: bool) -> GitResult<String>;

    async fn branch_exists(&self, name: &str) -> GitResult<bool>;

    async fn create_branch(&self, name: &str) -> GitResult<()>;

    async fn checkout(&self, name: &str) -> GitResult<()>;

    async fn delete_branch(&self, name: &str, force: bool) -> GitResult<()>;

    async fn rename_branch(&self, old: &str, new: &str) -> GitResult<()>;

    async fn push(&self, remote: &str, branch: &str, set_upstream: bool) -> GitResult<()>;

    async fn pull(&self) -> GitResult<()>;

    /// Runs `git merge` and returns its combined output on success.
    async fn merge(&self, source: &str, mode: MergeMode<'_>) -> GitResult<String>;

    async fn abort_merge(&self) -> GitResult<()>;

    async fn rebase(&self, onto: &str) -> GitResult<()>;

    async fn abort_rebase(&self) -> GitResult<()>;

    /// `(left-only, right-only)` commit counts for `left...right`.
    async fn ahead_behind(&self, left: &str, right: &str) -> GitResult<(u32, u32)>;

    /// Number of commits reachable from `range` (e.g. `main..feature`).
    async fn count_commits(&self, range: &str) -> GitResult<u32>;

    async fn merge_base(&self, a: &str, b: &str) -> GitResult<Option<String>>;

    /// Tracking branch of `branch`, e.g. `origin/feature/x`.
    async fn upstream(&self, branch: &str) -> GitResult<Option<String>>;

    async fn remotes(&self) -> GitResult<Vec<String>>;

    async fn remote_url(&self, name: &str) -> GitResult<Option<String>>;

    /// Parent recorded for `branch` when it was created.
    async fn parent_branch(&self, branch: &str) -> GitResult<Option<String>>;

    async fn set_parent_branch(&self, branch: &str, parent: &str) -> GitResult<()>;
}

static CONFLICT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^CONFLICT \((?P<kind>[^)]*)\): (?P<rest>.*?)\s*$")
        .expect("Invalid static conflict regex")
});

const MERGE_CONFLICT_IN: &str = "Merge conflict in ";

/// Extracts file paths from the `CONFLICT (<kind>): ...` lines of merge output.
pub fn parse_conflict_paths(output: &str) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for caps in CONFLICT_LINE.captures_iter(output) {
        let rest = &caps["rest"];
        let path = if let Some(idx) = rest.rfind(MERGE_CONFLICT_IN) {
            rest[idx + MERGE_CONFLICT_IN.len()..].trim()
        } else if caps["kind"].contains("delete") {
            // "<path> deleted in <ref> and modified in <ref>. ..."
            rest.split(" deleted in ").next().unwrap_or("").trim()
        } else {
            continue;
        };
        if !path.is_empty() && !paths.iter().any(|p| p == path) {
            paths.push(path.to_string());
        }
    }
    paths
}

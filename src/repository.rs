//! Provides the `git` command-line implementation of the [`Vcs`] port.

use crate::error::GitError;
use crate::models::CommitSummary;
use crate::vcs::{parse_conflict_paths, GitResult, MergeMode, Vcs};
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::str;
use tokio::process::Command;
use tracing::{debug, warn};

/// Git config key holding the branch a branch was created from.
const PARENT_KEY: &str = "pilot-parent";

/// Represents a local Git repository located at a specific path.
///
/// Every operation spawns `git` with `kill_on_drop`, so dropping an in-flight
/// future (for example when a caller's timeout expires) terminates the child.
#[derive(Debug, Clone)]
pub struct Repository {
    pub(crate) location: PathBuf,
}

impl Repository {
    /// Creates a `Repository` instance pointing to a local path.
    ///
    /// This does *not* check if the path is actually a valid Git repository.
    /// Use [`Vcs::is_repository`] for that.
    pub fn new<P: AsRef<Path>>(p: P) -> Repository {
        Repository {
            location: PathBuf::from(p.as_ref()),
        }
    }

    /// Initializes a new Git repository in the specified directory.
    ///
    /// Equivalent to `git init <path>`.
    pub async fn init<P: AsRef<Path>>(p: P) -> GitResult<Repository> {
        let p_ref = p.as_ref();
        execute_git(p_ref, ["init", "--quiet"]).await?;
        Ok(Repository::new(p_ref))
    }

    /// Executes an arbitrary Git command within the repository context.
    pub async fn cmd<I, S>(&self, args: I) -> GitResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        execute_git(&self.location, args).await
    }

    /// Executes an arbitrary Git command and returns its standard output lines.
    pub async fn cmd_out<I, S>(&self, args: I) -> GitResult<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        execute_git_fn(&self.location, args, |output| {
            Ok(output.lines().map(|line| line.to_owned()).collect())
        })
        .await
    }

    async fn trimmed<I, S>(&self, args: I) -> GitResult<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        execute_git_fn(&self.location, args, |output| Ok(output.trim().to_owned())).await
    }

    /// Like [`Repository::trimmed`] but maps a failing exit status to `None`.
    async fn optional<I, S>(&self, args: I) -> GitResult<Option<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        absent_as_none(self.trimmed(args).await).map(|v| v.filter(|s| !s.is_empty()))
    }

    /// Whether `name` exists inside the repository's git directory.
    async fn git_path_exists(&self, name: &str) -> GitResult<bool> {
        let relative = self.trimmed(["rev-parse", "--git-path", name]).await?;
        let path = self.location.join(relative);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| GitError::Execution(format!("cannot inspect {}: {e}", path.display())))
    }
}

#[async_trait]
impl Vcs for Repository {
    fn location(&self) -> &Path {
        &self.location
    }

    async fn is_repository(&self) -> GitResult<bool> {
        if !self.location.is_dir() {
            return Ok(false);
        }
        match self.trimmed(["rev-parse", "--is-inside-work-tree"]).await {
            Ok(out) => Ok(out == "true"),
            Err(GitError::GitError { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn root(&self) -> GitResult<PathBuf> {
        self.trimmed(["rev-parse", "--show-toplevel"])
            .await
            .map(PathBuf::from)
    }

    async fn current_branch(&self) -> GitResult<Option<String>> {
        // symbolic-ref also resolves the unborn branch of an empty repository
        self.optional(["symbolic-ref", "--quiet", "--short", "HEAD"]).await
    }

    async fn has_commits(&self) -> GitResult<bool> {
        self.optional(["rev-parse", "--verify", "--quiet", "HEAD"])
            .await
            .map(|hash| hash.is_some())
    }

    async fn status_porcelain(&self) -> GitResult<String> {
        execute_git_fn(
            &self.location,
            ["status", "--porcelain", "--untracked-files=all"],
            |output| Ok(output.to_owned()),
        )
        .await
    }

    async fn diff(&self, staged: bool) -> GitResult<String> {
        let mut args = vec!["diff", "--no-color", "--no-ext-diff"];
        if staged {
            args.push("--cached");
        }
        // Diffs may contain arbitrary bytes from the working tree
        let output = run_git(&self.location, args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn diff_numstat(&self, staged: bool) -> GitResult<String> {
        let mut args = vec!["diff", "--numstat", "--no-color"];
        if staged {
            args.push("--cached");
        }
        let output = run_git(&self.location, args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn log(&self, range: Option<&str>, limit: usize) -> GitResult<Vec<CommitSummary>> {
        if !self.has_commits().await? {
            return Ok(Vec::new());
        }
        let limit = format!("--max-count={limit}");
        let mut args = vec!["log", limit.as_str(), CommitSummary::LOG_FORMAT];
        if let Some(range) = range {
            args.push(range);
        }
        execute_git_fn(&self.location, args, |output| {
            Ok(output.lines().filter_map(CommitSummary::from_log_line).collect())
        })
        .await
    }

    async fn add_all(&self) -> GitResult<()> {
        execute_git(&self.location, ["add", "--all"]).await
    }

    async fn commit(&self, message: &str) -> GitResult<()> {
        match execute_git(&self.location, ["commit", "--quiet", "-m", message]).await {
            Err(GitError::GitError { stdout, stderr })
                if is_nothing_to_commit(&stdout, &stderr) =>
            {
                Err(GitError::NothingToCommit)
            }
            other => other,
        }
    }

    async fn head_hash(&self, short: bool) -> GitResult<String> {
        if short {
            self.trimmed(["rev-parse", "--short", "HEAD"]).await
        } else {
            self.trimmed(["rev-parse", "HEAD"]).await
        }
    }

    async fn branch_exists(&self, name: &str) -> GitResult<bool> {
        let refname = format!("refs/heads/{name}");
        let args = ["show-ref", "--verify", "--quiet", refname.as_str()];
        match execute_git(&self.location, args).await {
            Ok(()) => Ok(true),
            Err(GitError::GitError { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_branch(&self, name: &str) -> GitResult<()> {
        match execute_git(&self.location, ["branch", name]).await {
            Err(GitError::GitError { stderr, .. }) if stderr.contains("already exists") => {
                Err(GitError::BranchExists(name.to_string()))
            }
            other => other,
        }
    }

    async fn checkout(&self, name: &str) -> GitResult<()> {
        execute_git(&self.location, ["checkout", "--quiet", name]).await
    }

    async fn delete_branch(&self, name: &str, force: bool) -> GitResult<()> {
        let flag = if force { "-D" } else { "-d" };
        execute_git(&self.location, ["branch", flag, name]).await
    }

    async fn rename_branch(&self, old: &str, new: &str) -> GitResult<()> {
        execute_git(&self.location, ["branch", "-m", old, new]).await
    }

    async fn push(&self, remote: &str, branch: &str, set_upstream: bool) -> GitResult<()> {
        let mut args = vec!["push"];
        if set_upstream {
            args.push("-u");
        }
        args.push(remote);
        args.push(branch);
        execute_git(&self.location, args).await
    }

    async fn pull(&self) -> GitResult<()> {
        execute_git(&self.location, ["pull", "--ff-only"]).await
    }

    async fn merge(&self, source: &str, mode: MergeMode<'_>) -> GitResult<String> {
        let mut args = vec!["merge"];
        match mode {
            MergeMode::Squash => args.push("--squash"),
            MergeMode::FastForwardOnly => args.push("--ff-only"),
            MergeMode::NoFastForward { message } => {
                args.extend(["--no-ff", "-m", message]);
            }
            MergeMode::Preview => args.extend(["--no-commit", "--no-ff"]),
        }
        args.push(source);

        let output = run_git(&self.location, args).await?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let conflicts = parse_conflict_paths(&format!("{stdout}\n{stderr}"));
        if conflicts.is_empty() {
            Err(GitError::GitError { stdout, stderr })
        } else {
            Err(GitError::MergeConflict { files: conflicts })
        }
    }

    async fn abort_merge(&self) -> GitResult<()> {
        let merge_head = self
            .optional(["rev-parse", "--quiet", "--verify", "MERGE_HEAD"])
            .await?;
        if merge_head.is_some() {
            return execute_git(&self.location, ["merge", "--abort"]).await;
        }
        // squash merges leave SQUASH_MSG instead of MERGE_HEAD
        if self.git_path_exists("SQUASH_MSG").await? {
            return execute_git(&self.location, ["reset", "--merge"]).await;
        }
        debug!("no merge in progress, nothing to abort");
        Ok(())
    }

    async fn rebase(&self, onto: &str) -> GitResult<()> {
        execute_git(&self.location, ["rebase", onto]).await
    }

    async fn abort_rebase(&self) -> GitResult<()> {
        execute_git(&self.location, ["rebase", "--abort"]).await
    }

    async fn ahead_behind(&self, left: &str, right: &str) -> GitResult<(u32, u32)> {
        let range = format!("{left}...{right}");
        let out = self
            .trimmed(["rev-list", "--left-right", "--count", range.as_str()])
            .await?;
        parse_left_right(&out).ok_or_else(|| GitError::GitError {
            stdout: out,
            stderr: "Failed to parse rev-list counts".to_string(),
        })
    }

    async fn count_commits(&self, range: &str) -> GitResult<u32> {
        let out = self.trimmed(["rev-list", "--count", range]).await?;
        out.parse::<u32>().map_err(|_| GitError::GitError {
            stdout: out,
            stderr: "Failed to parse rev-list count".to_string(),
        })
    }

    async fn merge_base(&self, a: &str, b: &str) -> GitResult<Option<String>> {
        self.optional(["merge-base", a, b]).await
    }

    async fn upstream(&self, branch: &str) -> GitResult<Option<String>> {
        let spec = format!("{branch}@{{upstream}}");
        self.optional(["rev-parse", "--abbrev-ref", "--symbolic-full-name", spec.as_str()])
            .await
    }

    async fn remotes(&self) -> GitResult<Vec<String>> {
        execute_git_fn(&self.location, ["remote"], |output| {
            Ok(output
                .lines()
                .map(|line| line.trim().to_owned())
                .filter(|line| !line.is_empty())
                .collect())
        })
        .await
    }

    async fn remote_url(&self, name: &str) -> GitResult<Option<String>> {
        let key = format!("remote.{name}.url");
        self.optional(["config", "--get", key.as_str()]).await
    }

    async fn parent_branch(&self, branch: &str) -> GitResult<Option<String>> {
        let key = format!("branch.{branch}.{PARENT_KEY}");
        self.optional(["config", "--get", key.as_str()]).await
    }

    async fn set_parent_branch(&self, branch: &str, parent: &str) -> GitResult<()> {
        let key = format!("branch.{branch}.{PARENT_KEY}");
        execute_git(&self.location, ["config", key.as_str(), parent]).await
    }
}

// --- Helper Functions ---

fn is_nothing_to_commit(stdout: &str, stderr: &str) -> bool {
    let text = format!("{stdout}\n{stderr}");
    text.contains("nothing to commit")
        || text.contains("no changes added to commit")
        || text.contains("nothing added to commit")
}

/// Maps "git ran and said no" to `None`, keeping spawn failures as errors.
fn absent_as_none<T>(result: GitResult<T>) -> GitResult<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(GitError::GitError { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Parses `rev-list --left-right --count` output: `<left>\t<right>`.
fn parse_left_right(out: &str) -> Option<(u32, u32)> {
    let mut parts = out.split_whitespace();
    let left = parts.next()?.parse().ok()?;
    let right = parts.next()?.parse().ok()?;
    Some((left, right))
}

/// Executes a Git command, discarding successful output.
async fn execute_git<I, S, P>(p: P, args: I) -> GitResult<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
    P: AsRef<Path>,
{
    execute_git_fn(p, args, |_| Ok(())).await
}

/// Executes a Git command and processes its stdout on success using a closure.
/// Handles errors, including capturing stderr on failure.
async fn execute_git_fn<I, S, P, F, R>(p: P, args: I, process: F) -> GitResult<R>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
    P: AsRef<Path>,
    F: FnOnce(&str) -> GitResult<R>,
{
    let output = run_git(p, args).await?;

    if output.status.success() {
        match str::from_utf8(&output.stdout) {
            Ok(stdout_str) => process(stdout_str),
            Err(_) => Err(GitError::Undecodable),
        }
    } else {
        let stdout = str::from_utf8(&output.stdout)
            .map(|s| s.trim_end().to_owned())
            .unwrap_or_else(|_| String::from("[stdout: undecodable UTF-8]"));
        let stderr = str::from_utf8(&output.stderr)
            .map(|s| s.trim_end().to_owned())
            .unwrap_or_else(|_| String::from("[stderr: undecodable UTF-8]"));

        Err(GitError::GitError { stdout, stderr })
    }
}

/// Spawns `git` and collects its output regardless of exit status.
async fn run_git<I, S, P>(p: P, args: I) -> GitResult<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
    P: AsRef<Path>,
{
    let dir = p.as_ref();
    let args: Vec<S> = args.into_iter().collect();
    debug!(
        dir = %dir.display(),
        args = ?args.iter().map(|a| a.as_ref().to_string_lossy().into_owned()).collect::<Vec<_>>(),
        "running git"
    );

    if !dir.is_dir() {
        return Err(GitError::Execution(format!(
            "working directory {} does not exist",
            dir.display()
        )));
    }

    let result = Command::new("git")
        .current_dir(dir)
        .args(&args)
        // Output is parsed, so keep git's messages in a fixed locale
        .env("LC_ALL", "C")
        .env("GIT_TERMINAL_PROMPT", "0")
        .kill_on_drop(true)
        .output()
        .await;

    match result {
        Ok(output) => Ok(output),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(GitError::GitNotFound),
        Err(e) => {
            warn!(error = %e, "failed to execute git command");
            Err(GitError::Execution(e.to_string()))
        }
    }
}

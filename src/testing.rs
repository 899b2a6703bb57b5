//! Scripted in-memory [`Vcs`] used by unit tests.

use crate::error::GitError;
use crate::models::CommitSummary;
use crate::vcs::{parse_conflict_paths, GitResult, MergeMode, Vcs};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Mutable state behind a [`FakeVcs`]. Tests script it before running the code
/// under test and inspect `calls` afterwards.
#[derive(Debug, Default)]
pub(crate) struct FakeState {
    pub is_repo: bool,
    pub branch: Option<String>,
    pub has_commits: bool,
    pub status: String,
    pub numstat_staged: String,
    pub numstat_unstaged: String,
    pub diff_staged: String,
    pub diff_unstaged: String,
    pub log: Vec<CommitSummary>,
    pub branches: HashSet<String>,
    pub parents: HashMap<String, String>,
    pub upstreams: HashMap<String, String>,
    pub remotes: Vec<(String, String)>,
    /// Keyed by `left...right`.
    pub ahead_behind: HashMap<String, (u32, u32)>,
    pub ahead_behind_fails: bool,
    /// Keyed by range; a missing range fails like an unrelated-history `rev-list`.
    pub counts: HashMap<String, u32>,
    pub merge_base: Option<String>,
    /// Combined output of a failing `git merge`.
    pub merge_failure: Option<String>,
    pub rebase_fails: bool,
    pub abort_fails: bool,
    pub nothing_staged: bool,
    pub commits_made: u32,
    pub calls: Vec<String>,
}

pub(crate) struct FakeVcs {
    location: PathBuf,
    state: Mutex<FakeState>,
}

impl FakeVcs {
    /// A repository on `main` with one commit and a clean tree.
    pub fn new() -> FakeVcs {
        let state = FakeState {
            is_repo: true,
            branch: Some("main".to_string()),
            has_commits: true,
            branches: HashSet::from(["main".to_string()]),
            ..FakeState::default()
        };
        FakeVcs {
            location: PathBuf::from("/repo"),
            state: Mutex::new(state),
        }
    }

    pub fn at(location: impl Into<PathBuf>) -> FakeVcs {
        let mut fake = FakeVcs::new();
        fake.location = location.into();
        fake
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    fn record(&self, call: String) -> MutexGuard<'_, FakeState> {
        let mut state = self.state();
        state.calls.push(call);
        state
    }
}

fn refused(stderr: &str) -> GitError {
    GitError::GitError {
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl Vcs for FakeVcs {
    fn location(&self) -> &Path {
        &self.location
    }

    async fn is_repository(&self) -> GitResult<bool> {
        Ok(self.state().is_repo)
    }

    async fn root(&self) -> GitResult<PathBuf> {
        Ok(self.location.clone())
    }

    async fn current_branch(&self) -> GitResult<Option<String>> {
        Ok(self.state().branch.clone())
    }

    async fn has_commits(&self) -> GitResult<bool> {
        Ok(self.state().has_commits)
    }

    async fn status_porcelain(&self) -> GitResult<String> {
        Ok(self.state().status.clone())
    }

    async fn diff(&self, staged: bool) -> GitResult<String> {
        let state = self.state();
        Ok(if staged {
            state.diff_staged.clone()
        } else {
            state.diff_unstaged.clone()
        })
    }

    async fn diff_numstat(&self, staged: bool) -> GitResult<String> {
        let state = self.state();
        Ok(if staged {
            state.numstat_staged.clone()
        } else {
            state.numstat_unstaged.clone()
        })
    }

    async fn log(&self, _range: Option<&str>, limit: usize) -> GitResult<Vec<CommitSummary>> {
        Ok(self.state().log.iter().take(limit).cloned().collect())
    }

    async fn add_all(&self) -> GitResult<()> {
        self.record("add --all".to_string());
        Ok(())
    }

    async fn commit(&self, message: &str) -> GitResult<()> {
        let mut state = self.record(format!("commit {message}"));
        if state.nothing_staged {
            return Err(GitError::NothingToCommit);
        }
        state.has_commits = true;
        state.commits_made += 1;
        Ok(())
    }

    async fn head_hash(&self, short: bool) -> GitResult<String> {
        let n = self.state().commits_made;
        let hash = format!("{n:07}abcdef0123456789abcdef0123456789a");
        Ok(if short { hash[..7].to_string() } else { hash })
    }

    async fn branch_exists(&self, name: &str) -> GitResult<bool> {
        Ok(self.state().branches.contains(name))
    }

    async fn create_branch(&self, name: &str) -> GitResult<()> {
        let mut state = self.record(format!("branch {name}"));
        if !state.branches.insert(name.to_string()) {
            return Err(GitError::BranchExists(name.to_string()));
        }
        Ok(())
    }

    async fn checkout(&self, name: &str) -> GitResult<()> {
        let mut state = self.record(format!("checkout {name}"));
        if !state.branches.contains(name) {
            return Err(refused(&format!("error: pathspec '{name}' did not match")));
        }
        state.branch = Some(name.to_string());
        Ok(())
    }

    async fn delete_branch(&self, name: &str, _force: bool) -> GitResult<()> {
        self.record(format!("branch -d {name}")).branches.remove(name);
        Ok(())
    }

    async fn rename_branch(&self, old: &str, new: &str) -> GitResult<()> {
        let mut state = self.record(format!("branch -m {old} {new}"));
        state.branches.remove(old);
        state.branches.insert(new.to_string());
        Ok(())
    }

    async fn push(&self, remote: &str, branch: &str, set_upstream: bool) -> GitResult<()> {
        let flag = if set_upstream { " -u" } else { "" };
        self.record(format!("push{flag} {remote} {branch}"));
        Ok(())
    }

    async fn pull(&self) -> GitResult<()> {
        self.record("pull".to_string());
        Ok(())
    }

    async fn merge(&self, source: &str, mode: MergeMode<'_>) -> GitResult<String> {
        let flags = match mode {
            MergeMode::Squash => "--squash".to_string(),
            MergeMode::FastForwardOnly => "--ff-only".to_string(),
            MergeMode::NoFastForward { message } => format!("--no-ff -m {message}"),
            MergeMode::Preview => "--no-commit --no-ff".to_string(),
        };
        let state = self.record(format!("merge {flags} {source}"));
        match &state.merge_failure {
            Some(output) => {
                let files = parse_conflict_paths(output);
                if files.is_empty() {
                    Err(refused(output))
                } else {
                    Err(GitError::MergeConflict { files })
                }
            }
            None => Ok(String::new()),
        }
    }

    async fn abort_merge(&self) -> GitResult<()> {
        let state = self.record("merge --abort".to_string());
        if state.abort_fails {
            return Err(refused("fatal: There is no merge to abort"));
        }
        Ok(())
    }

    async fn rebase(&self, onto: &str) -> GitResult<()> {
        let state = self.record(format!("rebase {onto}"));
        if state.rebase_fails {
            return Err(refused("error: could not apply 1234567"));
        }
        Ok(())
    }

    async fn abort_rebase(&self) -> GitResult<()> {
        self.record("rebase --abort".to_string());
        Ok(())
    }

    async fn ahead_behind(&self, left: &str, right: &str) -> GitResult<(u32, u32)> {
        let state = self.state();
        if state.ahead_behind_fails {
            return Err(refused("fatal: ambiguous argument"));
        }
        Ok(state
            .ahead_behind
            .get(&format!("{left}...{right}"))
            .copied()
            .unwrap_or((0, 0)))
    }

    async fn count_commits(&self, range: &str) -> GitResult<u32> {
        self.state()
            .counts
            .get(range)
            .copied()
            .ok_or_else(|| refused("fatal: bad revision"))
    }

    async fn merge_base(&self, _a: &str, _b: &str) -> GitResult<Option<String>> {
        Ok(self.state().merge_base.clone())
    }

    async fn upstream(&self, branch: &str) -> GitResult<Option<String>> {
        Ok(self.state().upstreams.get(branch).cloned())
    }

    async fn remotes(&self) -> GitResult<Vec<String>> {
        Ok(self.state().remotes.iter().map(|(n, _)| n.clone()).collect())
    }

    async fn remote_url(&self, name: &str) -> GitResult<Option<String>> {
        Ok(self
            .state()
            .remotes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, url)| url.clone()))
    }

    async fn parent_branch(&self, branch: &str) -> GitResult<Option<String>> {
        Ok(self.state().parents.get(branch).cloned())
    }

    async fn set_parent_branch(&self, branch: &str, parent: &str) -> GitResult<()> {
        self.record(format!("config branch.{branch}.pilot-parent {parent}"))
            .parents
            .insert(branch.to_string(), parent.to_string());
        Ok(())
    }
}

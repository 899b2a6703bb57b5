//! Provides structured types representing repository state.

use crate::types::RemoteUrl;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Sentinel branch name used when HEAD is detached.
pub const DETACHED_BRANCH: &str = "detached";

/// Changesets above either threshold are treated as large and get reduced context.
pub const LARGE_CHANGESET_FILES: usize = 20;
pub const LARGE_CHANGESET_LINES: u64 = 500;

/// Represents the status of a changed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
    Untracked,
}

impl ChangeStatus {
    /// Parses a change status from a `git status --porcelain` XY code.
    pub(crate) fn from_porcelain_code(index: char, worktree: char) -> ChangeStatus {
        match (index, worktree) {
            ('?', '?') => ChangeStatus::Untracked,
            ('R', _) | (_, 'R') => ChangeStatus::Renamed,
            ('A', _) => ChangeStatus::Added,
            ('D', _) | (_, 'D') => ChangeStatus::Deleted,
            // M, T, C and unmerged codes all mean "content differs"
            _ => ChangeStatus::Modified,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Added => "added",
            ChangeStatus::Modified => "modified",
            ChangeStatus::Deleted => "deleted",
            ChangeStatus::Renamed => "renamed",
            ChangeStatus::Untracked => "untracked",
        }
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file in the working tree with pending changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    /// Path relative to the repository root.
    pub path: String,
    pub status: ChangeStatus,
    /// Best-effort line counts; zero when unavailable (binary files).
    pub additions: u64,
    pub deletions: u64,
    pub patch_preview: Option<String>,
}

impl FileChange {
    pub fn new(path: impl Into<String>, status: ChangeStatus) -> FileChange {
        FileChange {
            path: path.into(),
            status,
            additions: 0,
            deletions: 0,
            patch_preview: None,
        }
    }

    pub fn changed_lines(&self) -> u64 {
        self.additions + self.deletions
    }
}

/// Represents a configured Git remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteInfo {
    pub name: String,
    pub url: RemoteUrl,
}

/// Normalized point-in-time view of the working tree.
///
/// `is_clean` is derived from the change list, so the two cannot disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySnapshot {
    /// Absolute path of the repository root.
    pub path: PathBuf,
    pub branch: String,
    pub remote: Option<RemoteInfo>,
    /// Commits ahead of / behind the tracking ref. Zero when unknown.
    pub ahead: u32,
    pub behind: u32,
    pub changes: Vec<FileChange>,
}

impl RepositorySnapshot {
    pub fn is_clean(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn is_remote_known_host(&self) -> bool {
        self.remote
            .as_ref()
            .map(|r| r.url.is_known_host())
            .unwrap_or(false)
    }

    pub fn is_detached(&self) -> bool {
        self.branch == DETACHED_BRANCH
    }

    /// Number of changed files.
    pub fn total_changes(&self) -> usize {
        self.changes.len()
    }

    pub fn total_additions(&self) -> u64 {
        self.changes.iter().map(|c| c.additions).sum()
    }

    pub fn total_deletions(&self) -> u64 {
        self.changes.iter().map(|c| c.deletions).sum()
    }

    pub fn total_changed_lines(&self) -> u64 {
        self.total_additions() + self.total_deletions()
    }

    /// More than 20 files or more than 500 changed lines.
    pub fn is_large(&self) -> bool {
        self.total_changes() > LARGE_CHANGESET_FILES
            || self.total_changed_lines() > LARGE_CHANGESET_LINES
    }

    /// Human-readable one-liner, e.g. `3 files changed (+12 -4): 1 added, 2 modified`.
    pub fn change_summary(&self) -> String {
        if self.is_clean() {
            return "working tree clean".to_string();
        }

        let order = [
            ChangeStatus::Added,
            ChangeStatus::Modified,
            ChangeStatus::Deleted,
            ChangeStatus::Renamed,
            ChangeStatus::Untracked,
        ];
        let parts: Vec<String> = order
            .iter()
            .filter_map(|status| {
                let n = self.changes.iter().filter(|c| c.status == *status).count();
                (n > 0).then(|| format!("{n} {status}"))
            })
            .collect();

        let files = self.total_changes();
        format!(
            "{} file{} changed (+{} -{}): {}",
            files,
            if files == 1 { "" } else { "s" },
            self.total_additions(),
            self.total_deletions(),
            parts.join(", ")
        )
    }
}

/// Classification of a branch by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchType {
    Protected,
    Feature,
    Hotfix,
    Bugfix,
    Release,
    Refactor,
    Other,
}

impl BranchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchType::Protected => "protected",
            BranchType::Feature => "feature",
            BranchType::Hotfix => "hotfix",
            BranchType::Bugfix => "bugfix",
            BranchType::Release => "release",
            BranchType::Refactor => "refactor",
            BranchType::Other => "other",
        }
    }
}

impl fmt::Display for BranchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata about a branch's type, parentage and divergence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchContext {
    pub name: String,
    pub branch_type: BranchType,
    pub parent: Option<String>,
    pub upstream: Option<String>,
    pub ahead_of_upstream: u32,
    pub behind_upstream: u32,
    pub ahead_of_parent: u32,
    pub behind_parent: u32,
    /// Commits in this branch that are not in the parent.
    pub unique_commits: u32,
}

impl BranchContext {
    pub fn is_protected(&self) -> bool {
        self.branch_type == BranchType::Protected
    }
}

/// Relationship between two branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeState {
    Unknown,
    UpToDate,
    Ahead,
    Behind,
    Diverged,
    Conflict,
}

/// Result of comparing a source branch against a merge target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeStatus {
    pub source: String,
    pub target: String,
    pub state: MergeState,
    /// Commits in `source` missing from `target`.
    pub ahead: u32,
    /// Commits in `target` missing from `source`.
    pub behind: u32,
    pub common_ancestor: Option<String>,
    pub conflicts: Vec<String>,
    pub can_fast_forward: bool,
}

impl MergeStatus {
    /// Derives the state from divergence counts.
    pub fn from_counts(
        source: impl Into<String>,
        target: impl Into<String>,
        ahead: u32,
        behind: u32,
        common_ancestor: Option<String>,
    ) -> MergeStatus {
        let state = match (ahead, behind) {
            (0, 0) => MergeState::UpToDate,
            (_, 0) => MergeState::Ahead,
            (0, _) => MergeState::Behind,
            _ => MergeState::Diverged,
        };
        MergeStatus {
            source: source.into(),
            target: target.into(),
            state,
            ahead,
            behind,
            common_ancestor,
            conflicts: Vec::new(),
            can_fast_forward: state == MergeState::Ahead,
        }
    }

    /// Applies the result of a conflict preview. Any conflict overrides the state.
    pub fn with_conflicts(mut self, conflicts: Vec<String>) -> MergeStatus {
        if !conflicts.is_empty() {
            self.state = MergeState::Conflict;
            self.can_fast_forward = false;
        }
        self.conflicts = conflicts;
        self
    }

    pub fn can_merge(&self) -> bool {
        self.conflicts.is_empty() && self.state != MergeState::Conflict
    }
}

/// One entry of `git log`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub hash: String,
    pub subject: String,
    pub timestamp: DateTime<Utc>,
}

impl CommitSummary {
    /// Field separator used in the `--format` passed to `git log`.
    pub(crate) const FIELD_SEP: char = '\x1f';
    pub(crate) const LOG_FORMAT: &'static str = "--format=%H%x1f%at%x1f%s";

    /// Parses one line produced by [`CommitSummary::LOG_FORMAT`].
    pub(crate) fn from_log_line(line: &str) -> Option<CommitSummary> {
        let mut fields = line.splitn(3, Self::FIELD_SEP);
        let hash = fields.next()?.trim();
        let timestamp = fields.next()?.trim().parse::<i64>().ok()?;
        let subject = fields.next().unwrap_or("").trim();
        if hash.is_empty() {
            return None;
        }
        Some(CommitSummary {
            hash: hash.to_string(),
            subject: subject.to_string(),
            timestamp: Utc.timestamp_opt(timestamp, 0).single()?,
        })
    }

    pub fn short_hash(&self) -> &str {
        &self.hash[..self.hash.len().min(7)]
    }
}

/// Content of a new (untracked) file, handed to the prompt as a structured block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContentBlock {
    pub path: String,
    /// First lines of the file; `None` when skipped.
    pub content: Option<String>,
    /// Why the content is missing or partial (binary, too large, capped).
    pub note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(changes: Vec<FileChange>) -> RepositorySnapshot {
        RepositorySnapshot {
            path: PathBuf::from("/repo"),
            branch: "main".to_string(),
            remote: None,
            ahead: 0,
            behind: 0,
            changes,
        }
    }

    #[test]
    fn test_porcelain_codes() {
        assert_eq!(ChangeStatus::from_porcelain_code(' ', 'M'), ChangeStatus::Modified);
        assert_eq!(ChangeStatus::from_porcelain_code('M', ' '), ChangeStatus::Modified);
        assert_eq!(ChangeStatus::from_porcelain_code('A', ' '), ChangeStatus::Added);
        assert_eq!(ChangeStatus::from_porcelain_code('A', 'M'), ChangeStatus::Added);
        assert_eq!(ChangeStatus::from_porcelain_code(' ', 'D'), ChangeStatus::Deleted);
        assert_eq!(ChangeStatus::from_porcelain_code('D', ' '), ChangeStatus::Deleted);
        assert_eq!(ChangeStatus::from_porcelain_code('R', ' '), ChangeStatus::Renamed);
        assert_eq!(ChangeStatus::from_porcelain_code('?', '?'), ChangeStatus::Untracked);
        assert_eq!(ChangeStatus::from_porcelain_code('U', 'U'), ChangeStatus::Modified);
    }

    #[test]
    fn test_clean_follows_change_list() {
        let clean = snapshot(vec![]);
        assert!(clean.is_clean());
        assert_eq!(clean.total_changes(), 0);
        assert_eq!(clean.change_summary(), "working tree clean");

        let dirty = snapshot(vec![FileChange::new("a.rs", ChangeStatus::Modified)]);
        assert!(!dirty.is_clean());
    }

    #[test]
    fn test_change_summary() {
        let mut added = FileChange::new("new.rs", ChangeStatus::Added);
        added.additions = 10;
        let mut modified = FileChange::new("lib.rs", ChangeStatus::Modified);
        modified.additions = 2;
        modified.deletions = 4;
        let snap = snapshot(vec![added, modified, FileChange::new("x", ChangeStatus::Untracked)]);

        assert_eq!(
            snap.change_summary(),
            "3 files changed (+12 -4): 1 added, 1 modified, 1 untracked"
        );
    }

    #[test]
    fn test_large_changeset_thresholds() {
        let many: Vec<FileChange> = (0..21)
            .map(|i| FileChange::new(format!("f{i}"), ChangeStatus::Modified))
            .collect();
        assert!(snapshot(many).is_large());

        let mut big = FileChange::new("big.rs", ChangeStatus::Modified);
        big.additions = 300;
        big.deletions = 201;
        assert!(snapshot(vec![big]).is_large());

        let mut small = FileChange::new("small.rs", ChangeStatus::Modified);
        small.additions = 250;
        small.deletions = 250;
        assert!(!snapshot(vec![small]).is_large());
    }

    #[test]
    fn test_merge_state_derivation() {
        let s = MergeStatus::from_counts("feature/x", "main", 0, 0, None);
        assert_eq!(s.state, MergeState::UpToDate);

        let s = MergeStatus::from_counts("feature/x", "main", 3, 0, None);
        assert_eq!(s.state, MergeState::Ahead);
        assert!(s.can_fast_forward);

        let s = MergeStatus::from_counts("feature/x", "main", 0, 2, None);
        assert_eq!(s.state, MergeState::Behind);
        assert!(!s.can_fast_forward);

        let s = MergeStatus::from_counts("feature/x", "main", 1, 1, None);
        assert_eq!(s.state, MergeState::Diverged);

        let s = MergeStatus::from_counts("feature/x", "main", 3, 0, None)
            .with_conflicts(vec!["a.go".to_string()]);
        assert_eq!(s.state, MergeState::Conflict);
        assert!(!s.can_merge());
        assert!(!s.can_fast_forward);
    }

    #[test]
    fn test_log_line_parsing() {
        let line = "0123456789abcdef0123456789abcdef01234567\x1f1700000000\x1ffeat: add thing";
        let c = CommitSummary::from_log_line(line).unwrap();
        assert_eq!(c.subject, "feat: add thing");
        assert_eq!(c.short_hash(), "0123456");
        assert_eq!(c.timestamp.timestamp(), 1_700_000_000);

        assert!(CommitSummary::from_log_line("garbage").is_none());
    }
}

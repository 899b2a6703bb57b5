//! Carries out an accepted decision against the VCS port.

use crate::branch::merge_status;
use crate::decision::{Action, Alternative, CommitMessage, Decision};
use crate::error::{GitError, Result, ValidationError};
use crate::models::{MergeStatus, DETACHED_BRANCH};
use crate::types::BranchName;
use crate::vcs::{parse_conflict_paths, GitResult, MergeMode, MergeStrategy, Vcs};
use tracing::{info, warn};

/// A merge to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    pub source: String,
    pub target: String,
    pub strategy: MergeStrategy,
    /// Explicit merge commit message; a default is generated when absent.
    pub message: Option<String>,
}

/// Everything the executor needs, detached from how it was chosen.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    pub action: Action,
    pub commit_message: Option<CommitMessage>,
    pub branch_name: Option<BranchName>,
    pub stage_all: bool,
    pub merge: Option<MergeRequest>,
}

impl ExecutionPlan {
    /// Plans the primary recommendation. `current_branch` is the merge source.
    pub fn from_decision(decision: &Decision, current_branch: &str) -> ExecutionPlan {
        ExecutionPlan {
            action: decision.action(),
            commit_message: decision.commit_message().cloned(),
            branch_name: decision.branch_name().cloned(),
            stage_all: true,
            merge: decision.merge_target().map(|target| MergeRequest {
                source: current_branch.to_string(),
                target: target.to_string(),
                strategy: decision.merge_strategy().unwrap_or_default(),
                message: None,
            }),
        }
    }

    /// Plans an alternative, reusing the decision's message and merge target.
    ///
    /// A create-branch alternative without a name gets one derived from the
    /// commit title.
    pub fn from_alternative(
        alternative: &Alternative,
        decision: &Decision,
        current_branch: &str,
    ) -> ExecutionPlan {
        let mut plan = ExecutionPlan::from_decision(decision, current_branch);
        plan.action = alternative.action();
        plan.branch_name = alternative
            .branch_name()
            .or(decision.branch_name())
            .cloned();
        if plan.action == Action::CreateBranch && plan.branch_name.is_none() {
            plan.branch_name = plan
                .commit_message
                .as_ref()
                .and_then(|m| BranchName::suggest_from(m.title()));
        }
        plan
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub action: Action,
    /// Branch holding the result.
    pub branch: String,
    /// Short hash of the commit created, if any.
    pub commit: Option<String>,
    /// Set when a different operation than requested was performed.
    pub substituted: bool,
    pub notes: Vec<String>,
}

impl ExecutionOutcome {
    fn new(action: Action, branch: impl Into<String>) -> ExecutionOutcome {
        ExecutionOutcome {
            action,
            branch: branch.into(),
            commit: None,
            substituted: false,
            notes: Vec::new(),
        }
    }
}

/// The merge message used when none is supplied.
pub fn default_merge_message(source: &str, target: &str) -> String {
    format!("Merge branch '{source}' into {target}")
}

/// Paths of tracked files with staged or unstaged changes in `status --porcelain` output.
fn tracked_changes(porcelain: &str) -> Vec<String> {
    porcelain
        .lines()
        .filter(|line| line.len() > 3 && !line.starts_with("??") && !line.starts_with("!!"))
        .map(|line| line[3..].to_string())
        .collect()
}

pub struct Executor<'a> {
    vcs: &'a dyn Vcs,
}

impl<'a> Executor<'a> {
    pub fn new(vcs: &'a dyn Vcs) -> Executor<'a> {
        Executor { vcs }
    }

    pub async fn execute(&self, plan: &ExecutionPlan) -> Result<ExecutionOutcome> {
        let outcome = match plan.action {
            Action::CommitDirect => self.commit_direct(plan).await?,
            Action::CreateBranch => self.create_branch(plan).await?,
            Action::Merge => {
                let request = plan.merge.as_ref().ok_or(ValidationError::MissingMergeTarget)?;
                self.merge(request).await?
            }
            Action::Review => {
                let branch = self.current_branch().await?;
                let mut outcome = ExecutionOutcome::new(Action::Review, branch);
                outcome.notes.push("review requested, nothing was changed".to_string());
                outcome
            }
            Action::SplitCommits | Action::CreatePr => {
                return Err(GitError::UnsupportedAction(plan.action.to_string()).into())
            }
        };
        info!(
            action = %outcome.action,
            branch = %outcome.branch,
            commit = outcome.commit.as_deref().unwrap_or("-"),
            substituted = outcome.substituted,
            "execution completed"
        );
        Ok(outcome)
    }

    async fn current_branch(&self) -> GitResult<String> {
        Ok(self
            .vcs
            .current_branch()
            .await?
            .unwrap_or_else(|| DETACHED_BRANCH.to_string()))
    }

    async fn stage_and_commit(
        &self,
        plan: &ExecutionPlan,
        message: &CommitMessage,
    ) -> GitResult<String> {
        if plan.stage_all {
            self.vcs.add_all().await?;
        }
        self.vcs.commit(&message.full()).await?;
        self.vcs.head_hash(true).await
    }

    async fn commit_direct(&self, plan: &ExecutionPlan) -> Result<ExecutionOutcome> {
        let message = plan
            .commit_message
            .as_ref()
            .ok_or(ValidationError::MissingCommitMessage)?;
        let hash = self.stage_and_commit(plan, message).await?;
        let mut outcome = ExecutionOutcome::new(Action::CommitDirect, self.current_branch().await?);
        outcome.commit = Some(hash);
        Ok(outcome)
    }

    async fn create_branch(&self, plan: &ExecutionPlan) -> Result<ExecutionOutcome> {
        let message = plan
            .commit_message
            .as_ref()
            .ok_or(ValidationError::MissingCommitMessage)?;
        let name = plan.branch_name.as_ref().ok_or(ValidationError::MissingBranchName)?;
        let original = self.current_branch().await?;

        if !self.vcs.has_commits().await? {
            // an unborn HEAD has nothing to branch from
            let hash = self.stage_and_commit(plan, message).await?;
            let mut outcome = ExecutionOutcome::new(Action::CommitDirect, original.clone());
            outcome.commit = Some(hash);
            outcome.substituted = true;
            outcome.notes.push(format!(
                "repository had no commits, committed on {original} instead of creating {name}"
            ));
            return Ok(outcome);
        }

        if self.vcs.branch_exists(name.as_ref()).await? {
            return Err(GitError::BranchExists(name.to_string()).into());
        }
        self.vcs.create_branch(name.as_ref()).await?;
        self.vcs.checkout(name.as_ref()).await?;
        if original != DETACHED_BRANCH {
            if let Err(e) = self.vcs.set_parent_branch(name.as_ref(), &original).await {
                warn!(
                    branch = %name,
                    parent = %original,
                    error = %e,
                    "could not record parent branch"
                );
            }
        }

        // staging happens after checkout so the changes land on the new branch
        match self.stage_and_commit(plan, message).await {
            Ok(hash) => {
                let mut outcome = ExecutionOutcome::new(Action::CreateBranch, name.to_string());
                outcome.commit = Some(hash);
                Ok(outcome)
            }
            Err(e) => {
                self.discard_branch(name.as_ref(), &original).await;
                Err(e.into())
            }
        }
    }

    /// Returns to `original` and removes a branch that never received a commit.
    async fn discard_branch(&self, name: &str, original: &str) {
        if original == DETACHED_BRANCH {
            return;
        }
        if let Err(e) = self.vcs.checkout(original).await {
            warn!(branch = original, error = %e, "could not return to original branch");
            return;
        }
        if let Err(e) = self.vcs.delete_branch(name, true).await {
            warn!(branch = name, error = %e, "could not remove empty branch");
        }
    }

    async fn merge(&self, request: &MergeRequest) -> Result<ExecutionOutcome> {
        let MergeRequest { source, target, strategy, .. } = request;
        if source == target {
            return Err(GitError::SelfMerge(source.clone()).into());
        }
        self.ensure_clean().await?;
        let message = request
            .message
            .clone()
            .unwrap_or_else(|| default_merge_message(source, target));

        let result = if *strategy == MergeStrategy::Rebase {
            self.rebase_then_fast_forward(source, target).await
        } else {
            match self.checkout_if_needed(target).await {
                Ok(()) => self.run_merge(source, *strategy, &message).await,
                Err(e) => Err(e),
            }
        };

        if let Err(e) = result {
            if let Err(abort) = self.vcs.abort_merge().await {
                warn!(error = %abort, "merge abort failed");
            }
            return Err(e.into());
        }

        let mut outcome = ExecutionOutcome::new(Action::Merge, target.clone());
        outcome.commit = Some(self.vcs.head_hash(true).await?);
        outcome
            .notes
            .push(format!("merged {source} into {target} ({strategy})"));
        Ok(outcome)
    }

    /// Refuses to go on while tracked files differ from HEAD. Untracked files
    /// survive an aborted merge, so they are allowed.
    async fn ensure_clean(&self) -> GitResult<()> {
        let files = tracked_changes(&self.vcs.status_porcelain().await?);
        if files.is_empty() {
            Ok(())
        } else {
            Err(GitError::DirtyWorkingTree { files })
        }
    }

    async fn checkout_if_needed(&self, branch: &str) -> GitResult<()> {
        if self.vcs.current_branch().await?.as_deref() != Some(branch) {
            self.vcs.checkout(branch).await?;
        }
        Ok(())
    }

    async fn run_merge(
        &self,
        source: &str,
        strategy: MergeStrategy,
        message: &str,
    ) -> GitResult<()> {
        match strategy {
            MergeStrategy::Squash => {
                // squash merges stage the result without committing
                self.vcs.merge(source, MergeMode::Squash).await?;
                self.vcs.commit(message).await
            }
            MergeStrategy::FastForward => self
                .vcs
                .merge(source, MergeMode::FastForwardOnly)
                .await
                .map(|_| ()),
            MergeStrategy::Regular | MergeStrategy::Rebase => self
                .vcs
                .merge(source, MergeMode::NoFastForward { message })
                .await
                .map(|_| ()),
        }
    }

    /// Rebases `source` onto `target`, then fast-forwards `target`.
    async fn rebase_then_fast_forward(&self, source: &str, target: &str) -> GitResult<()> {
        self.checkout_if_needed(source).await?;
        if let Err(e) = self.vcs.rebase(target).await {
            if let Err(abort) = self.vcs.abort_rebase().await {
                warn!(error = %abort, "rebase abort failed");
            }
            return Err(e);
        }
        self.vcs.checkout(target).await?;
        self.vcs.merge(source, MergeMode::FastForwardOnly).await.map(|_| ())
    }

    /// Trial merge of `source` into `target` that never leaves changes behind.
    ///
    /// Returns the conflicting paths. The original branch is checked out again
    /// afterwards.
    pub async fn preview_merge(&self, source: &str, target: &str) -> Result<Vec<String>> {
        self.ensure_clean().await?;
        let original = self.vcs.current_branch().await?;
        self.checkout_if_needed(target).await?;

        let result = self.vcs.merge(source, MergeMode::Preview).await;
        if let Err(e) = self.vcs.abort_merge().await {
            warn!(error = %e, "abort after merge preview failed");
        }

        let conflicts = match result {
            Ok(_) => Ok(Vec::new()),
            Err(GitError::MergeConflict { files }) => Ok(files),
            Err(GitError::GitError { stdout, stderr }) => {
                let files = parse_conflict_paths(&format!("{stdout}\n{stderr}"));
                if files.is_empty() {
                    Err(GitError::GitError { stdout, stderr })
                } else {
                    Ok(files)
                }
            }
            Err(e) => Err(e),
        };

        if let Some(original) = original.filter(|o| o != target) {
            self.vcs.checkout(&original).await?;
        }
        Ok(conflicts?)
    }

    /// Divergence plus conflict preview.
    pub async fn check_merge(&self, source: &str, target: &str) -> Result<MergeStatus> {
        let status = merge_status(self.vcs, source, target).await?;
        let conflicts = self.preview_merge(source, target).await?;
        Ok(status.with_conflicts(conflicts))
    }
}

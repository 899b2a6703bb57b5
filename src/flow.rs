//! One `commit` invocation: snapshot, analysis, selection, execution.

use crate::branch::build_branch_context;
use crate::config::Config;
use crate::decision::{Action, CommitMessage, Decision};
use crate::error::{Error, GitError, Result};
use crate::executor::{ExecutionOutcome, ExecutionPlan, Executor, MergeRequest};
use crate::llm::{AnalysisRequest, Analyzer};
use crate::mapper::MappingContext;
use crate::models::{CommitSummary, RepositorySnapshot};
use crate::prompt::{
    build_analysis_prompt, detect_merge_opportunity, MergeMessageRequest, PromptInput,
};
use crate::selector::{Selection, Selector};
use crate::snapshot::{build_snapshot, collect_diff, collect_new_file_blocks};
use crate::types::BranchName;
use crate::vcs::{MergeStrategy, Vcs};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const ANALYSIS_BUDGET: Duration = Duration::from_secs(90);
pub const EXECUTION_BUDGET: Duration = Duration::from_secs(120);

const RECENT_COMMITS: usize = 3;
const BRANCH_COMMITS: usize = 20;
const MERGE_COMMITS: usize = 50;

/// Flags of the `commit` command.
#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    pub context: Option<String>,
    pub conventional: bool,
    pub push: bool,
    /// Accept the primary recommendation without prompting.
    pub yes: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Clean tree and nothing to merge.
    NothingToDo,
    Cancelled,
    Executed(ExecutionOutcome),
}

async fn within<T, F>(operation: &'static str, budget: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(budget, fut)
        .await
        .map_err(|_| Error::Timeout { operation, budget })?
}

pub async fn run_commit(
    vcs: &dyn Vcs,
    analyzer: &dyn Analyzer,
    selector: &mut dyn Selector,
    config: &Config,
    options: &CommitOptions,
) -> Result<FlowOutcome> {
    let snapshot = build_snapshot(vcs).await?;
    let branch = build_branch_context(vcs, &config.protected_branches).await?;
    let opportunity = detect_merge_opportunity(&snapshot, &branch);

    if snapshot.is_clean() && opportunity.is_none() {
        info!(branch = %snapshot.branch, "working tree clean, nothing to do");
        return Ok(FlowOutcome::NothingToDo);
    }

    let recent = recent_commits(vcs, &snapshot, branch.parent.as_deref()).await;
    let diff = collect_diff(vcs).await?;
    let new_files = collect_new_file_blocks(&snapshot.path, &snapshot.changes).await;
    let conventional = options.conventional || config.conventional_commits;

    let prompt = build_analysis_prompt(&PromptInput {
        snapshot: &snapshot,
        branch: &branch,
        tier: config.tier,
        user_context: options.context.as_deref(),
        recent_commits: &recent,
        diff: &diff,
        new_files: &new_files,
        merge_opportunity: opportunity.as_ref(),
        conventional,
    });
    debug!(prompt_len = prompt.len(), files = snapshot.total_changes(), "analysis prompt built");

    let request = AnalysisRequest {
        prompt,
        mapping: MappingContext {
            merge_opportunity: opportunity,
            default_strategy: config.default_merge_strategy,
        },
    };
    let response = within("analysis", ANALYSIS_BUDGET, async {
        Ok(analyzer.analyze(&request).await?)
    })
    .await?;
    if let Some(raw) = &response.analysis.degraded_action {
        warn!(action = %raw, "model suggested an unknown action, showing it as a review");
    }
    let decision = response.analysis.decision;

    let selection = if options.yes {
        Selection::Accept
    } else {
        selector.select(&decision)?
    };
    let Some(mut plan) = plan_for(&selection, &decision, &snapshot.branch)? else {
        info!("selection cancelled");
        return Ok(FlowOutcome::Cancelled);
    };

    let mut notes = Vec::new();
    if plan.action == Action::Merge {
        if let Some(request) = plan.merge.as_mut() {
            let preparation = prepare_merge(vcs, analyzer, config, conventional, request);
            notes.extend(within("execution", EXECUTION_BUDGET, preparation).await?);
        }
    }

    let executor = Executor::new(vcs);
    let mut outcome = within("execution", EXECUTION_BUDGET, executor.execute(&plan)).await?;
    outcome.notes.extend(notes);

    if options.push && outcome.commit.is_some() {
        within("execution", EXECUTION_BUDGET, push(vcs, &snapshot, &mut outcome)).await?;
    }
    Ok(FlowOutcome::Executed(outcome))
}

/// Commits since the parent when known, otherwise the latest few.
async fn recent_commits(
    vcs: &dyn Vcs,
    snapshot: &RepositorySnapshot,
    parent: Option<&str>,
) -> Vec<CommitSummary> {
    let result = match parent {
        Some(parent) => {
            vcs.log(Some(&format!("{parent}..{}", snapshot.branch)), BRANCH_COMMITS)
                .await
        }
        None => vcs.log(None, RECENT_COMMITS).await,
    };
    result.unwrap_or_else(|e| {
        warn!(error = %e, "could not read commit history");
        Vec::new()
    })
}

/// Turns the selection into a plan; `None` means cancelled.
fn plan_for(
    selection: &Selection,
    decision: &Decision,
    current: &str,
) -> Result<Option<ExecutionPlan>> {
    let plan = match selection {
        Selection::Cancel => return Ok(None),
        Selection::Accept => ExecutionPlan::from_decision(decision, current),
        Selection::Alternative(i) => match decision.alternatives().get(*i) {
            Some(alternative) => ExecutionPlan::from_alternative(alternative, decision, current),
            None => return Ok(None),
        },
        Selection::Adjust { title, branch } => {
            let mut plan = ExecutionPlan::from_decision(decision, current);
            if let Some(title) = title {
                let body = plan.commit_message.as_ref().and_then(|m| m.body());
                let message = CommitMessage::parse(title)?.with_body(body);
                plan.commit_message = Some(message);
            }
            if let Some(branch) = branch {
                plan.branch_name = Some(BranchName::try_from(branch.as_str())?);
            }
            plan
        }
    };
    Ok(Some(plan))
}

/// Asks the model for a merge message, then refuses the merge if the trial
/// merge reports conflicts.
///
/// A fast-forward that cannot happen becomes a regular merge; the returned
/// note says so.
async fn prepare_merge(
    vcs: &dyn Vcs,
    analyzer: &dyn Analyzer,
    config: &Config,
    conventional: bool,
    request: &mut MergeRequest,
) -> Result<Option<String>> {
    let commits = vcs
        .log(Some(&format!("{}..{}", request.target, request.source)), MERGE_COMMITS)
        .await
        .unwrap_or_default();
    let message_request = MergeMessageRequest {
        source_branch: request.source.clone(),
        target_branch: request.target.clone(),
        commits,
        default_strategy: config.default_merge_strategy,
        conventional,
        tier: config.tier,
    };
    match analyzer.generate_merge_message(&message_request).await {
        Ok(response) => {
            request.message = Some(response.suggestion.message.full());
            request.strategy = response.suggestion.strategy;
        }
        Err(e) => warn!(error = %e, "merge message generation failed, using the default message"),
    }

    let status = Executor::new(vcs)
        .check_merge(&request.source, &request.target)
        .await?;
    if !status.conflicts.is_empty() {
        return Err(GitError::MergeConflict { files: status.conflicts }.into());
    }
    if request.strategy == MergeStrategy::FastForward && !status.can_fast_forward {
        warn!(
            source = %request.source,
            target = %request.target,
            state = ?status.state,
            "fast-forward not possible, using a regular merge"
        );
        request.strategy = MergeStrategy::Regular;
        return Ok(Some(format!(
            "{} cannot be fast-forwarded to {}, used a regular merge",
            request.target, request.source
        )));
    }
    Ok(None)
}

async fn push(
    vcs: &dyn Vcs,
    snapshot: &RepositorySnapshot,
    outcome: &mut ExecutionOutcome,
) -> Result<()> {
    let Some(remote) = &snapshot.remote else {
        warn!("no remote configured, skipping push");
        outcome.notes.push("no remote configured, push skipped".to_string());
        return Ok(());
    };
    let set_upstream =
        outcome.action == Action::CreateBranch || vcs.upstream(&outcome.branch).await?.is_none();
    vcs.push(&remote.name, &outcome.branch, set_upstream).await?;
    outcome
        .notes
        .push(format!("pushed {} to {}", outcome.branch, remote.name));
    Ok(())
}

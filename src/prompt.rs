//! Builds the text sent to the model.
//!
//! Everything here is a pure function of its input so prompts can be tested
//! byte for byte without a repository or a network.

use crate::models::{BranchContext, CommitSummary, FileContentBlock, RepositorySnapshot};
use crate::types::Tier;
use crate::vcs::MergeStrategy;
use std::fmt::Write;

/// A branch needs at least this many unique commits to be offered for merging.
pub const MIN_MERGE_COMMITS: u32 = 3;
/// Recent commit subjects included in the prompt.
const MAX_RECENT_COMMITS: usize = 3;
/// Rough characters-per-token ratio used for the context budget.
const CHARS_PER_TOKEN: usize = 4;

pub const TRUNCATION_MARKER: &str = "[... diff truncated to fit the context budget ...]";

pub const ANALYSIS_SYSTEM_PROMPT: &str = "You are a careful assistant for git workflows. \
You look at pending changes in a repository and recommend how to commit them. \
Reply only with JSON matching the provided schema.";

pub const MERGE_SYSTEM_PROMPT: &str = "You write merge commit messages for git. \
Reply only with JSON matching the provided schema.";

/// A clean branch with a parent and enough unique work to merge back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOpportunity {
    pub source_branch: String,
    pub target_branch: String,
    pub commit_count: u32,
}

/// Detects whether the current branch should be merged into its parent.
pub fn detect_merge_opportunity(
    snapshot: &RepositorySnapshot,
    branch: &BranchContext,
) -> Option<MergeOpportunity> {
    if !snapshot.is_clean() || branch.unique_commits < MIN_MERGE_COMMITS {
        return None;
    }
    let parent = branch.parent.as_ref()?;
    Some(MergeOpportunity {
        source_branch: branch.name.clone(),
        target_branch: parent.clone(),
        commit_count: branch.unique_commits,
    })
}

#[derive(Debug, Clone, Copy)]
pub struct PromptInput<'a> {
    pub snapshot: &'a RepositorySnapshot,
    pub branch: &'a BranchContext,
    pub tier: Tier,
    pub user_context: Option<&'a str>,
    pub recent_commits: &'a [CommitSummary],
    pub diff: &'a str,
    pub new_files: &'a [FileContentBlock],
    pub merge_opportunity: Option<&'a MergeOpportunity>,
    pub conventional: bool,
}

impl PromptInput<'_> {
    /// Character budget for diff and file content, `None` when unbounded.
    pub fn context_budget(&self) -> Option<usize> {
        (self.tier.should_reduce_context() || self.snapshot.is_large())
            .then(|| self.tier.max_tokens_per_request() as usize * CHARS_PER_TOKEN)
    }
}

/// Builds the analysis prompt.
pub fn build_analysis_prompt(input: &PromptInput<'_>) -> String {
    let mut out = String::new();
    let snapshot = input.snapshot;
    let branch = input.branch;

    out.push_str("## Repository\n");
    let _ = writeln!(out, "Path: {}", snapshot.path.display());
    let _ = writeln!(out, "Current branch: {}", describe_branch(branch));
    if let Some(remote) = &snapshot.remote {
        let _ = writeln!(
            out,
            "Remote: {} ({} ahead, {} behind)",
            remote.name, snapshot.ahead, snapshot.behind
        );
    }
    let _ = writeln!(out, "Changes: {}", snapshot.change_summary());
    for change in &snapshot.changes {
        let _ = writeln!(
            out,
            "- {} {} (+{} -{})",
            change.status, change.path, change.additions, change.deletions
        );
    }

    if let Some(context) = input.user_context.map(str::trim).filter(|c| !c.is_empty()) {
        let _ = write!(out, "\n## Developer notes\n{context}\n");
    }

    if !input.recent_commits.is_empty() {
        let heading = match &branch.parent {
            Some(parent) => format!("Commits on this branch since {parent}"),
            None => "Recent history".to_string(),
        };
        let _ = write!(out, "\n## {heading}\n");
        for commit in input.recent_commits.iter().take(MAX_RECENT_COMMITS) {
            let _ = writeln!(out, "- {}", commit.subject);
        }
    }

    let mut remaining = input.context_budget();
    if !input.diff.trim().is_empty() {
        let (diff, truncated) = fit_lines(input.diff, remaining);
        remaining = remaining.map(|r| r.saturating_sub(diff.chars().count()));
        out.push_str("\n## Diff\n```diff\n");
        out.push_str(&diff);
        if !diff.is_empty() && !diff.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("```\n");
        if truncated {
            out.push_str(TRUNCATION_MARKER);
            out.push('\n');
        }
    }

    if !input.new_files.is_empty() {
        out.push_str("\n## New files\n");
        for block in input.new_files {
            remaining = render_block(&mut out, block, remaining);
        }
    }

    if let Some(opportunity) = input.merge_opportunity {
        let _ = write!(
            out,
            "\n## Merge opportunity\n\
             The working tree is clean and `{}` has {} commits not yet in its parent `{}`. \
             If the work looks complete, recommend action \"merge\" to merge it into `{}`. \
             Otherwise explain what is missing and recommend \"review\".\n",
            opportunity.source_branch,
            opportunity.commit_count,
            opportunity.target_branch,
            opportunity.target_branch
        );
    }

    out.push_str("\n## Branch guidance\n");
    if branch.is_protected() {
        let _ = writeln!(
            out,
            "`{}` is a protected branch. Strongly prefer \"create-branch\" with a descriptive branch name \
             instead of committing directly.",
            branch.name
        );
    } else {
        let _ = writeln!(
            out,
            "`{}` is a {} branch. Commit directly when the changes belong to the branch's topic; \
             suggest \"create-branch\" when they start unrelated work.",
            branch.name, branch.branch_type
        );
    }

    out.push_str("\n## Your answer\n");
    out.push_str(
        "1. commit_message: a commit message for these changes. Title first, at most 72 characters, no trailing period; optional body after a blank line.\n",
    );
    if input.conventional {
        out.push_str(
            "   Use the Conventional Commits format `type(scope): description` (types: feat, fix, docs, style, refactor, perf, test, build, ci, chore).\n",
        );
    }
    out.push_str("2. action: the primary recommendation.\n");
    out.push_str("   - \"commit-direct\": the changes fit the current branch.\n");
    out.push_str(
        "   - \"create-branch\": the changes deserve their own branch; also give branch_name (e.g. feature/short-topic).\n",
    );
    out.push_str(
        "   - \"review\": the changes look incomplete, risky or mixed and a human should look first.\n",
    );
    if input.merge_opportunity.is_some() {
        out.push_str(
            "   - \"merge\": the branch is complete and should be merged into its parent.\n",
        );
    }
    out.push_str("3. confidence: a number between 0 and 1.\n");
    out.push_str("4. reasoning: one or two sentences.\n");
    out.push_str(
        "5. alternatives: optional other reasonable actions, each with a short description and confidence.\n",
    );
    out
}

fn describe_branch(branch: &BranchContext) -> String {
    let mut notes = vec![branch.branch_type.to_string()];
    if let Some(parent) = &branch.parent {
        notes.push(format!("parent {parent}"));
        notes.push(format!("{} commits since parent", branch.unique_commits));
    }
    if let Some(upstream) = &branch.upstream {
        notes.push(format!("tracks {upstream}"));
    }
    format!("{} ({})", branch.name, notes.join(", "))
}

/// Takes whole lines of `text` while they fit in `budget` characters.
fn fit_lines(text: &str, budget: Option<usize>) -> (String, bool) {
    let Some(budget) = budget else {
        return (text.to_string(), false);
    };
    let mut out = String::new();
    let mut used = 0;
    for line in text.split_inclusive('\n') {
        let len = line.chars().count();
        if used + len > budget {
            return (out, true);
        }
        out.push_str(line);
        used += len;
    }
    (out, false)
}

/// Appends one fenced file block, returning the budget left afterwards.
fn render_block(
    out: &mut String,
    block: &FileContentBlock,
    remaining: Option<usize>,
) -> Option<usize> {
    let _ = writeln!(out, "### {}", block.path);
    let Some(content) = &block.content else {
        if let Some(note) = &block.note {
            let _ = writeln!(out, "({note})");
        }
        return remaining;
    };

    let (text, truncated) = fit_lines(content, remaining);
    if text.is_empty() && !content.is_empty() {
        out.push_str("(content omitted to fit the context budget)\n");
        return remaining;
    }
    out.push_str("```\n");
    out.push_str(&text);
    if !text.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("```\n");
    match (&block.note, truncated) {
        (_, true) => out.push_str("(truncated to fit the context budget)\n"),
        (Some(note), false) => {
            let _ = writeln!(out, "({note})");
        }
        (None, false) => {}
    }
    remaining.map(|r| r.saturating_sub(text.chars().count()))
}

/// Input for a merge-message request.
#[derive(Debug, Clone)]
pub struct MergeMessageRequest {
    pub source_branch: String,
    pub target_branch: String,
    /// Commits being merged, newest first.
    pub commits: Vec<CommitSummary>,
    pub default_strategy: MergeStrategy,
    pub conventional: bool,
    pub tier: Tier,
}

/// Builds the merge-message prompt.
pub fn build_merge_message_prompt(request: &MergeMessageRequest) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Write a merge commit message for merging `{}` into `{}`.",
        request.source_branch, request.target_branch
    );
    let _ = write!(out, "\n## Commits being merged ({})\n", request.commits.len());

    let budget = request.tier.max_tokens_per_request() as usize * CHARS_PER_TOKEN;
    let mut used = 0;
    for (shown, commit) in request.commits.iter().enumerate() {
        let line = format!("- {} {}\n", commit.short_hash(), commit.subject);
        if request.tier.should_reduce_context() && used + line.len() > budget {
            let _ = writeln!(out, "- ... and {} more", request.commits.len() - shown);
            break;
        }
        used += line.len();
        out.push_str(&line);
    }

    out.push_str("\n## Your answer\n");
    out.push_str(
        "1. merge_message: title at most 72 characters, no trailing period; optional body summarizing the work.\n",
    );
    if request.conventional {
        out.push_str("   Use the Conventional Commits format for the title.\n");
    }
    let _ = writeln!(
        out,
        "2. strategy: \"squash\", \"regular\" or \"fast-forward\". The project default is \"{}\"; \
         prefer squash for many small fixup commits.",
        request.default_strategy
    );
    out.push_str("3. reasoning: one sentence.\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BranchType, ChangeStatus, FileChange};
    use chrono::Utc;
    use std::path::PathBuf;

    fn snapshot(changes: Vec<FileChange>) -> RepositorySnapshot {
        RepositorySnapshot {
            path: PathBuf::from("/work/app"),
            branch: "feature/x".to_string(),
            remote: None,
            ahead: 0,
            behind: 0,
            changes,
        }
    }

    fn branch(name: &str, kind: BranchType, parent: Option<&str>, unique: u32) -> BranchContext {
        BranchContext {
            name: name.to_string(),
            branch_type: kind,
            parent: parent.map(str::to_string),
            upstream: None,
            ahead_of_upstream: 0,
            behind_upstream: 0,
            ahead_of_parent: unique,
            behind_parent: 0,
            unique_commits: unique,
        }
    }

    fn commit(subject: &str) -> CommitSummary {
        CommitSummary {
            hash: "0123456789abcdef".to_string(),
            subject: subject.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn input<'a>(
        snap: &'a RepositorySnapshot,
        ctx: &'a BranchContext,
        tier: Tier,
        diff: &'a str,
    ) -> PromptInput<'a> {
        PromptInput {
            snapshot: snap,
            branch: ctx,
            tier,
            user_context: None,
            recent_commits: &[],
            diff,
            new_files: &[],
            merge_opportunity: None,
            conventional: false,
        }
    }

    #[test]
    fn test_merge_opportunity_detected() {
        let snap = snapshot(vec![]);
        let ctx = branch("feature/x", BranchType::Feature, Some("main"), 4);
        let opportunity = detect_merge_opportunity(&snap, &ctx).unwrap();
        assert_eq!(opportunity.target_branch, "main");
        assert_eq!(opportunity.commit_count, 4);
    }

    #[test]
    fn test_merge_opportunity_requirements() {
        let dirty = snapshot(vec![FileChange::new("a.rs", ChangeStatus::Modified)]);
        let ctx = branch("feature/x", BranchType::Feature, Some("main"), 4);
        assert!(detect_merge_opportunity(&dirty, &ctx).is_none());

        let clean = snapshot(vec![]);
        let few = branch("feature/x", BranchType::Feature, Some("main"), 2);
        assert!(detect_merge_opportunity(&clean, &few).is_none());

        let orphan = branch("feature/x", BranchType::Feature, None, 9);
        assert!(detect_merge_opportunity(&clean, &orphan).is_none());
    }

    #[test]
    fn test_prompt_states_repository_and_branch() {
        let snap = snapshot(vec![FileChange::new("src/lib.rs", ChangeStatus::Modified)]);
        let ctx = branch("feature/x", BranchType::Feature, Some("main"), 2);
        let commits = vec![commit("one"), commit("two"), commit("three"), commit("four")];
        let mut inp = input(&snap, &ctx, Tier::Pro, "");
        inp.recent_commits = &commits;
        inp.user_context = Some("part of the retry work");

        let prompt = build_analysis_prompt(&inp);
        assert!(prompt.contains("Path: /work/app"));
        assert!(prompt.contains("feature/x (feature, parent main, 2 commits since parent)"));
        assert!(prompt.contains("1 file changed"));
        assert!(prompt.contains("Commits on this branch since main"));
        assert!(prompt.contains("- three"));
        assert!(!prompt.contains("- four"));
        assert!(prompt.contains("part of the retry work"));
        assert!(!prompt.contains("\"merge\""));
    }

    #[test]
    fn test_recent_history_without_parent() {
        let snap = snapshot(vec![]);
        let ctx = branch("main", BranchType::Protected, None, 0);
        let commits = vec![commit("init")];
        let mut inp = input(&snap, &ctx, Tier::Pro, "");
        inp.recent_commits = &commits;
        let prompt = build_analysis_prompt(&inp);
        assert!(prompt.contains("## Recent history"));
        assert!(prompt.contains("protected branch"));
    }

    #[test]
    fn test_diff_reduced_for_free_tier() {
        let snap = snapshot(vec![FileChange::new("big.txt", ChangeStatus::Modified)]);
        let ctx = branch("feature/x", BranchType::Feature, None, 0);
        let line = format!("+{}\n", "x".repeat(98));
        let diff = line.repeat(200);

        let prompt = build_analysis_prompt(&input(&snap, &ctx, Tier::Free, &diff));
        assert!(prompt.contains(TRUNCATION_MARKER));
        // budget is 2000 tokens * 4 chars: 80 whole lines of 100 chars
        assert_eq!(prompt.matches(line.as_str()).count(), 80);

        let prompt = build_analysis_prompt(&input(&snap, &ctx, Tier::Pro, &diff));
        assert!(!prompt.contains(TRUNCATION_MARKER));
        assert_eq!(prompt.matches(line.as_str()).count(), 200);
    }

    #[test]
    fn test_large_changeset_reduced_on_pro() {
        let changes: Vec<FileChange> = (0..25)
            .map(|i| FileChange::new(format!("f{i}.rs"), ChangeStatus::Modified))
            .collect();
        let snap = snapshot(changes);
        let ctx = branch("feature/x", BranchType::Feature, None, 0);
        let diff = format!("+{}\n", "y".repeat(99)).repeat(400);
        let inp = input(&snap, &ctx, Tier::Pro, &diff);
        assert_eq!(inp.context_budget(), Some(32_000));
        assert!(build_analysis_prompt(&inp).contains(TRUNCATION_MARKER));
    }

    #[test]
    fn test_never_cuts_mid_line() {
        let (text, truncated) = fit_lines("aaaa\nbbbb\ncccc\n", Some(12));
        assert_eq!(text, "aaaa\nbbbb\n");
        assert!(truncated);
        let (text, truncated) = fit_lines("aaaa\nbbbb", Some(100));
        assert_eq!(text, "aaaa\nbbbb");
        assert!(!truncated);
    }

    #[test]
    fn test_new_files_as_blocks() {
        let snap = snapshot(vec![FileChange::new("new.go", ChangeStatus::Untracked)]);
        let ctx = branch("feature/x", BranchType::Feature, None, 0);
        let blocks = vec![
            FileContentBlock {
                path: "new.go".to_string(),
                content: Some("package main\nfunc main() {}".to_string()),
                note: None,
            },
            FileContentBlock {
                path: "logo.png".to_string(),
                content: None,
                note: Some("binary file, content omitted".to_string()),
            },
        ];
        let mut inp = input(&snap, &ctx, Tier::Pro, "");
        inp.new_files = &blocks;
        let prompt = build_analysis_prompt(&inp);
        assert!(prompt.contains("### new.go\n```\npackage main\nfunc main() {}\n```"));
        assert!(prompt.contains("### logo.png\n(binary file, content omitted)"));
        assert!(!prompt.contains("+package main"));
    }

    #[test]
    fn test_merge_guidance() {
        let snap = snapshot(vec![]);
        let ctx = branch("feature/x", BranchType::Feature, Some("main"), 4);
        let opportunity = detect_merge_opportunity(&snap, &ctx).unwrap();
        let mut inp = input(&snap, &ctx, Tier::Pro, "");
        inp.merge_opportunity = Some(&opportunity);
        let prompt = build_analysis_prompt(&inp);
        assert!(prompt.contains("## Merge opportunity"));
        assert!(prompt.contains("4 commits not yet in its parent `main`"));
        assert!(prompt.contains("- \"merge\""));
    }

    #[test]
    fn test_conventional_instruction() {
        let snap = snapshot(vec![]);
        let ctx = branch("feature/x", BranchType::Feature, None, 0);
        let mut inp = input(&snap, &ctx, Tier::Pro, "");
        assert!(!build_analysis_prompt(&inp).contains("Conventional Commits"));
        inp.conventional = true;
        assert!(build_analysis_prompt(&inp).contains("Conventional Commits"));
    }

    #[test]
    fn test_merge_message_prompt() {
        let request = MergeMessageRequest {
            source_branch: "feature/x".to_string(),
            target_branch: "main".to_string(),
            commits: vec![commit("add retries"), commit("fix backoff")],
            default_strategy: MergeStrategy::Squash,
            conventional: true,
            tier: Tier::Free,
        };
        let prompt = build_merge_message_prompt(&request);
        assert!(prompt.contains("merging `feature/x` into `main`"));
        assert!(prompt.contains("- 0123456 fix backoff"));
        assert!(prompt.contains("default is \"squash\""));
    }
}

//! Branch classification, parentage and divergence.

use crate::error::Result;
use crate::models::{BranchContext, BranchType, MergeStatus, DETACHED_BRANCH};
use crate::vcs::Vcs;
use tracing::{debug, warn};

/// Branches treated as protected when no allow-list entry matches.
pub const DEFAULT_PROTECTED: [&str; 6] = [
    "main",
    "master",
    "develop",
    "development",
    "production",
    "prod",
];

const PREFIXES: [(&str, BranchType); 6] = [
    ("feature/", BranchType::Feature),
    ("hotfix/", BranchType::Hotfix),
    ("bugfix/", BranchType::Bugfix),
    ("fix/", BranchType::Bugfix),
    ("release/", BranchType::Release),
    ("refactor/", BranchType::Refactor),
];

/// Classifies `name`: configured allow-list, then the fixed list, then prefixes.
pub fn classify_branch(name: &str, protected: &[String]) -> BranchType {
    if protected.iter().any(|p| p == name) || DEFAULT_PROTECTED.contains(&name) {
        return BranchType::Protected;
    }
    PREFIXES
        .iter()
        .find(|(prefix, _)| name.starts_with(prefix))
        .map(|(_, kind)| *kind)
        .unwrap_or(BranchType::Other)
}

/// Builds the context of the current branch.
pub async fn build_branch_context(vcs: &dyn Vcs, protected: &[String]) -> Result<BranchContext> {
    let name = vcs
        .current_branch()
        .await?
        .unwrap_or_else(|| DETACHED_BRANCH.to_string());
    branch_context_for(vcs, &name, protected).await
}

/// Builds the context of an arbitrary branch.
pub async fn branch_context_for(
    vcs: &dyn Vcs,
    name: &str,
    protected: &[String],
) -> Result<BranchContext> {
    let branch_type = classify_branch(name, protected);
    let parent = vcs.parent_branch(name).await?;
    let upstream = vcs.upstream(name).await?;

    let (ahead_of_upstream, behind_upstream) = match &upstream {
        Some(up) => divergence(vcs, name, up).await,
        None => (0, 0),
    };

    let (ahead_of_parent, behind_parent, unique_commits) = match &parent {
        Some(parent) => {
            let (ahead, behind) = divergence(vcs, name, parent).await;
            let unique = match vcs.count_commits(&format!("{parent}..{name}")).await {
                Ok(n) => n,
                Err(e) => {
                    // unrelated histories or a deleted parent
                    debug!(
                        branch = name,
                        parent = %parent,
                        error = %e,
                        "unique commit range invalid"
                    );
                    0
                }
            };
            (ahead, behind, unique)
        }
        None => (0, 0, 0),
    };

    Ok(BranchContext {
        name: name.to_string(),
        branch_type,
        parent,
        upstream,
        ahead_of_upstream,
        behind_upstream,
        ahead_of_parent,
        behind_parent,
        unique_commits,
    })
}

async fn divergence(vcs: &dyn Vcs, left: &str, right: &str) -> (u32, u32) {
    match vcs.ahead_behind(left, right).await {
        Ok(counts) => counts,
        Err(e) => {
            warn!(left, right, error = %e, "could not compute divergence");
            (0, 0)
        }
    }
}

/// Compares `source` against `target` without touching the working tree.
///
/// Conflicts are only known after [`crate::Executor::preview_merge`]; apply
/// them with [`MergeStatus::with_conflicts`].
pub async fn merge_status(vcs: &dyn Vcs, source: &str, target: &str) -> Result<MergeStatus> {
    let (ahead, behind) = vcs.ahead_behind(source, target).await?;
    let base = vcs.merge_base(source, target).await?;
    Ok(MergeStatus::from_counts(source, target, ahead, behind, base))
}

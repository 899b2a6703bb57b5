//! Turns the model's JSON payload into validated domain values.

use crate::decision::{Action, Alternative, CommitMessage, Decision};
use crate::error::ResponseError;
use crate::prompt::MergeOpportunity;
use crate::types::BranchName;
use crate::vcs::MergeStrategy;
use serde::Deserialize;
use tracing::debug;

/// Analysis payload exactly as the schema describes it.
#[derive(Debug, Deserialize)]
struct RawAnalysis {
    commit_message: String,
    action: String,
    confidence: f64,
    reasoning: String,
    #[serde(default)]
    branch_name: Option<String>,
    #[serde(default)]
    alternatives: Option<Vec<RawAlternative>>,
}

#[derive(Debug, Deserialize)]
struct RawAlternative {
    action: String,
    description: String,
    confidence: f64,
    #[serde(default)]
    branch_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMergeMessage {
    merge_message: String,
    strategy: String,
    reasoning: String,
}

/// Facts known before the call that the payload does not carry.
#[derive(Debug, Clone, Default)]
pub struct MappingContext {
    pub merge_opportunity: Option<MergeOpportunity>,
    pub default_strategy: MergeStrategy,
}

#[derive(Debug, Clone)]
pub struct MappedAnalysis {
    pub decision: Decision,
    /// The unrecognized action name, when it was degraded to review.
    pub degraded_action: Option<String>,
    pub dropped_alternatives: usize,
}

/// A generated merge commit message and the strategy to merge with.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeSuggestion {
    pub message: CommitMessage,
    pub strategy: MergeStrategy,
    pub reasoning: String,
}

/// Parses an analysis payload.
///
/// An invalid commit message fails the whole mapping. Alternatives that fail
/// their own validation are dropped.
pub fn map_analysis(raw: &str, ctx: &MappingContext) -> Result<MappedAnalysis, ResponseError> {
    let payload: RawAnalysis = serde_json::from_str(strip_fence(raw))?;

    let action = Action::from_wire(&payload.action);
    let named_review = payload.action.trim().eq_ignore_ascii_case("review");
    let degraded_action =
        (action == Action::Review && !named_review).then(|| payload.action.clone());
    if let Some(name) = &degraded_action {
        debug!(action = %name, "unknown action degraded to review");
    }

    let message = CommitMessage::parse(&payload.commit_message)?;
    let mut builder =
        Decision::builder(action, payload.confidence, &payload.reasoning).commit_message(message);

    if let Some(name) = payload.branch_name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        // a bad suggestion only matters for the action that needs it
        if action == Action::CreateBranch || BranchName::try_from(name).is_ok() {
            builder = builder.branch_name(name);
        }
    }

    if action == Action::Merge {
        if let Some(opportunity) = &ctx.merge_opportunity {
            builder = builder
                .merge_target(opportunity.target_branch.clone())
                .merge_strategy(ctx.default_strategy);
        }
    }

    let raw_alternatives = payload.alternatives.unwrap_or_default();
    let total = raw_alternatives.len();
    let alternatives: Vec<Alternative> = raw_alternatives
        .into_iter()
        .filter_map(|alt| {
            Alternative::new(
                Action::from_wire(&alt.action),
                &alt.description,
                alt.confidence,
                alt.branch_name.as_deref(),
            )
            .map_err(|e| debug!(error = %e, "dropping invalid alternative"))
            .ok()
        })
        .collect();
    let dropped_alternatives = total - alternatives.len();

    let decision = builder.alternatives(alternatives).build()?;
    Ok(MappedAnalysis {
        decision,
        degraded_action,
        dropped_alternatives,
    })
}

/// Parses a merge-message payload. Unknown strategies fall back to `default_strategy`.
pub fn map_merge_message(
    raw: &str,
    default_strategy: MergeStrategy,
) -> Result<MergeSuggestion, ResponseError> {
    let payload: RawMergeMessage = serde_json::from_str(strip_fence(raw))?;
    let message = CommitMessage::parse(&payload.merge_message)?;
    let strategy = payload.strategy.parse::<MergeStrategy>().unwrap_or_else(|_| {
        debug!(strategy = %payload.strategy, "unknown merge strategy, using default");
        default_strategy
    });
    Ok(MergeSuggestion {
        message,
        strategy,
        reasoning: payload.reasoning.trim().to_string(),
    })
}

/// Removes a surrounding Markdown code fence some models add despite the schema.
fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use serde_json::json;

    fn ctx() -> MappingContext {
        MappingContext::default()
    }

    #[test]
    fn test_maps_commit_direct() {
        let raw = json!({
            "commit_message": "feat(api): add retries\n\nRetry on 5xx.",
            "action": "commit-direct",
            "confidence": 0.91,
            "reasoning": "Small change that fits the branch",
            "alternatives": [
                {"action": "create-branch", "description": "Isolate on a branch", "confidence": 0.3}
            ]
        })
        .to_string();

        let mapped = map_analysis(&raw, &ctx()).unwrap();
        let d = &mapped.decision;
        assert_eq!(d.action(), Action::CommitDirect);
        assert_eq!(d.commit_message().unwrap().title(), "feat(api): add retries");
        assert!(d.commit_message().unwrap().is_conventional());
        assert_eq!(d.alternatives().len(), 1);
        assert!(!d.requires_review());
        assert_eq!(mapped.degraded_action, None);
    }

    #[test]
    fn test_unknown_action_maps_to_review() {
        let raw = json!({
            "commit_message": "Update docs",
            "action": "rewrite-history",
            "confidence": 0.5,
            "reasoning": "unsure"
        })
        .to_string();
        let mapped = map_analysis(&raw, &ctx()).unwrap();
        assert_eq!(mapped.decision.action(), Action::Review);
        assert_eq!(mapped.degraded_action.as_deref(), Some("rewrite-history"));
    }

    #[test]
    fn test_out_of_range_confidence_fails() {
        let raw = json!({
            "commit_message": "Update docs",
            "action": "review",
            "confidence": 1.5,
            "reasoning": "sure"
        })
        .to_string();
        let err = map_analysis(&raw, &ctx()).unwrap_err();
        assert!(matches!(
            err,
            ResponseError::Invalid(ValidationError::ConfidenceOutOfRange(_))
        ));
    }

    #[test]
    fn test_invalid_message_fails_whole_mapping() {
        let too_long = format!("feat(core): {}", "x".repeat(80));
        for message in ["", "Fix the thing.", too_long.as_str()] {
            let raw = json!({
                "commit_message": message,
                "action": "commit-direct",
                "confidence": 0.9,
                "reasoning": "ok"
            })
            .to_string();
            assert!(
                matches!(map_analysis(&raw, &ctx()), Err(ResponseError::Invalid(_))),
                "{message}"
            );
        }
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            map_analysis("{not json", &ctx()),
            Err(ResponseError::Malformed(_))
        ));
        // required field missing
        assert!(matches!(
            map_analysis(r#"{"action":"review","confidence":0.5,"reasoning":"x"}"#, &ctx()),
            Err(ResponseError::Malformed(_))
        ));
    }

    #[test]
    fn test_invalid_alternatives_dropped() {
        let raw = json!({
            "commit_message": "Refactor parser",
            "action": "create-branch",
            "branch_name": "refactor/parser",
            "confidence": 0.8,
            "reasoning": "Separate topic",
            "alternatives": [
                {"action": "commit-direct", "description": "", "confidence": 0.4},
                {"action": "commit-direct", "description": "Commit here", "confidence": 7.0},
                {"action": "create-branch", "description": "Other name", "confidence": 0.2, "branch_name": "bad name"},
                {"action": "merge", "description": "Merge first", "confidence": 0.1}
            ]
        })
        .to_string();
        let mapped = map_analysis(&raw, &ctx()).unwrap();
        assert_eq!(mapped.decision.alternatives().len(), 1);
        assert_eq!(mapped.dropped_alternatives, 3);
        assert_eq!(mapped.decision.branch_name().unwrap().to_string(), "refactor/parser");
    }

    #[test]
    fn test_merge_target_from_opportunity() {
        let raw = json!({
            "commit_message": "Merge feature/x into main",
            "action": "merge",
            "confidence": 0.85,
            "reasoning": "Branch is complete"
        })
        .to_string();

        assert!(matches!(
            map_analysis(&raw, &ctx()),
            Err(ResponseError::Invalid(ValidationError::MissingMergeTarget))
        ));

        let ctx = MappingContext {
            merge_opportunity: Some(MergeOpportunity {
                source_branch: "feature/x".to_string(),
                target_branch: "main".to_string(),
                commit_count: 4,
            }),
            default_strategy: MergeStrategy::Squash,
        };
        let d = map_analysis(&raw, &ctx).unwrap().decision;
        assert_eq!(d.merge_target(), Some("main"));
        assert_eq!(d.merge_strategy(), Some(MergeStrategy::Squash));
    }

    #[test]
    fn test_fenced_payload() {
        let raw = "```json\n{\"commit_message\":\"Tidy\",\"action\":\"review\",\"confidence\":0.2,\"reasoning\":\"x\"}\n```";
        assert!(map_analysis(raw, &ctx()).is_ok());
    }

    #[test]
    fn test_merge_message() {
        let raw = json!({
            "merge_message": "Merge feature/x: add retries",
            "strategy": "squash",
            "reasoning": "Many small commits"
        })
        .to_string();
        let s = map_merge_message(&raw, MergeStrategy::Regular).unwrap();
        assert_eq!(s.strategy, MergeStrategy::Squash);
        assert_eq!(s.message.title(), "Merge feature/x: add retries");

        let raw = json!({"merge_message": "Merge it", "strategy": "octopus", "reasoning": "x"});
        let s = map_merge_message(&raw.to_string(), MergeStrategy::Regular).unwrap();
        assert_eq!(s.strategy, MergeStrategy::Regular);
    }
}

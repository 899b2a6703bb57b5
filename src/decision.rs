//! The model's recommendation as validated, immutable values.
//!
//! Every type here is built through a constructor or builder that checks its
//! invariants, so a [`Decision`] in hand is always executable as described.

use crate::error::ValidationError;
use crate::types::BranchName;
use crate::vcs::MergeStrategy;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest commit title accepted.
pub const MAX_TITLE_CHARS: usize = 72;
/// Titles are cut to this many characters before the ellipsis is added.
const TRUNCATE_AT: usize = 69;
/// A word boundary must sit beyond this position to be used for truncation.
const MIN_WORD_BOUNDARY: usize = 50;
const ELLIPSIS: &str = "...";

/// Below this confidence a decision always asks for review.
pub const REVIEW_THRESHOLD: f64 = 0.7;

static CONVENTIONAL_TITLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<type>[a-z]+)(?:\((?P<scope>[^()]+)\))?!?: (?P<title>\S.*)$")
        .expect("Invalid static conventional title regex")
});

/// What to do with the pending changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    CommitDirect,
    CreateBranch,
    SplitCommits,
    Review,
    Merge,
    CreatePr,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CommitDirect => "commit-direct",
            Action::CreateBranch => "create-branch",
            Action::SplitCommits => "split-commits",
            Action::Review => "review",
            Action::Merge => "merge",
            Action::CreatePr => "create-pr",
        }
    }

    /// Maps a model-supplied name, degrading anything unrecognized to [`Action::Review`].
    pub fn from_wire(s: &str) -> Action {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "commit-direct" | "commit" => Action::CommitDirect,
            "create-branch" | "branch" => Action::CreateBranch,
            "split-commits" => Action::SplitCommits,
            "merge" => Action::Merge,
            "create-pr" => Action::CreatePr,
            _ => Action::Review,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Action::CommitDirect => "Commit on the current branch",
            Action::CreateBranch => "Create a new branch and commit there",
            Action::SplitCommits => "Split into several commits",
            Action::Review => "Review the changes manually",
            Action::Merge => "Merge this branch into its parent",
            Action::CreatePr => "Open a pull request",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

/// A probability in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Confidence(f64);

impl Confidence {
    pub fn new(value: f64) -> Result<Confidence, ValidationError> {
        if (0.0..=1.0).contains(&value) {
            Ok(Confidence(value))
        } else {
            Err(ValidationError::ConfidenceOutOfRange(value))
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn band(&self) -> ConfidenceBand {
        if self.0 >= 0.8 {
            ConfidenceBand::High
        } else if self.0 >= 0.5 {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.0}%", self.0 * 100.0)
    }
}

/// A commit message with a bounded title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMessage {
    title: String,
    body: Option<String>,
    conventional: bool,
    commit_type: Option<String>,
    scope: Option<String>,
}

impl CommitMessage {
    /// Creates a plain message. Titles over 72 characters are shortened.
    pub fn new(title: &str, body: Option<&str>) -> CommitMessage {
        CommitMessage {
            title: truncate_title(title.trim()),
            body: clean_body(body),
            conventional: false,
            commit_type: None,
            scope: None,
        }
    }

    /// Renders `type(scope): title`, failing when the result exceeds 72 characters.
    pub fn conventional(
        commit_type: &str,
        scope: Option<&str>,
        title: &str,
    ) -> Result<CommitMessage, ValidationError> {
        let commit_type = commit_type.trim();
        let scope = scope.map(str::trim).filter(|s| !s.is_empty());
        let title = title.trim();
        if title.is_empty() || commit_type.is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        let rendered = match scope {
            Some(scope) => format!("{commit_type}({scope}): {title}"),
            None => format!("{commit_type}: {title}"),
        };
        let len = rendered.chars().count();
        if len > MAX_TITLE_CHARS {
            return Err(ValidationError::TitleTooLong {
                len,
                max: MAX_TITLE_CHARS,
            });
        }
        Ok(CommitMessage {
            title: rendered,
            body: None,
            conventional: true,
            commit_type: Some(commit_type.to_string()),
            scope: scope.map(str::to_string),
        })
    }

    pub fn with_body(mut self, body: Option<&str>) -> CommitMessage {
        self.body = clean_body(body);
        self
    }

    /// Parses free text: the first line is the title, the rest the body.
    /// A `type(scope): title` first line yields a conventional message.
    pub fn parse(raw: &str) -> Result<CommitMessage, ValidationError> {
        let raw = raw.trim();
        let (first, rest) = match raw.split_once('\n') {
            Some((first, rest)) => (first.trim(), Some(rest)),
            None => (raw, None),
        };
        let message = match CONVENTIONAL_TITLE.captures(first) {
            Some(caps) => CommitMessage::conventional(
                &caps["type"],
                caps.name("scope").map(|m| m.as_str()),
                &caps["title"],
            )?
            .with_body(rest),
            None => CommitMessage::new(first, rest),
        };
        message.validate()?;
        Ok(message)
    }

    /// Rejects an empty title and one ending with a period.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        if self.title.ends_with('.') && !self.title.ends_with(ELLIPSIS) {
            return Err(ValidationError::TrailingPeriod);
        }
        Ok(())
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn is_conventional(&self) -> bool {
        self.conventional
    }

    pub fn commit_type(&self) -> Option<&str> {
        self.commit_type.as_deref()
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Title, blank line, body.
    pub fn full(&self) -> String {
        match &self.body {
            Some(body) => format!("{}\n\n{}", self.title, body),
            None => self.title.clone(),
        }
    }
}

impl fmt::Display for CommitMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

fn clean_body(body: Option<&str>) -> Option<String> {
    body.map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
}

/// Shortens a title to at most 72 characters.
fn truncate_title(title: &str) -> String {
    let chars: Vec<char> = title.chars().collect();
    if chars.len() <= MAX_TITLE_CHARS {
        return title.to_string();
    }
    let head = &chars[..TRUNCATE_AT];
    let cut = match head.iter().rposition(|c| *c == ' ') {
        Some(space) if space > MIN_WORD_BOUNDARY => space,
        _ => TRUNCATE_AT,
    };
    let mut out: String = chars[..cut].iter().collect();
    out.push_str(ELLIPSIS);
    out
}

/// A secondary recommendation.
#[derive(Debug, Clone, PartialEq)]
pub struct Alternative {
    action: Action,
    description: String,
    confidence: Confidence,
    branch_name: Option<BranchName>,
}

impl Alternative {
    pub fn new(
        action: Action,
        description: &str,
        confidence: f64,
        branch_name: Option<&str>,
    ) -> Result<Alternative, ValidationError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(ValidationError::EmptyDescription);
        }
        let branch_name = match branch_name.map(str::trim).filter(|b| !b.is_empty()) {
            Some(name) => Some(BranchName::try_from(name)?),
            None => None,
        };
        Ok(Alternative {
            action,
            description: description.to_string(),
            confidence: Confidence::new(confidence)?,
            branch_name,
        })
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn confidence(&self) -> Confidence {
        self.confidence
    }

    pub fn branch_name(&self) -> Option<&BranchName> {
        self.branch_name.as_ref()
    }
}

/// The primary recommendation. Built with [`DecisionBuilder`].
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    action: Action,
    confidence: Confidence,
    reasoning: String,
    commit_message: Option<CommitMessage>,
    branch_name: Option<BranchName>,
    merge_strategy: Option<MergeStrategy>,
    merge_target: Option<String>,
    alternatives: Vec<Alternative>,
    review_requested: bool,
}

impl Decision {
    pub fn builder(action: Action, confidence: f64, reasoning: &str) -> DecisionBuilder {
        DecisionBuilder::new(action, confidence, reasoning)
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn confidence(&self) -> Confidence {
        self.confidence
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn commit_message(&self) -> Option<&CommitMessage> {
        self.commit_message.as_ref()
    }

    pub fn branch_name(&self) -> Option<&BranchName> {
        self.branch_name.as_ref()
    }

    pub fn merge_strategy(&self) -> Option<MergeStrategy> {
        self.merge_strategy
    }

    pub fn merge_target(&self) -> Option<&str> {
        self.merge_target.as_deref()
    }

    pub fn alternatives(&self) -> &[Alternative] {
        &self.alternatives
    }

    /// Explicitly requested or confidence below 0.7.
    pub fn requires_review(&self) -> bool {
        self.review_requested || self.confidence.value() < REVIEW_THRESHOLD
    }
}

#[derive(Debug, Clone)]
pub struct DecisionBuilder {
    action: Action,
    confidence: f64,
    reasoning: String,
    commit_message: Option<CommitMessage>,
    branch_name: Option<String>,
    merge_strategy: Option<MergeStrategy>,
    merge_target: Option<String>,
    alternatives: Vec<Alternative>,
    review_requested: bool,
}

impl DecisionBuilder {
    pub fn new(action: Action, confidence: f64, reasoning: &str) -> DecisionBuilder {
        DecisionBuilder {
            action,
            confidence,
            reasoning: reasoning.trim().to_string(),
            commit_message: None,
            branch_name: None,
            merge_strategy: None,
            merge_target: None,
            alternatives: Vec::new(),
            review_requested: false,
        }
    }

    pub fn commit_message(mut self, message: CommitMessage) -> Self {
        self.commit_message = Some(message);
        self
    }

    pub fn branch_name(mut self, name: impl Into<String>) -> Self {
        self.branch_name = Some(name.into());
        self
    }

    pub fn merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = Some(strategy);
        self
    }

    pub fn merge_target(mut self, target: impl Into<String>) -> Self {
        self.merge_target = Some(target.into());
        self
    }

    pub fn alternative(mut self, alternative: Alternative) -> Self {
        self.alternatives.push(alternative);
        self
    }

    pub fn alternatives(mut self, alternatives: impl IntoIterator<Item = Alternative>) -> Self {
        self.alternatives.extend(alternatives);
        self
    }

    pub fn requires_review(mut self, requested: bool) -> Self {
        self.review_requested = requested;
        self
    }

    /// Validates every invariant and produces the immutable [`Decision`].
    pub fn build(self) -> Result<Decision, ValidationError> {
        let confidence = Confidence::new(self.confidence)?;
        if self.reasoning.is_empty() {
            return Err(ValidationError::EmptyReasoning);
        }

        let branch_name = match self
            .branch_name
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
        {
            Some(name) => Some(BranchName::try_from(name)?),
            None => None,
        };
        let merge_target = self
            .merge_target
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        match self.action {
            Action::CreateBranch if branch_name.is_none() => {
                return Err(ValidationError::MissingBranchName)
            }
            Action::CommitDirect if self.commit_message.is_none() => {
                return Err(ValidationError::MissingCommitMessage)
            }
            Action::Merge if merge_target.is_none() => {
                return Err(ValidationError::MissingMergeTarget)
            }
            _ => {}
        }

        Ok(Decision {
            action: self.action,
            confidence,
            reasoning: self.reasoning,
            commit_message: self.commit_message,
            branch_name,
            merge_strategy: self.merge_strategy,
            merge_target,
            alternatives: self.alternatives,
            review_requested: self.review_requested,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> CommitMessage {
        CommitMessage::new("Add retries", None)
    }

    #[test]
    fn test_confidence_range() {
        for bad in [-0.01, 1.01, f64::NAN, f64::INFINITY] {
            assert!(Confidence::new(bad).is_err(), "{bad}");
            assert!(Decision::builder(Action::Review, bad, "why").build().is_err());
            assert!(Alternative::new(Action::Review, "look", bad, None).is_err());
        }
        for good in [0.0, 0.5, 1.0] {
            assert!(Confidence::new(good).is_ok());
        }
    }

    #[test]
    fn test_confidence_bands() {
        assert_eq!(Confidence::new(0.8).unwrap().band(), ConfidenceBand::High);
        assert_eq!(Confidence::new(0.79).unwrap().band(), ConfidenceBand::Medium);
        assert_eq!(Confidence::new(0.5).unwrap().band(), ConfidenceBand::Medium);
        assert_eq!(Confidence::new(0.49).unwrap().band(), ConfidenceBand::Low);
    }

    #[test]
    fn test_title_truncated_at_word_boundary() {
        // last space inside the first 69 chars sits at index 60
        let title = format!("{} {}", "a".repeat(60), "b".repeat(30));
        let msg = CommitMessage::new(&title, None);
        assert_eq!(msg.title(), format!("{}...", "a".repeat(60)));
        assert!(msg.title().chars().count() <= MAX_TITLE_CHARS);
    }

    #[test]
    fn test_title_hard_truncated() {
        // only space is at index 10, before the boundary threshold
        let title = format!("{} {}", "a".repeat(10), "b".repeat(80));
        let msg = CommitMessage::new(&title, None);
        let expected: String = title.chars().take(69).collect();
        assert_eq!(msg.title(), format!("{expected}..."));
        assert_eq!(msg.title().chars().count(), 72);

        let unbroken = "x".repeat(100);
        assert_eq!(CommitMessage::new(&unbroken, None).title(), format!("{}...", "x".repeat(69)));
    }

    #[test]
    fn test_short_title_untouched() {
        let title = "y".repeat(72);
        assert_eq!(CommitMessage::new(&title, None).title(), title);
    }

    #[test]
    fn test_conventional_commit() {
        let msg = CommitMessage::conventional("feat", Some("api"), "add retries").unwrap();
        assert_eq!(msg.title(), "feat(api): add retries");
        assert!(msg.is_conventional());
        assert_eq!(msg.commit_type(), Some("feat"));
        assert_eq!(msg.scope(), Some("api"));

        let msg = CommitMessage::conventional("fix", None, "handle empty repo").unwrap();
        assert_eq!(msg.title(), "fix: handle empty repo");

        let err = CommitMessage::conventional("feat", Some("api"), &"z".repeat(70)).unwrap_err();
        assert!(matches!(err, ValidationError::TitleTooLong { max: 72, .. }));
    }

    #[test]
    fn test_parse_message() {
        let msg =
            CommitMessage::parse("feat(api): add retries\n\nRetries transient failures.").unwrap();
        assert!(msg.is_conventional());
        assert_eq!(msg.title(), "feat(api): add retries");
        assert_eq!(msg.body(), Some("Retries transient failures."));
        assert_eq!(msg.full(), "feat(api): add retries\n\nRetries transient failures.");

        let msg = CommitMessage::parse("Update readme").unwrap();
        assert!(!msg.is_conventional());
        assert_eq!(msg.full(), "Update readme");

        assert_eq!(CommitMessage::parse("   "), Err(ValidationError::EmptyTitle));
        assert_eq!(CommitMessage::parse("Fix the bug."), Err(ValidationError::TrailingPeriod));
    }

    #[test]
    fn test_action_invariants() {
        let err = Decision::builder(Action::CreateBranch, 0.9, "new topic").build().unwrap_err();
        assert_eq!(err, ValidationError::MissingBranchName);

        let err = Decision::builder(Action::CreateBranch, 0.9, "new topic")
            .branch_name("bad name")
            .build()
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidBranchName(_)));

        let err = Decision::builder(Action::CommitDirect, 0.9, "fits").build().unwrap_err();
        assert_eq!(err, ValidationError::MissingCommitMessage);

        let err = Decision::builder(Action::Merge, 0.9, "ready").build().unwrap_err();
        assert_eq!(err, ValidationError::MissingMergeTarget);

        let err = Decision::builder(Action::Review, 0.9, "  ").build().unwrap_err();
        assert_eq!(err, ValidationError::EmptyReasoning);

        let decision = Decision::builder(Action::CreateBranch, 0.9, "new topic")
            .branch_name("feature/retries")
            .commit_message(message())
            .build()
            .unwrap();
        assert_eq!(decision.branch_name().unwrap().to_string(), "feature/retries");
    }

    #[test]
    fn test_requires_review() {
        let d = Decision::builder(Action::CommitDirect, 0.69, "fits")
            .commit_message(message())
            .build()
            .unwrap();
        assert!(d.requires_review());

        let d = Decision::builder(Action::CommitDirect, 0.7, "fits")
            .commit_message(message())
            .build()
            .unwrap();
        assert!(!d.requires_review());

        let d = Decision::builder(Action::CommitDirect, 0.95, "fits")
            .commit_message(message())
            .requires_review(true)
            .build()
            .unwrap();
        assert!(d.requires_review());
    }

    #[test]
    fn test_unknown_action_is_review() {
        assert_eq!(Action::from_wire("yolo-push"), Action::Review);
        assert_eq!(Action::from_wire("create_branch"), Action::CreateBranch);
        assert_eq!(Action::from_wire("Merge"), Action::Merge);
    }

    #[test]
    fn test_alternative_validation() {
        assert_eq!(
            Alternative::new(Action::Review, " ", 0.5, None),
            Err(ValidationError::EmptyDescription)
        );
        let alt =
            Alternative::new(Action::CreateBranch, "Isolate it", 0.4, Some("feature/iso")).unwrap();
        assert_eq!(alt.branch_name().unwrap().to_string(), "feature/iso");
    }
}

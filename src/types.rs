//! Defines core value types: branch names, remote URLs and API keys.
use crate::error::{GitError, ValidationError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{de, Deserialize, Deserializer, Serialize};
use std::str::FromStr;
use std::{
    ffi::OsStr,
    fmt,
    fmt::{Display, Formatter},
};

/// Hosts whose remotes get host-specific treatment (PR hints, known URLs).
const KNOWN_HOSTS: [&str; 1] = ["github.com"];

// scheme://[user@]host[:port]/...  or  user@host:path (scp-like)
static REMOTE_HOST_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[a-z][a-z0-9+.-]*://)?(?:[^@/]+@)?(?P<host>[^:/\s]+)")
        .expect("Invalid static remote host regex")
});

/// A remote URL as configured in `remote.<name>.url`.
///
/// Unlike a clone URL this is not validated; it only knows how to extract
/// the host so the snapshot can tell whether the remote is a known forge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUrl {
    pub(crate) value: String,
}

impl RemoteUrl {
    pub fn new(value: impl Into<String>) -> RemoteUrl {
        RemoteUrl {
            value: value.into().trim().to_string(),
        }
    }

    /// The host part of the URL, lowercased. `None` for local paths.
    pub fn host(&self) -> Option<String> {
        if self.value.starts_with('/') || self.value.starts_with("file://") {
            return None;
        }
        REMOTE_HOST_REGEX
            .captures(&self.value)
            .and_then(|c| c.name("host"))
            .map(|m| m.as_str().to_ascii_lowercase())
    }

    pub fn is_known_host(&self) -> bool {
        self.host()
            .map(|h| KNOWN_HOSTS.iter().any(|k| h == *k || h.ends_with(&format!(".{k}"))))
            .unwrap_or(false)
    }
}

impl Display for RemoteUrl {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl AsRef<str> for RemoteUrl {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

/// Represents a validated Git branch name (or more generally, a reference name).
///
/// Can be created from a string using `FromStr`, which validates the format
/// according to Git's reference naming rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchName {
    pub(crate) value: String,
}

impl BranchName {
    /// Derives a `feature/<slug>` name from free text such as a commit title.
    ///
    /// Returns `None` when the text has no usable characters.
    pub fn suggest_from(text: &str) -> Option<BranchName> {
        let text = strip_conventional_prefix(text);
        let mut slug = String::new();
        for c in text.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
            } else if !slug.ends_with('-') && !slug.is_empty() {
                slug.push('-');
            }
            if slug.len() >= 40 {
                break;
            }
        }
        let slug = slug.trim_end_matches('-');
        if slug.is_empty() {
            return None;
        }
        BranchName::from_str(&format!("feature/{slug}")).ok()
    }
}

fn strip_conventional_prefix(text: &str) -> &str {
    match text.split_once(": ") {
        Some((head, rest)) if !head.contains(' ') => rest,
        _ => text,
    }
}

impl FromStr for BranchName {
    type Err = GitError;

    /// Parses a string into a `BranchName`, returning `Err(GitError::InvalidRefName)` if
    /// the string does not conform to Git's reference naming rules.
    fn from_str(s: &str) -> Result<Self, GitError> {
        if is_valid_reference_name(s) {
            Ok(BranchName {
                value: String::from(s),
            })
        } else {
            Err(GitError::InvalidRefName(s.to_string()))
        }
    }
}

impl Display for BranchName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl AsRef<str> for BranchName {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

impl AsRef<OsStr> for BranchName {
    fn as_ref(&self) -> &OsStr {
        self.value.as_ref()
    }
}

impl<'de> Deserialize<'de> for BranchName {
    /// Deserializes a string into a `BranchName`, validating the format.
    fn deserialize<D>(deserializer: D) -> Result<BranchName, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        BranchName::from_str(&s).map_err(de::Error::custom)
    }
}

impl TryFrom<&str> for BranchName {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, ValidationError> {
        BranchName::from_str(value.trim())
            .map_err(|_| ValidationError::InvalidBranchName(value.to_string()))
    }
}

// --- Internal validation logic ---

const INVALID_REFERENCE_CHARS: [char; 5] = [' ', '~', '^', ':', '\\'];
const INVALID_REFERENCE_START: &str = "-";
const INVALID_REFERENCE_END: &str = ".";

/// Checks if a string is a valid Git reference name based on common rules.
///
/// Rules approximated from `git check-ref-format`.
/// See: https://git-scm.com/docs/git-check-ref-format
fn is_valid_reference_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(INVALID_REFERENCE_START)
        && !name.ends_with(INVALID_REFERENCE_END)
        && !name.starts_with('/')
        && !name.ends_with('/')
        && !name.starts_with('.')
        && !name.ends_with(".lock")
        && name.chars().all(|c| {
            !c.is_ascii_control() && INVALID_REFERENCE_CHARS.iter().all(|invalid| c != *invalid)
        })
        && !name.contains("/.")
        && !name.contains("@{")
        && !name.contains("..")
        && name != "@"
        && !name.contains("//")
        && !name.contains('*')
        && !name.contains('?')
        && !name.contains('[')
}

/// API-key service level. Governs the token budget and context reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Unknown,
    Free,
    Pro,
}

impl FromStr for Tier {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, ValidationError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "pro" | "paid" => Ok(Tier::Pro),
            _ => Ok(Tier::Unknown),
        }
    }
}

impl Tier {
    /// Completion budget for one request.
    pub fn max_tokens_per_request(&self) -> u32 {
        match self {
            Tier::Pro => 8000,
            Tier::Free | Tier::Unknown => 2000,
        }
    }

    /// Whether prompts must be trimmed to the token budget.
    pub fn should_reduce_context(&self) -> bool {
        *self != Tier::Pro
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Tier::Unknown => "unknown",
            Tier::Free => "free",
            Tier::Pro => "pro",
        };
        f.write_str(s)
    }
}

/// An API key for the LLM provider.
///
/// The secret is never printed: `Debug` and [`ApiKey::prefix`] expose at most
/// the first eight characters.
#[derive(Clone)]
pub struct ApiKey {
    secret: String,
    provider: String,
    tier: Tier,
}

impl ApiKey {
    const VISIBLE_PREFIX: usize = 8;

    pub fn new(secret: impl Into<String>, provider: impl Into<String>, tier: Tier) -> ApiKey {
        ApiKey {
            secret: secret.into(),
            provider: provider.into(),
            tier,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn max_tokens_per_request(&self) -> u32 {
        self.tier.max_tokens_per_request()
    }

    pub fn should_reduce_context(&self) -> bool {
        self.tier.should_reduce_context()
    }

    /// Short display form, e.g. `sk-proj-…`.
    pub fn prefix(&self) -> String {
        let visible: String = self.secret.chars().take(Self::VISIBLE_PREFIX).collect();
        format!("{visible}…")
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey")
            .field("secret", &self.prefix())
            .field("provider", &self.provider)
            .field("tier", &self.tier)
            .finish()
    }
}

// --- Tests ---

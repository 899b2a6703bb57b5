//! An LLM-assisted commit, branch and merge assistant built on the `git`
//! command-line tool.
//!
//! The library inspects a repository, describes the pending changes to a
//! chat-completions model, validates the structured answer into a
//! [`Decision`](decision::Decision) and executes the accepted action.
//!
//! This library requires the `git` executable to be installed and accessible
//! in the system's PATH where the Rust program is executed.
//!
//! # Examples
//!
//! ```no_run
//! use commit_pilot::config::Config;
//! use commit_pilot::flow::{run_commit, CommitOptions, FlowOutcome};
//! use commit_pilot::llm::LlmClient;
//! use commit_pilot::selector::TerminalSelector;
//! use commit_pilot::Repository;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load()?;
//! let key = config.api_key(None)?;
//! let client = LlmClient::new(config.llm_config(), &key)?;
//! let repo = Repository::new(".");
//!
//! let mut selector = TerminalSelector::stdio();
//! let outcome = run_commit(&repo, &client, &mut selector, &config, &CommitOptions::default()).await?;
//! if let FlowOutcome::Executed(done) = outcome {
//!     println!("{} on {}", done.action, done.branch);
//! }
//! # Ok(())
//! # }
//! ```

pub mod branch;
pub mod config;
pub mod decision;
pub mod error;
pub mod executor;
pub mod flow;
pub mod llm;
pub mod mapper;
pub mod models;
pub mod prompt;
pub mod repository;
pub mod selector;
pub mod snapshot;
pub mod types;
pub mod vcs;

#[cfg(test)]
mod testing;

// Re-export key types
pub use crate::error::{Error, GitError, Result};
pub use crate::executor::Executor;
pub use crate::repository::Repository;
pub use crate::types::{BranchName, RemoteUrl};
pub use crate::vcs::Vcs;

pub mod prelude {
    //! Convenient import for common commit-pilot types and traits.
    pub use crate::decision::{Action, CommitMessage, Decision};
    pub use crate::error::{Error, GitError, Result};
    pub use crate::executor::{ExecutionPlan, Executor};
    pub use crate::llm::Analyzer;
    pub use crate::models::*;
    pub use crate::repository::Repository;
    pub use crate::selector::Selector;
    pub use crate::types::{BranchName, RemoteUrl};
    pub use crate::vcs::Vcs;
}

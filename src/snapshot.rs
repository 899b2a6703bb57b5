//! Builds a [`RepositorySnapshot`] from the VCS port.

use crate::error::{GitError, Result};
use crate::models::{
    ChangeStatus, FileChange, FileContentBlock, RemoteInfo, RepositorySnapshot, DETACHED_BRANCH,
};
use crate::types::RemoteUrl;
use crate::vcs::Vcs;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Bytes inspected when counting lines of an untracked file.
const LINE_COUNT_SNIFF: usize = 512;
/// Bytes inspected when deciding whether a new file is binary.
const CONTENT_SNIFF: usize = 8 * 1024;
/// New files above this size are summarized rather than included.
const MAX_CONTENT_BYTES: u64 = 100 * 1024;
/// Lines of a new file handed to the prompt.
const MAX_CONTENT_LINES: usize = 100;

const PREFERRED_REMOTE: &str = "origin";

/// Collects the current state of the repository behind `vcs`.
pub async fn build_snapshot(vcs: &dyn Vcs) -> Result<RepositorySnapshot> {
    if !vcs.is_repository().await? {
        return Err(GitError::NotAVcsRepository(vcs.location().to_path_buf()).into());
    }

    let root = vcs.root().await?;
    let branch = vcs
        .current_branch()
        .await?
        .unwrap_or_else(|| DETACHED_BRANCH.to_string());

    let remote = detect_remote(vcs).await?;
    let (ahead, behind) = tracking_counts(vcs, &branch).await;

    let mut changes = parse_status(&vcs.status_porcelain().await?);
    let mut counts = HashMap::new();
    for staged in [true, false] {
        // unstaged runs second and overwrites staged counts for the same path
        match vcs.diff_numstat(staged).await {
            Ok(out) => counts.extend(parse_numstat(&out)),
            Err(e) => warn!(staged, error = %e, "numstat unavailable, line counts left at zero"),
        }
    }
    for change in changes.iter_mut() {
        if let Some((additions, deletions)) = counts.get(&change.path) {
            change.additions = *additions;
            change.deletions = *deletions;
        } else if change.status == ChangeStatus::Untracked {
            change.additions = count_file_lines(&root.join(&change.path)).await;
        }
    }

    debug!(
        branch = %branch,
        files = changes.len(),
        ahead,
        behind,
        "built repository snapshot"
    );

    Ok(RepositorySnapshot {
        path: root,
        branch,
        remote,
        ahead,
        behind,
        changes,
    })
}

/// Staged and unstaged diff text, concatenated.
pub async fn collect_diff(vcs: &dyn Vcs) -> Result<String> {
    let staged = vcs.diff(true).await?;
    let unstaged = vcs.diff(false).await?;
    Ok(match (staged.is_empty(), unstaged.is_empty()) {
        (true, _) => unstaged,
        (_, true) => staged,
        _ => format!("{staged}\n{unstaged}"),
    })
}

async fn detect_remote(vcs: &dyn Vcs) -> Result<Option<RemoteInfo>> {
    let remotes = vcs.remotes().await?;
    let name = match remotes.iter().find(|r| *r == PREFERRED_REMOTE).or_else(|| remotes.first()) {
        Some(name) => name.clone(),
        None => return Ok(None),
    };
    let url = vcs.remote_url(&name).await?.unwrap_or_default();
    Ok(Some(RemoteInfo {
        name,
        url: RemoteUrl::new(url),
    }))
}

/// Ahead/behind against the tracking ref; any failure yields zeros.
async fn tracking_counts(vcs: &dyn Vcs, branch: &str) -> (u32, u32) {
    if branch == DETACHED_BRANCH {
        return (0, 0);
    }
    let upstream = match vcs.upstream(branch).await {
        Ok(Some(upstream)) => upstream,
        Ok(None) => return (0, 0),
        Err(e) => {
            warn!(branch, error = %e, "could not resolve upstream");
            return (0, 0);
        }
    };
    match vcs.ahead_behind(branch, &upstream).await {
        Ok(counts) => counts,
        Err(e) => {
            warn!(branch, upstream = %upstream, error = %e, "could not compute ahead/behind");
            (0, 0)
        }
    }
}

/// Parses `git status --porcelain` output. Lines are never trimmed: the
/// leading space of `" M path"` is part of the status code.
pub(crate) fn parse_status(output: &str) -> Vec<FileChange> {
    output
        .lines()
        .filter_map(|line| {
            if line.len() < 4 {
                return None;
            }
            let mut code = line.chars();
            let index = code.next()?;
            let worktree = code.next()?;
            let path = line.get(3..)?;
            let path = match path.split_once(" -> ") {
                Some((_, new)) => new,
                None => path,
            };
            let path = unquote(path);
            if path.is_empty() {
                return None;
            }
            Some(FileChange::new(path, ChangeStatus::from_porcelain_code(index, worktree)))
        })
        .collect()
}

/// Parses `git diff --numstat` output into `path -> (additions, deletions)`.
/// Binary files report `-` and count as zero.
pub(crate) fn parse_numstat(output: &str) -> HashMap<String, (u64, u64)> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.splitn(3, '\t');
            let additions = fields.next()?.parse::<u64>().unwrap_or(0);
            let deletions = fields.next()?.parse::<u64>().unwrap_or(0);
            let path = numstat_destination(fields.next()?);
            Some((unquote(&path), (additions, deletions)))
        })
        .collect()
}

/// Resolves numstat rename notation (`old => new`, `dir/{a => b}/f`) to the new path.
fn numstat_destination(path: &str) -> String {
    if let (Some(open), Some(close)) = (path.find('{'), path.rfind('}')) {
        if open < close {
            let inner = &path[open + 1..close];
            if let Some((_, new)) = inner.split_once(" => ") {
                let joined = format!("{}{}{}", &path[..open], new, &path[close + 1..]);
                return joined.replace("//", "/");
            }
        }
    }
    match path.split_once(" => ") {
        Some((_, new)) => new.to_string(),
        None => path.to_string(),
    }
}

/// Strips the C-style quoting git applies to unusual paths.
fn unquote(path: &str) -> String {
    match path.strip_prefix('"').and_then(|p| p.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => path.to_string(),
    }
}

fn looks_binary(bytes: &[u8], window: usize) -> bool {
    bytes.iter().take(window).any(|b| *b == 0)
}

/// Raw line count of a file on disk; zero for binaries and unreadable files.
async fn count_file_lines(path: &Path) -> u64 {
    match tokio::fs::read(path).await {
        Ok(bytes) if looks_binary(&bytes, LINE_COUNT_SNIFF) => 0,
        Ok(bytes) => String::from_utf8_lossy(&bytes).lines().count() as u64,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "could not read untracked file");
            0
        }
    }
}

/// Reads the content of untracked files for the prompt.
///
/// Binaries (a NUL byte within the first 8 KB) are skipped, files over 100 KB
/// are summarized by size, and content is capped at 100 lines per file.
pub async fn collect_new_file_blocks(root: &Path, changes: &[FileChange]) -> Vec<FileContentBlock> {
    let mut blocks = Vec::new();
    for change in changes.iter().filter(|c| c.status == ChangeStatus::Untracked) {
        let full = root.join(&change.path);
        blocks.push(read_block(&change.path, &full).await);
    }
    blocks
}

async fn read_block(relative: &str, full: &Path) -> FileContentBlock {
    let skipped = |note: String| FileContentBlock {
        path: relative.to_string(),
        content: None,
        note: Some(note),
    };

    let size = match tokio::fs::metadata(full).await {
        Ok(meta) => meta.len(),
        Err(e) => return skipped(format!("unreadable: {e}")),
    };
    if size > MAX_CONTENT_BYTES {
        return skipped(format!("large file ({} KB), content omitted", size / 1024));
    }

    let bytes = match tokio::fs::read(full).await {
        Ok(bytes) => bytes,
        Err(e) => return skipped(format!("unreadable: {e}")),
    };
    if looks_binary(&bytes, CONTENT_SNIFF) {
        return skipped("binary file, content omitted".to_string());
    }

    let text = String::from_utf8_lossy(&bytes);
    let total = text.lines().count();
    let content: Vec<&str> = text.lines().take(MAX_CONTENT_LINES).collect();
    let note = (total > MAX_CONTENT_LINES)
        .then(|| format!("showing first {MAX_CONTENT_LINES} of {total} lines"));

    FileContentBlock {
        path: relative.to_string(),
        content: Some(content.join("\n")),
        note,
    }
}

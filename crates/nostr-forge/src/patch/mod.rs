// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Patch lifecycle engine.
//!
//! Three pieces: the [`parser`] turns a unified diff into classified file
//! changes, the analyzer decides three-way mergeability against the local
//! clone, and the applier lands a patch as a merge commit and fans the push
//! out to every remote. Analysis never throws: unexpected failures come back
//! as [`MergeAnalysis::Error`] with an embedded message.

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::push::PushCoordinator;
use crate::store::RepoStore;

mod analyzer;
mod applier;
mod hunks;
pub mod parser;

pub use self::applier::ApplyOutcome;
pub use self::hunks::{apply_hunks, delete_content, new_file_content, HunkApplyError};
pub use self::parser::parse_diff;

/// Classification of one file change within a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// New file
    Add,
    /// Content change to an existing file
    Modify,
    /// File removal
    Delete,
    /// Binary patch or rename; the engine does not apply these
    Unsupported,
}

/// Line prefix inside a hunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinePrefix {
    /// Unchanged context (` `)
    Context,
    /// Added line (`+`)
    Add,
    /// Removed line (`-`)
    Remove,
    /// `\ No newline at end of file`
    NoNewline,
}

impl LinePrefix {
    /// Map a diff line's first character.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            ' ' => Some(Self::Context),
            '+' => Some(Self::Add),
            '-' => Some(Self::Remove),
            '\\' => Some(Self::NoNewline),
            _ => None,
        }
    }
}

/// One line of a hunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HunkLine {
    /// Prefix
    pub prefix: LinePrefix,
    /// Line text without the prefix character
    pub text: String,
}

/// One hunk: `@@ -old_start,old_count +new_start,new_count @@`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    /// First line of the old range (1-based; 0 for pure insertions)
    pub old_start: u32,
    /// Length of the old range
    pub old_count: u32,
    /// First line of the new range
    pub new_start: u32,
    /// Length of the new range
    pub new_count: u32,
    /// Ordered hunk lines
    pub lines: Vec<HunkLine>,
}

/// One file change of a parsed patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// Path relative to the repository root
    pub path: String,
    /// Change classification
    pub kind: ChangeKind,
    /// Ordered hunks (empty for unsupported changes)
    pub hunks: Vec<Hunk>,
}

/// Aggregate analysis outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeAnalysis {
    /// Applies without conflicts
    Clean,
    /// At least one file conflicts
    Conflicts,
    /// The patch commits are already contained in the target
    UpToDate,
    /// Analysis failed; see `error_message`
    Error,
}

/// Detail of one conflicting file change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictDetail {
    /// Conflicting path
    pub path: String,
    /// Hunk index that failed to align, when the conflict is hunk-level
    pub hunk_index: Option<usize>,
    /// Human-readable reason
    pub reason: String,
}

/// Result of analyzing a patch against a target branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeAnalysisResult {
    /// Aggregate outcome
    pub analysis: MergeAnalysis,
    /// Whether the patch can land (clean or fast-forward)
    pub can_merge: bool,
    /// Whether conflicts were found
    pub has_conflicts: bool,
    /// Conflicting file paths
    pub conflict_files: Vec<String>,
    /// Per-conflict detail
    pub conflict_details: Vec<ConflictDetail>,
    /// Target already contains the patch commits
    pub up_to_date: bool,
    /// The target can fast-forward to the patch
    pub fast_forward: bool,
    /// Commit the target branch points at
    pub target_commit: Option<String>,
    /// Merge base of patch parent and target
    pub merge_base: Option<String>,
    /// Commits carried by the patch
    pub patch_commits: Vec<String>,
    /// Failure detail for [`MergeAnalysis::Error`]
    pub error_message: Option<String>,
}

impl MergeAnalysisResult {
    pub(crate) fn error<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            analysis: MergeAnalysis::Error,
            can_merge: false,
            has_conflicts: false,
            conflict_files: Vec::new(),
            conflict_details: Vec::new(),
            up_to_date: false,
            fast_forward: false,
            target_commit: None,
            merge_base: None,
            patch_commits: Vec::new(),
            error_message: Some(message.into()),
        }
    }
}

/// Memoized analysis row: invalidated when the target branch head moves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AnalysisMemo {
    pub(crate) target_head: String,
    pub(crate) result: MergeAnalysisResult,
}

/// Parses, analyzes and applies patches.
#[derive(Debug, Clone)]
pub struct PatchEngine {
    pub(crate) ctx: Context,
    pub(crate) store: RepoStore,
    pub(crate) push: PushCoordinator,
}

impl PatchEngine {
    /// Engine over `ctx`.
    pub fn new(ctx: Context) -> Self {
        Self {
            store: RepoStore::new(ctx.clone()),
            push: PushCoordinator::new(ctx.clone()),
            ctx,
        }
    }
}

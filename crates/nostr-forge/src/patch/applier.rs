// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Patch application.
//!
//! Applies a parsed patch to the checked-out target branch through the
//! filesystem, verifies that something was actually staged, creates the
//! merge commit, and fans the push out to every configured remote. The whole
//! operation holds the per-repository lock; cancellation between commit and
//! push leaves the local commit in place so the push can be retried.

use crate::error::{ErrorCode, ForgeError};
use crate::events::merge::MergeMetadata;
use crate::events::patch::PatchEvent;
use crate::events::Decoded;
use crate::git::{FetchDepth, SignatureInfo};
use crate::store::DataLevel;
use crate::trace::SpanClass;
use crate::transport::can_host_git;

use super::{apply_hunks, new_file_content, parse_diff, ChangeKind, PatchEngine};

/// Result of applying and pushing a patch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Whether the patch landed locally and no remote failed outright
    pub success: bool,
    /// Oid of the commit carrying the applied patch
    pub merge_commit: Option<String>,
    /// Remotes the push reached (ref name annotated on fallback)
    pub pushed_remotes: Vec<String>,
    /// Remotes that cannot host git objects and were skipped
    pub skipped_remotes: Vec<String>,
    /// Per-remote push failures
    pub push_errors: Vec<(String, String)>,
    /// Human-readable warning (topic fallback, no remotes, ...)
    pub warning: Option<String>,
}

impl PatchEngine {
    /// Apply `patch` onto `target_branch` and push the result everywhere.
    ///
    /// Fails with [`ErrorCode::Unsupported`] when the patch carries binary or
    /// rename changes, [`ErrorCode::MergeConflict`] when a hunk does not
    /// align, and [`ErrorCode::NoChanges`] when application stages nothing.
    pub async fn apply_and_push(
        &self,
        patch: &Decoded<PatchEvent>,
        target_branch: Option<&str>,
        message: &str,
        author: SignatureInfo,
        token: Option<String>,
        cancel: &crate::context::CancelToken,
    ) -> Result<ApplyOutcome, ForgeError> {
        let address = patch.value.address.clone();
        let fs_key = address.fs_key();
        let _guard = self.ctx.lock_repo(&fs_key).await;
        let dir = self.ctx.repo_dir(&fs_key);

        if !self.ctx.git.is_cloned(dir.clone()).await? {
            return Err(ForgeError::with_context(
                ErrorCode::NotCloned,
                address.to_tag_value(),
            ));
        }

        let span = self
            .ctx
            .trace
            .span(SpanClass::Repo, "apply-patch")
            .cra(address.to_tag_value());

        // Full history, then the target branch in the working tree
        if self.ctx.git.is_shallow(dir.clone()).await? {
            self.store
                .deepen_unlocked(&address, target_branch, FetchDepth::Unshallow, DataLevel::Full)
                .await?;
        }
        let branch = self.store.resolve_branch(&address, target_branch).await?;
        self.ctx.git.checkout(dir.clone(), branch.clone()).await?;

        let changes = parse_diff(&patch.value.content);
        if changes.is_empty() {
            span.err("empty diff");
            return Err(ForgeError::with_context(ErrorCode::NoChanges, "empty diff"));
        }
        if changes.iter().any(|c| c.kind == ChangeKind::Unsupported) {
            span.err("unsupported change");
            return Err(ForgeError::with_context(
                ErrorCode::Unsupported,
                "patch contains binary or rename changes",
            ));
        }

        let window = self.ctx.config.context_window;
        for change in &changes {
            let file = dir.join(&change.path);
            match change.kind {
                ChangeKind::Add => {
                    if let Some(parent) = file.parent() {
                        tokio::fs::create_dir_all(parent)
                            .await
                            .map_err(|e| ForgeError::wrap_as(ErrorCode::FsError, e, "mkdir"))?;
                    }
                    tokio::fs::write(&file, new_file_content(&change.hunks))
                        .await
                        .map_err(|e| ForgeError::wrap_as(ErrorCode::FsError, e, "write file"))?;
                    self.ctx
                        .git
                        .stage_add(dir.clone(), change.path.clone())
                        .await?;
                }
                ChangeKind::Modify => {
                    let existing = tokio::fs::read_to_string(&file).await.map_err(|e| {
                        ForgeError::wrap_as(ErrorCode::MergeConflict, e, change.path.clone())
                    })?;
                    let updated = apply_hunks(&existing, &change.hunks, window).map_err(|e| {
                        ForgeError::wrap_as(ErrorCode::MergeConflict, e, change.path.clone())
                    })?;
                    tokio::fs::write(&file, updated)
                        .await
                        .map_err(|e| ForgeError::wrap_as(ErrorCode::FsError, e, "write file"))?;
                    self.ctx
                        .git
                        .stage_add(dir.clone(), change.path.clone())
                        .await?;
                }
                ChangeKind::Delete => {
                    if tokio::fs::remove_file(&file).await.is_err() {
                        return Err(ForgeError::with_context(
                            ErrorCode::MergeConflict,
                            format!("{}: file to delete is absent", change.path),
                        ));
                    }
                    self.ctx
                        .git
                        .stage_remove(dir.clone(), change.path.clone())
                        .await?;
                }
                ChangeKind::Unsupported => unreachable!("rejected above"),
            }
        }

        // Something must actually be staged
        let status = self.ctx.git.status_matrix(dir.clone()).await?;
        if status.staged.is_empty() {
            span.err("no changes");
            return Err(ForgeError::with_context(
                ErrorCode::NoChanges,
                "patch application staged nothing",
            ));
        }

        let merge_commit = self
            .ctx
            .git
            .commit(dir.clone(), message.to_string(), author)
            .await?;

        if cancel.is_cancelled() {
            // The local merge commit stays; the caller may re-invoke push.
            span.err("aborted between commit and push");
            return Err(ForgeError::with_context(
                ErrorCode::OperationAborted,
                format!("merge commit {merge_commit} created, push skipped"),
            ));
        }

        // Fan out to every remote that can host git objects
        let remotes = self.ctx.git.list_remotes(dir.clone()).await?;
        let skipped_remotes: Vec<String> = remotes
            .iter()
            .filter(|r| !can_host_git(&r.url))
            .map(|r| r.url.clone())
            .collect();

        let topic_id = patch.event_id.to_hex();
        let outcome = self
            .push
            .push_to_all(&address, Some(&branch), token, Some(&topic_id))
            .await?;

        let mut pushed_remotes: Vec<String> = Vec::new();
        let mut push_errors: Vec<(String, String)> = Vec::new();
        let mut warning: Option<String> = None;
        for (url, result) in &outcome.results {
            match result {
                Ok(report) => {
                    pushed_remotes.push(url.clone());
                    if report.annotation.is_some() && warning.is_none() {
                        warning = report.warning.clone();
                    }
                }
                Err(e) => push_errors.push((url.clone(), e.to_string())),
            }
        }
        if outcome.results.is_empty() && warning.is_none() {
            warning = Some("no remotes configured; patch applied locally".to_string());
        }

        span.ok();
        Ok(ApplyOutcome {
            success: push_errors.is_empty(),
            merge_commit: Some(merge_commit),
            pushed_remotes,
            skipped_remotes,
            push_errors,
            warning,
        })
    }

    /// Merge metadata for a successfully applied patch.
    pub fn applied_merge_event(
        &self,
        patch: &Decoded<PatchEvent>,
        target_branch: &str,
        merge_commit: &str,
    ) -> MergeMetadata {
        MergeMetadata {
            address: patch.value.address.clone(),
            root_id: patch.value.root_id.unwrap_or(patch.event_id),
            target_branch: target_branch.to_string(),
            base_branch: None,
            merge_commit: Some(merge_commit.to_string()),
        }
    }
}

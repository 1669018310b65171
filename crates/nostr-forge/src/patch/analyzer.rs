// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Three-way mergeability analysis.

use crate::address::RepoAddress;
use crate::error::{ErrorCode, ForgeError};
use crate::events::merge::{ConflictMetadata, MergeMetadata};
use crate::events::patch::PatchEvent;
use crate::events::Decoded;
use crate::store::Store;
use crate::trace::SpanClass;

use super::{
    apply_hunks, delete_content, new_file_content, parse_diff, AnalysisMemo, ChangeKind,
    ConflictDetail, MergeAnalysis, MergeAnalysisResult, PatchEngine,
};

impl PatchEngine {
    /// Analyze `patch` against `target_branch`.
    ///
    /// Never fails: unexpected errors are folded into a result with
    /// `analysis = Error`. Results are memoized per
    /// `(repository, patch, target branch)` and invalidated when the target
    /// head moves.
    pub async fn analyze(
        &self,
        patch: &Decoded<PatchEvent>,
        target_branch: Option<&str>,
    ) -> MergeAnalysisResult {
        let span = self
            .ctx
            .trace
            .span(SpanClass::Repo, "analyze")
            .cra(patch.value.address.to_tag_value());
        match self.analyze_inner(patch, target_branch).await {
            Ok(result) => {
                span.ok();
                result
            }
            Err(e) => {
                span.err(e.to_string());
                MergeAnalysisResult::error(e.to_string())
            }
        }
    }

    async fn analyze_inner(
        &self,
        patch: &Decoded<PatchEvent>,
        target_branch: Option<&str>,
    ) -> Result<MergeAnalysisResult, ForgeError> {
        let address = &patch.value.address;
        let dir = self.ctx.repo_dir(&address.fs_key());

        if !self.ctx.git.is_cloned(dir.clone()).await? {
            return Err(ForgeError::with_context(
                ErrorCode::NotCloned,
                address.to_tag_value(),
            ));
        }

        // Deepen on demand until the patch's parent commit is reachable
        if let Some(parent) = &patch.value.parent_commit {
            if self
                .ctx
                .git
                .resolve_ref(dir.clone(), parent.clone())
                .await?
                .is_none()
            {
                self.store.ensure_full(address, target_branch).await?;
            }
        }

        let branch = self.store.resolve_branch(address, target_branch).await?;
        let target_commit = self.target_commit(address, &branch).await?.ok_or_else(|| {
            ForgeError::with_context(ErrorCode::RepoNotFound, format!("branch {branch}"))
        })?;

        // Memoized result still valid?
        let memo_key = memo_key(address, &patch.event_id.to_hex(), &branch);
        if let Some(memo) = self
            .ctx
            .cache
            .get::<AnalysisMemo>(Store::MergeAnalysis, &memo_key)?
        {
            if memo.target_head == target_commit {
                return Ok(memo.result);
            }
        }

        let result = self
            .compute(patch, &branch, &target_commit)
            .await
            .unwrap_or_else(|e| MergeAnalysisResult::error(e.to_string()));

        self.ctx.cache.put(
            Store::MergeAnalysis,
            &memo_key,
            &AnalysisMemo {
                target_head: target_commit,
                result: result.clone(),
            },
        )?;

        Ok(result)
    }

    async fn compute(
        &self,
        patch: &Decoded<PatchEvent>,
        branch: &str,
        target_commit: &str,
    ) -> Result<MergeAnalysisResult, ForgeError> {
        let address = &patch.value.address;
        let dir = self.ctx.repo_dir(&address.fs_key());
        let commit = patch.value.commit.clone();
        let patch_commits = vec![commit.clone()];

        // Already contained in the target?
        let known = self
            .ctx
            .git
            .resolve_ref(dir.clone(), commit.clone())
            .await?
            .is_some();
        if known
            && self
                .ctx
                .git
                .is_ancestor(dir.clone(), commit.clone(), target_commit.to_string())
                .await?
        {
            return Ok(MergeAnalysisResult {
                analysis: MergeAnalysis::UpToDate,
                can_merge: false,
                has_conflicts: false,
                conflict_files: Vec::new(),
                conflict_details: Vec::new(),
                up_to_date: true,
                fast_forward: false,
                target_commit: Some(target_commit.to_string()),
                merge_base: None,
                patch_commits,
                error_message: None,
            });
        }

        let base_ref = patch.value.parent_commit.clone().unwrap_or_else(|| commit.clone());
        let merge_base = match self
            .ctx
            .git
            .resolve_ref(dir.clone(), base_ref.clone())
            .await?
        {
            Some(_) => {
                self.ctx
                    .git
                    .merge_base(dir.clone(), base_ref, target_commit.to_string())
                    .await?
            }
            None => None,
        };
        let fast_forward = merge_base.as_deref() == Some(target_commit);

        let window = self.ctx.config.context_window;
        let mut conflict_details: Vec<ConflictDetail> = Vec::new();

        for change in parse_diff(&patch.value.content) {
            let blob = self
                .ctx
                .git
                .read_blob(dir.clone(), target_commit.to_string(), change.path.clone())
                .await?
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());

            match change.kind {
                ChangeKind::Unsupported => conflict_details.push(ConflictDetail {
                    path: change.path,
                    hunk_index: None,
                    reason: "unsupported change (binary or rename)".to_string(),
                }),
                ChangeKind::Add => {
                    if let Some(existing) = blob {
                        if existing != new_file_content(&change.hunks) {
                            conflict_details.push(ConflictDetail {
                                path: change.path,
                                hunk_index: None,
                                reason: "file already exists with different content".to_string(),
                            });
                        }
                    }
                }
                ChangeKind::Delete => match blob {
                    None => conflict_details.push(ConflictDetail {
                        path: change.path,
                        hunk_index: None,
                        reason: "file to delete is absent".to_string(),
                    }),
                    Some(existing) => {
                        if existing != delete_content(&change.hunks) {
                            conflict_details.push(ConflictDetail {
                                path: change.path,
                                hunk_index: None,
                                reason: "file to delete has diverged".to_string(),
                            });
                        }
                    }
                },
                ChangeKind::Modify => match blob {
                    None => conflict_details.push(ConflictDetail {
                        path: change.path,
                        hunk_index: None,
                        reason: "file to modify is absent".to_string(),
                    }),
                    Some(existing) => {
                        if let Err(e) = apply_hunks(&existing, &change.hunks, window) {
                            conflict_details.push(ConflictDetail {
                                path: change.path,
                                hunk_index: Some(e.hunk_index),
                                reason: e.to_string(),
                            });
                        }
                    }
                },
            }
        }

        let has_conflicts = !conflict_details.is_empty();
        let mut conflict_files: Vec<String> =
            conflict_details.iter().map(|d| d.path.clone()).collect();
        conflict_files.dedup();

        Ok(MergeAnalysisResult {
            analysis: if has_conflicts {
                MergeAnalysis::Conflicts
            } else {
                MergeAnalysis::Clean
            },
            can_merge: !has_conflicts,
            has_conflicts,
            conflict_files,
            conflict_details,
            up_to_date: false,
            fast_forward,
            target_commit: Some(target_commit.to_string()),
            merge_base,
            patch_commits,
            error_message: None,
        })
    }

    async fn target_commit(
        &self,
        address: &RepoAddress,
        branch: &str,
    ) -> Result<Option<String>, ForgeError> {
        let dir = self.ctx.repo_dir(&address.fs_key());
        if let Some(oid) = self
            .ctx
            .git
            .resolve_ref(dir.clone(), format!("refs/remotes/origin/{branch}"))
            .await?
        {
            return Ok(Some(oid));
        }
        self.ctx
            .git
            .resolve_ref(dir, format!("refs/heads/{branch}"))
            .await
    }

    /// Metadata events for an analysis outcome: a merge event on clean
    /// results, a conflict event on conflicted ones. The host decides
    /// whether to publish.
    pub fn analysis_events(
        &self,
        patch: &Decoded<PatchEvent>,
        target_branch: &str,
        result: &MergeAnalysisResult,
    ) -> (Option<MergeMetadata>, Option<ConflictMetadata>) {
        let address = patch.value.address.clone();
        let root_id = patch.value.root_id.unwrap_or(patch.event_id);

        match result.analysis {
            MergeAnalysis::Clean | MergeAnalysis::UpToDate => (
                Some(MergeMetadata {
                    address,
                    root_id,
                    target_branch: target_branch.to_string(),
                    base_branch: None,
                    merge_commit: None,
                }),
                None,
            ),
            MergeAnalysis::Conflicts => (
                None,
                Some(ConflictMetadata {
                    address,
                    root_id,
                    target_branch: target_branch.to_string(),
                    base_branch: None,
                    conflict_files: result.conflict_files.clone(),
                }),
            ),
            MergeAnalysis::Error => (None, None),
        }
    }
}

fn memo_key(address: &RepoAddress, patch_id: &str, branch: &str) -> String {
    format!("{}#{patch_id}#{branch}", address.fs_key())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nostr::Keys;

    use super::*;
    use crate::context::{Config, Context};
    use crate::git::testing::{commit_file, fixture_repo};
    use crate::git::Git2Provider;
    use crate::network::StaticNetwork;

    const CLEAN_DIFF: &str = "\
Add punctuation

diff --git a/hello.txt b/hello.txt
index 1111111..2222222 100644
--- a/hello.txt
+++ b/hello.txt
@@ -1 +1 @@
-hello
+hello!
";

    const CONFLICT_DIFF: &str = "\
Change a line nobody has

diff --git a/src/x.ts b/src/x.ts
index 1111111..2222222 100644
--- a/src/x.ts
+++ b/src/x.ts
@@ -1 +1 @@
-not the real content
+something else
";

    fn patch_event(keys: &Keys, address: RepoAddress, commit: &str, parent: Option<&str>, diff: &str) -> Decoded<PatchEvent> {
        let event = PatchEvent {
            address,
            root_id: None,
            commit: commit.to_string(),
            parent_commit: parent.map(ToString::to_string),
            committer: None,
            recipients: Vec::new(),
            hashtags: Vec::new(),
            content: diff.to_string(),
        }
        .to_event_builder()
        .sign_with_keys(keys)
        .unwrap();
        PatchEvent::from_event(&event).unwrap()
    }

    async fn engine_with_clone() -> (tempfile::TempDir, PatchEngine, RepoAddress, String, Keys) {
        let keys = Keys::generate();
        let root = tempfile::TempDir::new().unwrap();
        let address = RepoAddress::new(keys.public_key(), "forge");

        // Plant the fixture clone where the engine expects it
        let (clone, head) = fixture_repo();
        let dir = root.path().join(address.fs_key());
        std::fs::create_dir_all(dir.parent().unwrap()).unwrap();
        std::fs::rename(clone.keep(), &dir).unwrap();

        let ctx = Context::new(
            Config::new(root.path()),
            Arc::new(Git2Provider::new()),
            Arc::new(StaticNetwork::default()),
            None,
        )
        .unwrap();
        (root, PatchEngine::new(ctx), address, head, keys)
    }

    #[tokio::test]
    async fn clean_patch_analyzes_clean() {
        let (_root, engine, address, head, keys) = engine_with_clone().await;
        // A commit oid the clone does not contain
        let missing = "9999999999999999999999999999999999999999";
        let patch = patch_event(&keys, address, missing, Some(&head), CLEAN_DIFF);

        let result = engine.analyze(&patch, Some("main")).await;
        assert_eq!(result.analysis, MergeAnalysis::Clean);
        assert!(result.can_merge);
        assert!(!result.has_conflicts);
        assert!(result.fast_forward);
        assert_eq!(result.target_commit.as_deref(), Some(head.as_str()));

        let (merge, conflict) = engine.analysis_events(&patch, "main", &result);
        assert!(merge.is_some());
        assert!(conflict.is_none());
        assert_eq!(merge.unwrap().root_id, patch.event_id);
    }

    #[tokio::test]
    async fn conflicting_patch_reports_files() {
        let (_root, engine, address, head, keys) = engine_with_clone().await;
        let missing = "9999999999999999999999999999999999999999";
        let patch = patch_event(&keys, address, missing, Some(&head), CONFLICT_DIFF);

        let result = engine.analyze(&patch, Some("main")).await;
        assert_eq!(result.analysis, MergeAnalysis::Conflicts);
        assert!(result.has_conflicts);
        assert_eq!(result.conflict_files, vec!["src/x.ts"]);

        let (merge, conflict) = engine.analysis_events(&patch, "main", &result);
        assert!(merge.is_none());
        let conflict = conflict.unwrap();
        assert_eq!(conflict.conflict_files, vec!["src/x.ts"]);
    }

    #[tokio::test]
    async fn contained_commit_is_up_to_date() {
        let (_root, engine, address, head, keys) = engine_with_clone().await;
        let patch = patch_event(&keys, address, &head, None, CLEAN_DIFF);

        let result = engine.analyze(&patch, Some("main")).await;
        assert_eq!(result.analysis, MergeAnalysis::UpToDate);
        assert!(result.up_to_date);
        assert!(!result.can_merge);
    }

    #[tokio::test]
    async fn memo_invalidates_when_target_moves() {
        let (root, engine, address, head, keys) = engine_with_clone().await;
        let missing = "9999999999999999999999999999999999999999";
        let patch = patch_event(&keys, address.clone(), missing, Some(&head), CLEAN_DIFF);

        let first = engine.analyze(&patch, Some("main")).await;
        assert_eq!(first.analysis, MergeAnalysis::Clean);

        // Move the target so the clean hunk no longer aligns
        let dir = root.path().join(address.fs_key());
        commit_file(&dir, "hello.txt", "rewritten\n", "Rewrite hello");

        let second = engine.analyze(&patch, Some("main")).await;
        assert_eq!(second.analysis, MergeAnalysis::Conflicts);
    }

    #[tokio::test]
    async fn missing_clone_reports_error_result() {
        let keys = Keys::generate();
        let root = tempfile::TempDir::new().unwrap();
        let address = RepoAddress::new(keys.public_key(), "forge");
        let ctx = Context::new(
            Config::new(root.path()),
            Arc::new(Git2Provider::new()),
            Arc::new(StaticNetwork::default()),
            None,
        )
        .unwrap();
        let engine = PatchEngine::new(ctx);
        let patch = patch_event(&keys, address, "9999999999999999999999999999999999999999", None, CLEAN_DIFF);

        let result = engine.analyze(&patch, Some("main")).await;
        assert_eq!(result.analysis, MergeAnalysis::Error);
        assert!(result.error_message.is_some());
    }
}

// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Default [`GitProvider`] backed by libgit2.
//!
//! libgit2 is synchronous; every operation runs on the blocking thread pool
//! with owned parameters, so the async surface stays cancel-safe.

use std::path::{Path, PathBuf};

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    BranchType, Cred, CredentialType, Direction, FetchOptions, ObjectType, Oid, PushOptions,
    RemoteCallbacks, Repository, Signature, StatusOptions,
};
use nostr::util::BoxedFuture;

use super::{
    BranchInfo, CommitInfo, FetchDepth, GitProvider, RemoteInfo, ServerRef, SignatureInfo,
    StatusSummary, TreeItem,
};
use crate::error::{ErrorCode, ForgeError};

// libgit2's "unshallow" depth marker
const DEPTH_UNSHALLOW: i32 = 2147483647;

/// libgit2-backed git provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct Git2Provider;

impl Git2Provider {
    /// New provider.
    pub fn new() -> Self {
        Self
    }
}

async fn blocking<T, F>(f: F) -> Result<T, ForgeError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ForgeError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ForgeError::wrap_as(ErrorCode::UnknownError, e, "blocking git task"))?
}

fn map_err(e: git2::Error, context: &str) -> ForgeError {
    ForgeError {
        code: ErrorCode::classify(e.message()),
        context: Some(context.to_string()),
        cause: Some(Box::new(e)),
    }
}

fn open(dir: &Path) -> Result<Repository, ForgeError> {
    Repository::open(dir).map_err(|e| map_err(e, "open repository"))
}

fn callbacks(token: Option<String>) -> RemoteCallbacks<'static> {
    let mut cbs = RemoteCallbacks::new();
    cbs.credentials(move |_url, username_from_url, allowed| {
        if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            if let Some(token) = &token {
                return Cred::userpass_plaintext(token, "");
            }
        }
        if allowed.contains(CredentialType::SSH_KEY) {
            return Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"));
        }
        Cred::default()
    });
    cbs
}

fn signature(info: &SignatureInfo) -> Result<Signature<'static>, ForgeError> {
    Signature::new(
        &info.name,
        &info.email,
        &git2::Time::new(info.timestamp, info.offset_minutes),
    )
    .map_err(|e| map_err(e, "build signature"))
}

fn parse_oid(oid: &str) -> Result<Oid, ForgeError> {
    Oid::from_str(oid).map_err(|e| map_err(e, "parse oid"))
}

fn resolve_commit_id(repo: &Repository, refname: &str) -> Option<Oid> {
    repo.revparse_single(refname)
        .ok()
        .and_then(|obj| obj.peel_to_commit().ok())
        .map(|c| c.id())
}

impl GitProvider for Git2Provider {
    fn clone_repo<'a>(
        &'a self,
        url: String,
        dir: PathBuf,
        depth: Option<u32>,
    ) -> BoxedFuture<'a, Result<(), ForgeError>> {
        Box::pin(blocking(move || {
            let mut fo = FetchOptions::new();
            fo.remote_callbacks(callbacks(None));
            if let Some(depth) = depth {
                fo.depth(depth as i32);
            }
            RepoBuilder::new()
                .fetch_options(fo)
                .clone(&url, &dir)
                .map_err(|e| map_err(e, "clone"))?;
            Ok(())
        }))
    }

    fn fetch<'a>(
        &'a self,
        dir: PathBuf,
        url: String,
        refspecs: Vec<String>,
        depth: FetchDepth,
    ) -> BoxedFuture<'a, Result<(), ForgeError>> {
        Box::pin(blocking(move || {
            let repo = open(&dir)?;
            let mut fo = FetchOptions::new();
            fo.remote_callbacks(callbacks(None));
            match depth {
                FetchDepth::Default => {}
                FetchDepth::Depth(d) => {
                    fo.depth(d as i32);
                }
                FetchDepth::Unshallow => {
                    fo.depth(DEPTH_UNSHALLOW);
                }
            }
            let mut remote = match repo.find_remote("origin") {
                Ok(remote) if remote.url() == Some(url.as_str()) => remote,
                _ => repo
                    .remote_anonymous(&url)
                    .map_err(|e| map_err(e, "anonymous remote"))?,
            };
            let specs: Vec<&str> = refspecs.iter().map(String::as_str).collect();
            remote
                .fetch(&specs, Some(&mut fo), None)
                .map_err(|e| map_err(e, "fetch"))?;
            Ok(())
        }))
    }

    fn push<'a>(
        &'a self,
        dir: PathBuf,
        url: String,
        refspecs: Vec<String>,
        token: Option<String>,
    ) -> BoxedFuture<'a, Result<(), ForgeError>> {
        Box::pin(blocking(move || {
            let repo = open(&dir)?;
            let mut po = PushOptions::new();
            po.remote_callbacks(callbacks(token));
            let mut remote = repo
                .remote_anonymous(&url)
                .map_err(|e| map_err(e, "anonymous remote"))?;
            let specs: Vec<&str> = refspecs.iter().map(String::as_str).collect();
            remote
                .push(&specs, Some(&mut po))
                .map_err(|e| map_err(e, "push"))?;
            Ok(())
        }))
    }

    fn commit<'a>(
        &'a self,
        dir: PathBuf,
        message: String,
        author: SignatureInfo,
    ) -> BoxedFuture<'a, Result<String, ForgeError>> {
        Box::pin(blocking(move || {
            let repo = open(&dir)?;
            let mut index = repo.index().map_err(|e| map_err(e, "index"))?;
            let tree_oid = index.write_tree().map_err(|e| map_err(e, "write tree"))?;
            index.write().map_err(|e| map_err(e, "write index"))?;
            let tree = repo
                .find_tree(tree_oid)
                .map_err(|e| map_err(e, "find tree"))?;
            let sig = signature(&author)?;
            let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
            let parents: Vec<&git2::Commit> = parent.iter().collect();
            let oid = repo
                .commit(Some("HEAD"), &sig, &sig, &message, &tree, &parents)
                .map_err(|e| map_err(e, "commit"))?;
            Ok(oid.to_string())
        }))
    }

    fn merge_base<'a>(
        &'a self,
        dir: PathBuf,
        a: String,
        b: String,
    ) -> BoxedFuture<'a, Result<Option<String>, ForgeError>> {
        Box::pin(blocking(move || {
            let repo = open(&dir)?;
            let a = parse_oid(&a)?;
            let b = parse_oid(&b)?;
            Ok(repo.merge_base(a, b).ok().map(|oid| oid.to_string()))
        }))
    }

    fn is_ancestor<'a>(
        &'a self,
        dir: PathBuf,
        ancestor: String,
        descendant: String,
    ) -> BoxedFuture<'a, Result<bool, ForgeError>> {
        Box::pin(blocking(move || {
            let repo = open(&dir)?;
            let ancestor = parse_oid(&ancestor)?;
            let descendant = parse_oid(&descendant)?;
            if ancestor == descendant {
                return Ok(true);
            }
            repo.graph_descendant_of(descendant, ancestor)
                .map_err(|e| map_err(e, "ancestry"))
        }))
    }

    fn read_blob<'a>(
        &'a self,
        dir: PathBuf,
        commitish: String,
        path: String,
    ) -> BoxedFuture<'a, Result<Option<Vec<u8>>, ForgeError>> {
        Box::pin(blocking(move || {
            let repo = open(&dir)?;
            let commit = repo
                .revparse_single(&commitish)
                .and_then(|obj| obj.peel_to_commit())
                .map_err(|e| map_err(e, "resolve commit"))?;
            let tree = commit.tree().map_err(|e| map_err(e, "commit tree"))?;
            match tree.get_path(Path::new(&path)) {
                Ok(entry) => {
                    let object = entry
                        .to_object(&repo)
                        .map_err(|e| map_err(e, "tree entry"))?;
                    let blob = object.peel_to_blob().map_err(|e| map_err(e, "peel blob"))?;
                    Ok(Some(blob.content().to_vec()))
                }
                Err(_) => Ok(None),
            }
        }))
    }

    fn read_tree<'a>(
        &'a self,
        dir: PathBuf,
        commitish: String,
    ) -> BoxedFuture<'a, Result<Vec<TreeItem>, ForgeError>> {
        Box::pin(blocking(move || {
            let repo = open(&dir)?;
            let commit = repo
                .revparse_single(&commitish)
                .and_then(|obj| obj.peel_to_commit())
                .map_err(|e| map_err(e, "resolve commit"))?;
            let tree = commit.tree().map_err(|e| map_err(e, "commit tree"))?;
            let mut items: Vec<TreeItem> = Vec::new();
            tree.walk(git2::TreeWalkMode::PreOrder, |root, entry| {
                if entry.kind() == Some(ObjectType::Blob) {
                    items.push(TreeItem {
                        path: format!("{root}{}", entry.name().unwrap_or_default()),
                        oid: entry.id().to_string(),
                    });
                }
                0
            })
            .map_err(|e| map_err(e, "walk tree"))?;
            Ok(items)
        }))
    }

    fn log<'a>(
        &'a self,
        dir: PathBuf,
        start: String,
        limit: usize,
    ) -> BoxedFuture<'a, Result<Vec<CommitInfo>, ForgeError>> {
        Box::pin(blocking(move || {
            let repo = open(&dir)?;
            let start = resolve_commit_id(&repo, &start).ok_or_else(|| {
                ForgeError::with_context(ErrorCode::RepoNotFound, format!("unknown ref {start}"))
            })?;
            let mut walk = repo.revwalk().map_err(|e| map_err(e, "revwalk"))?;
            walk.push(start).map_err(|e| map_err(e, "revwalk push"))?;
            walk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::TIME)
                .map_err(|e| map_err(e, "revwalk sort"))?;

            let mut commits: Vec<CommitInfo> = Vec::new();
            for oid in walk {
                if commits.len() >= limit {
                    break;
                }
                let oid = oid.map_err(|e| map_err(e, "revwalk next"))?;
                let commit = repo.find_commit(oid).map_err(|e| map_err(e, "find commit"))?;
                commits.push(CommitInfo {
                    oid: oid.to_string(),
                    message: commit.message().unwrap_or_default().to_string(),
                    author: signature_info(&commit.author()),
                    committer: signature_info(&commit.committer()),
                    parents: commit.parent_ids().map(|p| p.to_string()).collect(),
                });
            }
            Ok(commits)
        }))
    }

    fn status_matrix<'a>(
        &'a self,
        dir: PathBuf,
    ) -> BoxedFuture<'a, Result<StatusSummary, ForgeError>> {
        Box::pin(blocking(move || {
            let repo = open(&dir)?;
            let mut opts = StatusOptions::new();
            opts.include_untracked(true).recurse_untracked_dirs(true);
            let statuses = repo
                .statuses(Some(&mut opts))
                .map_err(|e| map_err(e, "statuses"))?;

            let mut summary = StatusSummary::default();
            for entry in statuses.iter() {
                let path = entry.path().unwrap_or_default().to_string();
                let st = entry.status();
                if st.intersects(
                    git2::Status::INDEX_NEW
                        | git2::Status::INDEX_MODIFIED
                        | git2::Status::INDEX_DELETED
                        | git2::Status::INDEX_RENAMED
                        | git2::Status::INDEX_TYPECHANGE,
                ) {
                    summary.staged.push(path.clone());
                }
                if st.intersects(
                    git2::Status::WT_MODIFIED
                        | git2::Status::WT_DELETED
                        | git2::Status::WT_RENAMED
                        | git2::Status::WT_TYPECHANGE,
                ) {
                    summary.unstaged.push(path.clone());
                }
                if st.contains(git2::Status::WT_NEW) {
                    summary.untracked.push(path);
                }
            }
            Ok(summary)
        }))
    }

    fn resolve_ref<'a>(
        &'a self,
        dir: PathBuf,
        refname: String,
    ) -> BoxedFuture<'a, Result<Option<String>, ForgeError>> {
        Box::pin(blocking(move || {
            let repo = open(&dir)?;
            Ok(resolve_commit_id(&repo, &refname).map(|oid| oid.to_string()))
        }))
    }

    fn head_symbolic<'a>(
        &'a self,
        dir: PathBuf,
    ) -> BoxedFuture<'a, Result<Option<String>, ForgeError>> {
        Box::pin(blocking(move || {
            let repo = open(&dir)?;
            let head = repo
                .find_reference("HEAD")
                .map_err(|e| map_err(e, "HEAD"))?;
            Ok(head.symbolic_target().map(ToString::to_string))
        }))
    }

    fn list_branches<'a>(
        &'a self,
        dir: PathBuf,
    ) -> BoxedFuture<'a, Result<Vec<BranchInfo>, ForgeError>> {
        Box::pin(blocking(move || {
            let repo = open(&dir)?;
            let branches = repo
                .branches(Some(BranchType::Local))
                .map_err(|e| map_err(e, "branches"))?;
            let mut out: Vec<BranchInfo> = Vec::new();
            for branch in branches {
                let (branch, _) = branch.map_err(|e| map_err(e, "branch"))?;
                let Some(name) = branch.name().ok().flatten().map(ToString::to_string) else {
                    continue;
                };
                let Some(commit) = branch.get().target() else {
                    continue;
                };
                out.push(BranchInfo {
                    name,
                    commit: commit.to_string(),
                });
            }
            Ok(out)
        }))
    }

    fn list_remotes<'a>(
        &'a self,
        dir: PathBuf,
    ) -> BoxedFuture<'a, Result<Vec<RemoteInfo>, ForgeError>> {
        Box::pin(blocking(move || {
            let repo = open(&dir)?;
            let names = repo.remotes().map_err(|e| map_err(e, "remotes"))?;
            let mut out: Vec<RemoteInfo> = Vec::new();
            for name in names.iter().flatten() {
                let remote = repo
                    .find_remote(name)
                    .map_err(|e| map_err(e, "find remote"))?;
                if let Some(url) = remote.url() {
                    out.push(RemoteInfo {
                        name: name.to_string(),
                        url: url.to_string(),
                    });
                }
            }
            Ok(out)
        }))
    }

    fn list_server_refs<'a>(
        &'a self,
        url: String,
        token: Option<String>,
    ) -> BoxedFuture<'a, Result<Vec<ServerRef>, ForgeError>> {
        Box::pin(blocking(move || {
            let mut remote = git2::Remote::create_detached(url.as_str())
                .map_err(|e| map_err(e, "detached remote"))?;
            let connection = remote
                .connect_auth(Direction::Fetch, Some(callbacks(token)), None)
                .map_err(|e| map_err(e, "connect"))?;
            let refs = connection
                .list()
                .map_err(|e| map_err(e, "list refs"))?
                .iter()
                .map(|head| ServerRef {
                    name: head.name().to_string(),
                    oid: head.oid().to_string(),
                })
                .collect();
            Ok(refs)
        }))
    }

    fn checkout<'a>(
        &'a self,
        dir: PathBuf,
        branch: String,
    ) -> BoxedFuture<'a, Result<(), ForgeError>> {
        Box::pin(blocking(move || {
            let repo = open(&dir)?;
            if repo.find_branch(&branch, BranchType::Local).is_err() {
                let remote_ref = format!("refs/remotes/origin/{branch}");
                let target = repo
                    .revparse_single(&remote_ref)
                    .and_then(|obj| obj.peel_to_commit())
                    .map_err(|e| map_err(e, "resolve remote branch"))?;
                repo.branch(&branch, &target, false)
                    .map_err(|e| map_err(e, "create branch"))?;
            }
            repo.set_head(&format!("refs/heads/{branch}"))
                .map_err(|e| map_err(e, "set head"))?;
            let mut cb = CheckoutBuilder::new();
            cb.force();
            repo.checkout_head(Some(&mut cb))
                .map_err(|e| map_err(e, "checkout"))?;
            Ok(())
        }))
    }

    fn stage_add<'a>(
        &'a self,
        dir: PathBuf,
        path: String,
    ) -> BoxedFuture<'a, Result<(), ForgeError>> {
        Box::pin(blocking(move || {
            let repo = open(&dir)?;
            let mut index = repo.index().map_err(|e| map_err(e, "index"))?;
            index
                .add_path(Path::new(&path))
                .map_err(|e| map_err(e, "stage add"))?;
            index.write().map_err(|e| map_err(e, "write index"))?;
            Ok(())
        }))
    }

    fn stage_remove<'a>(
        &'a self,
        dir: PathBuf,
        path: String,
    ) -> BoxedFuture<'a, Result<(), ForgeError>> {
        Box::pin(blocking(move || {
            let repo = open(&dir)?;
            let mut index = repo.index().map_err(|e| map_err(e, "index"))?;
            index
                .remove_path(Path::new(&path))
                .map_err(|e| map_err(e, "stage remove"))?;
            index.write().map_err(|e| map_err(e, "write index"))?;
            Ok(())
        }))
    }

    fn is_shallow<'a>(&'a self, dir: PathBuf) -> BoxedFuture<'a, Result<bool, ForgeError>> {
        Box::pin(blocking(move || {
            let repo = open(&dir)?;
            Ok(repo.is_shallow())
        }))
    }

    fn is_cloned<'a>(&'a self, dir: PathBuf) -> BoxedFuture<'a, Result<bool, ForgeError>> {
        Box::pin(blocking(move || Ok(Repository::open(&dir).is_ok())))
    }

    fn remove_clone<'a>(&'a self, dir: PathBuf) -> BoxedFuture<'a, Result<(), ForgeError>> {
        Box::pin(blocking(move || {
            let _ = std::fs::remove_dir_all(&dir);
            Ok(())
        }))
    }
}

fn signature_info(sig: &Signature<'_>) -> SignatureInfo {
    SignatureInfo {
        name: sig.name().unwrap_or_default().to_string(),
        email: sig.email().unwrap_or_default().to_string(),
        timestamp: sig.when().seconds(),
        offset_minutes: sig.when().offset_minutes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testing::fixture_repo;

    #[tokio::test]
    async fn commit_and_log_roundtrip() {
        let (tmp, _) = fixture_repo();
        let provider = Git2Provider::new();
        let dir = tmp.path().to_path_buf();

        std::fs::write(dir.join("second.txt"), "two\n").unwrap();
        provider
            .stage_add(dir.clone(), "second.txt".to_string())
            .await
            .unwrap();
        let oid = provider
            .commit(
                dir.clone(),
                "Add second file".to_string(),
                SignatureInfo {
                    name: "Alice".to_string(),
                    email: "alice@example.com".to_string(),
                    timestamp: 1_700_000_000,
                    offset_minutes: 0,
                },
            )
            .await
            .unwrap();

        let log = provider.log(dir.clone(), "HEAD".to_string(), 10).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].oid, oid);
        assert_eq!(log[0].message.trim(), "Add second file");
        assert_eq!(log[0].parents.len(), 1);

        let status = provider.status_matrix(dir.clone()).await.unwrap();
        assert!(status.is_clean());
    }

    #[tokio::test]
    async fn read_blob_and_tree() {
        let (tmp, _) = fixture_repo();
        let provider = Git2Provider::new();
        let dir = tmp.path().to_path_buf();

        let blob = provider
            .read_blob(dir.clone(), "HEAD".to_string(), "hello.txt".to_string())
            .await
            .unwrap();
        assert_eq!(blob.as_deref(), Some(&b"hello\n"[..]));

        let missing = provider
            .read_blob(dir.clone(), "HEAD".to_string(), "absent.txt".to_string())
            .await
            .unwrap();
        assert!(missing.is_none());

        let tree = provider
            .read_tree(dir.clone(), "HEAD".to_string())
            .await
            .unwrap();
        assert!(tree.iter().any(|item| item.path == "hello.txt"));
    }

    #[tokio::test]
    async fn resolve_and_branches() {
        let (tmp, head) = fixture_repo();
        let provider = Git2Provider::new();
        let dir = tmp.path().to_path_buf();

        let resolved = provider
            .resolve_ref(dir.clone(), "main".to_string())
            .await
            .unwrap();
        assert_eq!(resolved.as_deref(), Some(head.as_str()));

        let branches = provider.list_branches(dir.clone()).await.unwrap();
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].name, "main");

        let symbolic = provider.head_symbolic(dir.clone()).await.unwrap();
        assert_eq!(symbolic.as_deref(), Some("refs/heads/main"));

        assert!(!provider.is_shallow(dir.clone()).await.unwrap());
        assert!(provider.is_cloned(dir).await.unwrap());
    }
}

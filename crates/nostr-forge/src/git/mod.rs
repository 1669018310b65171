// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Git backend seam.
//!
//! The engine drives a [`GitProvider`]: an object-safe trait covering the
//! operations the higher layers need (clone, fetch, push, commit, blob and
//! tree reads, status, ref resolution, server-side ref listing). The default
//! implementation wraps libgit2; hosts may substitute their own.

use std::fmt;
use std::path::PathBuf;

use nostr::util::BoxedFuture;
use serde::{Deserialize, Serialize};

use crate::error::ForgeError;

mod libgit2;

pub use self::libgit2::Git2Provider;

#[cfg(test)]
pub(crate) mod testing {
    use std::path::Path;

    use git2::{Repository, RepositoryInitOptions, Signature, Time};
    use tempfile::TempDir;

    fn sig() -> Signature<'static> {
        Signature::new("Fixture", "fixture@example.com", &Time::new(1_699_000_000, 0)).unwrap()
    }

    /// Temp repository on branch `main` with one commit (`hello.txt`).
    pub(crate) fn fixture_repo() -> (TempDir, String) {
        let tmp = TempDir::new().unwrap();
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(tmp.path(), &opts).unwrap();
        std::fs::write(tmp.path().join("hello.txt"), "hello\n").unwrap();
        let oid = stage_and_commit(&repo, &["hello.txt"], "Initial commit");
        (tmp, oid)
    }

    /// Write `content` to `path`, stage it and commit.
    pub(crate) fn commit_file(dir: &Path, path: &str, content: &str, message: &str) -> String {
        if let Some(parent) = dir.join(path).parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(dir.join(path), content).unwrap();
        let repo = Repository::open(dir).unwrap();
        stage_and_commit(&repo, &[path], message)
    }

    fn stage_and_commit(repo: &Repository, paths: &[&str], message: &str) -> String {
        let mut index = repo.index().unwrap();
        for path in paths {
            index.add_path(Path::new(path)).unwrap();
        }
        index.write().unwrap();
        let tree_oid = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_oid).unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        let sig = sig();
        let oid = repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap();
        oid.to_string()
    }
}

/// A branch and the commit it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    /// Short branch name (no `refs/heads/` prefix)
    pub name: String,
    /// Commit object id
    pub commit: String,
}

/// A configured remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteInfo {
    /// Remote name (e.g. `origin`)
    pub name: String,
    /// Remote URL
    pub url: String,
}

/// A ref advertised by a server (`ls-remote`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRef {
    /// Full ref name (`HEAD`, `refs/heads/...`, `refs/tags/...`)
    pub name: String,
    /// Commit object id
    pub oid: String,
}

/// Commit author or committer identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureInfo {
    /// Name
    pub name: String,
    /// Email
    pub email: String,
    /// Unix timestamp (seconds)
    pub timestamp: i64,
    /// Timezone offset in minutes
    pub offset_minutes: i32,
}

/// One commit from the history log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Commit object id
    pub oid: String,
    /// Full commit message
    pub message: String,
    /// Author identity
    pub author: SignatureInfo,
    /// Committer identity
    pub committer: SignatureInfo,
    /// Parent commit object ids
    pub parents: Vec<String>,
}

/// One entry of a commit tree listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeItem {
    /// Path relative to the repository root
    pub path: String,
    /// Blob object id
    pub oid: String,
}

/// Working tree status, reduced to what push preflight and the patch
/// applier need.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSummary {
    /// Paths staged in the index
    pub staged: Vec<String>,
    /// Paths modified or deleted in the working tree
    pub unstaged: Vec<String>,
    /// Untracked paths
    pub untracked: Vec<String>,
}

impl StatusSummary {
    /// Whether head, index and working tree all agree.
    pub fn is_clean(&self) -> bool {
        self.staged.is_empty() && self.unstaged.is_empty() && self.untracked.is_empty()
    }
}

/// How deep a fetch should reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDepth {
    /// Whatever the repository already has
    Default,
    /// Shallow fetch of at most this many commits
    Depth(u32),
    /// Deepen a shallow clone to the full history
    Unshallow,
}

/// Object-safe async git backend.
pub trait GitProvider: fmt::Debug + Send + Sync {
    /// Clone `url` into `dir`, shallow when `depth` is given.
    fn clone_repo<'a>(
        &'a self,
        url: String,
        dir: PathBuf,
        depth: Option<u32>,
    ) -> BoxedFuture<'a, Result<(), ForgeError>>;

    /// Fetch `refspecs` from `url` into `dir`.
    fn fetch<'a>(
        &'a self,
        dir: PathBuf,
        url: String,
        refspecs: Vec<String>,
        depth: FetchDepth,
    ) -> BoxedFuture<'a, Result<(), ForgeError>>;

    /// Push `refspecs` to `url`, authenticating with `token` when given.
    fn push<'a>(
        &'a self,
        dir: PathBuf,
        url: String,
        refspecs: Vec<String>,
        token: Option<String>,
    ) -> BoxedFuture<'a, Result<(), ForgeError>>;

    /// Commit the index with `message`, returning the new commit id.
    fn commit<'a>(
        &'a self,
        dir: PathBuf,
        message: String,
        author: SignatureInfo,
    ) -> BoxedFuture<'a, Result<String, ForgeError>>;

    /// Merge base of two commits, when one exists.
    fn merge_base<'a>(
        &'a self,
        dir: PathBuf,
        a: String,
        b: String,
    ) -> BoxedFuture<'a, Result<Option<String>, ForgeError>>;

    /// Whether `ancestor` is an ancestor of (or equal to) `descendant`.
    fn is_ancestor<'a>(
        &'a self,
        dir: PathBuf,
        ancestor: String,
        descendant: String,
    ) -> BoxedFuture<'a, Result<bool, ForgeError>>;

    /// Blob content at `path` in the tree of `commitish`, when present.
    fn read_blob<'a>(
        &'a self,
        dir: PathBuf,
        commitish: String,
        path: String,
    ) -> BoxedFuture<'a, Result<Option<Vec<u8>>, ForgeError>>;

    /// Recursive tree listing of `commitish`.
    fn read_tree<'a>(
        &'a self,
        dir: PathBuf,
        commitish: String,
    ) -> BoxedFuture<'a, Result<Vec<TreeItem>, ForgeError>>;

    /// History of `start`, newest first, at most `limit` commits.
    fn log<'a>(
        &'a self,
        dir: PathBuf,
        start: String,
        limit: usize,
    ) -> BoxedFuture<'a, Result<Vec<CommitInfo>, ForgeError>>;

    /// Working tree status.
    fn status_matrix<'a>(&'a self, dir: PathBuf)
        -> BoxedFuture<'a, Result<StatusSummary, ForgeError>>;

    /// Resolve `refname` (branch, tag, remote-tracking ref or oid) to a
    /// commit id.
    fn resolve_ref<'a>(
        &'a self,
        dir: PathBuf,
        refname: String,
    ) -> BoxedFuture<'a, Result<Option<String>, ForgeError>>;

    /// Symbolic HEAD target (`refs/heads/<name>`), when HEAD is symbolic.
    fn head_symbolic<'a>(
        &'a self,
        dir: PathBuf,
    ) -> BoxedFuture<'a, Result<Option<String>, ForgeError>>;

    /// Local branches.
    fn list_branches<'a>(
        &'a self,
        dir: PathBuf,
    ) -> BoxedFuture<'a, Result<Vec<BranchInfo>, ForgeError>>;

    /// Configured remotes.
    fn list_remotes<'a>(
        &'a self,
        dir: PathBuf,
    ) -> BoxedFuture<'a, Result<Vec<RemoteInfo>, ForgeError>>;

    /// Refs advertised by the server at `url` (`ls-remote`).
    fn list_server_refs<'a>(
        &'a self,
        url: String,
        token: Option<String>,
    ) -> BoxedFuture<'a, Result<Vec<ServerRef>, ForgeError>>;

    /// Check out `branch`, creating it from `origin/<branch>` when only the
    /// remote-tracking ref exists.
    fn checkout<'a>(
        &'a self,
        dir: PathBuf,
        branch: String,
    ) -> BoxedFuture<'a, Result<(), ForgeError>>;

    /// Stage `path` (add or update).
    fn stage_add<'a>(
        &'a self,
        dir: PathBuf,
        path: String,
    ) -> BoxedFuture<'a, Result<(), ForgeError>>;

    /// Stage a removal of `path`.
    fn stage_remove<'a>(
        &'a self,
        dir: PathBuf,
        path: String,
    ) -> BoxedFuture<'a, Result<(), ForgeError>>;

    /// Whether the clone at `dir` is shallow.
    fn is_shallow<'a>(&'a self, dir: PathBuf) -> BoxedFuture<'a, Result<bool, ForgeError>>;

    /// Whether `dir` holds a git repository.
    fn is_cloned<'a>(&'a self, dir: PathBuf) -> BoxedFuture<'a, Result<bool, ForgeError>>;

    /// Remove a partially cloned directory. Best effort.
    fn remove_clone<'a>(&'a self, dir: PathBuf) -> BoxedFuture<'a, Result<(), ForgeError>>;
}

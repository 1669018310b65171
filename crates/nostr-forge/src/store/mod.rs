// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Local clone lifecycle and persistent metadata index.
//!
//! One directory per repository under the configured root, plus a cache
//! entry per repository used for freshness decisions and as the
//! merge-analysis memo keyset. `data_level` only ever deepens: a fetch never
//! downgrades `full` back to `shallow`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::address::RepoAddress;
use crate::context::{CancelToken, Context};
use crate::error::{ErrorCode, ForgeError};
use crate::git::{BranchInfo, CommitInfo, FetchDepth, ServerRef};
use crate::trace::SpanClass;
use crate::transport::ReadOptions;

pub mod cache;

pub use self::cache::{CacheStore, Store};

/// Commits fetched by a shallow clone.
pub const SHALLOW_DEPTH: u32 = 50;

/// How many commits a history window holds.
pub const COMMIT_WINDOW: usize = 100;

/// Local clone depth category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataLevel {
    /// Refs known, no objects
    Refs,
    /// History truncated at a depth
    Shallow,
    /// Complete history
    Full,
}

/// Per-repository cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoCacheEntry {
    /// Unix seconds of the last refresh
    pub last_updated: u64,
    /// Last commit synced from the preferred remote (not necessarily the
    /// local working-tree HEAD)
    pub head_commit: Option<String>,
    /// Clone depth category; monotonic
    pub data_level: DataLevel,
    /// Local branches and their commits
    pub branches: Vec<BranchInfo>,
    /// Tags, when collected
    pub tags: Option<Vec<BranchInfo>>,
    /// Clone URLs, in fallback order
    pub clone_urls: Vec<String>,
    /// Total commit count, when known
    pub commit_count: Option<u64>,
}

/// Owns local clones and the persistent index.
#[derive(Debug, Clone)]
pub struct RepoStore {
    ctx: Context,
}

impl RepoStore {
    /// Store over `ctx`.
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Clone the repository if it is not on disk yet.
    ///
    /// Walks `clone_urls` with transport fallback, cloning shallow. A no-op
    /// when the clone already exists. A cancelled or failed clone removes
    /// the partial directory, best effort.
    pub async fn initialize(
        &self,
        address: &RepoAddress,
        clone_urls: &[String],
        cancel: &CancelToken,
    ) -> Result<(), ForgeError> {
        let fs_key = address.fs_key();
        let _guard = self.ctx.lock_repo(&fs_key).await;
        let dir = self.ctx.repo_dir(&fs_key);

        if self.ctx.git.is_cloned(dir.clone()).await? {
            return Ok(());
        }

        let span = self
            .ctx
            .trace
            .span(SpanClass::Repo, "initialize")
            .cra(address.to_tag_value());

        let outcome = self
            .ctx
            .transport
            .read_with_fallback(
                clone_urls,
                Some(&address.to_tag_value()),
                ReadOptions {
                    timeout: self.ctx.config.url_timeout,
                    try_all: false,
                },
                cancel,
                |url| {
                    let git = self.ctx.git.clone();
                    let dir = dir.clone();
                    async move {
                        let result = git
                            .clone_repo(url, dir.clone(), Some(SHALLOW_DEPTH))
                            .await;
                        if result.is_err() {
                            let _ = git.remove_clone(dir).await;
                        }
                        result
                    }
                },
            )
            .await;

        match outcome.into_result() {
            Ok(()) => {
                span.ok();
                self.record_entry(address, clone_urls, DataLevel::Shallow).await
            }
            Err(e) => {
                span.err(e.to_string());
                let _ = self.ctx.git.remove_clone(dir).await;
                Err(e)
            }
        }
    }

    /// Initialize, then sync only when the cache says the clone is stale.
    ///
    /// Returns `true` when a fetch actually ran.
    pub async fn smart_initialize(
        &self,
        address: &RepoAddress,
        clone_urls: &[String],
        force: bool,
        cancel: &CancelToken,
    ) -> Result<bool, ForgeError> {
        let dir = self.ctx.repo_dir(&address.fs_key());
        if !self.ctx.git.is_cloned(dir).await? {
            self.initialize(address, clone_urls, cancel).await?;
            return Ok(true);
        }
        if !force && !self.needs_update(address, clone_urls).await? {
            return Ok(false);
        }
        self.sync(address, clone_urls, None, cancel).await?;
        Ok(true)
    }

    /// Make sure the clone holds at least a shallow history of `branch`.
    pub async fn ensure_shallow(
        &self,
        address: &RepoAddress,
        branch: Option<&str>,
    ) -> Result<(), ForgeError> {
        self.deepen(address, branch, FetchDepth::Depth(SHALLOW_DEPTH), DataLevel::Shallow)
            .await
    }

    /// Deepen the clone to the full history of `branch`. Idempotent.
    pub async fn ensure_full(
        &self,
        address: &RepoAddress,
        branch: Option<&str>,
    ) -> Result<(), ForgeError> {
        self.deepen(address, branch, FetchDepth::Unshallow, DataLevel::Full)
            .await
    }

    async fn deepen(
        &self,
        address: &RepoAddress,
        branch: Option<&str>,
        depth: FetchDepth,
        level: DataLevel,
    ) -> Result<(), ForgeError> {
        let _guard = self.ctx.lock_repo(&address.fs_key()).await;
        self.deepen_unlocked(address, branch, depth, level).await
    }

    /// [`RepoStore::deepen`] body for callers already holding the
    /// per-repository lock.
    pub(crate) async fn deepen_unlocked(
        &self,
        address: &RepoAddress,
        branch: Option<&str>,
        depth: FetchDepth,
        level: DataLevel,
    ) -> Result<(), ForgeError> {
        let fs_key = address.fs_key();
        let dir = self.ctx.repo_dir(&fs_key);

        if !self.ctx.git.is_cloned(dir.clone()).await? {
            return Err(ForgeError::with_context(
                ErrorCode::NotCloned,
                address.to_tag_value(),
            ));
        }

        let entry = self.cache_entry(address)?;
        if let Some(entry) = &entry {
            // Already deep enough
            if entry.data_level >= level && level == DataLevel::Full {
                if !self.ctx.git.is_shallow(dir.clone()).await? {
                    return Ok(());
                }
            }
        }

        let branch = self.resolve_branch(address, branch).await?;
        let urls = self.known_urls(address, entry.as_ref());
        if urls.is_empty() {
            return Err(ForgeError::with_context(
                ErrorCode::InvalidInput,
                "no clone URLs recorded",
            ));
        }

        let refspec = format!("+refs/heads/{branch}:refs/remotes/origin/{branch}");
        let cancel = CancelToken::new();
        let outcome = self
            .ctx
            .transport
            .read_with_fallback(
                &urls,
                Some(&address.to_tag_value()),
                ReadOptions {
                    timeout: self.ctx.config.url_timeout,
                    try_all: false,
                },
                &cancel,
                |url| {
                    let git = self.ctx.git.clone();
                    let dir = dir.clone();
                    let refspec = refspec.clone();
                    async move { git.fetch(dir, url, vec![refspec], depth).await }
                },
            )
            .await;
        outcome.into_result()?;

        self.record_entry(address, &urls, level).await
    }

    /// Fetch `branch` from the best remote and refresh the cache entry.
    pub async fn sync(
        &self,
        address: &RepoAddress,
        clone_urls: &[String],
        branch: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<(), ForgeError> {
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
            .span(SpanClass::Repo, "sync")
            .cra(address.to_tag_value());

        let branch = self.resolve_branch(address, branch).await?;
        let entry = self.cache_entry(address)?;
        let urls = if clone_urls.is_empty() {
            self.known_urls(address, entry.as_ref())
        } else {
            clone_urls.to_vec()
        };

        let refspec = format!("+refs/heads/{branch}:refs/remotes/origin/{branch}");
        let outcome = self
            .ctx
            .transport
            .read_with_fallback(
                &urls,
                Some(&address.to_tag_value()),
                ReadOptions {
                    timeout: self.ctx.config.url_timeout,
                    try_all: false,
                },
                cancel,
                |url| {
                    let git = self.ctx.git.clone();
                    let dir = dir.clone();
                    let refspec = refspec.clone();
                    async move {
                        git.fetch(dir, url, vec![refspec], FetchDepth::Default).await
                    }
                },
            )
            .await;

        match outcome.into_result() {
            Ok(()) => span.ok(),
            Err(e) => {
                span.err(e.to_string());
                return Err(e);
            }
        }

        let level = entry.map(|e| e.data_level).unwrap_or(DataLevel::Shallow);
        self.record_entry(address, &urls, level).await
    }

    /// Whether the local projection is stale relative to the remote.
    ///
    /// `true` iff the cache entry is missing while the remote has heads, the
    /// cache is older than the configured maximum age, or the cached head
    /// differs from the remote default-branch head. A missing cache with an
    /// empty remote yields `false` so an initial push can proceed.
    pub async fn needs_update(
        &self,
        address: &RepoAddress,
        clone_urls: &[String],
    ) -> Result<bool, ForgeError> {
        let entry = self.cache_entry(address)?;
        let urls = self.merge_urls(clone_urls, entry.as_ref());
        let url = urls.first().cloned();

        let heads = match url {
            Some(url) => self.ctx.git.list_server_refs(url, None).await?,
            None => Vec::new(),
        };

        Ok(needs_update_with(
            entry.as_ref(),
            &heads,
            cache::now_secs(),
            self.ctx.config.cache_max_age.as_secs(),
        ))
    }

    /// Robust branch resolution: requested, HEAD symbolic target, `main`,
    /// `master`, then the first local branch.
    pub async fn resolve_branch(
        &self,
        address: &RepoAddress,
        requested: Option<&str>,
    ) -> Result<String, ForgeError> {
        let dir = self.ctx.repo_dir(&address.fs_key());

        if let Some(requested) = requested {
            let requested = requested.trim();
            if !requested.is_empty() {
                let local = self
                    .ctx
                    .git
                    .resolve_ref(dir.clone(), format!("refs/heads/{requested}"))
                    .await?;
                let remote = self
                    .ctx
                    .git
                    .resolve_ref(dir.clone(), format!("refs/remotes/origin/{requested}"))
                    .await?;
                if local.is_some() || remote.is_some() {
                    return Ok(requested.to_string());
                }
            }
        }

        if let Some(head) = self.ctx.git.head_symbolic(dir.clone()).await? {
            if let Some(short) = head.strip_prefix("refs/heads/") {
                if self
                    .ctx
                    .git
                    .resolve_ref(dir.clone(), head.clone())
                    .await?
                    .is_some()
                {
                    return Ok(short.to_string());
                }
            }
        }

        for candidate in ["main", "master"] {
            if self
                .ctx
                .git
                .resolve_ref(dir.clone(), format!("refs/heads/{candidate}"))
                .await?
                .is_some()
            {
                return Ok(candidate.to_string());
            }
        }

        let branches = self.ctx.git.list_branches(dir).await?;
        branches
            .first()
            .map(|b| b.name.clone())
            .ok_or_else(|| ForgeError::with_context(ErrorCode::RepoNotFound, "no branches"))
    }

    /// Cached entry for `address`.
    pub fn cache_entry(&self, address: &RepoAddress) -> Result<Option<RepoCacheEntry>, ForgeError> {
        self.ctx.cache.get(Store::Repos, &address.fs_key())
    }

    /// Store a cache entry verbatim, preserving data-level monotonicity.
    pub fn set_cache_entry(
        &self,
        address: &RepoAddress,
        mut entry: RepoCacheEntry,
    ) -> Result<(), ForgeError> {
        if let Some(existing) = self.cache_entry(address)? {
            if existing.data_level > entry.data_level {
                entry.data_level = existing.data_level;
            }
        }
        self.ctx.cache.put(Store::Repos, &address.fs_key(), &entry)
    }

    /// Drop the cache entry for `address`.
    pub fn delete_cache_entry(&self, address: &RepoAddress) -> Result<(), ForgeError> {
        self.ctx.cache.delete(Store::Repos, &address.fs_key())
    }

    /// Cached commit-history window for `(address, branch)`.
    pub fn commit_window(
        &self,
        address: &RepoAddress,
        branch: &str,
    ) -> Result<Option<Vec<CommitInfo>>, ForgeError> {
        self.ctx
            .cache
            .get(Store::Commits, &window_key(address, branch))
    }

    /// Refresh the commit-history window from the local clone.
    pub async fn update_commit_window(
        &self,
        address: &RepoAddress,
        branch: &str,
    ) -> Result<Vec<CommitInfo>, ForgeError> {
        let dir = self.ctx.repo_dir(&address.fs_key());
        let commits = self
            .ctx
            .git
            .log(dir, format!("refs/heads/{branch}"), COMMIT_WINDOW)
            .await?;
        self.ctx
            .cache
            .put(Store::Commits, &window_key(address, branch), &commits)?;
        Ok(commits)
    }

    /// Refresh the repository cache entry from the local clone.
    async fn record_entry(
        &self,
        address: &RepoAddress,
        clone_urls: &[String],
        level: DataLevel,
    ) -> Result<(), ForgeError> {
        let dir = self.ctx.repo_dir(&address.fs_key());
        let branches = self.ctx.git.list_branches(dir.clone()).await?;

        let head_commit = match self.ctx.git.head_symbolic(dir.clone()).await? {
            Some(head) => {
                let tracking = head
                    .strip_prefix("refs/heads/")
                    .map(|short| format!("refs/remotes/origin/{short}"));
                match tracking {
                    Some(tracking) => match self.ctx.git.resolve_ref(dir.clone(), tracking).await? {
                        Some(oid) => Some(oid),
                        None => self.ctx.git.resolve_ref(dir.clone(), head).await?,
                    },
                    None => None,
                }
            }
            None => None,
        };

        let entry = RepoCacheEntry {
            last_updated: cache::now_secs(),
            head_commit,
            data_level: level,
            branches,
            tags: None,
            clone_urls: clone_urls.to_vec(),
            commit_count: None,
        };
        self.set_cache_entry(address, entry)
    }

    fn known_urls(&self, _address: &RepoAddress, entry: Option<&RepoCacheEntry>) -> Vec<String> {
        entry.map(|e| e.clone_urls.clone()).unwrap_or_default()
    }

    fn merge_urls(&self, given: &[String], entry: Option<&RepoCacheEntry>) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut urls: Vec<String> = Vec::new();
        for url in given
            .iter()
            .chain(entry.iter().flat_map(|e| e.clone_urls.iter()))
        {
            if seen.insert(url.as_str()) {
                urls.push(url.clone());
            }
        }
        urls
    }
}

/// Pure freshness decision behind [`RepoStore::needs_update`].
pub fn needs_update_with(
    cache: Option<&RepoCacheEntry>,
    remote_heads: &[ServerRef],
    now_secs: u64,
    max_age_secs: u64,
) -> bool {
    let remote_head = default_branch_head(remote_heads);

    let Some(cache) = cache else {
        // No local projection: update only when the remote already has
        // history; an empty remote permits the initial push.
        return remote_head.is_some();
    };

    if now_secs.saturating_sub(cache.last_updated) > max_age_secs {
        return true;
    }

    match (cache.head_commit.as_deref(), remote_head) {
        (Some(cached), Some(remote)) => cached != remote,
        (None, Some(_)) => true,
        _ => false,
    }
}

fn default_branch_head(heads: &[ServerRef]) -> Option<&str> {
    for candidate in ["refs/heads/main", "refs/heads/master"] {
        if let Some(head) = heads.iter().find(|h| h.name == candidate) {
            return Some(&head.oid);
        }
    }
    heads
        .iter()
        .find(|h| h.name == "HEAD")
        .map(|h| h.oid.as_str())
}

fn window_key(address: &RepoAddress, branch: &str) -> String {
    format!("{}#{branch}", address.fs_key())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(last_updated: u64, head: Option<&str>) -> RepoCacheEntry {
        RepoCacheEntry {
            last_updated,
            head_commit: head.map(ToString::to_string),
            data_level: DataLevel::Shallow,
            branches: Vec::new(),
            tags: None,
            clone_urls: Vec::new(),
            commit_count: None,
        }
    }

    fn head(oid: &str) -> ServerRef {
        ServerRef {
            name: "refs/heads/main".to_string(),
            oid: oid.to_string(),
        }
    }

    #[test]
    fn no_cache_empty_remote_allows_initial_push() {
        assert!(!needs_update_with(None, &[], 1000, 3600));
    }

    #[test]
    fn no_cache_with_remote_heads_needs_update() {
        assert!(needs_update_with(None, &[head("aa")], 1000, 3600));
    }

    #[test]
    fn stale_cache_needs_update() {
        let cached = entry(0, Some("aa"));
        assert!(needs_update_with(Some(&cached), &[head("aa")], 10_000, 3600));
    }

    #[test]
    fn fresh_cache_with_matching_head_is_current() {
        let cached = entry(9_000, Some("aa"));
        assert!(!needs_update_with(Some(&cached), &[head("aa")], 10_000, 3600));
    }

    #[test]
    fn diverged_head_needs_update() {
        let cached = entry(9_000, Some("aa"));
        assert!(needs_update_with(Some(&cached), &[head("bb")], 10_000, 3600));
    }

    #[test]
    fn data_level_ordering_is_monotonic() {
        assert!(DataLevel::Full > DataLevel::Shallow);
        assert!(DataLevel::Shallow > DataLevel::Refs);
    }
}

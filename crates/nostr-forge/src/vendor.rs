// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Vendor REST seam.
//!
//! Centralized forges (GitHub, GitLab, Gitea, Bitbucket, ...) appear to the
//! engine only behind the uniform [`VendorApi`] contract; concrete REST
//! adapters live with the host. A [`VendorRegistry`] resolves hostnames to
//! adapters, with overrides for self-hosted installs.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use nostr::util::BoxedFuture;

use crate::error::ForgeError;
use crate::git::BranchInfo;

/// Repository metadata as reported by a vendor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VendorRepo {
    /// Repository name
    pub name: String,
    /// Owning user or organization
    pub owner: String,
    /// Description
    pub description: Option<String>,
    /// Default branch
    pub default_branch: Option<String>,
    /// HTTP clone URL
    pub clone_url: Option<String>,
    /// Web URL
    pub web_url: Option<String>,
    /// Whether the repository is private
    pub private: bool,
}

/// Fields for creating a repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewVendorRepo {
    /// Repository name
    pub name: String,
    /// Description
    pub description: Option<String>,
    /// Whether the repository should be private
    pub private: bool,
}

/// Mutable repository fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VendorRepoUpdate {
    /// New description
    pub description: Option<String>,
    /// New default branch
    pub default_branch: Option<String>,
}

/// An issue as reported by a vendor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VendorIssue {
    /// Issue number
    pub number: u64,
    /// Title
    pub title: String,
    /// Body
    pub body: Option<String>,
    /// Open/closed state, vendor vocabulary
    pub state: String,
}

/// A pull request as reported by a vendor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VendorPullRequest {
    /// Pull request number
    pub number: u64,
    /// Title
    pub title: String,
    /// Open/closed/merged state, vendor vocabulary
    pub state: String,
    /// Source branch
    pub source_branch: Option<String>,
    /// Target branch
    pub target_branch: Option<String>,
}

/// The authenticated vendor user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VendorUser {
    /// Login name
    pub login: String,
    /// Display name
    pub name: Option<String>,
}

/// Uniform vendor REST contract.
pub trait VendorApi: fmt::Debug + Send + Sync {
    /// Fetch repository metadata.
    fn get_repo<'a>(
        &'a self,
        owner: &'a str,
        name: &'a str,
    ) -> BoxedFuture<'a, Result<VendorRepo, ForgeError>>;

    /// Create a repository for the authenticated user.
    fn create_repo<'a>(
        &'a self,
        repo: NewVendorRepo,
    ) -> BoxedFuture<'a, Result<VendorRepo, ForgeError>>;

    /// Update repository metadata.
    fn update_repo<'a>(
        &'a self,
        owner: &'a str,
        name: &'a str,
        update: VendorRepoUpdate,
    ) -> BoxedFuture<'a, Result<VendorRepo, ForgeError>>;

    /// Fork a repository into the authenticated user's namespace.
    fn fork_repo<'a>(
        &'a self,
        owner: &'a str,
        name: &'a str,
    ) -> BoxedFuture<'a, Result<VendorRepo, ForgeError>>;

    /// List issues.
    fn list_issues<'a>(
        &'a self,
        owner: &'a str,
        name: &'a str,
    ) -> BoxedFuture<'a, Result<Vec<VendorIssue>, ForgeError>>;

    /// Open an issue.
    fn create_issue<'a>(
        &'a self,
        owner: &'a str,
        name: &'a str,
        title: &'a str,
        body: Option<&'a str>,
    ) -> BoxedFuture<'a, Result<VendorIssue, ForgeError>>;

    /// List pull requests.
    fn list_pull_requests<'a>(
        &'a self,
        owner: &'a str,
        name: &'a str,
    ) -> BoxedFuture<'a, Result<Vec<VendorPullRequest>, ForgeError>>;

    /// List branches.
    fn list_branches<'a>(
        &'a self,
        owner: &'a str,
        name: &'a str,
    ) -> BoxedFuture<'a, Result<Vec<BranchInfo>, ForgeError>>;

    /// List tags.
    fn list_tags<'a>(
        &'a self,
        owner: &'a str,
        name: &'a str,
    ) -> BoxedFuture<'a, Result<Vec<BranchInfo>, ForgeError>>;

    /// Fetch a file's content at a ref.
    fn get_file_content<'a>(
        &'a self,
        owner: &'a str,
        name: &'a str,
        path: &'a str,
        reference: Option<&'a str>,
    ) -> BoxedFuture<'a, Result<Option<Vec<u8>>, ForgeError>>;

    /// The authenticated user.
    fn get_current_user<'a>(&'a self) -> BoxedFuture<'a, Result<VendorUser, ForgeError>>;
}

/// Resolves hostnames to vendor adapters.
#[derive(Debug, Default)]
pub struct VendorRegistry {
    adapters: RwLock<HashMap<String, Arc<dyn VendorApi>>>,
}

impl VendorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter for `hostname`. Later registrations override
    /// earlier ones, which is how self-hosted installs replace the default
    /// adapter for their domain.
    pub fn register<S>(&self, hostname: S, api: Arc<dyn VendorApi>)
    where
        S: Into<String>,
    {
        self.adapters
            .write()
            .expect("poisoned")
            .insert(hostname.into().to_lowercase(), api);
    }

    /// Resolve the adapter for `hostname`.
    pub fn resolve(&self, hostname: &str) -> Option<Arc<dyn VendorApi>> {
        self.adapters
            .read()
            .expect("poisoned")
            .get(&hostname.to_lowercase())
            .cloned()
    }

    /// Registered hostnames.
    pub fn hostnames(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self
            .adapters
            .read()
            .expect("poisoned")
            .keys()
            .cloned()
            .collect();
        hosts.sort_unstable();
        hosts
    }
}

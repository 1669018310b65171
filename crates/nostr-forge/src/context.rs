// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Engine context.
//!
//! Everything the engine needs is threaded through an explicit [`Context`]
//! (git provider, network client, publisher, cache, trace bus, config); there
//! are no module-global singletons, so test doubles plug in trivially.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::ForgeError;
use crate::events;
use crate::git::GitProvider;
use crate::network::{EventPublisher, NetworkClient};
use crate::store::cache::CacheStore;
use crate::trace::TraceBus;
use crate::transport::{TransportCoordinator, DEFAULT_URL_TIMEOUT};
use crate::vendor::VendorRegistry;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for local clones (one subdirectory per repository)
    pub root_dir: PathBuf,
    /// Per-URL timeout for transport fallback
    pub url_timeout: Duration,
    /// Hunk alignment search window (lines) for patch application
    pub context_window: u32,
    /// Cache entries older than this need a refresh
    pub cache_max_age: Duration,
    /// Cache rows older than this many days are dropped by stale cleanup
    pub stale_after_days: u64,
    /// Run strict per-kind validators on every decode
    pub validate_events: bool,
    /// Plan additional filters for patch-stack discovery
    pub stacking_filters: bool,
    /// Push fallback to a topic branch on relay-backed remotes
    pub relay_fallback: bool,
    /// Auth tokens by hostname
    pub host_tokens: HashMap<String, String>,
}

impl Config {
    /// Configuration rooted at `root_dir`, everything else at defaults.
    pub fn new<P>(root_dir: P) -> Self
    where
        P: Into<PathBuf>,
    {
        Self {
            root_dir: root_dir.into(),
            url_timeout: DEFAULT_URL_TIMEOUT,
            context_window: 5,
            cache_max_age: Duration::from_secs(60 * 60),
            stale_after_days: 30,
            validate_events: false,
            stacking_filters: false,
            relay_fallback: true,
            host_tokens: HashMap::new(),
        }
    }

    /// Like [`Config::new`], with `VALIDATE_EVENTS` and
    /// `ENABLE_STACKING_FILTERS` read from the environment.
    pub fn from_env<P>(root_dir: P) -> Self
    where
        P: Into<PathBuf>,
    {
        let mut config = Self::new(root_dir);
        config.validate_events = env_flag("VALIDATE_EVENTS");
        config.stacking_filters = env_flag("ENABLE_STACKING_FILTERS");
        config
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| {
            let v = v.trim().to_lowercase();
            v == "1" || v == "true" || v == "yes"
        })
        .unwrap_or(false)
}

/// Cooperative cancellation signal.
///
/// Cloned freely; every clone observes the same flag. Suspension points
/// check it and wind down instead of starting new work.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token that is never cancelled unless [`CancelToken::cancel`] is
    /// called on a clone.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to every clone.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Serializes mutating operations per repository.
#[derive(Debug, Default)]
pub(crate) struct RepoLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RepoLocks {
    /// Acquire the lock for `key`, creating it on first use.
    pub(crate) async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Shared engine state, constructed once at the top and threaded through.
#[derive(Debug, Clone)]
pub struct Context {
    /// Configuration
    pub config: Arc<Config>,
    /// Git backend
    pub git: Arc<dyn GitProvider>,
    /// Event network read access
    pub network: Arc<dyn NetworkClient>,
    /// Event network write access, when the host supplied a signer
    pub publisher: Option<Arc<dyn EventPublisher>>,
    /// Transport coordinator with its preference cache
    pub transport: Arc<TransportCoordinator>,
    /// Persistent metadata cache
    pub cache: Arc<CacheStore>,
    /// Trace bus
    pub trace: TraceBus,
    /// Vendor API registry
    pub vendors: Arc<VendorRegistry>,
    locks: Arc<RepoLocks>,
}

impl Context {
    /// Build a context. Opens (or creates) the cache store under the
    /// configured root directory and applies the validation flag.
    pub fn new(
        config: Config,
        git: Arc<dyn GitProvider>,
        network: Arc<dyn NetworkClient>,
        publisher: Option<Arc<dyn EventPublisher>>,
    ) -> Result<Self, ForgeError> {
        events::set_validation(config.validate_events);
        let cache = CacheStore::open(config.root_dir.join("cache.sqlite"))?;
        let stale = cache.cleanup_stale(config.stale_after_days)?;
        if stale > 0 {
            tracing::debug!(rows = stale, "dropped stale cache rows");
        }
        Ok(Self {
            config: Arc::new(config),
            git,
            network,
            publisher,
            transport: Arc::new(TransportCoordinator::new()),
            cache: Arc::new(cache),
            trace: TraceBus::disabled(),
            vendors: Arc::new(VendorRegistry::default()),
            locks: Arc::new(RepoLocks::default()),
        })
    }

    /// Replace the trace bus.
    pub fn with_trace(mut self, trace: TraceBus) -> Self {
        self.trace = trace;
        self
    }

    /// Acquire the per-repository mutation lock.
    pub(crate) async fn lock_repo(&self, fs_key: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(fs_key).await
    }

    /// Subscription planner honoring the configured feature flags.
    pub fn planner(&self) -> crate::subscription::SubscriptionPlanner {
        crate::subscription::SubscriptionPlanner::with_stacking(self.config.stacking_filters)
    }

    /// Local directory for a repository filesystem key.
    pub fn repo_dir(&self, fs_key: &str) -> PathBuf {
        self.config.root_dir.join(fs_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_propagates_to_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn repo_locks_serialize_same_key() {
        let locks = RepoLocks::default();
        let guard = locks.lock("npub1a/forge").await;
        // A different key locks independently
        let _other = locks.lock("npub1b/forge").await;
        drop(guard);
        let _again = locks.lock("npub1a/forge").await;
    }
}

// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Multi-remote transport coordination.
//!
//! Two primitives over a URL list: read-with-fallback (first working URL
//! wins, preference-cached) and write-to-all (fan out, report partial
//! success). Both classify failures so retriable errors keep the fallback
//! walking while auth-class errors stop it.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::context::CancelToken;
use crate::error::{ErrorCategory, ErrorCode, ForgeError};

/// Default per-URL timeout.
pub const DEFAULT_URL_TIMEOUT: Duration = Duration::from_secs(15);

/// How long a cached URL preference stays fresh.
pub const PREFERENCE_TTL: Duration = Duration::from_secs(60 * 60);

/// One attempted URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// The URL tried
    pub url: String,
    /// Whether the operation succeeded
    pub ok: bool,
    /// Classified error code on failure
    pub error_code: Option<ErrorCode>,
    /// Wall-clock duration of the attempt
    pub duration: Duration,
}

/// Outcome of a read-with-fallback walk.
#[derive(Debug)]
pub struct ReadOutcome<T> {
    /// Whether any URL succeeded
    pub success: bool,
    /// The first successful result
    pub result: Option<T>,
    /// URL that produced the result
    pub used_url: Option<String>,
    /// Every attempt, in execution order
    pub attempts: Vec<Attempt>,
    /// Index of the successful attempt within `attempts`
    pub success_index: Option<usize>,
    /// Terminal error when nothing succeeded
    pub error: Option<ForgeError>,
}

impl<T> ReadOutcome<T> {
    /// Convert into a `Result`, surfacing the terminal error.
    pub fn into_result(self) -> Result<T, ForgeError> {
        match self.result {
            Some(value) => Ok(value),
            None => Err(self.error.unwrap_or_else(|| {
                ForgeError::with_context(ErrorCode::NetworkError, "no usable URL")
            })),
        }
    }
}

/// Outcome of a write fan-out.
#[derive(Debug)]
pub struct WriteOutcome<T> {
    /// Whether every URL succeeded
    pub success: bool,
    /// Whether at least one URL succeeded
    pub partial_success: bool,
    /// Number of successful URLs
    pub success_count: usize,
    /// Number of failed URLs
    pub failure_count: usize,
    /// Per-URL results, in input order
    pub results: Vec<(String, Result<T, ForgeError>)>,
    /// Human-readable summary
    pub summary: String,
}

/// Read options.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Per-URL timeout; the last URL is always given unlimited time
    pub timeout: Duration,
    /// Run the operation against every URL even after a success
    pub try_all: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_URL_TIMEOUT,
            try_all: false,
        }
    }
}

/// Write options.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Run URLs one at a time, stopping early on an auth-class failure
    pub sequential: bool,
}

#[derive(Debug, Clone)]
struct RemotePreference {
    preferred_url: String,
    last_success_at: Instant,
    failed_urls: HashSet<String>,
}

/// Read-with-fallback and write-to-all over URL lists.
#[derive(Debug, Default)]
pub struct TransportCoordinator {
    preferences: Mutex<HashMap<String, RemotePreference>>,
}

impl TransportCoordinator {
    /// New coordinator with an empty preference cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached preferred URL for `key`, when still fresh.
    pub fn preferred_url(&self, key: &str) -> Option<String> {
        let preferences = self.preferences.lock().expect("poisoned");
        let pref = preferences.get(key)?;
        (pref.last_success_at.elapsed() < PREFERENCE_TTL).then(|| pref.preferred_url.clone())
    }

    /// Forget the cached preference for `key`.
    pub fn forget_preference(&self, key: &str) {
        self.preferences.lock().expect("poisoned").remove(key);
    }

    fn record_success(&self, key: &str, url: &str, failed: &[String]) {
        let mut preferences = self.preferences.lock().expect("poisoned");
        preferences.insert(
            key.to_string(),
            RemotePreference {
                preferred_url: url.to_string(),
                last_success_at: Instant::now(),
                failed_urls: failed.iter().cloned().collect(),
            },
        );
    }

    /// Reorder `urls` for a fallback walk: cached-preferred first, then
    /// never-failed, previously-failed last. Pseudo-URLs that cannot host
    /// git objects are dropped.
    fn reorder(&self, urls: &[String], key: Option<&str>) -> Vec<String> {
        let (preferred, failed) = match key {
            Some(key) => {
                let preferences = self.preferences.lock().expect("poisoned");
                match preferences.get(key) {
                    Some(pref) if pref.last_success_at.elapsed() < PREFERENCE_TTL => (
                        Some(pref.preferred_url.clone()),
                        pref.failed_urls.clone(),
                    ),
                    _ => (None, HashSet::new()),
                }
            }
            None => (None, HashSet::new()),
        };

        let mut ordered: Vec<String> = Vec::with_capacity(urls.len());
        let mut tail: Vec<String> = Vec::new();
        for url in urls {
            if !can_host_git(url) || ordered.contains(url) || tail.contains(url) {
                continue;
            }
            if Some(url) == preferred.as_ref() {
                ordered.insert(0, url.clone());
            } else if failed.contains(url) {
                tail.push(url.clone());
            } else {
                ordered.push(url.clone());
            }
        }
        ordered.extend(tail);
        ordered
    }

    /// Try `operation` against each URL until one succeeds.
    ///
    /// Every URL except the last races against `opts.timeout`; the last URL
    /// is given unlimited time as a fair last chance. Non-retriable failures
    /// (auth, permission) stop the walk. On success the URL is recorded as
    /// preferred under `cache_key`.
    pub async fn read_with_fallback<T, F, Fut>(
        &self,
        urls: &[String],
        cache_key: Option<&str>,
        opts: ReadOptions,
        cancel: &CancelToken,
        operation: F,
    ) -> ReadOutcome<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, ForgeError>>,
    {
        let ordered = self.reorder(urls, cache_key);
        let mut attempts: Vec<Attempt> = Vec::with_capacity(ordered.len());
        let mut failed: Vec<String> = Vec::new();
        let mut result: Option<T> = None;
        let mut used_url: Option<String> = None;
        let mut success_index: Option<usize> = None;
        let mut terminal: Option<ForgeError> = None;

        for (index, url) in ordered.iter().enumerate() {
            if result.is_some() && !opts.try_all {
                break;
            }
            if cancel.is_cancelled() {
                terminal = Some(ForgeError::with_context(
                    ErrorCode::OperationAborted,
                    "read fallback cancelled",
                ));
                break;
            }

            let started = Instant::now();
            let is_last = index + 1 == ordered.len();
            let attempt = if is_last {
                operation(url.clone()).await
            } else {
                match tokio::time::timeout(opts.timeout, operation(url.clone())).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ForgeError::with_context(
                        ErrorCode::Timeout,
                        format!("timed out after {:?}", opts.timeout),
                    )),
                }
            };
            let duration = started.elapsed();

            match attempt {
                Ok(value) => {
                    attempts.push(Attempt {
                        url: url.clone(),
                        ok: true,
                        error_code: None,
                        duration,
                    });
                    if result.is_none() {
                        success_index = Some(attempts.len() - 1);
                        used_url = Some(url.clone());
                        result = Some(value);
                        if let Some(key) = cache_key {
                            self.record_success(key, url, &failed);
                        }
                    }
                }
                Err(e) => {
                    let code = e.code;
                    attempts.push(Attempt {
                        url: url.clone(),
                        ok: false,
                        error_code: Some(code),
                        duration,
                    });
                    tracing::debug!(url = %url, code = %code, "fallback attempt failed");
                    if e.category() != ErrorCategory::Retriable {
                        terminal = Some(e);
                        break;
                    }
                    failed.push(url.clone());
                    if terminal.is_none() {
                        terminal = Some(e);
                    }
                }
            }
        }

        if terminal.is_none() && result.is_none() {
            terminal = Some(ForgeError::with_context(
                ErrorCode::NetworkError,
                "no usable URL",
            ));
        }

        ReadOutcome {
            success: result.is_some(),
            used_url,
            success_index,
            error: result.is_none().then(|| terminal).flatten(),
            result,
            attempts,
        }
    }

    /// Run `operation` against every URL, reporting partial success.
    ///
    /// Parallel by default: transient failures never short-circuit the rest.
    /// In sequential mode the walk stops early on an auth-class failure.
    pub async fn write_to_all<T, F, Fut>(
        &self,
        urls: &[String],
        opts: WriteOptions,
        operation: F,
    ) -> WriteOutcome<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, ForgeError>>,
    {
        let valid: Vec<String> = {
            let mut valid: Vec<String> = Vec::with_capacity(urls.len());
            for url in urls {
                if can_host_git(url) && !valid.contains(url) {
                    valid.push(url.clone());
                }
            }
            valid
        };

        let mut results: Vec<(String, Result<T, ForgeError>)> = Vec::with_capacity(valid.len());

        if opts.sequential {
            let mut stopped = false;
            for url in &valid {
                if stopped {
                    results.push((
                        url.clone(),
                        Err(ForgeError::with_context(
                            ErrorCode::OperationAborted,
                            "skipped after auth failure",
                        )),
                    ));
                    continue;
                }
                let outcome = operation(url.clone()).await;
                if let Err(e) = &outcome {
                    if is_auth_class(e.code) {
                        stopped = true;
                    }
                }
                results.push((url.clone(), outcome));
            }
        } else {
            let outcomes =
                futures::future::join_all(valid.iter().map(|url| operation(url.clone()))).await;
            results = valid.into_iter().zip(outcomes).collect();
        }

        let success_count = results.iter().filter(|(_, r)| r.is_ok()).count();
        let failure_count = results.len() - success_count;
        let summary = format!(
            "wrote to {success_count} of {} remotes",
            results.len()
        );

        WriteOutcome {
            success: failure_count == 0 && !results.is_empty(),
            partial_success: success_count > 0,
            success_count,
            failure_count,
            results,
            summary,
        }
    }
}

fn is_auth_class(code: ErrorCode) -> bool {
    matches!(
        code,
        ErrorCode::AuthRequired
            | ErrorCode::AuthExpired
            | ErrorCode::AuthInvalid
            | ErrorCode::PermissionDenied
    )
}

/// Whether `url` can host git objects. Relay-scheme pseudo-URLs cannot.
pub fn can_host_git(url: &str) -> bool {
    let lower = url.trim().to_lowercase();
    !(lower.starts_with("nostr://")
        || lower.starts_with("ws://")
        || lower.starts_with("wss://")
        || lower.is_empty())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn fallback_short_circuits_on_first_success() {
        let coordinator = TransportCoordinator::new();
        let cancel = CancelToken::default();
        let outcome = coordinator
            .read_with_fallback(
                &urls(&["https://a.example", "https://b.example"]),
                None,
                ReadOptions::default(),
                &cancel,
                |url| async move { Ok::<_, ForgeError>(url) },
            )
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.used_url.as_deref(), Some("https://a.example"));
        assert_eq!(outcome.success_index, Some(0));
        assert_eq!(outcome.attempts.len(), 1);
    }

    #[tokio::test]
    async fn fallback_walks_past_retriable_failures() {
        let coordinator = TransportCoordinator::new();
        let cancel = CancelToken::default();
        let outcome = coordinator
            .read_with_fallback(
                &urls(&["https://a.example", "https://b.example"]),
                Some("repo"),
                ReadOptions::default(),
                &cancel,
                |url| async move {
                    if url.contains("a.example") {
                        Err(ForgeError::with_context(ErrorCode::NetworkError, "ECONNREFUSED"))
                    } else {
                        Ok(42u32)
                    }
                },
            )
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.result, Some(42));
        assert_eq!(outcome.used_url.as_deref(), Some("https://b.example"));
        assert_eq!(outcome.attempts.len(), 2);
        assert!(!outcome.attempts[0].ok);
        // The winner is now cached as preferred
        assert_eq!(
            coordinator.preferred_url("repo").as_deref(),
            Some("https://b.example")
        );
    }

    #[tokio::test]
    async fn fallback_stops_on_auth_error() {
        let coordinator = TransportCoordinator::new();
        let cancel = CancelToken::default();
        let calls = AtomicUsize::new(0);
        let outcome: ReadOutcome<u32> = coordinator
            .read_with_fallback(
                &urls(&["https://a.example", "https://b.example"]),
                None,
                ReadOptions::default(),
                &cancel,
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(ForgeError::with_context(ErrorCode::AuthRequired, "401")) }
                },
            )
            .await;
        assert!(!outcome.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.error.as_ref().unwrap().code, ErrorCode::AuthRequired);
    }

    #[tokio::test]
    async fn hanging_url_times_out_and_last_url_is_unbounded() {
        let coordinator = TransportCoordinator::new();
        let cancel = CancelToken::default();
        let outcome = coordinator
            .read_with_fallback(
                &urls(&["https://a.example", "https://b.example"]),
                None,
                ReadOptions {
                    timeout: Duration::from_millis(100),
                    try_all: false,
                },
                &cancel,
                |url| async move {
                    if url.contains("a.example") {
                        futures::future::pending::<()>().await;
                        unreachable!()
                    }
                    Ok::<_, ForgeError>("v")
                },
            )
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.used_url.as_deref(), Some("https://b.example"));
        assert_eq!(outcome.attempts[0].error_code, Some(ErrorCode::Timeout));
    }

    #[tokio::test]
    async fn pseudo_urls_are_skipped() {
        let coordinator = TransportCoordinator::new();
        let cancel = CancelToken::default();
        let outcome = coordinator
            .read_with_fallback(
                &urls(&["wss://relay.example", "https://a.example"]),
                None,
                ReadOptions::default(),
                &cancel,
                |url| async move { Ok::<_, ForgeError>(url) },
            )
            .await;
        assert_eq!(outcome.used_url.as_deref(), Some("https://a.example"));
        assert_eq!(outcome.attempts.len(), 1);
    }

    #[tokio::test]
    async fn write_counts_add_up() {
        let coordinator = TransportCoordinator::new();
        let outcome = coordinator
            .write_to_all(
                &urls(&["https://a.example", "https://b.example", "https://c.example"]),
                WriteOptions::default(),
                |url| async move {
                    if url.contains("b.example") {
                        Err(ForgeError::with_context(ErrorCode::NetworkError, "down"))
                    } else {
                        Ok(())
                    }
                },
            )
            .await;
        assert!(!outcome.success);
        assert!(outcome.partial_success);
        assert_eq!(outcome.success_count + outcome.failure_count, 3);
        assert_eq!(outcome.results.len(), 3);
        assert_eq!(outcome.results[1].0, "https://b.example");
        assert!(outcome.results[1].1.is_err());
    }

    #[tokio::test]
    async fn sequential_write_stops_after_auth_failure() {
        let coordinator = TransportCoordinator::new();
        let calls = AtomicUsize::new(0);
        let outcome = coordinator
            .write_to_all(
                &urls(&["https://a.example", "https://b.example"]),
                WriteOptions { sequential: true },
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(ForgeError::with_context(ErrorCode::PermissionDenied, "403")) }
                },
            )
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.failure_count, 2);
    }

    #[test]
    fn preference_is_forgettable() {
        let coordinator = TransportCoordinator::new();
        coordinator.record_success("repo", "https://a.example", &[]);
        assert!(coordinator.preferred_url("repo").is_some());
        coordinator.forget_preference("repo");
        assert!(coordinator.preferred_url("repo").is_none());
    }

    #[test]
    fn reorder_puts_failed_last() {
        let coordinator = TransportCoordinator::new();
        coordinator.record_success(
            "repo",
            "https://b.example",
            &["https://a.example".to_string()],
        );
        let ordered = coordinator.reorder(
            &urls(&["https://a.example", "https://b.example", "https://c.example"]),
            Some("repo"),
        );
        assert_eq!(
            ordered,
            urls(&["https://b.example", "https://c.example", "https://a.example"])
        );
    }
}

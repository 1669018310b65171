// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Engine error taxonomy.
//!
//! Every error carries a stable [`ErrorCode`], a coarse [`ErrorCategory`] and
//! optionally the operation context plus the underlying cause. Errors coming
//! from transports, git backends and vendor APIs are classified by matching
//! their message against well-known patterns (see [`ForgeError::wrap`]).

use std::error::Error as StdError;
use std::fmt;

/// Coarse error category driving propagation policy.
///
/// Retriable errors are swallowed by the transport coordinator and turned
/// into further attempts; user-actionable errors surface immediately; fatal
/// errors terminate the current operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCategory {
    /// The user can fix this (credentials, dirty tree, bad input, ...)
    UserActionable,
    /// Transient: another attempt or another URL may succeed
    Retriable,
    /// Not recoverable within the current operation
    Fatal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserActionable => write!(f, "user-actionable"),
            Self::Retriable => write!(f, "retriable"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Stable machine-readable error code.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    // User-actionable
    AuthRequired,
    AuthExpired,
    AuthInvalid,
    NotFastForward,
    MergeConflict,
    RepoNotFound,
    RepoAlreadyExists,
    QuotaExceeded,
    PermissionDenied,
    RefLocked,
    InvalidRefspec,
    InvalidInput,
    /// Address normalization needs a network lookup (nip05) but the caller
    /// requested the offline variant.
    RequiresNetwork,
    /// A nip05 identifier could not be resolved to a public key.
    Unresolvable,
    /// Local clone is missing.
    NotCloned,
    /// Working tree has uncommitted changes.
    DirtyWorkingTree,
    /// Refusing to push from a shallow clone.
    ShallowRefusal,
    /// Local projection is behind the remote; sync before pushing.
    NeedsSync,
    /// Patch application produced no staged changes.
    NoChanges,
    /// Patch contains changes the engine cannot apply (binary, rename).
    Unsupported,

    // Retriable
    NetworkError,
    Timeout,
    RelayTimeout,
    RelayError,
    ServerError5xx,
    TemporaryFailure,
    RateLimited,

    // Fatal
    CorruptPack,
    CorruptObject,
    FsError,
    OperationAborted,
    UnknownError,
}

impl ErrorCode {
    /// Category this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AuthRequired
            | Self::AuthExpired
            | Self::AuthInvalid
            | Self::NotFastForward
            | Self::MergeConflict
            | Self::RepoNotFound
            | Self::RepoAlreadyExists
            | Self::QuotaExceeded
            | Self::PermissionDenied
            | Self::RefLocked
            | Self::InvalidRefspec
            | Self::InvalidInput
            | Self::RequiresNetwork
            | Self::Unresolvable
            | Self::NotCloned
            | Self::DirtyWorkingTree
            | Self::ShallowRefusal
            | Self::NeedsSync
            | Self::NoChanges
            | Self::Unsupported => ErrorCategory::UserActionable,
            Self::NetworkError
            | Self::Timeout
            | Self::RelayTimeout
            | Self::RelayError
            | Self::ServerError5xx
            | Self::TemporaryFailure
            | Self::RateLimited => ErrorCategory::Retriable,
            Self::CorruptPack
            | Self::CorruptObject
            | Self::FsError
            | Self::OperationAborted
            | Self::UnknownError => ErrorCategory::Fatal,
        }
    }

    /// Classify an error message against the well-known patterns.
    ///
    /// Matching is case-insensitive. The first matching pattern wins, in the
    /// order of the classification table.
    pub fn classify<S>(message: S) -> Self
    where
        S: AsRef<str>,
    {
        let msg: String = message.as_ref().to_lowercase();

        if msg.contains("401") || msg.contains("unauthorized") {
            return Self::AuthRequired;
        }

        if msg.contains("403") || msg.contains("forbidden") || msg.contains("permission denied") {
            return Self::PermissionDenied;
        }

        if msg.contains("not a fast-forward") || msg.contains("non-fast-forward") {
            return Self::NotFastForward;
        }

        if msg.contains("merge conflict") || msg.contains("conflict") {
            return Self::MergeConflict;
        }

        if msg.contains("404") || msg.contains("not found") {
            return Self::RepoNotFound;
        }

        if msg.contains("econn") || msg.contains("network") || msg.contains("failed to fetch") {
            return Self::NetworkError;
        }

        if msg.contains("timed out") || msg.contains("timeout") {
            return Self::Timeout;
        }

        if msg.contains("internal server error")
            || msg.contains("500")
            || msg.contains("502")
            || msg.contains("503")
            || msg.contains("504")
        {
            return Self::ServerError5xx;
        }

        if msg.contains("429") || msg.contains("rate limit") {
            return Self::RateLimited;
        }

        if msg.contains("bad object") {
            return Self::CorruptObject;
        }

        if msg.contains("corrupt") {
            return Self::CorruptPack;
        }

        if msg.contains("enospc") || msg.contains("disk full") {
            return Self::QuotaExceeded;
        }

        if msg.contains("enoent") || msg.contains("eacces") || msg.contains("eio") {
            return Self::FsError;
        }

        if msg.contains("aborted") {
            return Self::OperationAborted;
        }

        Self::UnknownError
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Engine error: `{ code, category, context?, cause? }`.
#[derive(Debug)]
pub struct ForgeError {
    /// Stable code
    pub code: ErrorCode,
    /// Operation context (e.g. "fetch https://...")
    pub context: Option<String>,
    /// Underlying cause
    pub cause: Option<Box<dyn StdError + Send + Sync>>,
}

impl StdError for ForgeError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_ref()
            .map(|e| &**e as &(dyn StdError + 'static))
    }
}

impl fmt::Display for ForgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, self.category())?;
        if let Some(context) = &self.context {
            write!(f, ": {context}")?;
        }
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl ForgeError {
    /// Construct from a bare code.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            context: None,
            cause: None,
        }
    }

    /// Construct from a code with operation context.
    pub fn with_context<S>(code: ErrorCode, context: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            code,
            context: Some(context.into()),
            cause: None,
        }
    }

    /// Wrap an underlying error, classifying it by message pattern.
    pub fn wrap<E, S>(cause: E, context: S) -> Self
    where
        E: StdError + Send + Sync + 'static,
        S: Into<String>,
    {
        Self {
            code: ErrorCode::classify(cause.to_string()),
            context: Some(context.into()),
            cause: Some(Box::new(cause)),
        }
    }

    /// Wrap an underlying error under an explicit code.
    pub fn wrap_as<E, S>(code: ErrorCode, cause: E, context: S) -> Self
    where
        E: StdError + Send + Sync + 'static,
        S: Into<String>,
    {
        Self {
            code,
            context: Some(context.into()),
            cause: Some(Box::new(cause)),
        }
    }

    /// Category of the carried code.
    #[inline]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Whether another attempt may succeed.
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category() == ErrorCategory::Retriable
    }
}

impl From<ErrorCode> for ForgeError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_auth() {
        assert_eq!(
            ErrorCode::classify("HTTP 401 Unauthorized"),
            ErrorCode::AuthRequired
        );
        assert_eq!(
            ErrorCode::classify("remote: Permission denied"),
            ErrorCode::PermissionDenied
        );
        assert_eq!(ErrorCode::classify("403 Forbidden"), ErrorCode::PermissionDenied);
    }

    #[test]
    fn classify_git() {
        assert_eq!(
            ErrorCode::classify("failed to push some refs: not a fast-forward"),
            ErrorCode::NotFastForward
        );
        assert_eq!(
            ErrorCode::classify("CONFLICT (content): merge conflict in src/lib.rs"),
            ErrorCode::MergeConflict
        );
        assert_eq!(ErrorCode::classify("fatal: bad object deadbeef"), ErrorCode::CorruptObject);
        assert_eq!(ErrorCode::classify("corrupt pack data"), ErrorCode::CorruptPack);
    }

    #[test]
    fn classify_network() {
        assert_eq!(ErrorCode::classify("ECONNREFUSED"), ErrorCode::NetworkError);
        assert_eq!(ErrorCode::classify("connection timed out"), ErrorCode::Timeout);
        assert_eq!(
            ErrorCode::classify("502 Bad Gateway"),
            ErrorCode::ServerError5xx
        );
        assert_eq!(ErrorCode::classify("rate limit exceeded"), ErrorCode::RateLimited);
    }

    #[test]
    fn classify_fs() {
        assert_eq!(ErrorCode::classify("ENOSPC: disk full"), ErrorCode::QuotaExceeded);
        assert_eq!(ErrorCode::classify("ENOENT: no such file"), ErrorCode::FsError);
        assert_eq!(ErrorCode::classify("operation aborted"), ErrorCode::OperationAborted);
    }

    #[test]
    fn classify_default() {
        assert_eq!(ErrorCode::classify("something odd"), ErrorCode::UnknownError);
    }

    #[test]
    fn categories() {
        assert_eq!(ErrorCode::AuthRequired.category(), ErrorCategory::UserActionable);
        assert_eq!(ErrorCode::Timeout.category(), ErrorCategory::Retriable);
        assert_eq!(ErrorCode::FsError.category(), ErrorCategory::Fatal);
    }

    #[test]
    fn display_includes_context() {
        let err = ForgeError::with_context(ErrorCode::NeedsSync, "refs/heads/main");
        let msg = err.to_string();
        assert!(msg.contains("NeedsSync"));
        assert!(msg.contains("refs/heads/main"));
    }
}

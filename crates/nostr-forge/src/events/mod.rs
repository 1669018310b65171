// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Domain event codec.
//!
//! One module per kind family. Each typed value knows how to turn itself into
//! an [`EventBuilder`](nostr::EventBuilder) with a deterministic tag layout,
//! and how to decode itself back from a wire [`Event`]. The codec is the
//! single source of truth for tag shape; per-kind validators are pure
//! predicates over the wire form.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use nostr::{Event, EventId, Kind, PublicKey, Timestamp};
use thiserror::Error;

use crate::address::RepoAddress;
use crate::error::{ErrorCode, ForgeError};

pub mod announcement;
pub mod issue;
pub mod merge;
pub mod patch;
pub mod state;
pub mod status;

pub use self::announcement::RepoAnnouncement;
pub use self::issue::IssueEvent;
pub use self::merge::{ConflictMetadata, MergeMetadata};
pub use self::patch::{CommitterInfo, PatchEvent};
pub use self::state::{RefState, RepoState};
pub use self::status::{StatusEvent, StatusKind};

/// Repository state announcement kind (per-maintainer ref snapshot).
pub const REPO_STATE_KIND: u16 = 30618;
/// Merge metadata kind (published on clean merges).
pub const MERGE_METADATA_KIND: u16 = 30411;
/// Conflict metadata kind (published on conflicted analysis).
pub const CONFLICT_METADATA_KIND: u16 = 30412;

/// Repository state [`Kind`].
#[inline]
pub fn repo_state_kind() -> Kind {
    Kind::from(REPO_STATE_KIND)
}

/// Merge metadata [`Kind`].
#[inline]
pub fn merge_metadata_kind() -> Kind {
    Kind::from(MERGE_METADATA_KIND)
}

/// Conflict metadata [`Kind`].
#[inline]
pub fn conflict_metadata_kind() -> Kind {
    Kind::from(CONFLICT_METADATA_KIND)
}

static VALIDATE: AtomicBool = AtomicBool::new(false);

/// Toggle strict decode-side validation process-wide.
///
/// Encoders are always strict; decoders stay tolerant when this is off.
pub fn set_validation(enabled: bool) {
    VALIDATE.store(enabled, Ordering::Relaxed);
}

/// Whether strict decode-side validation is enabled.
#[inline]
pub fn validation_enabled() -> bool {
    VALIDATE.load(Ordering::Relaxed)
}

/// Codec error
#[derive(Debug, Error)]
pub enum CodecError {
    /// Event kind does not match the decoder
    #[error("unexpected kind: expected={expected}, found={found}")]
    UnexpectedKind {
        /// Expected kind number
        expected: u16,
        /// Found kind number
        found: u16,
    },
    /// A required tag is missing
    #[error("missing tag: {0}")]
    MissingTag(&'static str),
    /// A tag carries a malformed value
    #[error("invalid tag: {0}")]
    InvalidTag(&'static str),
    /// Keys error
    #[error(transparent)]
    Keys(#[from] nostr::key::Error),
    /// Event ID error
    #[error(transparent)]
    EventId(#[from] nostr::event::Error),
}

impl From<CodecError> for ForgeError {
    fn from(e: CodecError) -> Self {
        ForgeError::wrap_as(ErrorCode::InvalidInput, e, "event codec")
    }
}

/// Decoded wire value plus its envelope metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded<T> {
    /// Event id
    pub event_id: EventId,
    /// Event author
    pub author: PublicKey,
    /// Event timestamp
    pub created_at: Timestamp,
    /// Decoded payload
    pub value: T,
}

impl<T> Decoded<T> {
    pub(crate) fn new(event: &Event, value: T) -> Self {
        Self {
            event_id: event.id,
            author: event.pubkey,
            created_at: event.created_at,
            value,
        }
    }
}

/// Validate `event` against the strict per-kind tag shape.
///
/// Pure predicate: no network, no state. Unknown kinds are accepted.
pub fn validate(event: &Event) -> Result<(), CodecError> {
    match event.kind {
        Kind::GitRepoAnnouncement => announcement::validate(event),
        Kind::GitPatch => patch::validate(event),
        Kind::GitIssue => issue::validate(event),
        Kind::GitStatusOpen | Kind::GitStatusApplied | Kind::GitStatusClosed
        | Kind::GitStatusDraft => status::validate(event),
        kind => match kind.as_u16() {
            REPO_STATE_KIND => state::validate(event),
            MERGE_METADATA_KIND | CONFLICT_METADATA_KIND => merge::validate(event),
            _ => Ok(()),
        },
    }
}

pub(crate) fn check_kind(event: &Event, expected: u16) -> Result<(), CodecError> {
    if event.kind.as_u16() != expected {
        return Err(CodecError::UnexpectedKind {
            expected,
            found: event.kind.as_u16(),
        });
    }
    Ok(())
}

pub(crate) fn run_validation(event: &Event) -> Result<(), CodecError> {
    if validation_enabled() {
        validate(event)?;
    }
    Ok(())
}

/// First value of the first tag named `name`.
pub(crate) fn tag_value<'a>(event: &'a Event, name: &str) -> Option<&'a str> {
    event.tags.iter().find_map(|tag| {
        let slice = tag.as_slice();
        (slice.first().map(String::as_str) == Some(name))
            .then(|| slice.get(1).map(String::as_str))
            .flatten()
    })
}

/// First values of every tag named `name`, in wire order.
pub(crate) fn tag_values<'a>(event: &'a Event, name: &'a str) -> impl Iterator<Item = &'a str> {
    event.tags.iter().filter_map(move |tag| {
        let slice = tag.as_slice();
        (slice.first().map(String::as_str) == Some(name))
            .then(|| slice.get(1).map(String::as_str))
            .flatten()
    })
}

/// All `p` tag public keys, invalid entries skipped.
pub(crate) fn public_keys(event: &Event) -> Vec<PublicKey> {
    tag_values(event, "p")
        .filter_map(|v| PublicKey::from_hex(v).ok())
        .collect()
}

/// The repository address from the `a` tag.
pub(crate) fn address_tag(event: &Event) -> Result<RepoAddress, CodecError> {
    let value = tag_value(event, "a").ok_or(CodecError::MissingTag("a"))?;
    RepoAddress::from_str(value).map_err(|_| CodecError::InvalidTag("a"))
}

/// The root event id from the `e` tag.
pub(crate) fn root_id_tag(event: &Event) -> Option<EventId> {
    tag_value(event, "e").and_then(|v| EventId::from_hex(v).ok())
}

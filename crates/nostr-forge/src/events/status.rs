// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Patch/issue status events (kinds 1630-1633).
//!
//! Status events reference their root via `e` and may carry the repository
//! address via `a`. Kind 1631 (applied) additionally carries the merge
//! commit, or the list of commits the patch landed as.

use std::borrow::Cow;

use nostr::{Event, EventBuilder, EventId, Kind, PublicKey, Tag, TagKind};

use super::{check_kind, run_validation, tag_value, tag_values, CodecError, Decoded};
use crate::address::RepoAddress;

/// Status kind: the lifecycle position of a patch or issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatusKind {
    /// Proposed and awaiting review
    Open,
    /// Merged or landed
    Applied,
    /// Rejected or resolved
    Closed,
    /// Not ready for review
    Draft,
}

impl StatusKind {
    /// The wire kind.
    pub fn kind(&self) -> Kind {
        match self {
            Self::Open => Kind::GitStatusOpen,
            Self::Applied => Kind::GitStatusApplied,
            Self::Closed => Kind::GitStatusClosed,
            Self::Draft => Kind::GitStatusDraft,
        }
    }

    /// Inverse of [`StatusKind::kind`].
    pub fn from_kind(kind: Kind) -> Option<Self> {
        match kind.as_u16() {
            1630 => Some(Self::Open),
            1631 => Some(Self::Applied),
            1632 => Some(Self::Closed),
            1633 => Some(Self::Draft),
            _ => None,
        }
    }

    /// Precedence rank: closed > applied > open > draft.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Closed => 3,
            Self::Applied => 2,
            Self::Open => 1,
            Self::Draft => 0,
        }
    }
}

/// Status payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    /// Lifecycle position
    pub status: StatusKind,
    /// Root event this status applies to
    pub root_id: EventId,
    /// Repository address, when known
    pub address: Option<RepoAddress>,
    /// Tagged public keys
    pub recipients: Vec<PublicKey>,
    /// Merge commit, for [`StatusKind::Applied`]
    pub merge_commit: Option<String>,
    /// Commits the patch landed as, for [`StatusKind::Applied`]
    pub applied_as_commits: Vec<String>,
    /// Free-form comment
    pub content: String,
}

impl StatusEvent {
    /// Encode with the canonical tag layout: `e=<root> "" root`, `a?`,
    /// `p*` (sorted), then `merge-commit?` / `applied-as-commits?`.
    pub fn to_event_builder(self) -> EventBuilder {
        let mut tags: Vec<Tag> = Vec::with_capacity(3);

        tags.push(Tag::custom(
            TagKind::Custom(Cow::Borrowed("e")),
            [self.root_id.to_hex(), String::new(), "root".to_string()],
        ));

        if let Some(address) = &self.address {
            tags.push(Tag::custom(
                TagKind::Custom(Cow::Borrowed("a")),
                [address.to_tag_value()],
            ));
        }

        let mut recipients: Vec<String> = self.recipients.iter().map(|pk| pk.to_hex()).collect();
        recipients.sort_unstable();
        recipients.dedup();
        for recipient in recipients {
            tags.push(Tag::custom(TagKind::Custom(Cow::Borrowed("p")), [recipient]));
        }

        if self.status == StatusKind::Applied {
            if let Some(merge_commit) = self.merge_commit {
                tags.push(Tag::custom(
                    TagKind::Custom(Cow::Borrowed("merge-commit")),
                    [merge_commit],
                ));
            }
            if !self.applied_as_commits.is_empty() {
                tags.push(Tag::custom(
                    TagKind::Custom(Cow::Borrowed("applied-as-commits")),
                    self.applied_as_commits,
                ));
            }
        }

        EventBuilder::new(self.status.kind(), self.content).tags(tags)
    }

    /// Decode from a wire event.
    pub fn from_event(event: &Event) -> Result<Decoded<Self>, CodecError> {
        let status = StatusKind::from_kind(event.kind).ok_or(CodecError::UnexpectedKind {
            expected: 1630,
            found: event.kind.as_u16(),
        })?;
        run_validation(event)?;

        let root_id = tag_value(event, "e")
            .and_then(|v| EventId::from_hex(v).ok())
            .ok_or(CodecError::MissingTag("e"))?;

        let applied_as_commits: Vec<String> = event
            .tags
            .iter()
            .find(|t| t.as_slice().first().map(String::as_str) == Some("applied-as-commits"))
            .map(|t| t.as_slice()[1..].to_vec())
            .unwrap_or_default();

        Ok(Decoded::new(
            event,
            Self {
                status,
                root_id,
                address: tag_value(event, "a").and_then(|v| v.parse().ok()),
                recipients: super::public_keys(event),
                merge_commit: tag_value(event, "merge-commit").map(ToString::to_string),
                applied_as_commits,
                content: event.content.clone(),
            },
        ))
    }
}

/// Strict wire-shape predicate for kinds 1630-1633.
pub fn validate(event: &Event) -> Result<(), CodecError> {
    let status = StatusKind::from_kind(event.kind).ok_or(CodecError::UnexpectedKind {
        expected: 1630,
        found: event.kind.as_u16(),
    })?;
    let root = tag_value(event, "e").ok_or(CodecError::MissingTag("e"))?;
    EventId::from_hex(root).map_err(|_| CodecError::InvalidTag("e"))?;
    if tag_values(event, "p").next().is_none() {
        return Err(CodecError::MissingTag("p"));
    }
    if status != StatusKind::Applied
        && (tag_value(event, "merge-commit").is_some()
            || tag_value(event, "applied-as-commits").is_some())
    {
        return Err(CodecError::InvalidTag("merge-commit"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use nostr::Keys;

    use super::*;

    #[test]
    fn rank_order() {
        assert!(StatusKind::Closed.rank() > StatusKind::Applied.rank());
        assert!(StatusKind::Applied.rank() > StatusKind::Open.rank());
        assert!(StatusKind::Open.rank() > StatusKind::Draft.rank());
    }

    #[test]
    fn roundtrip_applied() {
        let keys = Keys::generate();
        let root = EventId::all_zeros();
        let status = StatusEvent {
            status: StatusKind::Applied,
            root_id: root,
            address: Some(RepoAddress::new(keys.public_key(), "forge")),
            recipients: vec![keys.public_key()],
            merge_commit: Some("cccccccccccccccccccccccccccccccccccccccc".to_string()),
            applied_as_commits: Vec::new(),
            content: String::new(),
        };
        let event = status
            .clone()
            .to_event_builder()
            .sign_with_keys(&keys)
            .unwrap();
        validate(&event).unwrap();
        let decoded = StatusEvent::from_event(&event).unwrap();
        assert_eq!(decoded.value, status);
    }

    #[test]
    fn kind_mapping() {
        assert_eq!(StatusKind::from_kind(Kind::GitStatusOpen), Some(StatusKind::Open));
        assert_eq!(StatusKind::from_kind(Kind::GitStatusDraft), Some(StatusKind::Draft));
        assert_eq!(StatusKind::from_kind(Kind::GitPatch), None);
        assert_eq!(StatusKind::Open.kind().as_u16(), 1630);
    }
}

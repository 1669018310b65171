// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Merge and conflict metadata events (kinds 30411 and 30412).
//!
//! Published after analyzing or applying a patch: 30411 describes a clean
//! merge, 30412 a conflicted analysis with one `conflict-file` tag per
//! conflicting path. Both reference the repository (`a`) and the patch root
//! (`e`).

use std::borrow::Cow;

use nostr::{Event, EventBuilder, EventId, Tag, TagKind};

use super::{
    address_tag, check_kind, conflict_metadata_kind, merge_metadata_kind, root_id_tag,
    run_validation, tag_value, tag_values, CodecError, Decoded, CONFLICT_METADATA_KIND,
    MERGE_METADATA_KIND,
};
use crate::address::RepoAddress;

/// Merge metadata payload (kind 30411).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeMetadata {
    /// Repository address
    pub address: RepoAddress,
    /// Patch root event
    pub root_id: EventId,
    /// Branch the patch was analyzed or merged against
    pub target_branch: String,
    /// Branch the patch was authored against, when it differs
    pub base_branch: Option<String>,
    /// Merge commit, when the patch was applied
    pub merge_commit: Option<String>,
}

impl MergeMetadata {
    /// Encode with the canonical tag layout: `a`, `e`, `target-branch`,
    /// `base-branch?`, `result=clean`, `merge-commit?`.
    pub fn to_event_builder(self) -> EventBuilder {
        let mut tags: Vec<Tag> = Vec::with_capacity(5);

        tags.push(Tag::custom(
            TagKind::Custom(Cow::Borrowed("a")),
            [self.address.to_tag_value()],
        ));
        tags.push(Tag::custom(
            TagKind::Custom(Cow::Borrowed("e")),
            [self.root_id.to_hex()],
        ));
        tags.push(Tag::custom(
            TagKind::Custom(Cow::Borrowed("target-branch")),
            [self.target_branch],
        ));
        if let Some(base_branch) = self.base_branch {
            tags.push(Tag::custom(
                TagKind::Custom(Cow::Borrowed("base-branch")),
                [base_branch],
            ));
        }
        tags.push(Tag::custom(
            TagKind::Custom(Cow::Borrowed("result")),
            ["clean"],
        ));
        if let Some(merge_commit) = self.merge_commit {
            tags.push(Tag::custom(
                TagKind::Custom(Cow::Borrowed("merge-commit")),
                [merge_commit],
            ));
        }

        EventBuilder::new(merge_metadata_kind(), "").tags(tags)
    }

    /// Decode from a wire event.
    pub fn from_event(event: &Event) -> Result<Decoded<Self>, CodecError> {
        check_kind(event, MERGE_METADATA_KIND)?;
        run_validation(event)?;
        Ok(Decoded::new(
            event,
            Self {
                address: address_tag(event)?,
                root_id: root_id_tag(event).ok_or(CodecError::MissingTag("e"))?,
                target_branch: tag_value(event, "target-branch")
                    .ok_or(CodecError::MissingTag("target-branch"))?
                    .to_string(),
                base_branch: tag_value(event, "base-branch").map(ToString::to_string),
                merge_commit: tag_value(event, "merge-commit").map(ToString::to_string),
            },
        ))
    }
}

/// Conflict metadata payload (kind 30412).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictMetadata {
    /// Repository address
    pub address: RepoAddress,
    /// Patch root event
    pub root_id: EventId,
    /// Branch the patch was analyzed against
    pub target_branch: String,
    /// Branch the patch was authored against, when it differs
    pub base_branch: Option<String>,
    /// Conflicting file paths
    pub conflict_files: Vec<String>,
}

impl ConflictMetadata {
    /// Encode with the canonical tag layout: `a`, `e`, `target-branch`,
    /// `base-branch?`, `result=conflict`, `conflict-file*` (sorted).
    pub fn to_event_builder(self) -> EventBuilder {
        let mut tags: Vec<Tag> = Vec::with_capacity(4 + self.conflict_files.len());

        tags.push(Tag::custom(
            TagKind::Custom(Cow::Borrowed("a")),
            [self.address.to_tag_value()],
        ));
        tags.push(Tag::custom(
            TagKind::Custom(Cow::Borrowed("e")),
            [self.root_id.to_hex()],
        ));
        tags.push(Tag::custom(
            TagKind::Custom(Cow::Borrowed("target-branch")),
            [self.target_branch],
        ));
        if let Some(base_branch) = self.base_branch {
            tags.push(Tag::custom(
                TagKind::Custom(Cow::Borrowed("base-branch")),
                [base_branch],
            ));
        }
        tags.push(Tag::custom(
            TagKind::Custom(Cow::Borrowed("result")),
            ["conflict"],
        ));

        let mut files = self.conflict_files;
        files.sort_unstable();
        files.dedup();
        for file in files {
            tags.push(Tag::custom(
                TagKind::Custom(Cow::Borrowed("conflict-file")),
                [file],
            ));
        }

        EventBuilder::new(conflict_metadata_kind(), "").tags(tags)
    }

    /// Decode from a wire event.
    pub fn from_event(event: &Event) -> Result<Decoded<Self>, CodecError> {
        check_kind(event, CONFLICT_METADATA_KIND)?;
        run_validation(event)?;
        Ok(Decoded::new(
            event,
            Self {
                address: address_tag(event)?,
                root_id: root_id_tag(event).ok_or(CodecError::MissingTag("e"))?,
                target_branch: tag_value(event, "target-branch")
                    .ok_or(CodecError::MissingTag("target-branch"))?
                    .to_string(),
                base_branch: tag_value(event, "base-branch").map(ToString::to_string),
                conflict_files: tag_values(event, "conflict-file")
                    .map(ToString::to_string)
                    .collect(),
            },
        ))
    }
}

/// Strict wire-shape predicate for kinds 30411 and 30412.
pub fn validate(event: &Event) -> Result<(), CodecError> {
    let kind = event.kind.as_u16();
    if kind != MERGE_METADATA_KIND && kind != CONFLICT_METADATA_KIND {
        return Err(CodecError::UnexpectedKind {
            expected: MERGE_METADATA_KIND,
            found: kind,
        });
    }
    address_tag(event)?;
    root_id_tag(event).ok_or(CodecError::MissingTag("e"))?;
    if tag_value(event, "target-branch").is_none() {
        return Err(CodecError::MissingTag("target-branch"));
    }
    match tag_value(event, "result") {
        Some("clean") if kind == MERGE_METADATA_KIND => Ok(()),
        Some("conflict") if kind == CONFLICT_METADATA_KIND => {
            if tag_values(event, "conflict-file").next().is_none() {
                return Err(CodecError::MissingTag("conflict-file"));
            }
            Ok(())
        }
        _ => Err(CodecError::InvalidTag("result")),
    }
}

#[cfg(test)]
mod tests {
    use nostr::Keys;

    use super::*;

    #[test]
    fn merge_roundtrip() {
        let keys = Keys::generate();
        let meta = MergeMetadata {
            address: RepoAddress::new(keys.public_key(), "forge"),
            root_id: EventId::all_zeros(),
            target_branch: "main".to_string(),
            base_branch: None,
            merge_commit: Some("dddddddddddddddddddddddddddddddddddddddd".to_string()),
        };
        let event = meta
            .clone()
            .to_event_builder()
            .sign_with_keys(&keys)
            .unwrap();
        validate(&event).unwrap();
        let decoded = MergeMetadata::from_event(&event).unwrap();
        assert_eq!(decoded.value, meta);
    }

    #[test]
    fn conflict_roundtrip() {
        let keys = Keys::generate();
        let meta = ConflictMetadata {
            address: RepoAddress::new(keys.public_key(), "forge"),
            root_id: EventId::all_zeros(),
            target_branch: "main".to_string(),
            base_branch: Some("develop".to_string()),
            conflict_files: vec!["src/lib.rs".to_string(), "src/main.rs".to_string()],
        };
        let event = meta
            .clone()
            .to_event_builder()
            .sign_with_keys(&keys)
            .unwrap();
        validate(&event).unwrap();
        let decoded = ConflictMetadata::from_event(&event).unwrap();
        assert_eq!(decoded.value, meta);
    }

    #[test]
    fn validate_requires_conflict_files() {
        let keys = Keys::generate();
        let tags = vec![
            Tag::custom(
                TagKind::Custom(Cow::Borrowed("a")),
                [RepoAddress::new(keys.public_key(), "forge").to_tag_value()],
            ),
            Tag::custom(
                TagKind::Custom(Cow::Borrowed("e")),
                [EventId::all_zeros().to_hex()],
            ),
            Tag::custom(TagKind::Custom(Cow::Borrowed("target-branch")), ["main"]),
            Tag::custom(TagKind::Custom(Cow::Borrowed("result")), ["conflict"]),
        ];
        let event = EventBuilder::new(conflict_metadata_kind(), "")
            .tags(tags)
            .sign_with_keys(&keys)
            .unwrap();
        assert!(validate(&event).is_err());
    }
}

// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Repository state announcement (kind 30618).
//!
//! A per-maintainer snapshot of refs. States are never mutated: each author
//! supersedes their own previous snapshot, and the effective repository state
//! is a pure fusion over all maintainer-authored snapshots (see the
//! discovery module).

use std::borrow::Cow;
use std::collections::BTreeMap;

use nostr::{Event, EventBuilder, Tag, TagKind};

use super::{check_kind, repo_state_kind, run_validation, tag_value, CodecError, Decoded};

/// Published value of one ref, with optional ancestry lineage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefState {
    /// Commit object id the ref points at
    pub commit: String,
    /// Parent commit ids, newest first, when the publisher includes lineage
    pub lineage: Vec<String>,
}

/// Repository state payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoState {
    /// Repository identifier (`d` tag)
    pub identifier: String,
    /// Refs under `refs/heads/` and `refs/tags/`, by full ref name
    pub refs: BTreeMap<String, RefState>,
    /// Symbolic HEAD target (`refs/heads/<name>`)
    pub head: Option<String>,
}

impl RepoState {
    /// Encode with the canonical tag layout: `d`, one tag per ref sorted by
    /// ref name, then `HEAD`.
    pub fn to_event_builder(self) -> EventBuilder {
        let mut tags: Vec<Tag> = Vec::with_capacity(2 + self.refs.len());

        tags.push(Tag::identifier(self.identifier));

        // BTreeMap iteration is already sorted by ref name
        for (name, state) in self.refs {
            let mut values: Vec<String> = Vec::with_capacity(1 + state.lineage.len());
            values.push(state.commit);
            values.extend(state.lineage);
            tags.push(Tag::custom(TagKind::Custom(Cow::Owned(name)), values));
        }

        if let Some(head) = self.head {
            tags.push(Tag::custom(
                TagKind::Custom(Cow::Borrowed("HEAD")),
                [format!("ref: {head}")],
            ));
        }

        EventBuilder::new(repo_state_kind(), "").tags(tags)
    }

    /// Decode from a wire event.
    pub fn from_event(event: &Event) -> Result<Decoded<Self>, CodecError> {
        check_kind(event, super::REPO_STATE_KIND)?;
        run_validation(event)?;

        let mut state = Self {
            identifier: tag_value(event, "d").unwrap_or_default().to_string(),
            ..Default::default()
        };

        for tag in event.tags.iter() {
            let slice = tag.as_slice();
            let Some(name) = slice.first() else { continue };
            if name.starts_with("refs/") {
                let Some(commit) = slice.get(1) else { continue };
                state.refs.insert(
                    name.clone(),
                    RefState {
                        commit: commit.clone(),
                        lineage: slice[2..].to_vec(),
                    },
                );
            } else if name == "HEAD" {
                state.head = slice
                    .get(1)
                    .and_then(|v| v.strip_prefix("ref: "))
                    .map(ToString::to_string);
            }
        }

        Ok(Decoded::new(event, state))
    }

    /// Commit the published HEAD resolves to, when both sides are present.
    pub fn head_commit(&self) -> Option<&str> {
        let head = self.head.as_deref()?;
        self.refs.get(head).map(|r| r.commit.as_str())
    }
}

/// Strict wire-shape predicate for kind 30618.
pub fn validate(event: &Event) -> Result<(), CodecError> {
    check_kind(event, super::REPO_STATE_KIND)?;
    if tag_value(event, "d").is_none() {
        return Err(CodecError::MissingTag("d"));
    }
    let mut refs = 0usize;
    for tag in event.tags.iter() {
        let slice = tag.as_slice();
        let Some(name) = slice.first() else { continue };
        if name.starts_with("refs/") {
            refs += 1;
            let commit = slice.get(1).ok_or(CodecError::InvalidTag("refs"))?;
            if commit.len() != 40 || !commit.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(CodecError::InvalidTag("refs"));
            }
        } else if name == "HEAD" {
            let value = slice.get(1).ok_or(CodecError::InvalidTag("HEAD"))?;
            if !value.starts_with("ref: refs/heads/") {
                return Err(CodecError::InvalidTag("HEAD"));
            }
        }
    }
    if refs == 0 {
        return Err(CodecError::MissingTag("refs"));
    }
    if tag_value(event, "HEAD").is_none() {
        return Err(CodecError::MissingTag("HEAD"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use nostr::Keys;

    use super::*;

    const C1: &str = "1111111111111111111111111111111111111111";
    const C2: &str = "2222222222222222222222222222222222222222";

    fn sample() -> RepoState {
        let mut refs = BTreeMap::new();
        refs.insert(
            "refs/heads/main".to_string(),
            RefState {
                commit: C1.to_string(),
                lineage: vec![C2.to_string()],
            },
        );
        refs.insert(
            "refs/tags/v0.1.0".to_string(),
            RefState {
                commit: C2.to_string(),
                lineage: Vec::new(),
            },
        );
        RepoState {
            identifier: "forge".to_string(),
            refs,
            head: Some("refs/heads/main".to_string()),
        }
    }

    #[test]
    fn roundtrip() {
        let keys = Keys::generate();
        let state = sample();
        let event = state
            .clone()
            .to_event_builder()
            .sign_with_keys(&keys)
            .unwrap();
        validate(&event).unwrap();
        let decoded = RepoState::from_event(&event).unwrap();
        assert_eq!(decoded.value, state);
        assert_eq!(decoded.value.head_commit(), Some(C1));
    }

    #[test]
    fn reencode_is_byte_identical() {
        let keys = Keys::generate();
        let event = sample().to_event_builder().sign_with_keys(&keys).unwrap();
        let decoded = RepoState::from_event(&event).unwrap();
        let reencoded = decoded
            .value
            .to_event_builder()
            .custom_created_at(event.created_at)
            .sign_with_keys(&keys)
            .unwrap();
        assert_eq!(reencoded.id, event.id);
    }

    #[test]
    fn validate_rejects_bad_oid() {
        let keys = Keys::generate();
        let tags = vec![
            Tag::identifier("forge"),
            Tag::custom(
                TagKind::Custom(Cow::Borrowed("refs/heads/main")),
                ["not-an-oid"],
            ),
            Tag::custom(
                TagKind::Custom(Cow::Borrowed("HEAD")),
                ["ref: refs/heads/main"],
            ),
        ];
        let event = EventBuilder::new(repo_state_kind(), "")
            .tags(tags)
            .sign_with_keys(&keys)
            .unwrap();
        assert!(validate(&event).is_err());
    }
}

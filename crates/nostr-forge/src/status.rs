// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Status resolution and label aggregation.
//!
//! Many parties may publish status events for the same root; the resolver
//! picks one with author-role precedence (maintainer over root author over
//! anyone else), then kind rank (closed > applied > open > draft), then
//! recency. Labels are gathered from NIP-32 style label events plus legacy
//! hashtags and normalized per namespace.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use nostr::{Event, EventId, PublicKey};

use crate::events::status::StatusEvent;
use crate::events::Decoded;

/// Namespace used for labels that do not carry one.
pub const DEFAULT_LABEL_NAMESPACE: &str = "ugc";

const LABEL_KIND: u16 = 1985;

/// Author role relative to a root event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum AuthorRole {
    Other = 0,
    RootAuthor = 1,
    Maintainer = 2,
}

fn role(
    author: &PublicKey,
    maintainers: &HashSet<PublicKey>,
    root_author: &PublicKey,
) -> AuthorRole {
    if maintainers.contains(author) {
        AuthorRole::Maintainer
    } else if author == root_author {
        AuthorRole::RootAuthor
    } else {
        AuthorRole::Other
    }
}

/// Picks the effective status for a root event.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusResolver;

impl StatusResolver {
    /// Resolve the effective status among `candidates`.
    ///
    /// Precedence: author role, then kind rank, then timestamp; remaining
    /// ties break on event id so the choice is deterministic.
    pub fn resolve_latest(
        root_id: &EventId,
        candidates: &[Decoded<StatusEvent>],
        maintainers: &HashSet<PublicKey>,
        root_author: &PublicKey,
    ) -> Option<Decoded<StatusEvent>> {
        candidates
            .iter()
            .filter(|c| &c.value.root_id == root_id)
            .max_by(|a, b| {
                role(&a.author, maintainers, root_author)
                    .cmp(&role(&b.author, maintainers, root_author))
                    .then_with(|| a.value.status.rank().cmp(&b.value.status.rank()))
                    .then_with(|| a.created_at.cmp(&b.created_at))
                    .then_with(|| a.event_id.cmp(&b.event_id))
            })
            .cloned()
    }
}

/// Aggregated labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelAggregate {
    /// Per-namespace sorted unique label values
    pub normalized: BTreeMap<String, Vec<String>>,
    /// Flat sorted unique label values across namespaces
    pub chips: Vec<String>,
}

/// Aggregate labels for `root` from three sources: labels self-assigned by
/// the root author, external NIP-32 style label events referencing the root,
/// and the root's own legacy hashtags.
pub fn aggregate_labels(root: &Event, label_events: &[Event]) -> LabelAggregate {
    let mut normalized: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    let mut add = |namespace: &str, value: &str| {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        normalized
            .entry(namespace.to_string())
            .or_default()
            .insert(value.to_string());
    };

    // Legacy hashtags on the root itself
    for tag in root.tags.iter() {
        let slice = tag.as_slice();
        if slice.first().map(String::as_str) == Some("t") {
            if let Some(value) = slice.get(1) {
                add(DEFAULT_LABEL_NAMESPACE, value);
            }
        }
    }

    // Label events (self-assigned and external use the same wire shape)
    let root_hex = root.id.to_hex();
    for event in label_events {
        if event.kind.as_u16() != LABEL_KIND {
            continue;
        }
        let references_root = event.tags.iter().any(|tag| {
            let slice = tag.as_slice();
            slice.first().map(String::as_str) == Some("e")
                && slice.get(1).map(String::as_str) == Some(root_hex.as_str())
        });
        if !references_root {
            continue;
        }
        for tag in event.tags.iter() {
            let slice = tag.as_slice();
            if slice.first().map(String::as_str) != Some("l") {
                continue;
            }
            let Some(value) = slice.get(1) else { continue };
            let namespace = slice
                .get(2)
                .map(String::as_str)
                .filter(|ns| !ns.is_empty())
                .unwrap_or(DEFAULT_LABEL_NAMESPACE);
            add(namespace, value);
        }
    }

    let chips: BTreeSet<String> = normalized.values().flatten().cloned().collect();
    LabelAggregate {
        normalized: normalized
            .into_iter()
            .map(|(ns, values)| (ns, values.into_iter().collect()))
            .collect(),
        chips: chips.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use nostr::{EventBuilder, Keys, Kind, Tag, TagKind, Timestamp};

    use super::*;
    use crate::address::RepoAddress;
    use crate::events::status::StatusKind;

    fn status(
        keys: &Keys,
        root_id: EventId,
        kind: StatusKind,
        at: u64,
    ) -> Decoded<StatusEvent> {
        let event = StatusEvent {
            status: kind,
            root_id,
            address: None,
            recipients: vec![keys.public_key()],
            merge_commit: None,
            applied_as_commits: Vec::new(),
            content: String::new(),
        }
        .to_event_builder()
        .custom_created_at(Timestamp::from_secs(at))
        .sign_with_keys(keys)
        .unwrap();
        StatusEvent::from_event(&event).unwrap()
    }

    #[test]
    fn maintainer_outranks_kind_and_time() {
        let root_author = Keys::generate();
        let maintainer = Keys::generate();
        let root_id = EventId::all_zeros();
        let maintainers: HashSet<PublicKey> = [maintainer.public_key()].into_iter().collect();

        let candidates = vec![
            status(&root_author, root_id, StatusKind::Open, 100),
            status(&maintainer, root_id, StatusKind::Draft, 50),
        ];

        let chosen = StatusResolver::resolve_latest(
            &root_id,
            &candidates,
            &maintainers,
            &root_author.public_key(),
        )
        .unwrap();
        assert_eq!(chosen.author, maintainer.public_key());
        assert_eq!(chosen.value.status, StatusKind::Draft);
    }

    #[test]
    fn newer_same_role_same_kind_never_loses() {
        let maintainer = Keys::generate();
        let root_author = Keys::generate();
        let root_id = EventId::all_zeros();
        let maintainers: HashSet<PublicKey> = [maintainer.public_key()].into_iter().collect();

        let older = status(&maintainer, root_id, StatusKind::Open, 100);
        let newer = status(&maintainer, root_id, StatusKind::Open, 200);

        let chosen = StatusResolver::resolve_latest(
            &root_id,
            &[older.clone(), newer.clone()],
            &maintainers,
            &root_author.public_key(),
        )
        .unwrap();
        assert!(chosen.created_at >= older.created_at);
        assert_eq!(chosen.event_id, newer.event_id);
    }

    #[test]
    fn kind_rank_beats_recency_within_role() {
        let maintainer = Keys::generate();
        let root_author = Keys::generate();
        let root_id = EventId::all_zeros();
        let maintainers: HashSet<PublicKey> = [maintainer.public_key()].into_iter().collect();

        let applied_old = status(&maintainer, root_id, StatusKind::Applied, 50);
        let open_new = status(&maintainer, root_id, StatusKind::Open, 500);

        let chosen = StatusResolver::resolve_latest(
            &root_id,
            &[applied_old, open_new],
            &maintainers,
            &root_author.public_key(),
        )
        .unwrap();
        assert_eq!(chosen.value.status, StatusKind::Applied);
    }

    #[test]
    fn other_root_statuses_are_ignored() {
        let keys = Keys::generate();
        let root_id = EventId::all_zeros();
        let other_root =
            EventId::from_hex("5d2899290e0e69bcd809749b9c8a7a27af2a81bbc5c70c8d0c322b3a4148a2d7")
                .unwrap();
        let candidates = vec![status(&keys, other_root, StatusKind::Closed, 10)];
        let chosen = StatusResolver::resolve_latest(
            &root_id,
            &candidates,
            &HashSet::new(),
            &keys.public_key(),
        );
        assert!(chosen.is_none());
    }

    #[test]
    fn labels_aggregate_across_sources() {
        let author = Keys::generate();
        let labeler = Keys::generate();
        let address = RepoAddress::new(author.public_key(), "forge");

        let root = crate::events::issue::IssueEvent {
            address,
            subject: Some("subject".to_string()),
            recipients: Vec::new(),
            hashtags: vec!["bug".to_string()],
            content: String::new(),
        }
        .to_event_builder()
        .sign_with_keys(&author)
        .unwrap();

        let label = EventBuilder::new(Kind::from(1985u16), "")
            .tags([
                Tag::custom(
                    TagKind::Custom(Cow::Borrowed("e")),
                    [root.id.to_hex()],
                ),
                Tag::custom(
                    TagKind::Custom(Cow::Borrowed("l")),
                    ["priority-high", "org.example.triage"],
                ),
                Tag::custom(TagKind::Custom(Cow::Borrowed("l")), ["needs-info"]),
            ])
            .sign_with_keys(&labeler)
            .unwrap();

        let aggregate = aggregate_labels(&root, &[label]);
        assert_eq!(
            aggregate.normalized["org.example.triage"],
            vec!["priority-high".to_string()]
        );
        assert_eq!(
            aggregate.normalized[DEFAULT_LABEL_NAMESPACE],
            vec!["bug".to_string(), "needs-info".to_string()]
        );
        assert_eq!(
            aggregate.chips,
            vec![
                "bug".to_string(),
                "needs-info".to_string(),
                "priority-high".to_string()
            ]
        );
    }
}

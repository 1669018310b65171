// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Multi-source discovery and state reconciliation.
//!
//! Fetches announcement and state events for a repository address across
//! relays, keeps the newest copy per `(author, kind)` (replaceable-event
//! semantics), and fuses maintainer-authored states into one effective ref
//! map with maintainer precedence. The fusion is a pure function of the
//! event snapshot: no hidden history.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use nostr::{Alphabet, Event, EventId, Filter, Kind, PublicKey, SingleLetterTag, Timestamp};

use crate::address::RepoAddress;
use crate::error::ForgeError;
use crate::events::announcement::RepoAnnouncement;
use crate::events::state::RepoState;
use crate::events::{repo_state_kind, Decoded, REPO_STATE_KIND};
use crate::network::NetworkClient;

/// One ref of the effective state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveRef {
    /// Commit object id
    pub commit: String,
    /// Maintainer whose state provided this value
    pub author: PublicKey,
    /// Timestamp of that state
    pub updated_at: Timestamp,
}

/// Deterministic fusion of maintainer-authored states.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectiveState {
    /// Per ref, the newest maintainer-published value
    pub refs: BTreeMap<String, EffectiveRef>,
    /// Symbolic HEAD target from the newest head-carrying maintainer state
    pub head_ref: Option<String>,
    /// HEAD commit as published by that same state (resolved against its own
    /// snapshot, not against the fused refs)
    pub head_commit: Option<String>,
}

/// Discovery result for one repository address.
#[derive(Debug, Clone, Default)]
pub struct RepoDiscovery {
    /// The chosen announcement, when any was found
    pub announcement: Option<Decoded<RepoAnnouncement>>,
    /// Fused maintainer state, when any state was found
    pub effective_state: Option<EffectiveState>,
    /// Canonical clone URL list, in fallback order
    pub clone_urls: Vec<String>,
    /// Maintainer set (announcement author included)
    pub maintainers: HashSet<PublicKey>,
}

/// Resolves a repository address into announcement, state and clone URLs.
#[derive(Debug, Clone)]
pub struct DiscoveryResolver {
    network: Arc<dyn NetworkClient>,
}

impl DiscoveryResolver {
    /// Resolver over `network`.
    pub fn new(network: Arc<dyn NetworkClient>) -> Self {
        Self { network }
    }

    /// Resolve `address`, optionally pinning a known announcement event id.
    ///
    /// Network errors propagate only when no events were received at all;
    /// partial relay responses are accepted. When no announcement exists the
    /// result carries empty clone URLs and maintainers, and the caller
    /// decides whether to proceed with user-provided URLs.
    pub async fn resolve(
        &self,
        address: &RepoAddress,
        announcement_id: Option<EventId>,
    ) -> Result<RepoDiscovery, ForgeError> {
        let kinds = [Kind::GitRepoAnnouncement, repo_state_kind()];
        let mut filters: Vec<Filter> = vec![
            Filter::new().kinds(kinds).custom_tag(
                SingleLetterTag::lowercase(Alphabet::A),
                address.to_tag_value(),
            ),
            Filter::new()
                .kinds(kinds)
                .author(address.public_key())
                .identifier(address.identifier()),
        ];
        if !address.identifier().is_empty() {
            filters.push(Filter::new().kinds(kinds).custom_tag(
                SingleLetterTag::lowercase(Alphabet::D),
                address.identifier(),
            ));
        }
        if let Some(id) = announcement_id {
            filters.push(Filter::new().id(id));
        }

        let events = self.network.fetch_events(filters).await?;
        Ok(reconcile(address, &events))
    }
}

/// Pure reconciliation over an event snapshot.
pub fn reconcile(address: &RepoAddress, events: &[Event]) -> RepoDiscovery {
    // Replaceable semantics: newest per (author, kind)
    let mut newest: HashMap<(PublicKey, u16), &Event> = HashMap::new();
    for event in events {
        let key = (event.pubkey, event.kind.as_u16());
        match newest.get(&key) {
            Some(existing) if existing.created_at >= event.created_at => {}
            _ => {
                newest.insert(key, event);
            }
        }
    }

    let announcements: Vec<Decoded<RepoAnnouncement>> = newest
        .values()
        .filter(|e| e.kind == Kind::GitRepoAnnouncement)
        .filter_map(|e| RepoAnnouncement::from_event(e).ok())
        .filter(|a| a.value.identifier == address.identifier())
        .collect();

    let announcement = choose_announcement(address, announcements);

    let mut maintainers: HashSet<PublicKey> = HashSet::new();
    if let Some(chosen) = &announcement {
        maintainers.insert(chosen.author);
        maintainers.extend(chosen.value.maintainers.iter().copied());
    }

    let states: Vec<Decoded<RepoState>> = newest
        .values()
        .filter(|e| e.kind.as_u16() == REPO_STATE_KIND)
        .filter(|e| maintainers.contains(&e.pubkey))
        .filter_map(|e| RepoState::from_event(e).ok())
        .filter(|s| s.value.identifier == address.identifier())
        .collect();

    let effective_state = effective_state(&maintainers, &states);

    RepoDiscovery {
        clone_urls: announcement
            .as_ref()
            .map(|a| a.value.clone.clone())
            .unwrap_or_default(),
        announcement,
        effective_state,
        maintainers,
    }
}

fn choose_announcement(
    address: &RepoAddress,
    mut candidates: Vec<Decoded<RepoAnnouncement>>,
) -> Option<Decoded<RepoAnnouncement>> {
    if candidates.is_empty() {
        return None;
    }

    // Deterministic order: newest first, author as tie-break
    candidates.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.author.to_hex().cmp(&b.author.to_hex()))
    });

    // The address owner's own announcement wins
    if let Some(pos) = candidates
        .iter()
        .position(|c| c.author == address.public_key())
    {
        return Some(candidates.swap_remove(pos));
    }

    // Else any announcement whose author is recognized as a maintainer by
    // some candidate
    let recognized: HashSet<PublicKey> = candidates
        .iter()
        .flat_map(|c| c.value.maintainers.iter().copied())
        .collect();
    if let Some(pos) = candidates.iter().position(|c| recognized.contains(&c.author)) {
        return Some(candidates.swap_remove(pos));
    }

    // Else the newest
    Some(candidates.remove(0))
}

/// Fuse maintainer-authored states: per ref the newest maintainer value
/// wins; non-maintainer states are ignored entirely; HEAD comes from the
/// newest head-carrying maintainer state, resolved within that snapshot.
///
/// Ties on timestamp break towards the lexicographically smaller author key
/// so the fusion stays deterministic for any input order.
pub fn effective_state(
    maintainers: &HashSet<PublicKey>,
    states: &[Decoded<RepoState>],
) -> Option<EffectiveState> {
    let mut fused = EffectiveState::default();
    let mut head_at: Option<(Timestamp, PublicKey)> = None;

    let mut any = false;
    for state in states {
        if !maintainers.contains(&state.author) {
            continue;
        }
        any = true;

        for (name, ref_state) in &state.value.refs {
            let replace = match fused.refs.get(name) {
                None => true,
                Some(existing) => match state.created_at.cmp(&existing.updated_at) {
                    std::cmp::Ordering::Greater => true,
                    std::cmp::Ordering::Less => false,
                    std::cmp::Ordering::Equal => {
                        state.author.to_hex() < existing.author.to_hex()
                    }
                },
            };
            if replace {
                fused.refs.insert(
                    name.clone(),
                    EffectiveRef {
                        commit: ref_state.commit.clone(),
                        author: state.author,
                        updated_at: state.created_at,
                    },
                );
            }
        }

        if state.value.head.is_some() {
            let replace = match &head_at {
                None => true,
                Some((at, author)) => match state.created_at.cmp(at) {
                    std::cmp::Ordering::Greater => true,
                    std::cmp::Ordering::Less => false,
                    std::cmp::Ordering::Equal => state.author.to_hex() < author.to_hex(),
                },
            };
            if replace {
                head_at = Some((state.created_at, state.author));
                fused.head_ref = state.value.head.clone();
                fused.head_commit = state.value.head_commit().map(ToString::to_string);
            }
        }
    }

    any.then_some(fused)
}

// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Repository announcement (kind 30617).
//!
//! Authoritative metadata event for a repository: maintainer set, canonical
//! clone URL list, monitored relays. Address-replaceable: for a given
//! `(author, identifier)` only the newest copy is retained.

use std::borrow::Cow;

use nostr::{Event, EventBuilder, Kind, PublicKey, RelayUrl, Tag, TagKind};

use super::{check_kind, run_validation, tag_value, tag_values, CodecError, Decoded};

/// Repository announcement payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoAnnouncement {
    /// Repository identifier (`d` tag, usually a kebab-case short name)
    pub identifier: String,
    /// Human-readable project name
    pub name: Option<String>,
    /// Brief project description
    pub description: Option<String>,
    /// Webpage URLs
    pub web: Vec<String>,
    /// URLs for git-cloning, in fallback order
    pub clone: Vec<String>,
    /// Relays this repository monitors for patches and issues
    pub relays: Vec<RelayUrl>,
    /// Recognized maintainers
    pub maintainers: Vec<PublicKey>,
    /// Hashtags
    pub hashtags: Vec<String>,
    /// Earliest unique commit id, used to group mirrors of the same
    /// logical repository
    pub euc: Option<String>,
}

impl RepoAnnouncement {
    /// Encode with the canonical tag layout.
    ///
    /// Emission order: `d`, `name?`, `description?`, `web*`, `clone*`,
    /// `relays*`, `maintainers*`, `t*`, `r=<euc> euc?`. Maintainers and
    /// hashtags are sorted so equivalent payloads encode byte-equal; clone
    /// and web URLs keep their caller-given order (it is meaningful for
    /// transport fallback).
    pub fn to_event_builder(self) -> EventBuilder {
        let mut tags: Vec<Tag> = Vec::with_capacity(4);

        tags.push(Tag::identifier(self.identifier));

        if let Some(name) = self.name {
            tags.push(Tag::custom(
                TagKind::Custom(Cow::Borrowed("name")),
                [name],
            ));
        }

        if let Some(description) = self.description {
            tags.push(Tag::custom(
                TagKind::Custom(Cow::Borrowed("description")),
                [description],
            ));
        }

        for url in self.web {
            tags.push(Tag::custom(TagKind::Custom(Cow::Borrowed("web")), [url]));
        }

        for url in self.clone {
            tags.push(Tag::custom(TagKind::Custom(Cow::Borrowed("clone")), [url]));
        }

        for relay in self.relays {
            tags.push(Tag::custom(
                TagKind::Custom(Cow::Borrowed("relays")),
                [relay.to_string()],
            ));
        }

        let mut maintainers: Vec<String> =
            self.maintainers.iter().map(|pk| pk.to_hex()).collect();
        maintainers.sort_unstable();
        maintainers.dedup();
        for maintainer in maintainers {
            tags.push(Tag::custom(
                TagKind::Custom(Cow::Borrowed("maintainers")),
                [maintainer],
            ));
        }

        let mut hashtags = self.hashtags;
        hashtags.sort_unstable();
        hashtags.dedup();
        for hashtag in hashtags {
            tags.push(Tag::hashtag(hashtag));
        }

        if let Some(euc) = self.euc {
            tags.push(Tag::custom(
                TagKind::Custom(Cow::Borrowed("r")),
                [euc, String::from("euc")],
            ));
        }

        EventBuilder::new(Kind::GitRepoAnnouncement, "").tags(tags)
    }

    /// Decode from a wire event.
    ///
    /// Tolerant of the multi-value tag layout (`["clone", url1, url2]`) some
    /// emitters use: every trailing value of a repeated tag is collected.
    pub fn from_event(event: &Event) -> Result<Decoded<Self>, CodecError> {
        check_kind(event, Kind::GitRepoAnnouncement.as_u16())?;
        run_validation(event)?;

        let identifier = tag_value(event, "d").unwrap_or_default().to_string();

        let mut announcement = Self {
            identifier,
            name: tag_value(event, "name").map(ToString::to_string),
            description: tag_value(event, "description").map(ToString::to_string),
            ..Default::default()
        };

        for tag in event.tags.iter() {
            let slice = tag.as_slice();
            let Some(name) = slice.first() else { continue };
            let rest = &slice[1..];
            match name.as_str() {
                "web" => announcement.web.extend(rest.iter().cloned()),
                "clone" => announcement.clone.extend(rest.iter().cloned()),
                "relays" => announcement
                    .relays
                    .extend(rest.iter().filter_map(|v| RelayUrl::parse(v).ok())),
                "maintainers" => announcement
                    .maintainers
                    .extend(rest.iter().filter_map(|v| PublicKey::from_hex(v).ok())),
                "t" => announcement
                    .hashtags
                    .extend(rest.first().cloned().into_iter()),
                "r" => {
                    // `r` with the `euc` marker carries the grouping commit
                    if rest.get(1).map(String::as_str) == Some("euc") {
                        announcement.euc = rest.first().cloned();
                    } else if announcement.euc.is_none() && rest.len() == 1 {
                        announcement.euc = rest.first().cloned();
                    }
                }
                _ => {}
            }
        }

        Ok(Decoded::new(event, announcement))
    }

    /// The grouping key for cross-mirror correlation, when present.
    #[inline]
    pub fn grouping_key(&self) -> Option<&str> {
        self.euc.as_deref()
    }
}

/// Strict wire-shape predicate for kind 30617.
pub fn validate(event: &Event) -> Result<(), CodecError> {
    check_kind(event, Kind::GitRepoAnnouncement.as_u16())?;
    if tag_value(event, "d").is_none() {
        return Err(CodecError::MissingTag("d"));
    }
    for value in tag_values(event, "maintainers") {
        PublicKey::from_hex(value).map_err(|_| CodecError::InvalidTag("maintainers"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use nostr::Keys;

    use super::*;

    fn sample(maintainer: PublicKey) -> RepoAnnouncement {
        RepoAnnouncement {
            identifier: "forge".to_string(),
            name: Some("Forge".to_string()),
            description: Some("engine".to_string()),
            web: vec!["https://example.com/forge".to_string()],
            clone: vec![
                "https://github.com/example/forge.git".to_string(),
                "https://codeberg.org/example/forge.git".to_string(),
            ],
            relays: vec![RelayUrl::parse("wss://relay.example.com").unwrap()],
            maintainers: vec![maintainer],
            hashtags: vec!["git".to_string()],
            euc: Some("4f0c1e9a".to_string()),
        }
    }

    #[test]
    fn roundtrip_preserves_payload() {
        let keys = Keys::generate();
        let announcement = sample(keys.public_key());
        let event = announcement
            .clone()
            .to_event_builder()
            .sign_with_keys(&keys)
            .unwrap();
        let decoded = RepoAnnouncement::from_event(&event).unwrap();
        assert_eq!(decoded.value, announcement);
        assert_eq!(decoded.author, keys.public_key());
    }

    #[test]
    fn reencode_is_byte_identical() {
        let keys = Keys::generate();
        let event = sample(keys.public_key())
            .to_event_builder()
            .sign_with_keys(&keys)
            .unwrap();
        validate(&event).unwrap();
        let decoded = RepoAnnouncement::from_event(&event).unwrap();
        let reencoded = decoded
            .value
            .to_event_builder()
            .custom_created_at(event.created_at)
            .sign_with_keys(&keys)
            .unwrap();
        // Equal ids mean the canonical serialization (kind, tags, content,
        // created_at) is byte-identical; only the signature may differ.
        assert_eq!(reencoded.id, event.id);
    }

    #[test]
    fn tolerant_of_multi_value_clone_tag() {
        let keys = Keys::generate();
        let tags = vec![
            Tag::identifier("forge"),
            Tag::custom(
                TagKind::Custom(Cow::Borrowed("clone")),
                ["https://a.example/x.git", "https://b.example/x.git"],
            ),
        ];
        let event = EventBuilder::new(Kind::GitRepoAnnouncement, "")
            .tags(tags)
            .sign_with_keys(&keys)
            .unwrap();
        let decoded = RepoAnnouncement::from_event(&event).unwrap();
        assert_eq!(decoded.value.clone.len(), 2);
    }

    #[test]
    fn validate_requires_identifier() {
        let keys = Keys::generate();
        let event = EventBuilder::new(Kind::GitRepoAnnouncement, "")
            .sign_with_keys(&keys)
            .unwrap();
        assert!(validate(&event).is_err());
    }
}

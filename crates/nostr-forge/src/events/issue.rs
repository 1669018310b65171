// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Git issue event (kind 1621). Content is markdown.

use std::borrow::Cow;

use nostr::{Event, EventBuilder, Kind, PublicKey, Tag, TagKind};

use super::{
    address_tag, check_kind, public_keys, run_validation, tag_value, tag_values, CodecError,
    Decoded,
};
use crate::address::RepoAddress;

/// Issue payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueEvent {
    /// Repository address (`a` tag)
    pub address: RepoAddress,
    /// Subject line
    pub subject: Option<String>,
    /// Tagged public keys
    pub recipients: Vec<PublicKey>,
    /// Labels
    pub hashtags: Vec<String>,
    /// Markdown body
    pub content: String,
}

impl IssueEvent {
    /// Encode with the canonical tag layout: `a`, `subject?`, `p*` (sorted),
    /// `t*` (sorted).
    pub fn to_event_builder(self) -> EventBuilder {
        let mut tags: Vec<Tag> = Vec::with_capacity(2);

        tags.push(Tag::custom(
            TagKind::Custom(Cow::Borrowed("a")),
            [self.address.to_tag_value()],
        ));

        if let Some(subject) = self.subject {
            tags.push(Tag::custom(
                TagKind::Custom(Cow::Borrowed("subject")),
                [subject],
            ));
        }

        let mut recipients: Vec<String> = self.recipients.iter().map(|pk| pk.to_hex()).collect();
        recipients.sort_unstable();
        recipients.dedup();
        for recipient in recipients {
            tags.push(Tag::custom(TagKind::Custom(Cow::Borrowed("p")), [recipient]));
        }

        let mut hashtags = self.hashtags;
        hashtags.sort_unstable();
        hashtags.dedup();
        for hashtag in hashtags {
            tags.push(Tag::hashtag(hashtag));
        }

        EventBuilder::new(Kind::GitIssue, self.content).tags(tags)
    }

    /// Decode from a wire event.
    pub fn from_event(event: &Event) -> Result<Decoded<Self>, CodecError> {
        check_kind(event, Kind::GitIssue.as_u16())?;
        run_validation(event)?;
        Ok(Decoded::new(
            event,
            Self {
                address: address_tag(event)?,
                subject: tag_value(event, "subject").map(ToString::to_string),
                recipients: public_keys(event),
                hashtags: tag_values(event, "t").map(ToString::to_string).collect(),
                content: event.content.clone(),
            },
        ))
    }
}

/// Strict wire-shape predicate for kind 1621.
pub fn validate(event: &Event) -> Result<(), CodecError> {
    check_kind(event, Kind::GitIssue.as_u16())?;
    address_tag(event)?;
    if tag_value(event, "subject").is_none() {
        return Err(CodecError::MissingTag("subject"));
    }
    Ok(())
}

// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Git patch event (kind 1617).
//!
//! Content is a unified diff with a leading commit message; tags carry the
//! repository address, the commit and parent commit ids and the committer
//! identity. Patches are created by any contributor and never mutated.

use std::borrow::Cow;

use nostr::{Event, EventBuilder, EventId, Kind, PublicKey, Tag, TagKind, Timestamp};

use super::{
    address_tag, check_kind, public_keys, root_id_tag, run_validation, tag_value, tag_values,
    CodecError, Decoded,
};
use crate::address::RepoAddress;

/// Committer identity: `<name> <email> <unix-ts> <tz-offset-minutes>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitterInfo {
    /// Name
    pub name: String,
    /// Email
    pub email: String,
    /// Commit timestamp
    pub timestamp: Timestamp,
    /// Timezone offset in minutes
    pub offset_minutes: i32,
}

/// Patch payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchEvent {
    /// Repository address (`a` tag)
    pub address: RepoAddress,
    /// Root proposal this patch belongs to, when it is a revision
    pub root_id: Option<EventId>,
    /// Commit object id
    pub commit: String,
    /// Parent commit object id
    pub parent_commit: Option<String>,
    /// Committer identity
    pub committer: Option<CommitterInfo>,
    /// Tagged public keys (maintainers, reviewers)
    pub recipients: Vec<PublicKey>,
    /// Hashtags (`cover-letter`, `root`, ...)
    pub hashtags: Vec<String>,
    /// Unified diff with a leading commit message
    pub content: String,
}

impl PatchEvent {
    /// Encode with the canonical tag layout: `a`, `e?`, `commit`,
    /// `parent-commit?`, `committer?`, `p*` (sorted), `t*` (sorted).
    pub fn to_event_builder(self) -> EventBuilder {
        let mut tags: Vec<Tag> = Vec::with_capacity(4);

        tags.push(Tag::custom(
            TagKind::Custom(Cow::Borrowed("a")),
            [self.address.to_tag_value()],
        ));

        if let Some(root_id) = self.root_id {
            tags.push(Tag::custom(
                TagKind::Custom(Cow::Borrowed("e")),
                [root_id.to_hex()],
            ));
        }

        tags.push(Tag::custom(
            TagKind::Custom(Cow::Borrowed("commit")),
            [self.commit],
        ));

        if let Some(parent) = self.parent_commit {
            tags.push(Tag::custom(
                TagKind::Custom(Cow::Borrowed("parent-commit")),
                [parent],
            ));
        }

        if let Some(committer) = self.committer {
            tags.push(Tag::custom(
                TagKind::Custom(Cow::Borrowed("committer")),
                [
                    committer.name,
                    committer.email,
                    committer.timestamp.to_string(),
                    committer.offset_minutes.to_string(),
                ],
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

        EventBuilder::new(Kind::GitPatch, self.content).tags(tags)
    }

    /// Decode from a wire event.
    pub fn from_event(event: &Event) -> Result<Decoded<Self>, CodecError> {
        check_kind(event, Kind::GitPatch.as_u16())?;
        run_validation(event)?;

        let committer = tag_committer(event);

        Ok(Decoded::new(
            event,
            Self {
                address: address_tag(event)?,
                root_id: root_id_tag(event),
                commit: tag_value(event, "commit")
                    .ok_or(CodecError::MissingTag("commit"))?
                    .to_string(),
                parent_commit: tag_value(event, "parent-commit").map(ToString::to_string),
                committer,
                recipients: public_keys(event),
                hashtags: tag_values(event, "t").map(ToString::to_string).collect(),
                content: event.content.clone(),
            },
        ))
    }

    /// Whether this patch is a cover letter rather than a diff.
    pub fn is_cover_letter(&self) -> bool {
        self.hashtags.iter().any(|t| t == "cover-letter")
    }

    /// Commit message subject derived from the content header.
    ///
    /// A mail-style `Subject:` line wins, with any `[PATCH ...]` prefix
    /// stripped; otherwise the first non-empty line before the diff body.
    pub fn subject(&self) -> Option<String> {
        self.split_message().0
    }

    /// Commit message body below the subject, before the diff.
    pub fn description(&self) -> Option<String> {
        self.split_message().1
    }

    fn split_message(&self) -> (Option<String>, Option<String>) {
        let header = self.message_header();
        let mut subject: Option<String> = None;
        let mut body: Vec<&str> = Vec::new();
        let mut in_body = false;
        for line in header.lines() {
            let trimmed = line.trim();
            if in_body {
                body.push(line);
                continue;
            }
            if trimmed.is_empty() {
                if subject.is_some() {
                    in_body = true;
                }
                continue;
            }
            // Mail-style envelope lines preceding the message
            if trimmed.starts_with("From ")
                || trimmed.starts_with("From: ")
                || trimmed.starts_with("Date: ")
            {
                continue;
            }
            if let Some(s) = trimmed.strip_prefix("Subject:") {
                subject = Some(strip_patch_prefix(s.trim()).to_string());
                continue;
            }
            match subject {
                None => subject = Some(trimmed.to_string()),
                Some(_) => {
                    in_body = true;
                    body.push(line);
                }
            }
        }
        let description = body.join("\n").trim().to_string();
        (
            subject.filter(|s| !s.is_empty()),
            (!description.is_empty()).then_some(description),
        )
    }

    /// Content lines before the diff body.
    fn message_header(&self) -> &str {
        let end = self
            .content
            .find("\ndiff --git ")
            .or_else(|| self.content.find("\n---\n"))
            .unwrap_or(self.content.len());
        &self.content[..end]
    }
}

fn strip_patch_prefix(subject: &str) -> &str {
    if subject.starts_with("[PATCH") {
        if let Some(end) = subject.find(']') {
            return subject[end + 1..].trim();
        }
    }
    subject
}

fn tag_committer(event: &Event) -> Option<CommitterInfo> {
    event.tags.iter().find_map(|tag| {
        let slice = tag.as_slice();
        if slice.first().map(String::as_str) != Some("committer") {
            return None;
        }
        Some(CommitterInfo {
            name: slice.get(1).cloned().unwrap_or_default(),
            email: slice.get(2).cloned().unwrap_or_default(),
            timestamp: slice
                .get(3)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Timestamp::from_secs)
                .unwrap_or_else(|| Timestamp::from_secs(0)),
            offset_minutes: slice
                .get(4)
                .and_then(|v| v.parse::<i32>().ok())
                .unwrap_or_default(),
        })
    })
}

/// Strict wire-shape predicate for kind 1617.
pub fn validate(event: &Event) -> Result<(), CodecError> {
    check_kind(event, Kind::GitPatch.as_u16())?;
    address_tag(event)?;
    let commit = tag_value(event, "commit").ok_or(CodecError::MissingTag("commit"))?;
    if commit.len() != 40 || !commit.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CodecError::InvalidTag("commit"));
    }
    if tag_committer(event).is_none() {
        return Err(CodecError::MissingTag("committer"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use nostr::Keys;

    use super::*;

    const OID: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const PARENT: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    const DIFF: &str = "\
Add greeting module

Teach the tool to greet the user on startup.

diff --git a/greet.txt b/greet.txt
new file mode 100644
--- /dev/null
+++ b/greet.txt
@@ -0,0 +1 @@
+hello
";

    fn sample(owner: PublicKey) -> PatchEvent {
        PatchEvent {
            address: RepoAddress::new(owner, "forge"),
            root_id: None,
            commit: OID.to_string(),
            parent_commit: Some(PARENT.to_string()),
            committer: Some(CommitterInfo {
                name: "Alice".to_string(),
                email: "alice@example.com".to_string(),
                timestamp: Timestamp::from_secs(1_700_000_000),
                offset_minutes: 120,
            }),
            recipients: Vec::new(),
            hashtags: vec!["root".to_string()],
            content: DIFF.to_string(),
        }
    }

    #[test]
    fn roundtrip() {
        let keys = Keys::generate();
        let patch = sample(keys.public_key());
        let event = patch
            .clone()
            .to_event_builder()
            .sign_with_keys(&keys)
            .unwrap();
        validate(&event).unwrap();
        let decoded = PatchEvent::from_event(&event).unwrap();
        assert_eq!(decoded.value, patch);
    }

    #[test]
    fn subject_from_first_line() {
        let keys = Keys::generate();
        let patch = sample(keys.public_key());
        assert_eq!(patch.subject().as_deref(), Some("Add greeting module"));
        assert_eq!(
            patch.description().as_deref(),
            Some("Teach the tool to greet the user on startup.")
        );
    }

    #[test]
    fn subject_header_wins() {
        let keys = Keys::generate();
        let mut patch = sample(keys.public_key());
        patch.content = format!(
            "From {OID} Mon Sep 17 00:00:00 2001\nSubject: [PATCH 1/2] Fix parser\n\nBody.\n\ndiff --git a/x b/x\n"
        );
        assert_eq!(patch.subject().as_deref(), Some("Fix parser"));
        assert_eq!(patch.description().as_deref(), Some("Body."));
    }

    #[test]
    fn validate_rejects_missing_commit() {
        let keys = Keys::generate();
        let event = EventBuilder::new(Kind::GitPatch, "diff")
            .tags([Tag::custom(
                TagKind::Custom(Cow::Borrowed("a")),
                [RepoAddress::new(keys.public_key(), "forge").to_tag_value()],
            )])
            .sign_with_keys(&keys)
            .unwrap();
        assert!(validate(&event).is_err());
    }
}

// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Repository resolution and canonical keying.
//!
//! Every input syntax a user can hand the engine (bech32 address, `npub/name`,
//! `pubkey/name`, nip05 handle, bare keys, the serialized `kind:pubkey:id`
//! coordinate) is normalized here, exactly once, into a [`RepoAddress`]. All
//! internal operations run on the canonical form.

use std::fmt;
use std::str::FromStr;

use nostr::nips::nip01::Coordinate;
use nostr::nips::nip19::{FromBech32, Nip19Coordinate, ToBech32};
use nostr::{Kind, PublicKey};
use serde_json::Value;

use crate::error::{ErrorCode, ForgeError};

/// Canonical repository address: the single internal repository identity.
///
/// Wraps a NIP-01 coordinate with the repository-announcement kind (30617).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RepoAddress {
    coordinate: Coordinate,
}

impl RepoAddress {
    /// Construct from a public key and repository identifier.
    pub fn new<S>(public_key: PublicKey, identifier: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            coordinate: Coordinate::new(Kind::GitRepoAnnouncement, public_key)
                .identifier(identifier),
        }
    }

    /// The owner public key.
    #[inline]
    pub fn public_key(&self) -> PublicKey {
        self.coordinate.public_key
    }

    /// The `d` tag identifier.
    #[inline]
    pub fn identifier(&self) -> &str {
        &self.coordinate.identifier
    }

    /// The underlying coordinate.
    #[inline]
    pub fn coordinate(&self) -> &Coordinate {
        &self.coordinate
    }

    /// Serialized form used in `a` tags: `"30617:<pubkey-hex>:<identifier>"`.
    pub fn to_tag_value(&self) -> String {
        self.coordinate.to_string()
    }

    /// Opaque bech32 form (`naddr1...`) for URLs.
    pub fn to_bech32(&self) -> Result<String, ForgeError> {
        let entity = Nip19Coordinate {
            coordinate: self.coordinate.clone(),
            relays: Vec::new(),
        };
        entity
            .to_bech32()
            .map_err(|e| ForgeError::wrap_as(ErrorCode::InvalidInput, e, "encode naddr"))
    }

    /// Canonical filesystem key: `"<npub>/<identifier>"`, or `"<npub>"` when
    /// the identifier is empty. Used only for local paths.
    pub fn fs_key(&self) -> String {
        let npub = self
            .coordinate
            .public_key
            .to_bech32()
            .unwrap_or_else(|_| self.coordinate.public_key.to_hex());
        if self.coordinate.identifier.is_empty() {
            npub
        } else {
            format!("{npub}/{}", self.coordinate.identifier)
        }
    }
}

impl fmt::Display for RepoAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.coordinate)
    }
}

impl FromStr for RepoAddress {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let coordinate = Coordinate::from_str(s)
            .map_err(|e| ForgeError::wrap_as(ErrorCode::InvalidInput, e, "parse coordinate"))?;
        if coordinate.kind != Kind::GitRepoAnnouncement {
            return Err(ForgeError::with_context(
                ErrorCode::InvalidInput,
                format!("kind {} is not a repository announcement", coordinate.kind),
            ));
        }
        Ok(Self { coordinate })
    }
}

/// Decomposed parts of a normalized input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressParts {
    /// Owner public key, hex
    pub pubkey_hex: String,
    /// Owner public key, bech32 (`npub1...`)
    pub encoded_pubkey: String,
    /// Repository identifier, when the input carried one
    pub identifier: Option<String>,
    /// The nip05 handle the key was resolved from, when applicable
    pub nip05: Option<String>,
}

/// Result of normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedAddress {
    /// Canonical address
    pub address: RepoAddress,
    /// Decomposed input parts
    pub parts: AddressParts,
}

impl NormalizedAddress {
    fn from_key(
        public_key: PublicKey,
        identifier: Option<&str>,
        nip05: Option<&str>,
    ) -> Result<Self, ForgeError> {
        let identifier: Option<String> = identifier
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string);
        let encoded_pubkey = public_key
            .to_bech32()
            .map_err(|e| ForgeError::wrap_as(ErrorCode::InvalidInput, e, "encode npub"))?;
        Ok(Self {
            address: RepoAddress::new(public_key, identifier.clone().unwrap_or_default()),
            parts: AddressParts {
                pubkey_hex: public_key.to_hex(),
                encoded_pubkey,
                identifier,
                nip05: nip05.map(ToString::to_string),
            },
        })
    }
}

/// Normalizes any supported repository identifier syntax.
#[derive(Debug, Clone, Default)]
pub struct KeyNormalizer {
    resolver: Nip05Resolver,
}

impl KeyNormalizer {
    /// Construct with a custom nip05 resolver.
    pub fn with_resolver(resolver: Nip05Resolver) -> Self {
        Self { resolver }
    }

    /// Normalize `input`, resolving nip05 handles over the network.
    pub async fn normalize(&self, input: &str) -> Result<NormalizedAddress, ForgeError> {
        match Self::normalize_offline(input) {
            Ok(normalized) => Ok(normalized),
            Err(e) if e.code == ErrorCode::RequiresNetwork => {
                let (handle, identifier) = split_nip05_input(input)
                    .ok_or_else(|| ForgeError::with_context(ErrorCode::InvalidInput, input))?;
                let public_key = self.resolver.resolve(&handle).await?;
                NormalizedAddress::from_key(public_key, identifier.as_deref(), Some(&handle))
            }
            Err(e) => Err(e),
        }
    }

    /// Normalize `input` without network access.
    ///
    /// Fails with [`ErrorCode::RequiresNetwork`] when the input is a nip05
    /// form, and [`ErrorCode::InvalidInput`] for unrecognized syntax.
    pub fn normalize_offline(input: &str) -> Result<NormalizedAddress, ForgeError> {
        let input: &str = input.trim();
        if input.is_empty() {
            return Err(ForgeError::with_context(ErrorCode::InvalidInput, "empty input"));
        }

        // Serialized coordinate "30617:<hex>:<identifier>" (the canonical form
        // itself normalizes to itself)
        if let Ok(address) = RepoAddress::from_str(input) {
            let public_key = address.public_key();
            let identifier = address.identifier().to_string();
            return NormalizedAddress::from_key(
                public_key,
                (!identifier.is_empty()).then_some(identifier.as_str()),
                None,
            );
        }

        // Bech32 repo address
        if input.starts_with("naddr1") {
            let entity = Nip19Coordinate::from_bech32(input)
                .map_err(|e| ForgeError::wrap_as(ErrorCode::InvalidInput, e, "decode naddr"))?;
            if entity.coordinate.kind != Kind::GitRepoAnnouncement {
                return Err(ForgeError::with_context(
                    ErrorCode::InvalidInput,
                    format!(
                        "kind {} is not a repository announcement",
                        entity.coordinate.kind
                    ),
                ));
            }
            return NormalizedAddress::from_key(
                entity.coordinate.public_key,
                Some(&entity.coordinate.identifier),
                None,
            );
        }

        // "<key-or-handle>/<name>" compound
        if let Some((head, name)) = input.split_once('/') {
            let head = head.trim();
            let name = name.trim();
            if let Some(public_key) = parse_bare_key(head) {
                return NormalizedAddress::from_key(public_key, Some(name), None);
            }
            if looks_like_nip05(head) {
                return Err(ForgeError::with_context(ErrorCode::RequiresNetwork, head));
            }
            return Err(ForgeError::with_context(ErrorCode::InvalidInput, input));
        }

        // Bare key
        if let Some(public_key) = parse_bare_key(input) {
            return NormalizedAddress::from_key(public_key, None, None);
        }

        // Bare nip05
        if looks_like_nip05(input) {
            return Err(ForgeError::with_context(ErrorCode::RequiresNetwork, input));
        }

        Err(ForgeError::with_context(ErrorCode::InvalidInput, input))
    }
}

fn parse_bare_key(s: &str) -> Option<PublicKey> {
    if s.starts_with("npub1") {
        return PublicKey::from_bech32(s).ok();
    }
    if s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit()) {
        return PublicKey::from_hex(s).ok();
    }
    None
}

fn looks_like_nip05(s: &str) -> bool {
    let domain = match s.split_once('@') {
        Some((name, domain)) => {
            if name.is_empty() || name.contains(char::is_whitespace) {
                return false;
            }
            domain
        }
        None => s,
    };
    domain.contains('.') && !domain.contains(char::is_whitespace)
}

fn split_nip05_input(input: &str) -> Option<(String, Option<String>)> {
    let input = input.trim();
    let (head, name) = match input.split_once('/') {
        Some((head, name)) => (head.trim(), Some(name.trim().to_string())),
        None => (input, None),
    };
    looks_like_nip05(head).then(|| (head.to_string(), name))
}

/// Canonical filesystem key from raw parts.
///
/// `"<npub>/<identifier>"` when the identifier is non-empty, `"<npub>"`
/// otherwise. Both parts are trimmed; a missing or empty key is invalid.
pub fn canonical_fs_key(npub: &str, identifier: Option<&str>) -> Result<String, ForgeError> {
    let npub = npub.trim();
    if npub.is_empty() {
        return Err(ForgeError::with_context(
            ErrorCode::InvalidInput,
            "missing public key",
        ));
    }
    match identifier.map(str::trim).filter(|s| !s.is_empty()) {
        Some(identifier) => Ok(format!("{npub}/{identifier}")),
        None => Ok(npub.to_string()),
    }
}

/// Detect a legacy filesystem key (numeric event-kind prefixed or
/// `<kind>:`-style). Legacy keys are flagged for migration, never rewritten.
pub fn is_legacy_fs_key(key: &str) -> bool {
    let first = key.split('/').next().unwrap_or(key);
    if first.contains(':') {
        return true;
    }
    !first.is_empty() && first.chars().all(|c| c.is_ascii_digit())
}

/// Resolves nip05 handles to public keys.
///
/// Performs the `.well-known/nostr.json` lookup; a handle without a local
/// part is queried as `_` per convention.
#[derive(Debug, Clone, Default)]
pub struct Nip05Resolver {
    client: reqwest::Client,
}

impl Nip05Resolver {
    /// Construct with a custom HTTP client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Resolve `handle` (`name@domain` or bare `domain`) to a public key.
    pub async fn resolve(&self, handle: &str) -> Result<PublicKey, ForgeError> {
        let (url, name) = compose_url(handle)?;
        let res = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ForgeError::wrap_as(ErrorCode::Unresolvable, e, handle.to_string()))?;
        let json: Value = res
            .json()
            .await
            .map_err(|e| ForgeError::wrap_as(ErrorCode::Unresolvable, e, handle.to_string()))?;
        key_from_json(&json, &name)
            .ok_or_else(|| ForgeError::with_context(ErrorCode::Unresolvable, handle.to_string()))
    }
}

fn compose_url(handle: &str) -> Result<(String, String), ForgeError> {
    let (name, domain) = match handle.split_once('@') {
        Some((name, domain)) => (name, domain),
        None => ("_", handle),
    };
    if name.is_empty() || domain.is_empty() || !domain.contains('.') {
        return Err(ForgeError::with_context(ErrorCode::InvalidInput, handle));
    }
    Ok((
        format!("https://{domain}/.well-known/nostr.json?name={name}"),
        name.to_string(),
    ))
}

fn key_from_json(json: &Value, name: &str) -> Option<PublicKey> {
    json.get("names")
        .and_then(|names| names.get(name))
        .and_then(|value| value.as_str())
        .and_then(|pubkey| PublicKey::from_hex(pubkey).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PK_HEX: &str = "aac07d95089ce6adf08b9156d43c1a4ab594c6130b7dcb12ec199008c5819a2f";

    fn pk() -> PublicKey {
        PublicKey::from_hex(PK_HEX).unwrap()
    }

    #[test]
    fn tag_value_roundtrip() {
        let addr = RepoAddress::new(pk(), "forge");
        let serialized = addr.to_tag_value();
        assert_eq!(serialized, format!("30617:{PK_HEX}:forge"));
        let parsed = RepoAddress::from_str(&serialized).unwrap();
        assert_eq!(parsed, addr);
    }

    #[test]
    fn normalize_is_idempotent() {
        let input = format!("{PK_HEX}/forge");
        let first = KeyNormalizer::normalize_offline(&input).unwrap();
        let second = KeyNormalizer::normalize_offline(&first.address.to_string()).unwrap();
        assert_eq!(first.address, second.address);
    }

    #[test]
    fn normalize_hex_compound() {
        let normalized = KeyNormalizer::normalize_offline(&format!("{PK_HEX}/my-repo")).unwrap();
        assert_eq!(normalized.address.identifier(), "my-repo");
        assert_eq!(normalized.parts.pubkey_hex, PK_HEX);
        assert!(normalized.parts.encoded_pubkey.starts_with("npub1"));
        assert_eq!(normalized.parts.nip05, None);
    }

    #[test]
    fn normalize_npub_compound() {
        let npub = pk().to_bech32().unwrap();
        let normalized = KeyNormalizer::normalize_offline(&format!("{npub}/repo")).unwrap();
        assert_eq!(normalized.address.public_key(), pk());
        assert_eq!(normalized.address.identifier(), "repo");
    }

    #[test]
    fn normalize_bare_keys() {
        let bare = KeyNormalizer::normalize_offline(PK_HEX).unwrap();
        assert_eq!(bare.address.identifier(), "");
        assert_eq!(bare.parts.identifier, None);

        let npub = pk().to_bech32().unwrap();
        let bare = KeyNormalizer::normalize_offline(&npub).unwrap();
        assert_eq!(bare.address.public_key(), pk());
    }

    #[test]
    fn normalize_naddr() {
        let addr = RepoAddress::new(pk(), "forge");
        let naddr = addr.to_bech32().unwrap();
        let normalized = KeyNormalizer::normalize_offline(&naddr).unwrap();
        assert_eq!(normalized.address, addr);
    }

    #[test]
    fn normalize_rejects_wrong_kind_naddr() {
        let entity = Nip19Coordinate {
            coordinate: Coordinate::new(Kind::from(30023u16), pk()).identifier("article"),
            relays: Vec::new(),
        };
        let naddr = entity.to_bech32().unwrap();
        let err = KeyNormalizer::normalize_offline(&naddr).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn normalize_nip05_requires_network() {
        let err = KeyNormalizer::normalize_offline("dan@gitworkshop.dev/forge").unwrap_err();
        assert_eq!(err.code, ErrorCode::RequiresNetwork);
        let err = KeyNormalizer::normalize_offline("gitworkshop.dev").unwrap_err();
        assert_eq!(err.code, ErrorCode::RequiresNetwork);
    }

    #[test]
    fn normalize_rejects_garbage() {
        let err = KeyNormalizer::normalize_offline("???").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        let err = KeyNormalizer::normalize_offline("").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn canonical_key_trims() {
        assert_eq!(
            canonical_fs_key("npub1alice", Some("  repo  ")).unwrap(),
            "npub1alice/repo"
        );
        assert_eq!(canonical_fs_key(" npub1alice ", None).unwrap(), "npub1alice");
        let err = canonical_fs_key("", None).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn legacy_keys_are_flagged() {
        assert!(is_legacy_fs_key("30617:aac0:forge"));
        assert!(is_legacy_fs_key("12345/forge"));
        assert!(!is_legacy_fs_key("npub1alice/forge"));
        assert!(!is_legacy_fs_key("npub1alice"));
    }

    #[test]
    fn fs_key_forms() {
        let addr = RepoAddress::new(pk(), "forge");
        let npub = pk().to_bech32().unwrap();
        assert_eq!(addr.fs_key(), format!("{npub}/forge"));
        let bare = RepoAddress::new(pk(), "");
        assert_eq!(bare.fs_key(), npub);
    }
}

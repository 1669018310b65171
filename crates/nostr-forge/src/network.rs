// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Event network seams.
//!
//! The engine never talks to relays directly and never sees private keys:
//! event retrieval goes through [`NetworkClient`] and event emission through
//! [`EventPublisher`]. Hosts provide implementations backed by their relay
//! pool and signer.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;

use nostr::util::BoxedFuture;
use nostr::{Event, EventId, Filter, RelayUrl, UnsignedEvent};

use crate::error::ForgeError;

/// Outcome of publishing one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Id of the signed event, when the publisher reports it
    pub id: Option<EventId>,
    /// Relays that accepted the event
    pub success: HashSet<RelayUrl>,
    /// Relays that rejected the event, with related errors
    pub failed: HashMap<RelayUrl, String>,
}

impl PublishReceipt {
    /// Whether at least one relay accepted the event.
    #[inline]
    pub fn any_accepted(&self) -> bool {
        !self.success.is_empty()
    }
}

/// Read access to the event network.
pub trait NetworkClient: fmt::Debug + Send + Sync {
    /// Fetch all events matching any of `filters`.
    ///
    /// Partial relay responses are acceptable: implementations should return
    /// what they received and fail only when no relay produced anything.
    fn fetch_events<'a>(
        &'a self,
        filters: Vec<Filter>,
    ) -> BoxedFuture<'a, Result<Vec<Event>, ForgeError>>;

    /// Relay information document, when the backend exposes one.
    fn relay_info<'a>(
        &'a self,
        _url: &'a RelayUrl,
    ) -> BoxedFuture<'a, Result<Option<serde_json::Value>, ForgeError>> {
        Box::pin(async { Ok(None) })
    }
}

/// Write access to the event network.
///
/// Implementations capture signing credentials privately; the engine hands
/// over unsigned events and receives receipts.
pub trait EventPublisher: fmt::Debug + Send + Sync {
    /// Sign and publish `event`.
    fn publish<'a>(
        &'a self,
        event: UnsignedEvent,
    ) -> BoxedFuture<'a, Result<PublishReceipt, ForgeError>>;
}

/// A [`NetworkClient`] over a fixed in-memory event set.
///
/// Useful for tests and for replaying a previously captured snapshot.
#[derive(Debug, Default)]
pub struct StaticNetwork {
    events: Vec<Event>,
    published: Mutex<Vec<UnsignedEvent>>,
}

impl StaticNetwork {
    /// Build from a fixed event set.
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events,
            published: Mutex::new(Vec::new()),
        }
    }

    /// Events handed to [`EventPublisher::publish`] so far.
    pub fn published(&self) -> Vec<UnsignedEvent> {
        self.published.lock().expect("poisoned").clone()
    }

    /// Minimal filter matching over the fields the planner emits
    /// (`ids`, `kinds`, `authors` and single-letter tags).
    fn matches(filter: &Filter, event: &Event) -> bool {
        let json = match serde_json::to_value(filter) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => return false,
        };
        for (key, value) in json.iter() {
            let values: Vec<String> = match value {
                serde_json::Value::Array(arr) => arr
                    .iter()
                    .filter_map(|v| match v {
                        serde_json::Value::String(s) => Some(s.clone()),
                        serde_json::Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect(),
                _ => continue,
            };
            let ok = match key.as_str() {
                "ids" => values.iter().any(|v| *v == event.id.to_hex()),
                "authors" => values.iter().any(|v| *v == event.pubkey.to_hex()),
                "kinds" => values.iter().any(|v| *v == event.kind.as_u16().to_string()),
                k if k.starts_with('#') && k.len() == 2 => {
                    let letter = &k[1..];
                    event.tags.iter().any(|t| {
                        let slice = t.as_slice();
                        slice.first().map(String::as_str) == Some(letter)
                            && slice.get(1).map(|v| values.contains(v)).unwrap_or(false)
                    })
                }
                _ => true,
            };
            if !ok {
                return false;
            }
        }
        true
    }
}

impl NetworkClient for StaticNetwork {
    fn fetch_events<'a>(
        &'a self,
        filters: Vec<Filter>,
    ) -> BoxedFuture<'a, Result<Vec<Event>, ForgeError>> {
        Box::pin(async move {
            Ok(self
                .events
                .iter()
                .filter(|e| filters.iter().any(|f| Self::matches(f, e)))
                .cloned()
                .collect())
        })
    }
}

impl EventPublisher for StaticNetwork {
    fn publish<'a>(
        &'a self,
        event: UnsignedEvent,
    ) -> BoxedFuture<'a, Result<PublishReceipt, ForgeError>> {
        Box::pin(async move {
            self.published.lock().expect("poisoned").push(event);
            Ok(PublishReceipt::default())
        })
    }
}

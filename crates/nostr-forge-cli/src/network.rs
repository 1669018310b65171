// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Relay-pool backed network client.
//!
//! The engine only knows the [`NetworkClient`] and [`EventPublisher`] seams;
//! this is the host-side implementation over a nostr-sdk relay pool. Signing
//! happens here, from `NOSTR_FORGE_NSEC` when set; the engine itself never
//! sees the key.

use std::sync::Arc;
use std::time::Duration;

use nostr::nips::nip19::FromBech32;
use nostr::util::BoxedFuture;
use nostr::{Event, Filter, Keys, SecretKey, UnsignedEvent};
use nostr_forge::network::{EventPublisher, NetworkClient, PublishReceipt};
use nostr_forge::{ErrorCode, ForgeError};
use nostr_sdk::prelude::NostrSigner;
use nostr_sdk::Client;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Relay pool client exposed to the engine.
#[derive(Debug, Clone)]
pub struct RelayNetwork {
    client: Client,
    keys: Option<Keys>,
}

impl RelayNetwork {
    /// Connect to `relays` and read the signing key from the environment.
    pub async fn connect(relays: &[String]) -> Result<Self, ForgeError> {
        let keys = match std::env::var("NOSTR_FORGE_NSEC") {
            Ok(nsec) => {
                let secret = SecretKey::from_bech32(nsec.trim()).map_err(|e| {
                    ForgeError::wrap_as(ErrorCode::InvalidInput, e, "NOSTR_FORGE_NSEC")
                })?;
                Some(Keys::new(secret))
            }
            Err(_) => None,
        };

        let client = Client::default();
        for relay in relays {
            client
                .add_relay(relay.as_str())
                .await
                .map_err(|e| ForgeError::wrap_as(ErrorCode::RelayError, e, relay.clone()))?;
        }
        client.connect().await;

        Ok(Self { client, keys })
    }

    /// Publisher handle, when a signing key is configured.
    pub fn publisher(self: &Arc<Self>) -> Option<Arc<dyn EventPublisher>> {
        self.keys
            .as_ref()
            .map(|_| self.clone() as Arc<dyn EventPublisher>)
    }
}

impl NetworkClient for RelayNetwork {
    fn fetch_events<'a>(
        &'a self,
        filters: Vec<Filter>,
    ) -> BoxedFuture<'a, Result<Vec<Event>, ForgeError>> {
        Box::pin(async move {
            let mut events: Vec<Event> = Vec::new();
            let mut last_error: Option<ForgeError> = None;

            for filter in filters {
                match self.client.fetch_events(filter, FETCH_TIMEOUT).await {
                    Ok(fetched) => events.extend(fetched),
                    Err(e) => {
                        last_error =
                            Some(ForgeError::wrap_as(ErrorCode::RelayError, e, "fetch events"))
                    }
                }
            }

            // Partial responses are acceptable; error only with nothing at all
            match (events.is_empty(), last_error) {
                (true, Some(e)) => Err(e),
                _ => Ok(events),
            }
        })
    }
}

impl EventPublisher for RelayNetwork {
    fn publish<'a>(
        &'a self,
        event: UnsignedEvent,
    ) -> BoxedFuture<'a, Result<PublishReceipt, ForgeError>> {
        Box::pin(async move {
            let keys = self.keys.as_ref().ok_or_else(|| {
                ForgeError::with_context(ErrorCode::AuthRequired, "no signing key configured")
            })?;
            let signed = keys
                .sign_event(event)
                .await
                .map_err(|e| ForgeError::wrap_as(ErrorCode::AuthInvalid, e, "sign event"))?;
            let output = self
                .client
                .send_event(&signed)
                .await
                .map_err(|e| ForgeError::wrap_as(ErrorCode::RelayError, e, "send event"))?;

            Ok(PublishReceipt {
                id: Some(signed.id),
                success: output.success.iter().cloned().collect(),
                failed: output
                    .failed
                    .iter()
                    .map(|(url, reason)| (url.clone(), reason.clone()))
                    .collect(),
            })
        })
    }
}

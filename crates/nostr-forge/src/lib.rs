// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Nostr-native git collaboration engine.
//!
//! Bridges a signed-event pub/sub fabric (nostr) with standard git
//! repositories hosted on heterogeneous backends: repository discovery from a
//! network address alone, clone/fetch/push over whichever transport works,
//! patch exchange as signed events, and a consistent local projection of the
//! repository's published state across independent relays and mirrors.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub use nostr;

pub mod address;
pub mod context;
pub mod discovery;
pub mod error;
pub mod events;
pub mod git;
pub mod network;
pub mod patch;
pub mod push;
pub mod status;
pub mod store;
pub mod subscription;
pub mod trace;
pub mod transport;
pub mod vendor;

pub use self::address::{KeyNormalizer, NormalizedAddress, RepoAddress};
pub use self::context::{CancelToken, Config, Context};
pub use self::discovery::{DiscoveryResolver, EffectiveState, RepoDiscovery};
pub use self::error::{ErrorCategory, ErrorCode, ForgeError};
pub use self::events::announcement::RepoAnnouncement;
pub use self::events::state::RepoState;
pub use self::git::{Git2Provider, GitProvider};
pub use self::network::{EventPublisher, NetworkClient, PublishReceipt};
pub use self::patch::{MergeAnalysis, MergeAnalysisResult, PatchEngine};
pub use self::push::PushCoordinator;
pub use self::status::StatusResolver;
pub use self::store::RepoStore;
pub use self::subscription::SubscriptionPlanner;
pub use self::transport::TransportCoordinator;
pub use self::vendor::{VendorApi, VendorRegistry};

/// Crate prelude
pub mod prelude {
    #![allow(unknown_lints)]
    #![allow(ambiguous_glob_reexports)]
    #![doc(hidden)]

    pub use crate::address::*;
    pub use crate::context::*;
    pub use crate::discovery::*;
    pub use crate::error::*;
    pub use crate::events::*;
    pub use crate::git::*;
    pub use crate::network::*;
    pub use crate::patch::*;
    pub use crate::push::*;
    pub use crate::status::*;
    pub use crate::store::*;
    pub use crate::subscription::*;
    pub use crate::trace::*;
    pub use crate::transport::*;
    pub use crate::vendor::*;
    pub use crate::*;
}

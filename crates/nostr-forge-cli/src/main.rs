// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! `nostr-forge` command line interface.
//!
//! Thin shell over the engine: wires a [`Context`] from flags and
//! environment, maps engine errors onto the documented exit codes and prints
//! human-readable results. All logic lives in the library.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use nostr::{EventId, Filter, Kind};
use nostr_forge::address::KeyNormalizer;
use nostr_forge::events::patch::PatchEvent;
use nostr_forge::events::status::StatusEvent;
use nostr_forge::git::{Git2Provider, SignatureInfo};
use nostr_forge::status::StatusResolver;
use nostr_forge::{
    CancelToken, Config, Context, DiscoveryResolver, ErrorCategory, ErrorCode, ForgeError,
    PatchEngine, RepoStore,
};

mod network;

use self::network::RelayNetwork;

const DEFAULT_RELAYS: [&str; 2] = ["wss://relay.damus.io", "wss://nos.lol"];

#[derive(Debug, Parser)]
#[command(name = "nostr-forge", about = "Nostr-native git collaboration", version)]
struct Cli {
    /// Base directory for local clones and the cache
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Relay to query (repeatable)
    #[arg(long = "relay", global = true)]
    relays: Vec<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Initialize the local store
    Init,
    /// Discover a repository and clone it locally
    Clone {
        /// Repository address (naddr, npub/name, pubkey/name, nip05/name)
        address: String,
    },
    /// List patches proposed for a repository
    ListPatches {
        /// Repository address
        address: String,
    },
    /// Analyze a patch and apply it to the local clone
    ApplyPatch {
        /// Patch event id (hex)
        patch_id: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            exit_code(&e)
        }
    }
}

/// Exit codes: 0 success, 2 user-actionable, 3 retriable network, 4 fatal,
/// 130 aborted.
fn exit_code(e: &ForgeError) -> ExitCode {
    if e.code == ErrorCode::OperationAborted {
        return ExitCode::from(130);
    }
    match e.category() {
        ErrorCategory::UserActionable => ExitCode::from(2),
        ErrorCategory::Retriable => ExitCode::from(3),
        ErrorCategory::Fatal => ExitCode::from(4),
    }
}

async fn run(cli: Cli) -> Result<(), ForgeError> {
    let root = cli.root.clone().unwrap_or_else(default_root);
    let relays: Vec<String> = if cli.relays.is_empty() {
        DEFAULT_RELAYS.iter().map(ToString::to_string).collect()
    } else {
        cli.relays.clone()
    };

    let network = Arc::new(RelayNetwork::connect(&relays).await?);
    let ctx = Context::new(
        Config::from_env(&root),
        Arc::new(Git2Provider::new()),
        network.clone(),
        network.publisher(),
    )?;

    match cli.command {
        Command::Init => init(&ctx).await,
        Command::Clone { address } => clone(&ctx, &address).await,
        Command::ListPatches { address } => list_patches(&ctx, &address).await,
        Command::ApplyPatch { patch_id } => apply_patch(&ctx, &patch_id).await,
    }
}

fn default_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nostr-forge")
}

async fn init(ctx: &Context) -> Result<(), ForgeError> {
    std::fs::create_dir_all(&ctx.config.root_dir)
        .map_err(|e| ForgeError::wrap_as(ErrorCode::FsError, e, "create root"))?;
    println!("initialized store at {}", ctx.config.root_dir.display());
    Ok(())
}

async fn clone(ctx: &Context, address: &str) -> Result<(), ForgeError> {
    let normalized = KeyNormalizer::default().normalize(address).await?;
    let resolver = DiscoveryResolver::new(ctx.network.clone());
    let discovery = resolver.resolve(&normalized.address, None).await?;

    if discovery.clone_urls.is_empty() {
        return Err(ForgeError::with_context(
            ErrorCode::RepoNotFound,
            format!("no announcement with clone URLs for {}", normalized.address),
        ));
    }

    let store = RepoStore::new(ctx.clone());
    store
        .initialize(&normalized.address, &discovery.clone_urls, &CancelToken::new())
        .await?;

    println!(
        "cloned {} into {}",
        normalized.address,
        ctx.repo_dir(&normalized.address.fs_key()).display()
    );
    if let Some(state) = &discovery.effective_state {
        println!("{} refs published by maintainers", state.refs.len());
    }
    Ok(())
}

async fn list_patches(ctx: &Context, address: &str) -> Result<(), ForgeError> {
    let normalized = KeyNormalizer::default().normalize(address).await?;
    let resolver = DiscoveryResolver::new(ctx.network.clone());
    let discovery = resolver.resolve(&normalized.address, None).await?;

    let filter = Filter::new()
        .kind(Kind::GitPatch)
        .custom_tag(
            nostr::SingleLetterTag::lowercase(nostr::Alphabet::A),
            normalized.address.to_tag_value(),
        );
    let status_filter = Filter::new()
        .kinds([
            Kind::GitStatusOpen,
            Kind::GitStatusApplied,
            Kind::GitStatusClosed,
            Kind::GitStatusDraft,
        ])
        .custom_tag(
            nostr::SingleLetterTag::lowercase(nostr::Alphabet::A),
            normalized.address.to_tag_value(),
        );
    let events = ctx
        .network
        .fetch_events(vec![filter, status_filter])
        .await?;

    let statuses: Vec<_> = events
        .iter()
        .filter_map(|e| StatusEvent::from_event(e).ok())
        .collect();

    let mut count = 0usize;
    for event in &events {
        let Ok(patch) = PatchEvent::from_event(event) else {
            continue;
        };
        count += 1;
        let status = StatusResolver::resolve_latest(
            &patch.event_id,
            &statuses,
            &discovery.maintainers,
            &patch.author,
        )
        .map(|s| format!("{:?}", s.value.status).to_lowercase())
        .unwrap_or_else(|| "open".to_string());
        println!(
            "{}  [{status}]  {}",
            patch.event_id,
            patch.value.subject().unwrap_or_else(|| "(no subject)".to_string())
        );
    }
    if count == 0 {
        println!("no patches found for {}", normalized.address);
    }
    Ok(())
}

async fn apply_patch(ctx: &Context, patch_id: &str) -> Result<(), ForgeError> {
    let id = EventId::from_hex(patch_id)
        .map_err(|e| ForgeError::wrap_as(ErrorCode::InvalidInput, e, "patch id"))?;

    let events = ctx
        .network
        .fetch_events(vec![Filter::new().id(id)])
        .await?;
    let event = events
        .first()
        .ok_or_else(|| ForgeError::with_context(ErrorCode::RepoNotFound, "patch not found"))?;
    let patch = PatchEvent::from_event(event)?;

    // Make sure a local clone exists before analyzing
    let resolver = DiscoveryResolver::new(ctx.network.clone());
    let discovery = resolver.resolve(&patch.value.address, None).await?;
    let store = RepoStore::new(ctx.clone());
    store
        .smart_initialize(
            &patch.value.address,
            &discovery.clone_urls,
            false,
            &CancelToken::new(),
        )
        .await?;

    let engine = PatchEngine::new(ctx.clone());
    let analysis = engine.analyze(&patch, None).await;
    if !analysis.can_merge {
        return Err(ForgeError::with_context(
            ErrorCode::MergeConflict,
            format!(
                "patch does not merge cleanly: {:?} ({})",
                analysis.analysis,
                analysis.conflict_files.join(", ")
            ),
        ));
    }

    let author = patch
        .value
        .committer
        .as_ref()
        .map(|c| SignatureInfo {
            name: c.name.clone(),
            email: c.email.clone(),
            timestamp: c.timestamp.as_u64() as i64,
            offset_minutes: c.offset_minutes,
        })
        .unwrap_or_else(|| SignatureInfo {
            name: "nostr-forge".to_string(),
            email: "forge@localhost".to_string(),
            timestamp: nostr::Timestamp::now().as_u64() as i64,
            offset_minutes: 0,
        });

    let message = patch
        .value
        .subject()
        .map(|s| format!("Apply patch: {s}"))
        .unwrap_or_else(|| "Apply patch".to_string());

    let outcome = engine
        .apply_and_push(&patch, None, &message, author, None, &CancelToken::new())
        .await?;

    match &outcome.merge_commit {
        Some(oid) => println!("applied as {oid}"),
        None => println!("nothing to apply"),
    }
    for remote in &outcome.pushed_remotes {
        println!("pushed to {remote}");
    }
    for (remote, error) in &outcome.push_errors {
        eprintln!("push failed for {remote}: {error}");
    }
    if let Some(warning) = &outcome.warning {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

//! hub - command line access to the artist hub relays

use anyhow::Context;
use clap::{Parser, Subcommand};
use hub_client::{
    ClientConfig, ClientError, CollectOptions, Filter, HubClient, LiveEvents, LiveSource,
    LocalKeySigner,
};
use hub_nostr::{EventTemplate, KIND_NOTE};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hub")]
#[command(about = "Relay tools for the artist hub", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe the configured relays and show the ranking
    Probe,
    /// Run a one-shot query and print matching events as JSON lines
    Collect {
        #[arg(long)]
        kind: u16,
        #[arg(long, default_value_t = 50)]
        limit: u64,
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,
    },
    /// Stream live activities as they change
    WatchLive {
        /// Include activities not hosted on zap.stream
        #[arg(long)]
        all: bool,
        #[arg(long, default_value_t = 40)]
        limit: usize,
    },
    /// List the pubkeys an account follows
    Following {
        /// Hex pubkey of the account
        pubkey: String,
    },
    /// Sign and publish a text note with the local key
    PublishNote {
        #[arg(long)]
        content: String,
        #[arg(long, env = "HUB_NSEC", hide_env_values = true)]
        nsec: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ClientConfig::from_env()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Probe => probe(config).await,
        Commands::Collect {
            kind,
            limit,
            timeout_ms,
        } => collect(config, kind, limit, timeout_ms).await,
        Commands::WatchLive { all, limit } => watch_live(config, all, limit).await,
        Commands::Following { pubkey } => following(config, &pubkey).await,
        Commands::PublishNote { content, nsec } => publish_note(config, content, &nsec).await,
    }
}

async fn probe(config: ClientConfig) -> anyhow::Result<()> {
    let client = HubClient::builder(config).build()?;
    match client.init().await {
        Ok(handle) => {
            for result in handle.report().results() {
                println!("{}", result);
            }
            println!("Using {} relays: {}", handle.relays().len(), handle.relays().join(", "));
        }
        Err(ClientError::NoRelaysReachable(report)) => {
            for result in report.results() {
                println!("{}", result);
            }
            anyhow::bail!("no relays reachable");
        }
        Err(e) => return Err(e.into()),
    }
    client.dispose().await;
    Ok(())
}

async fn collect(config: ClientConfig, kind: u16, limit: u64, timeout_ms: u64) -> anyhow::Result<()> {
    let client = HubClient::builder(config).build()?;
    let filter = Filter::new().kind(kind).limit(limit);
    let options = CollectOptions::default().timeout(Duration::from_millis(timeout_ms));

    let result = client.collect(filter, options).await?;
    for event in &result.events {
        println!("{}", serde_json::to_string(event)?);
    }
    eprintln!(
        "{} events (timed out: {}, end of stored events: {}{})",
        result.events.len(),
        result.timed_out,
        result.reached_eos,
        result.error.as_deref().map(|e| format!(", error: {}", e)).unwrap_or_default()
    );

    client.dispose().await;
    Ok(())
}

async fn watch_live(config: ClientConfig, all: bool, limit: usize) -> anyhow::Result<()> {
    let client = HubClient::builder(config).build()?;
    client.init().await?;

    let source = if all { LiveSource::All } else { LiveSource::ZapStream };
    let store = client.live_events(LiveEvents::new().source(source).limit(limit));
    store.start().await;

    let mut updates = store.watch();
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                if let Some(error) = &snapshot.error {
                    eprintln!("stream ended: {}", error);
                    break;
                }
                println!("--- {} live ---", snapshot.records.len());
                for event in &snapshot.records {
                    println!("{:>5}  {}  {}", event.current_participants, event.title, event.watch_url);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    store.stop().await;
    client.dispose().await;
    Ok(())
}

async fn following(config: ClientConfig, pubkey: &str) -> anyhow::Result<()> {
    let client = HubClient::builder(config).build()?;
    let following = client.following(pubkey).await?;
    for followed in &following {
        println!("{}", followed);
    }
    eprintln!("{} follows", following.len());

    client.dispose().await;
    Ok(())
}

async fn publish_note(config: ClientConfig, content: String, nsec: &str) -> anyhow::Result<()> {
    let signer = LocalKeySigner::from_secret(nsec).context("HUB_NSEC is not a valid secret key")?;
    let client = HubClient::builder(config).local_key(signer).build()?;

    let (event, report) = client
        .publisher()
        .sign_and_publish(EventTemplate::new(KIND_NOTE, content))
        .await?;

    println!("{}", event.id);
    for outcome in &report.outcomes {
        let verdict = if outcome.accepted { "accepted" } else { "rejected" };
        println!("  {} {} {}", verdict, outcome.url, outcome.message);
    }

    client.dispose().await;
    if !report.any_accepted() {
        anyhow::bail!("no relay accepted the note");
    }
    Ok(())
}

//! `mailward` - mail interception proxy.
//!
//! Watches IMAP inboxes, holds SMTP submissions and lets an operator
//! release or discard what was held.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use mailward_core::watcher::ops;
use mailward_core::{
    AccountId, CircuitBreaker, Config, Coordinator, ImapConnector, InterceptHandler, ReleaseEdits,
    ReleaseOutcome, RetryPolicy, Store, Supervisor, WatcherContext,
};
use mailward_smtp::{Listener, ServerConfig};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Used when `--config` is not given; missing means defaults.
const DEFAULT_CONFIG: &str = "mailward.toml";

/// Hold suspicious mail until a reviewer releases it
#[derive(Parser, Debug)]
#[command(name = "mailward")]
#[command(about = "Mail interception proxy", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file [default: mailward.toml]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every active watcher and the SMTP listener until Ctrl-C
    Serve,
    /// Release a held message to its inbox
    Release {
        /// Message row id
        id: i64,

        /// Idempotency key; repeating it replays the first response
        #[arg(long)]
        key: Option<String>,

        /// Replace the subject
        #[arg(long)]
        subject: Option<String>,

        /// Replace the plain-text body
        #[arg(long)]
        body: Option<String>,

        /// Drop every original attachment
        #[arg(long)]
        strip_attachments: bool,
    },
    /// Discard a held message
    Discard {
        /// Message row id
        id: i64,
    },
    /// List recent INBOX messages the store has not seen
    Scan {
        /// Account id
        account: i64,

        /// How many of the newest messages to look at
        #[arg(default_value_t = ops::DEFAULT_SCAN_LIMIT)]
        limit: usize,
    },
    /// Move the newest INBOX messages into quarantine
    Resync {
        /// Account id
        account: i64,

        /// How many of the newest messages to move
        #[arg(default_value_t = ops::DEFAULT_RESYNC_LIMIT)]
        limit: usize,
    },
    /// Clear the circuit-breaker state of an account
    ResetCircuit {
        /// Account id
        account: i64,

        /// Also mark the account active again
        #[arg(long)]
        activate: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailward=info,mailward_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref(), Path::new(DEFAULT_CONFIG)).context("loading configuration")?;
    let store = Store::new(&config.database.path)
        .await
        .with_context(|| format!("opening database {}", config.database.path))?;
    let ctx = watcher_context(&config, store);

    match cli.command {
        Commands::Serve => serve(&config, ctx).await?,
        Commands::Release { id, key, subject, body, strip_attachments } => {
            let edits = ReleaseEdits { subject, body_text: body, body_html: None, strip_attachments };
            let outcome = coordinator(&config, &ctx).release(id, &edits, key.as_deref()).await?;
            print_release(&outcome);
        }
        Commands::Discard { id } => {
            let outcome = coordinator(&config, &ctx).discard(id).await?;
            let status = outcome.status.map_or("unknown", |s| s.as_str());
            if outcome.already {
                println!("message {id} was already discarded");
            } else if outcome.noop {
                println!("message {id} is {status}, nothing to discard");
            } else {
                println!("message {id} discarded");
            }
        }
        Commands::Scan { account, limit } => {
            let found = ops::scan_inbox(&ctx, AccountId::new(account), limit).await?;
            if found.is_empty() {
                println!("no unseen messages in the last {limit}");
            }
            for envelope in found {
                println!(
                    "{:>8}  {:<32}  {}",
                    envelope.uid,
                    envelope.sender.as_deref().unwrap_or("-"),
                    envelope.subject.as_deref().unwrap_or("-"),
                );
            }
        }
        Commands::Resync { account, limit } => {
            let report = ops::resync(&ctx, AccountId::new(account), limit).await?;
            println!("moved {} of {} INBOX messages to quarantine", report.moved, report.checked);
        }
        Commands::ResetCircuit { account, activate } => {
            let id = AccountId::new(account);
            CircuitBreaker::reset(&ctx.store, id).await?;
            if activate {
                ctx.store.set_account_active(id, true).await?;
            }
            println!("circuit reset for account {id}{}", if activate { ", account active" } else { "" });
        }
    }
    Ok(())
}

fn watcher_context(config: &Config, store: Store) -> WatcherContext<ImapConnector> {
    WatcherContext {
        store,
        connector: Arc::new(ImapConnector::new(config.watcher.connect_timeout())),
        config: config.watcher.clone(),
        retry: RetryPolicy::from_config(&config.retry),
        breaker: CircuitBreaker::new(config.retry.circuit_threshold),
    }
}

fn coordinator(config: &Config, ctx: &WatcherContext<ImapConnector>) -> Coordinator<ImapConnector> {
    Coordinator::new(
        ctx.store.clone(),
        Arc::clone(&ctx.connector),
        config.release.clone(),
        config.storage.attachments_root.clone(),
    )
}

fn print_release(outcome: &ReleaseOutcome) {
    let message_id = outcome.message_id.as_deref().unwrap_or("-");
    match outcome.reason.as_deref() {
        Some(reason) => println!("message {}: {reason} ({message_id})", outcome.email_id),
        None => {
            let folder = outcome.folder.as_deref().unwrap_or("-");
            let edited = if outcome.edited { "edited" } else { "unchanged" };
            println!("message {} released to {folder} as {message_id} ({edited})", outcome.email_id);
        }
    }
    if outcome.replayed {
        println!("(replayed from idempotency key)");
    }
}

async fn serve(config: &Config, ctx: WatcherContext<ImapConnector>) -> anyhow::Result<()> {
    info!("Starting Mailward");
    let store = ctx.store.clone();
    let handler = Arc::new(InterceptHandler::new(ctx.store.clone(), ctx.retry.clone()));
    let smtp = ServerConfig {
        hostname: config.smtp.hostname.clone(),
        max_message_size: config.smtp.max_message_size,
        ..ServerConfig::default()
    };
    let addr = config.smtp.bind_addr();
    let listener = Listener::bind(addr.as_str(), smtp, handler)
        .await
        .with_context(|| format!("binding SMTP listener on {addr}"))?;

    let supervisor = Supervisor::new(ctx);
    let started = supervisor.start_all_active().await?;
    info!(watchers = started, "Watchers started");

    let (shutdown, shutdown_rx) = watch::channel(false);
    let mut server = tokio::spawn(listener.serve(shutdown_rx));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Could not listen for Ctrl-C");
            }
            info!("Shutting down");
        }
        result = &mut server => {
            warn!(?result, "SMTP listener exited");
        }
    }

    shutdown.send_replace(true);
    supervisor.shutdown().await;
    if !server.is_finished() {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "SMTP listener failed"),
            Err(e) => warn!(error = %e, "SMTP listener task failed"),
        }
    }
    store.close().await;
    info!("Stopped");
    Ok(())
}

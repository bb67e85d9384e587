use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use tokenq::cli::{self, Commands, ListArgs, QueueCommands, TokenCommands};
use tokenq::models::{format_timestamp, parse_since};
use tokenq::tokens::Addressing;
use tokenq::{api, config, store, telemetry, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(Commands::Setup) => {
            let state = connect(cfg)?;
            state
                .ensure_collections()
                .await
                .context("failed to create collections")?;
            println!(
                "Collections ready: {}, {}",
                state.tokens.collection(),
                state.queue.collection()
            );
            Ok(())
        }
        Some(Commands::Token { command }) => {
            let state = connect(cfg)?;
            handle_token_command(command, &state).await
        }
        Some(Commands::Queue { command }) => {
            let state = connect(cfg)?;
            handle_queue_command(command, &state).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    telemetry::shutdown();

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn connect(cfg: config::Config) -> anyhow::Result<AppState> {
    let store = store::connect(&cfg.store_url)?;
    Ok(AppState::new(cfg, store, CancellationToken::new()))
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to document store...");
    let store = store::connect(&cfg.store_url)?;
    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState::new(cfg, store, shutdown.clone()));

    tracing::info!("Ensuring collections...");
    state
        .ensure_collections()
        .await
        .context("document store not ready")?;

    let app = api::router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("tokenq listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

/// Resolves on ctrl-c. Cancelling the root token ends every in-flight
/// long-poll and backoff so the server can drain.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", e);
        // keep serving; cancellation can still come from elsewhere
        shutdown.cancelled().await;
        return;
    }
    tracing::info!("shutdown requested, cancelling long-polls");
    shutdown.cancel();
}

async fn handle_token_command(cmd: TokenCommands, state: &AppState) -> anyhow::Result<()> {
    match cmd {
        TokenCommands::Get { id } => {
            let token = state.tokens.get_token(&id).await?;
            println!("{}", serde_json::to_string_pretty(&token)?);
        }
        TokenCommands::Delete { ids } => {
            for id in ids {
                match state.tokens.delete_token(&id).await {
                    Ok(()) => println!("Token {} deleted.", id),
                    Err(e) => println!("Token {}: {}", id, e),
                }
            }
        }
        TokenCommands::List(args) => list_tokens(args, state).await?,
    }
    Ok(())
}

async fn list_tokens(args: ListArgs, state: &AppState) -> anyhow::Result<()> {
    let addressing = Addressing::from_params(args.offset, args.start_id, args.end_id)
        .unwrap_or(Addressing::Offset(0));
    let page = state
        .tokens
        .get_tokens(&addressing, args.count, !args.oldest_first)
        .await?;

    println!(
        "{} of {} tokens, offset {}, {}",
        page.rows.len(),
        page.total_rows,
        page.offset,
        if page.newest_first { "newest first" } else { "oldest first" }
    );
    if !page.rows.is_empty() {
        println!("{:<16} {:<26} {:<40}", "ID", "GENERATED", "KEYWORDS");
        for token in &page.rows {
            println!(
                "{:<16} {:<26} {:<40}",
                token.id,
                format_timestamp(&token.body.generated),
                token.body.keywords.join(", ")
            );
        }
    }
    println!(
        "prev: {}  next: {}",
        page.prev.as_deref().unwrap_or("-"),
        page.next.as_deref().unwrap_or("-")
    );
    Ok(())
}

async fn handle_queue_command(cmd: QueueCommands, state: &AppState) -> anyhow::Result<()> {
    match cmd {
        QueueCommands::Size => {
            let size = state.queue.interaction_queue_size().await?;
            println!(
                "{} queued (limit {})",
                size,
                state.queue.settings().limit
            );
        }
        QueueCommands::Waiting { since } => {
            let since = since
                .map(|s| parse_since(&s))
                .transpose()
                .context("Invalid --since timestamp")?;
            let waiting = state.queue.get_waiting_interactions(since).await?;
            if waiting.is_empty() {
                println!("No waiting interactions.");
            } else {
                println!(
                    "{:<34} {:<8} {:<26} {:<10}",
                    "ID", "COLOR", "DEPOSITED", "POSITION"
                );
                for i in waiting {
                    println!(
                        "{:<34} {:<8} {:<26} {:<10}",
                        i.id,
                        i.color,
                        i.deposited_at
                            .map(|ts| format_timestamp(&ts))
                            .unwrap_or_else(|| "-".into()),
                        i.queue_position
                            .map(|p| p.to_string())
                            .unwrap_or_else(|| "-".into())
                    );
                }
            }
        }
    }
    Ok(())
}

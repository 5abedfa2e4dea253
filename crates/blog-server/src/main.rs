use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use blog_api::config::Config;
use blog_db::Database;

#[derive(Parser)]
#[command(name = "blog")]
#[command(about = "Blog API server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default)
    Serve,

    /// Rebuild the search index from every stored post
    Reindex,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blog=debug,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let db = Database::open(&PathBuf::from(&config.db_path))?;
    let search = blog_api::search_from_config(&config)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(db, config, search).await,
        Commands::Reindex => reindex(db, search).await,
    }
}

async fn serve(db: Database, config: Config, search: blog_search::IndexSync) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let state = blog_api::build_state(db, config, search)?;
    let app = blog_api::router(state);

    info!("Blog server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn reindex(db: Database, search: blog_search::IndexSync) -> anyhow::Result<()> {
    if !search.is_enabled() {
        bail!("ELASTICSEARCH_URL is not set; nothing to reindex");
    }

    let posts = tokio::task::spawn_blocking(move || db.all_posts()).await??;
    let total = posts.len();
    info!("Reindexing {} posts", total);

    let report = search.reindex_all(posts).await;
    for (id, e) in &report.failures {
        error!("Post {} failed to index: {}", id, e);
    }
    if !report.is_complete() {
        bail!(
            "reindex incomplete: {} of {} posts failed",
            report.failures.len(),
            total
        );
    }

    info!("Reindexed {} posts", report.indexed);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    ctrl_c.await.ok();
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}

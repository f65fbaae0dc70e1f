//! Relaymesh Daemon Binary
//!
//! A WebSocket hub that fans out client messages and filesystem change
//! events to channel subscribers.
//!
//! # Usage
//!
//! ```bash
//! relaymesh-daemon --port 9870
//! relaymesh-daemon --port 9870 --watch /srv/docs --watch /srv/uploads
//! relaymesh-daemon --token secret=alice --token other=bob
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use relaymesh::hub::{HubServer, StaticTokenValidator};

/// Relaymesh event distribution daemon
#[derive(Parser, Debug)]
#[command(name = "relaymesh-daemon")]
#[command(about = "Real-time event distribution hub")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "9870")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Directory to watch for filesystem changes (repeatable). The
    /// canonical path doubles as the channel name.
    #[arg(long)]
    watch: Vec<PathBuf>,

    /// Static auth token as `token=user` (repeatable)
    #[arg(long)]
    token: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("relaymesh=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    let validator = Arc::new(StaticTokenValidator::from_pairs(&args.token));
    let server = Arc::new(HubServer::new(validator)?);

    for path in &args.watch {
        server.watch(path)?;
    }

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Relaymesh daemon listening on ws://{}", addr);
    if !args.watch.is_empty() {
        let roots = server.watched_roots();
        tracing::info!("Watching {} root(s)", roots.len());
    }

    // Accept connections
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::debug!("Accepted connection from {}", peer);
                let server = Arc::clone(&server);
                tokio::spawn(async move {
                    server.handle(stream).await;
                });
            }
            Err(e) => {
                tracing::error!("Failed to accept connection: {}", e);
            }
        }
    }
}

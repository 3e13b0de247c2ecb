// tracker/src/main.rs

//! Tracker binary.
//!
//! A single stateful server that maps peer identities to listening
//! addresses. One session task per connected peer; the table entry lives
//! exactly as long as the session. It stores no blocks and makes no
//! liveness claims beyond "currently connected".
//!
//! Usage: `tracker <tracker_port>`

mod directory;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;

use directory::{Directory, run_session};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let port = match std::env::args().nth(1).map(|raw| raw.parse::<u16>()) {
        Some(Ok(port)) => port,
        _ => {
            eprintln!("usage: tracker <tracker_port>");
            std::process::exit(1);
        }
    };

    if let Err(err) = run(port).await {
        eprintln!("fatal error: {err}");
        std::process::exit(1);
    }
}

async fn run(port: u16) -> Result<(), String> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| format!("cannot bind tracker port {port}: {e}"))?;

    let directory = Arc::new(Directory::new());
    tracing::info!(port, "tracker listening");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                return Ok(());
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        tokio::spawn(run_session(directory.clone(), stream, addr));
                    }
                    Err(e) => {
                        tracing::warn!("accept failed: {e}");
                    }
                }
            }
        }
    }
}

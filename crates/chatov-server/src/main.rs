use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use chatov_server::{
    config::ServerConfig,
    http::{build_router, AppState},
    queue::{ChatQueue, NewMessage},
};

const CONSOLE_USER: &str = "theodoros_1234_";
const CONSOLE_USER_COLOR: &str = "#FF0000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    chatov_core::logging::init("chatov-server")?;

    let cfg = ServerConfig::load()?;
    let queue = Arc::new(ChatQueue::new(cfg.queue));
    let session_id = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default()
        .to_string();

    let cancel = CancellationToken::new();
    let expiry = tokio::spawn(queue.clone().run_expiry(cancel.clone()));

    let app = build_router(AppState {
        queue: queue.clone(),
        session_id: session_id.clone(),
        request_timeout: cfg.request_timeout,
    });
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", cfg.port))
        .await
        .with_context(|| format!("failed to bind port {}", cfg.port))?;
    tracing::info!(port = cfg.port, session = %session_id, "listening");

    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
    });

    console(&queue).await;

    tracing::info!("stopping");
    cancel.cancel();
    server.await?.context("http server failed")?;
    expiry.await?;
    Ok(())
}

/// Read chat lines from stdin until EOF or Ctrl-C.
async fn console(queue: &ChatQueue) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => return,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(l)) => l,
            Ok(None) => return,
            Err(e) => {
                tracing::error!("stdin read failed: {e}");
                return;
            }
        };

        if line.trim() == "debug" {
            let stats = queue.stats();
            tracing::info!(
                len = stats.len,
                next_id = stats.next_id,
                oldest_id = stats.oldest_id,
                "queue state"
            );
            continue;
        }

        let added = queue.add_messages(line.split(',').map(|text| NewMessage {
            user: CONSOLE_USER.to_string(),
            user_color: CONSOLE_USER_COLOR.to_string(),
            message: text.to_string(),
        }));
        tracing::debug!(added, "queued console messages");
    }
}

use std::{
    env,
    io::{self, IsTerminal},
    sync::Arc,
};

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;

use chatov_core::config::Config;
use chatov_http::HttpTransport;

mod overlay;
mod render;
mod scheduler;

use overlay::{parse_control, Control};
use render::TerminalRenderer;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    chatov_core::logging::init("chatov")?;

    let cfg = Config::load()?;
    let transport = Arc::new(HttpTransport::new(&cfg.server_url, cfg.request_timeout)?);
    tracing::info!(endpoint = transport.endpoint(), "polling for chat messages");

    let shutdown = CancellationToken::new();
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    tokio::spawn(read_controls(control_tx));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.cancel();
        });
    }

    let stdout = io::stdout();
    let no_color = env::var("NO_COLOR").ok();
    let ansi = render::color_enabled(stdout.is_terminal(), no_color.as_deref());
    let renderer = TerminalRenderer::new(stdout, ansi);
    let buffer = overlay::run(&cfg, transport, renderer, control_rx, shutdown).await;
    tracing::info!(displayed = buffer.len(), "stopped");
    Ok(())
}

/// Stdin stands in for viewport and scale-parameter events.
async fn read_controls(tx: mpsc::UnboundedSender<Control>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match parse_control(&line) {
            Some(control) => {
                if tx.send(control).is_err() {
                    return;
                }
            }
            None if line.trim().is_empty() => {}
            None => tracing::warn!("unknown command {line:?} (expected `scale <f>` or `dpr <f>`)"),
        }
    }
}

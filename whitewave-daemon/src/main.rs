//! White Wave Daemon - stdin/stdout client adapter
//!
//! Reads one JSON envelope per line on stdin and writes one JSON reply per
//! line on stdout. Each line is routed on a blocking task, so a slow asset
//! load does not hold up other commands. A request may carry an `id`, which
//! is copied onto its reply for correlation.
//!
//! ```text
//! {"id":1,"target":"router","type":"PLAYER_COMMAND","data":{"type":"PLAY_SOUND","data":{"soundId":"rain"}}}
//! {"ok":true,"activeSoundIds":["rain"],"volumes":{"rain":0.5},"muted":false,"id":1}
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use whitewave_core::{
    engine_factory, CpalBackend, DirAssets, EngineConfig, Envelope, NullBackend, OutputBackend,
    Reply, Router,
};

const DEFAULT_LOG_FILTER: &str = "whitewave=debug,whitewave_core=debug";

/// Command-line arguments for the White Wave daemon
#[derive(Parser, Debug)]
#[command(name = "whitewave")]
#[command(about = "Ambient sound player driven by JSON lines on stdin")]
#[command(version)]
struct Args {
    /// Config file (defaults to the per-user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the sound loops
    #[arg(short, long)]
    sounds_dir: Option<PathBuf>,

    /// Mix silently without opening an audio device
    #[arg(long)]
    null_output: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries replies, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load_from(path)
            .map_err(|e| anyhow!(e))
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => EngineConfig::load(),
    };
    if let Some(sounds_dir) = args.sounds_dir {
        config.sounds_dir = sounds_dir;
    }
    config.validate().map_err(|e| anyhow!("Invalid config: {}", e))?;

    info!("Starting White Wave daemon");
    info!("Sounds directory: {}", config.sounds_dir.display());

    let assets = Arc::new(DirAssets::new(
        config.sounds_dir.clone(),
        config.asset_extension.clone(),
    ));
    let output: Arc<dyn OutputBackend> = if args.null_output {
        info!("Using silent output");
        Arc::new(NullBackend::new())
    } else {
        Arc::new(CpalBackend)
    };
    let timeout = config.reply_timeout();
    let router = Arc::new(Router::with_factory(
        engine_factory(config, assets, output),
        timeout,
    ));

    let (reply_sender, mut reply_receiver) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = reply_receiver.recv().await {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight = JoinSet::new();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }

        let (id, envelope) = match parse_line(&line) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("Rejected line: {}", e);
                let _ = reply_sender.send(render_reply(None, &Reply::failure(e)));
                continue;
            }
        };

        let router = Arc::clone(&router);
        let reply_sender = reply_sender.clone();
        in_flight.spawn_blocking(move || match router.handle_envelope(&envelope) {
            Some(reply) => {
                let _ = reply_sender.send(render_reply(id.as_ref(), &reply));
            }
            None => debug!("Ignored envelope for {:?}", envelope.target),
        });
    }

    while in_flight.join_next().await.is_some() {}
    drop(reply_sender);
    writer
        .await
        .context("Reply writer panicked")?
        .context("Failed to write reply")?;

    // Dropping the router shuts the player host down
    drop(router);
    info!("Daemon shutdown complete");
    Ok(())
}

/// Split an input line into its optional correlation id and envelope
fn parse_line(line: &str) -> Result<(Option<Value>, Envelope), String> {
    let mut value: Value =
        serde_json::from_str(line).map_err(|e| format!("Invalid JSON: {}", e))?;
    let id = value.as_object_mut().and_then(|object| object.remove("id"));
    let envelope =
        serde_json::from_value(value).map_err(|e| format!("Invalid envelope: {}", e))?;
    Ok((id, envelope))
}

fn render_reply(id: Option<&Value>, reply: &Reply) -> String {
    let mut value = serde_json::to_value(reply)
        .unwrap_or_else(|e| serde_json::json!({ "ok": false, "error": e.to_string() }));
    if let (Some(id), Some(object)) = (id, value.as_object_mut()) {
        object.insert("id".to_string(), id.clone());
    }
    value.to_string()
}

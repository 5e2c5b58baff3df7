//! podwall-player: stream podcast posts from a podwall server and play them
//! through the local output device while they download.

mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use podwall_player::decode::SymphoniaDecoder;
use podwall_player::http::{self, HttpRangeClient};
use podwall_player::labels::entry_label;
use podwall_player::output::{self, CpalOutput};
use podwall_player::resolver::{DirectResolver, HttpSourceResolver, SourceResolver};
use podwall_player::telemetry::{HttpTelemetry, NoopTelemetry, Telemetry};
use podwall_player::{Coordinator, PlaybackSession, PlayerConfig, SessionParts};
use podwall_types::{PlayerEvent, TrackId};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,podwall_player=info")),
        )
        .init();

    if args.list_devices {
        for name in output::list_devices(&cpal::default_host())? {
            println!("{name}");
        }
        return Ok(());
    }

    let Some(cli::Command::Play { ids }) = args.cmd else {
        anyhow::bail!("nothing to do; try `podwall-player play <id>...` or --list-devices");
    };

    let cfg = match &args.config {
        Some(path) => PlayerConfig::load(path)?,
        None => PlayerConfig::default(),
    };
    let server_url = cfg.server_url(args.server.as_deref())?;
    let client = http::build_client(&cfg.fetch).context("build http client")?;

    let resolver: Arc<dyn SourceResolver> = if args.direct {
        Arc::new(DirectResolver::new(server_url.clone()))
    } else {
        Arc::new(HttpSourceResolver::new(client.clone(), server_url.clone()))
    };
    let telemetry: Arc<dyn Telemetry> = if args.no_telemetry || !cfg.telemetry_enabled() {
        Arc::new(NoopTelemetry)
    } else {
        Arc::new(HttpTelemetry::new(client.clone(), server_url.clone()))
    };

    let (signals_tx, signals_rx) = mpsc::unbounded_channel();
    let device = args.device.clone().or(cfg.device.clone());
    let output = CpalOutput::start(device, &cfg.playback, signals_tx)?;

    tracing::info!(server = %server_url, tracks = ids.len(), "starting playback session");
    let session = PlaybackSession::start(SessionParts {
        client: Arc::new(HttpRangeClient::new(client)),
        decoder: Arc::new(SymphoniaDecoder::new()),
        resolver,
        telemetry,
        output: Arc::new(output),
        output_signals: signals_rx,
        fetch: cfg.fetch.clone(),
        playback: cfg.playback.clone(),
    });

    let coordinator = session.coordinator().clone();
    let mut events = session.subscribe();
    for id in ids {
        if let Err(err) = coordinator.play_or_queue(id).await {
            tracing::warn!(track_id = id, error = %err, "cannot queue post");
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                report(&coordinator, &event);
                if event == PlayerEvent::Stopped && !coordinator.has_queued() {
                    break;
                }
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

fn report(coordinator: &Coordinator, event: &PlayerEvent) {
    let label = |id: TrackId| {
        let anything_playing = coordinator
            .queue_snapshot()
            .iter()
            .any(|e| e.track_id != id && e.state == podwall_types::QueueEntryState::Playing);
        entry_label(coordinator.state_of(id), anything_playing)
    };
    match event {
        PlayerEvent::Progress { .. } => tracing::debug!(?event, "progress"),
        PlayerEvent::Error {
            track_id,
            piece_id,
            cause,
            terminal,
        } => {
            tracing::warn!(?track_id, ?piece_id, terminal, "{cause}");
        }
        other => match other.track_id() {
            Some(id) => tracing::info!(track_id = id, state = label(id), "{other:?}"),
            None => tracing::info!("{other:?}"),
        },
    }
}

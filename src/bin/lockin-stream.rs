//! Lock-in Stream capture tool
//!
//! Arms the instrument, counts pulses on the configured channel for the
//! configured duration (or until Ctrl-C) and prints a loss report.
//!
//! Usage: `lockin-stream [CONFIG.toml] [--json] [--init]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lockin_stream::{
    config::AppConfig,
    instrument::TcpInstrument,
    session::{SessionEvent, StreamSession},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config_path = None;
    let mut json = false;
    let mut init = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--json" => json = true,
            "--init" => init = true,
            _ => config_path = Some(PathBuf::from(arg)),
        }
    }
    let config_path = config_path
        .or_else(AppConfig::default_path)
        .context("No config path given and no default config directory")?;

    if init {
        AppConfig::default().save(&config_path)?;
        println!("Wrote default configuration to {}", config_path.display());
        return Ok(());
    }

    let config = AppConfig::load_or_default(&config_path)
        .with_context(|| format!("Loading {}", config_path.display()))?;
    let run = config.effective_run();

    tracing::info!("Starting Lock-in Stream");
    tracing::info!(
        "Threshold {} on channel {} of {}, refractory width {} samples",
        run.threshold,
        run.detect_channel,
        run.channels,
        run.refractory_width
    );

    let link = TcpInstrument::connect(&config.instrument)
        .with_context(|| format!("Connecting to {}", config.instrument.address))?;
    let mut session = StreamSession::new(Box::new(link), config.network.clone(), config.pipeline.clone());

    let rate = session.start(run.clone())?;
    let duration = Duration::from_secs_f64(config.capture.duration_secs.max(0.0));
    if !duration.is_zero() {
        tracing::info!(
            "Streaming for {:.1}s, expecting about {} packets",
            duration.as_secs_f64(),
            rate.expected_packets(&run, duration)
        );
    } else {
        tracing::info!("Streaming until interrupted (Ctrl-C)");
    }

    let events = session.events();
    let deadline = (!duration.is_zero()).then(|| Instant::now() + duration);
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted");
                break;
            }
            _ = ticker.tick() => {
                let mut latest = None;
                while let Ok(event) = events.try_recv() {
                    match event {
                        SessionEvent::Detection { count } => latest = Some(count),
                        SessionEvent::Fault { message } => tracing::error!("Stream fault: {}", message),
                    }
                }
                if let Some(count) = latest {
                    tracing::info!("Num detected: {}", count);
                }
                if !session.is_running() || deadline.is_some_and(|d| Instant::now() >= d) {
                    break;
                }
            }
        }
    }

    let summary = session.stop();
    let closed = session.close();
    let summary = summary?;
    closed?;

    if json {
        println!("{}", summary.to_json()?);
    } else {
        println!("{}", summary);
    }
    Ok(())
}

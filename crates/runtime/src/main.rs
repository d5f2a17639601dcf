//! Inflight - Main Entry Point
//!
//! Smoke harness for the runtime: wires the facade against the scripted
//! replay engine, streams one chat completion to stdout, and relays
//! ctrl-c as an abort.

use inflight_common::RuntimeConfig;
use inflight_engine::{ReplayEngine, ReplayScript};
use inflight_protocol::{ChatMessage, GenerationSettings, Usage};
use inflight_runtime::{DownloadEvent, EngineFacade, HttpFetcher, ModelCatalog, ModelStore, StreamEvent};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inflight=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Inflight");

    // Load configuration
    let config = match std::env::var("INFLIGHT_CONFIG") {
        Ok(path) => {
            info!("Loading configuration from {}", path);
            RuntimeConfig::from_file(path)?
        }
        Err(_) => RuntimeConfig::default(),
    };
    config.validate()?;

    let prompt = {
        let args: Vec<String> = std::env::args().skip(1).collect();
        if args.is_empty() {
            "Tell me about streaming.".to_string()
        } else {
            args.join(" ")
        }
    };

    // Scripted engine standing in for the real one
    let engine = Arc::new(ReplayEngine::new(
        ReplayScript::text([
            "Streaming ", "responses ", "are ", "delivered ", "chunk ", "by ", "chunk, ",
            "and ", "an ", "abort ", "stops ", "them ", "mid-flight.",
        ])
        .with_chunk_delay(Duration::from_millis(150))
        .with_usage(Usage {
            prompt_tokens: 9,
            completion_tokens: 13,
            total_tokens: 22,
            extra: None,
        }),
    ));

    let facade = EngineFacade::new(engine, &config);

    // With a configured default model, run the full prepare path: resolve
    // the record, make sure its assets are local, then load it. The demo
    // falls back to a placeholder model otherwise.
    match &config.engine.default_model {
        Some(model_id) => {
            let catalog = ModelCatalog::from_config(&config);
            let record = catalog.get(model_id)?;

            let store = ModelStore::new(
                &config.engine.model_dir,
                Arc::new(HttpFetcher::new()?),
                &config.download,
            );

            let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel();
            tokio::spawn(async move {
                while let Some(event) = progress_rx.recv().await {
                    match event {
                        DownloadEvent::Started { total } => {
                            info!("Preparing model assets: {} files", total)
                        }
                        DownloadEvent::Progress { completed, total } => {
                            info!("Download progress: {}/{}", completed, total)
                        }
                        DownloadEvent::Completed => info!("Model assets ready"),
                        DownloadEvent::Failed { message } => {
                            error!("Model download failed: {}", message)
                        }
                    }
                }
            });

            let model_dir = store.ensure_model(record, Some(progress_tx)).await?;
            facade.load_model(&model_dir, &record.model_lib)?;
        }
        None => {
            facade.load_model(Path::new("models/replay-demo"), "replay-lib")?;
        }
    }

    let mut handle = facade.submit_chat_completion(
        vec![
            ChatMessage::system("You are a concise assistant."),
            ChatMessage::user(prompt),
        ],
        GenerationSettings::default(),
        None,
    )?;

    info!("Streaming request {}", handle.request_id);
    let request_id = handle.request_id.clone();
    let mut stdout = std::io::stdout();

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                warn!("Interrupt received, aborting request {}", request_id);
                if facade.abort(&request_id).is_err() {
                    break;
                }
            }
            event = handle.next_event() => {
                match event {
                    Some(StreamEvent::Chunk(delta)) => {
                        write!(stdout, "{}", delta)?;
                        stdout.flush()?;
                    }
                    Some(StreamEvent::Done { finish_reason, usage }) => {
                        writeln!(stdout)?;
                        info!("Request finished ({:?})", finish_reason);
                        if let Some(usage) = usage {
                            info!(
                                "Usage: {} prompt + {} completion tokens",
                                usage.prompt_tokens, usage.completion_tokens
                            );
                        }
                        break;
                    }
                    Some(StreamEvent::Aborted) => {
                        writeln!(stdout)?;
                        info!("Request aborted");
                        break;
                    }
                    Some(StreamEvent::Error(message)) => {
                        writeln!(stdout)?;
                        warn!("Request failed: {}", message);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    facade.unload()?;
    info!("Inflight shutdown complete");
    Ok(())
}

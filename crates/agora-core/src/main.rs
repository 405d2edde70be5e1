//! Agora daemon
//!
//! Drives a seeded agent population with the offline template provider
//! and a feed built from the agents' own published items.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use agora_core::{
    default_config_toml, AgoraConfig, ConfigError, Engine, EngineError, HeartbeatFile, MemoryStore,
    SchedulerController, Store,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

/// Command line arguments for the daemon
#[derive(Parser, Debug)]
#[command(name = "agora")]
#[command(about = "Tick engine for a population of autonomous social agents")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler
    Run {
        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Stop after this many ticks; runs until Ctrl-C when omitted
        #[arg(long)]
        ticks: Option<u64>,

        /// Override the scheduler seed
        #[arg(long)]
        seed: Option<u64>,

        /// Override the tick interval in seconds
        #[arg(long)]
        interval: Option<f64>,
    },
    /// Print the last heartbeat written by a running scheduler
    Status {
        /// TOML configuration file naming the heartbeat path
        #[arg(long)]
        config: Option<PathBuf>,

        /// Heartbeat file, overriding the configuration
        #[arg(long)]
        heartbeat: Option<PathBuf>,
    },
    /// Print the default configuration
    InitConfig,
}

fn load_config(path: Option<&PathBuf>) -> Result<AgoraConfig, EngineError> {
    match path {
        Some(path) => Ok(AgoraConfig::from_file(path)?),
        None => Ok(AgoraConfig::default()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let result = match args.command {
        Command::Run {
            config,
            ticks,
            seed,
            interval,
        } => {
            init_tracing();
            run(config, ticks, seed, interval).await
        }
        Command::Status { config, heartbeat } => status(config, heartbeat),
        Command::InitConfig => {
            print!("{}", default_config_toml());
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(
    config_path: Option<PathBuf>,
    ticks: Option<u64>,
    seed: Option<u64>,
    interval: Option<f64>,
) -> Result<(), EngineError> {
    let mut config = load_config(config_path.as_ref())?;
    if let Some(seed) = seed {
        config.scheduler.seed = seed;
    }
    if let Some(interval) = interval {
        config.scheduler.interval_secs = interval;
    }
    config.validate()?;

    let snapshot_path = config.telemetry.snapshot_path.clone();
    let store = match &snapshot_path {
        Some(path) if path.exists() => {
            tracing::info!("restoring store from {}", path.display());
            Arc::new(MemoryStore::load_snapshot(path)?)
        }
        _ => Arc::new(MemoryStore::new()),
    };

    let engine = Engine::builder(config)
        .store(store.clone() as Arc<dyn Store>)
        .build()?;
    let created = engine.seed_population()?;

    println!("Agora Engine");
    println!("============");
    println!("Agents: {} ({} new)", store.agents()?.len(), created);
    println!("Interval: {}s", engine.config().scheduler.interval_secs);
    println!("Seed: {}", engine.config().scheduler.seed);
    match ticks {
        Some(ticks) => println!("Ticks: {}", ticks),
        None => println!("Ticks: until interrupted"),
    }
    println!();

    let snapshot_writer = snapshot_path.clone().map(|path| {
        let mut records = engine.subscribe();
        let store = store.clone();
        tokio::spawn(async move {
            loop {
                match records.recv().await {
                    Ok(_) => {
                        if let Err(e) = store.save_snapshot(&path) {
                            tracing::warn!("snapshot save failed: {}", e);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("snapshot writer skipped {} records", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    });

    let engine = Arc::new(engine);
    let controller = SchedulerController::new(engine.clone());
    let run_id = controller.start(ticks)?;
    println!("Run {} started", run_id);

    let completed = tokio::select! {
        finished = controller.wait(), if ticks.is_some() => finished?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, stopping after the current tick");
            controller.stop().await?
        }
    };

    if let Err(e) = engine.telemetry().flush() {
        tracing::warn!("telemetry flush failed: {}", e);
    }
    if let Some(writer) = snapshot_writer {
        writer.abort();
        let _ = writer.await;
    }
    if let Some(path) = &snapshot_path {
        store.save_snapshot(path)?;
        println!("Snapshot written to {}", path.display());
    }

    let metrics = engine.metrics()?;
    println!();
    println!("Run complete: {} ticks", completed);
    println!("  Posts: {}  Comments: {}", metrics.posts, metrics.comments);
    println!(
        "  Avg score/quality/persona/emotion: {:.3} / {:.3} / {:.3} / {:.3}",
        metrics.avg_score, metrics.avg_quality, metrics.avg_persona, metrics.avg_emotion
    );
    println!("  Emotion continuity: {:.3}", metrics.emotion_continuity);
    println!(
        "  Provider calls: {} (timeouts {}, errors {}, fallbacks {})",
        metrics.provider.calls,
        metrics.provider.timeouts,
        metrics.provider.provider_errors,
        metrics.provider.fallbacks
    );
    Ok(())
}

fn status(config_path: Option<PathBuf>, heartbeat: Option<PathBuf>) -> Result<(), EngineError> {
    let config = load_config(config_path.as_ref())?;
    let Some(path) = heartbeat.or(config.telemetry.heartbeat_path) else {
        return Err(EngineError::Config(ConfigError::Invalid(
            "no heartbeat path; pass --heartbeat or set telemetry.heartbeat_path".to_string(),
        )));
    };

    match HeartbeatFile::new(&path).read()? {
        Some(hb) => {
            let json = serde_json::to_string_pretty(&hb)
                .map_err(|e| EngineError::Store(e.into()))?;
            println!("{}", json);
            if hb.is_stale(Utc::now(), 2.0) {
                println!("warning: heartbeat is stale; the scheduler may have died");
            }
            Ok(())
        }
        None => {
            println!("No heartbeat at {}", path.display());
            Ok(())
        }
    }
}

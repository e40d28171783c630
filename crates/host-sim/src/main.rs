//! Scripted host: attaches the task runtime to a simulated party and runs
//! the auto-raise and auto-heal features against it.
mod config;
mod features;
mod sim;
mod world;

use std::path::PathBuf;

use anyhow::Result;
use config::SimConfig;
use sim::Simulation;
use task_runtime::RuntimeConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn main() -> Result<()> {
    // Load .env file if it exists (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let sim_config = SimConfig::from_env();
    let _guard = setup_logging(sim_config.session_id.as_deref())?;

    let runtime_config = RuntimeConfig::from_env();
    Simulation::new(runtime_config, sim_config)?.run()?.log();
    Ok(())
}

/// Setup logging to both stderr and a per-session file
fn setup_logging(session_id: Option<&str>) -> Result<WorkerGuard> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let session_id = session_id.map(str::to_owned).unwrap_or_else(|| {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        format!("session_{timestamp}")
    });

    let session_log_dir = log_dir().join(&session_id);
    std::fs::create_dir_all(&session_log_dir)?;

    let file_appender = tracing_appender::rolling::never(&session_log_dir, "host-sim.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    tracing::info!("Logging initialized: session={}", session_id);
    tracing::info!("Log file: {}/host-sim.log", session_log_dir.display());

    Ok(guard)
}

/// Platform-specific log directory, e.g. `~/.cache/task-runtime/logs` on Linux.
fn log_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "task-runtime")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("/tmp/task-runtime"))
        .join("logs")
}

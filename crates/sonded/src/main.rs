// # sonded - sonde probing daemon
//
// This daemon is a thin integration layer over `sonde-core`. It is
// responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Registering probe executors and the interface lookup
// 4. Adding the probes from the probes file and running until signalled
// 5. Stopping every probe within the shutdown grace period
//
// ## Configuration
//
// - `SONDE_PROBES_FILE`: JSON array of probe definitions (optional)
// - `SONDE_LOG_LEVEL`: trace, debug, info, warn or error (default: info)
// - `SONDE_REMOVE_GRACE_SECS`: Seconds a stopping probe gets before it is
//   aborted (default: 5)
// - `SONDE_STATS_EXPORT_FLOOR_SECS`: Minimum default stats export interval
//   for non-UDP probes (default: 10)
//
// ## Example
//
// ```bash
// export SONDE_PROBES_FILE=/etc/sonde/probes.json
// export SONDE_LOG_LEVEL=debug
//
// sonded
// ```

use anyhow::{Context, Result};
use sonde_core::policy::PolicyDefaults;
use sonde_core::source::InterfaceLookup;
use sonde_core::{OptionsBuilder, ProbeConfig, ProbeRegistry, RemoveOutcome};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum SondeExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<SondeExitCode> for ExitCode {
    fn from(code: SondeExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
#[derive(Debug)]
struct Config {
    probes_file: Option<PathBuf>,
    log_level: String,
    remove_grace_secs: u64,
    stats_export_floor_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            probes_file: var("SONDE_PROBES_FILE")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            log_level: var("SONDE_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            remove_grace_secs: parse_secs(&var, "SONDE_REMOVE_GRACE_SECS", 5)?,
            stats_export_floor_secs: parse_secs(&var, "SONDE_STATS_EXPORT_FLOOR_SECS", 10)?,
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if let Some(ref path) = self.probes_file
            && !path.is_file()
        {
            anyhow::bail!(
                "SONDE_PROBES_FILE does not exist or is not a file: {}",
                path.display()
            );
        }

        if !(1..=300).contains(&self.remove_grace_secs) {
            anyhow::bail!(
                "SONDE_REMOVE_GRACE_SECS must be between 1 and 300 seconds. Got: {}",
                self.remove_grace_secs
            );
        }

        if !(1..=3600).contains(&self.stats_export_floor_secs) {
            anyhow::bail!(
                "SONDE_STATS_EXPORT_FLOOR_SECS must be between 1 and 3600 seconds. Got: {}",
                self.stats_export_floor_secs
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "SONDE_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    fn remove_grace(&self) -> Duration {
        Duration::from_secs(self.remove_grace_secs)
    }
}

fn parse_secs(var: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64> {
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number of seconds. Got: {raw:?}")),
        None => Ok(default),
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return SondeExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return SondeExitCode::ConfigError.into();
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return SondeExitCode::ConfigError.into();
    }

    info!("Starting sonded daemon");

    // Load probe definitions before the runtime so a bad file is a config error
    let probes = match config.probes_file {
        Some(ref path) => match ProbeConfig::load_all(path) {
            Ok(probes) => probes,
            Err(e) => {
                error!("Failed to load {}: {}", path.display(), e);
                return SondeExitCode::ConfigError.into();
            }
        },
        None => {
            warn!("SONDE_PROBES_FILE not set, starting with no probes");
            Vec::new()
        }
    };

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return SondeExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config, probes).await {
            error!("Daemon error: {:#}", e);
            SondeExitCode::RuntimeError
        } else {
            SondeExitCode::CleanShutdown
        }
    });

    result.into()
}

#[cfg(feature = "iface")]
fn interface_lookup() -> Arc<dyn InterfaceLookup> {
    Arc::new(sonde_iface::SystemInterfaceLookup::new())
}

#[cfg(not(feature = "iface"))]
fn interface_lookup() -> Arc<dyn InterfaceLookup> {
    warn!("Built without interface lookup; interface sources will not resolve");
    Arc::new(sonde_core::StaticInterfaceLookup::new())
}

fn build_registry(config: &Config) -> ProbeRegistry {
    let defaults = PolicyDefaults::default()
        .with_stats_export_floor(Duration::from_secs(config.stats_export_floor_secs));
    let builder = OptionsBuilder::new(interface_lookup()).with_defaults(defaults);
    let registry = ProbeRegistry::new(builder).with_remove_grace(config.remove_grace());

    #[cfg(feature = "tcp")]
    {
        info!("Registering TCP probe executor");
        sonde_probe_tcp::register(&registry);
    }

    registry
}

/// Run the daemon
async fn run_daemon(config: Config, probes: Vec<ProbeConfig>) -> Result<()> {
    let registry = build_registry(&config);

    let total = probes.len();
    let mut added = 0;
    for probe in probes {
        let name = probe.name.clone();
        match registry.add(probe).await {
            Ok(()) => added += 1,
            Err(e) => error!("Skipping probe {}: {}", name, e),
        }
    }
    info!("Started {} of {} probe(s)", added, total);

    let signal = wait_for_shutdown().await?;
    info!("Received shutdown signal: {}", signal);

    let outcomes = registry.shutdown(config.remove_grace()).await;
    for (name, outcome) in &outcomes {
        match outcome {
            RemoveOutcome::Stopped => {}
            RemoveOutcome::Failed(e) => warn!("Probe {} stopped with error: {}", name, e),
            RemoveOutcome::Forced => warn!("Probe {} was aborted", name),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    let received = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(received)
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for CTRL-C")?;
    Ok("SIGINT")
}

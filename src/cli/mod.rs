use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod config;
pub mod run;
pub mod schema;
pub mod send;

use config::ConfigArgs;
use run::RunArgs;
use schema::SchemaArgs;
use send::SendArgs;

use engine_bridge::config::ConfigManager;

#[derive(Parser, Debug)]
#[command(
    name = "engine_bridge",
    about = "Drive embedded engine instances over their bridge channels",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Spawn and initialise engine instances, then log their events until Ctrl-C
    Run(RunArgs),

    /// Post one message to a fresh instance and print what comes back
    Send(SendArgs),

    /// Emit JSON-Schema for event payloads and configuration
    Schema(SchemaArgs),

    /// Handle configuration
    Config(ConfigArgs),
}

#[derive(Clone, Debug)]
pub struct CliContext {
    pub root: PathBuf,
    pub config_manager: ConfigManager,
}

impl CliContext {
    pub fn new(root: PathBuf, config_manager: ConfigManager) -> Self {
        Self { root, config_manager }
    }
}

pub async fn execute(context: &CliContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => run::execute(args, context).await,
        Commands::Send(args) => send::execute(args, context).await,
        Commands::Schema(args) => schema::execute(args, context).await,
        Commands::Config(args) => config::execute(args, context).await,
    }
}

pub fn default_command() -> Commands {
    Commands::Run(RunArgs::default_runtime())
}

/// Overrides shared by every command that talks to engines.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct EngineArgs {
    /// Engine executable, spawned once per instance. Overrides BRIDGE_ENGINE_EXE
    #[arg(long)]
    pub engine_exe: Option<PathBuf>,

    /// Optional log level override (e.g. error, warn, info, debug, trace)
    #[arg(long)]
    pub log_level: Option<String>,

    /// OpenTelemetry collector base URL (e.g. http://localhost:4318); logs and metrics go to /v1/logs and /v1/metrics
    #[arg(long)]
    pub otel_endpoint: Option<String>,

    /// Per-call timeout in milliseconds. Overrides BRIDGE_CALL_TIMEOUT_MS
    #[arg(long)]
    pub call_timeout_ms: Option<u64>,
}

/// Resolve settings, install logging and build a bridge over engine processes.
pub async fn start_bridge(
    args: EngineArgs,
    context: &CliContext,
) -> anyhow::Result<(
    engine_bridge::BridgeConfig,
    engine_bridge::logger::TelemetryGuard,
    engine_bridge::EngineBridge,
)> {
    use anyhow::Context;
    use std::sync::Arc;

    let mut config = engine_bridge::BridgeConfig::load(&context.config_manager).await?;
    if let Some(exe) = args.engine_exe {
        config.engine_exe = Some(exe);
    }
    if let Some(level) = args.log_level {
        config.log_level = level.parse().map_err(anyhow::Error::msg)?;
    }
    if let Some(endpoint) = args.otel_endpoint {
        config.otel_endpoint = Some(endpoint);
    }
    if let Some(ms) = args.call_timeout_ms {
        anyhow::ensure!(ms > 0, "--call-timeout-ms must be greater than zero");
        config.call_timeout_ms = ms;
    }

    let log_dir = config.log_dir.clone().unwrap_or_else(|| context.root.join("logs"));
    let guard = engine_bridge::logger::init_tracing(&log_dir, config.log_level, config.otel_endpoint.as_deref())?;

    let exe = config
        .engine_exe
        .clone()
        .context("no engine executable configured; set BRIDGE_ENGINE_EXE or pass --engine-exe")?;
    let transport = bridge_rpc::ProcessTransport::new(&exe);
    let bridge = engine_bridge::EngineBridge::new(Arc::new(transport), &config);
    Ok((config, guard, bridge))
}

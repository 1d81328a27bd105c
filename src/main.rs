use std::{env, path::PathBuf};

use clap::Parser;
use engine_bridge::config::{ConfigManager, EnvConfigManager};

mod cli;

use cli::{Cli, CliContext, default_command, execute};

/// Resolve the bridge root directory from the environment or use default.
pub fn resolve_root_dir() -> PathBuf {
    match env::var("BRIDGE_ROOT") {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from("./bridge"),
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let root = resolve_root_dir();
    let env_file = root.join("config").join(".env");
    let context = CliContext::new(root, ConfigManager(EnvConfigManager::new(env_file)));

    execute(&context, cli.command.unwrap_or_else(default_command)).await
}

use anyhow::bail;
use clap::Args;
use futures::StreamExt;
use tokio::signal;
use tracing::{error, info, warn};

use super::{CliContext, EngineArgs, start_bridge};
use engine_bridge::{EngineBridge, InstanceId};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Instance ids to start
    #[arg(long = "instance", default_value = "1", value_delimiter = ',')]
    pub instances: Vec<u64>,

    /// Skip createPlayer after init
    #[arg(long)]
    pub no_player: bool,

    #[command(flatten)]
    pub engine: EngineArgs,
}

impl RunArgs {
    pub fn default_runtime() -> Self {
        Self {
            instances: vec![1],
            no_player: false,
            engine: EngineArgs::default(),
        }
    }
}

pub async fn execute(args: RunArgs, context: &CliContext) -> anyhow::Result<()> {
    if args.instances.is_empty() {
        bail!("at least one --instance is required");
    }
    let (config, _guard, bridge) = start_bridge(args.engine, context).await?;
    info!(prefix = %config.channel_prefix, "engine bridge starting up");

    let mut events = bridge.all_events();
    let logger = tokio::spawn(async move {
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(err) => warn!("could not render event: {err}"),
                },
                Err(fault) => error!("{fault}"),
            }
        }
    });

    let ids: Vec<InstanceId> = args.instances.into_iter().map(InstanceId::from).collect();
    for &id in &ids {
        if let Err(err) = start_instance(&bridge, id, !args.no_player).await {
            error!("{err}");
        }
    }

    info!(instances = ?bridge.instances(), "engine bridge running; press Ctrl-C to exit");
    println!("Engine bridge running; press Ctrl-C to exit");

    signal::ctrl_c().await?;

    println!("\nShutting down…");
    for &id in &ids {
        if bridge.registry().get_channel(id).is_err() {
            continue;
        }
        if let Err(err) = bridge.commands().quit_player(id).await {
            warn!("{err}");
        }
        if let Err(err) = bridge.commands().dispose(id).await {
            warn!("{err}");
        }
    }
    logger.abort();
    info!("engine bridge shut down");
    Ok(())
}

async fn start_instance(bridge: &EngineBridge, id: InstanceId, create_player: bool) -> Result<(), engine_bridge::BridgeError> {
    bridge.commands().init(id).await?;
    info!(instance = %id, "instance ready");
    if create_player {
        let created = bridge.commands().create_player(id).await?;
        info!(instance = %id, ?created, "player created");
    }
    Ok(())
}

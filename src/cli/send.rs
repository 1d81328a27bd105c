use std::time::Duration;

use anyhow::Context;
use clap::Args;
use futures::StreamExt;
use serde_json::Value;

use super::{CliContext, EngineArgs, start_bridge};
use engine_bridge::InstanceId;

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Target object inside the engine
    pub game_object: String,

    /// Method to call on the target object
    pub method_name: String,

    pub message: String,

    #[arg(long, default_value_t = 1)]
    pub instance: u64,

    /// Parse the message as JSON and send its compact form
    #[arg(long)]
    pub json: bool,

    /// How long to print incoming events after sending
    #[arg(long, default_value_t = 500)]
    pub wait_ms: u64,

    #[command(flatten)]
    pub engine: EngineArgs,
}

pub async fn execute(args: SendArgs, context: &CliContext) -> anyhow::Result<()> {
    let (_config, _guard, bridge) = start_bridge(args.engine, context).await?;
    let id = InstanceId::from(args.instance);

    // subscribe before init so onCreated is not missed
    let mut events = bridge.events(id);
    bridge.commands().init(id).await?;

    if args.json {
        let value: Value = serde_json::from_str(&args.message).context("--json message is not valid JSON")?;
        bridge
            .commands()
            .post_json_message(id, &args.game_object, &args.method_name, &value)
            .await?;
    } else {
        bridge
            .commands()
            .post_message(id, &args.game_object, &args.method_name, &args.message)
            .await?;
    }

    let deadline = tokio::time::sleep(Duration::from_millis(args.wait_ms));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            item = events.next() => match item {
                Some(Ok(event)) => println!("{}", serde_json::to_string(&event)?),
                Some(Err(fault)) => eprintln!("❌ {fault}"),
                None => break,
            },
        }
    }

    bridge.commands().quit_player(id).await?;
    Ok(())
}

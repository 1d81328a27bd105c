use clap::{Args, Subcommand};

use super::CliContext;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Add or update a key
    Set { key: String, value: String },
    /// Print the value of a key
    Get { key: String },
    Delete { key: String },
    /// Print every BRIDGE_* key
    List,
}

pub async fn execute(args: ConfigArgs, context: &CliContext) -> anyhow::Result<()> {
    let config = &context.config_manager.0;
    match args.command {
        ConfigCommands::Set { key, value } => {
            config.set(&key, &value).await?;
            println!("✅ {key} set.");
        }
        ConfigCommands::Get { key } => match config.get(&key).await {
            Some(value) => println!("{value}"),
            None => eprintln!("❌ {key} is not set."),
        },
        ConfigCommands::Delete { key } => {
            config.del(&key).await?;
            println!("✅ {key} deleted.");
        }
        ConfigCommands::List => {
            let mut pairs: Vec<_> = config
                .as_vec()
                .await
                .into_iter()
                .filter(|(k, _)| k.starts_with("BRIDGE_"))
                .collect();
            pairs.sort();
            for (key, value) in pairs {
                println!("{key}={value}");
            }
        }
    }
    Ok(())
}

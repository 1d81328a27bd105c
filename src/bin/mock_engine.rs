//! Stand-in engine that speaks the bridge protocol on stdin/stdout.
//!
//! Spawned by `ProcessTransport` as `mock_engine --channel <name>`. It keeps a
//! little player state, answers the query calls from it and pushes the same
//! callbacks a real engine would.

use async_trait::async_trait;
use bridge_rpc::jsonrpc;
use bridge_rpc::runtime::{EngineHandler, Notifier, serve_stdio};
use bridge_rpc::{BridgeMethod, InboundMethod};
use clap::Parser;
use engine_bridge::logger::{LogLevel, init_stderr};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

/// `postMessage` to this method name makes the engine push a malformed
/// `onSceneLoaded`.
pub const BAD_SCENE_METHOD: &str = "BadScene";

#[derive(Parser, Debug)]
#[command(name = "mock_engine", about = "Scriptless engine double for the bridge")]
struct Args {
    /// Channel name assigned by the host
    #[arg(long)]
    channel: String,

    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[derive(Debug, Default)]
struct MockEngine {
    channel: String,
    ready: bool,
    paused: bool,
    loaded: bool,
    background: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostMessage {
    game_object: String,
    method_name: String,
    message: String,
}

impl MockEngine {
    fn new(channel: String) -> Self {
        Self {
            channel,
            ..Self::default()
        }
    }

    fn reset(&mut self) {
        *self = Self::new(std::mem::take(&mut self.channel));
    }
}

#[async_trait]
impl EngineHandler for MockEngine {
    async fn handle(
        &mut self,
        method: &str,
        params: Option<Value>,
        notifier: &Notifier,
    ) -> Result<Value, jsonrpc::Error> {
        let call = method
            .parse::<BridgeMethod>()
            .map_err(|_| jsonrpc::Error::method_not_found(method))?;
        debug!(channel = %self.channel, %call, "call");

        let reply = match call {
            BridgeMethod::Init => {
                self.ready = true;
                notifier.notify(InboundMethod::OnCreated, Some(json!({ "channel": self.channel })));
                Value::Null
            }
            BridgeMethod::Dispose | BridgeMethod::QuitPlayer => {
                self.reset();
                Value::Null
            }
            BridgeMethod::IsPaused => json!(self.paused),
            BridgeMethod::IsReady => json!(self.ready),
            BridgeMethod::IsLoaded => json!(self.loaded),
            BridgeMethod::InBackground => json!(self.background),
            BridgeMethod::CreatePlayer => {
                if !self.ready {
                    return Ok(json!(false));
                }
                self.loaded = true;
                notifier.notify(
                    InboundMethod::OnSceneLoaded,
                    Some(json!({ "name": "Main", "buildIndex": 0, "isLoaded": true, "isValid": true })),
                );
                json!(true)
            }
            BridgeMethod::PostMessage => {
                let post: PostMessage = serde_json::from_value(params.unwrap_or(Value::Null))
                    .map_err(|e| jsonrpc::Error::invalid_params(e.to_string()))?;
                if post.method_name == BAD_SCENE_METHOD {
                    notifier.notify(InboundMethod::OnSceneLoaded, Some(json!(post.message)));
                } else {
                    notifier.notify(
                        InboundMethod::OnMessage,
                        Some(json!({
                            "gameObject": post.game_object,
                            "methodName": post.method_name,
                            "message": post.message,
                        })),
                    );
                }
                Value::Null
            }
            BridgeMethod::PausePlayer => {
                self.paused = true;
                Value::Null
            }
            BridgeMethod::ResumePlayer => {
                self.paused = false;
                Value::Null
            }
            BridgeMethod::OpenInNativeProcess => {
                self.background = true;
                Value::Null
            }
            BridgeMethod::UnloadPlayer => {
                self.loaded = false;
                notifier.notify(InboundMethod::OnUnloaded, None);
                Value::Null
            }
        };
        Ok(reply)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let level: LogLevel = args.log_level.parse().map_err(anyhow::Error::msg)?;
    init_stderr(level)?;

    info!(channel = %args.channel, "mock engine up");
    serve_stdio(MockEngine::new(args.channel)).await
}

use std::sync::Arc;
use std::time::Duration;

use bridge_rpc::{BridgeMethod, TransportError};
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::BridgeError;
use crate::instance::InstanceId;
use crate::registry::{Channel, ChannelRegistry};
use crate::telemetry::DispatchTelemetry;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Typed commands toward engine instances.
///
/// `init` is the only operation that may open a channel; everything else
/// requires one to exist already.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    registry: Arc<ChannelRegistry>,
    call_timeout: Duration,
    telemetry: DispatchTelemetry,
}

impl CommandDispatcher {
    pub fn new(registry: Arc<ChannelRegistry>, call_timeout: Duration) -> Self {
        Self {
            registry,
            call_timeout,
            telemetry: DispatchTelemetry::new(),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub async fn init(&self, id: InstanceId) -> Result<(), BridgeError> {
        let channel = self.registry.ensure_channel(id).await?;
        self.call(&channel, BridgeMethod::Init, None).await.map(drop)
    }

    pub async fn dispose(&self, id: InstanceId) -> Result<(), BridgeError> {
        self.unit(id, BridgeMethod::Dispose).await
    }

    pub async fn is_paused(&self, id: InstanceId) -> Result<Option<bool>, BridgeError> {
        self.query(id, BridgeMethod::IsPaused).await
    }

    pub async fn is_ready(&self, id: InstanceId) -> Result<Option<bool>, BridgeError> {
        self.query(id, BridgeMethod::IsReady).await
    }

    pub async fn is_loaded(&self, id: InstanceId) -> Result<Option<bool>, BridgeError> {
        self.query(id, BridgeMethod::IsLoaded).await
    }

    pub async fn in_background(&self, id: InstanceId) -> Result<Option<bool>, BridgeError> {
        self.query(id, BridgeMethod::InBackground).await
    }

    pub async fn create_player(&self, id: InstanceId) -> Result<Option<bool>, BridgeError> {
        self.query(id, BridgeMethod::CreatePlayer).await
    }

    /// Deliver `message` to `method_name` on the engine object `game_object`.
    pub async fn post_message(
        &self,
        id: InstanceId,
        game_object: &str,
        method_name: &str,
        message: &str,
    ) -> Result<(), BridgeError> {
        let channel = self.registry.get_channel(id)?;
        let params = json!({
            "gameObject": game_object,
            "methodName": method_name,
            "message": message,
        });
        self.call(&channel, BridgeMethod::PostMessage, Some(params)).await.map(drop)
    }

    /// Like [`post_message`](Self::post_message), with `message` encoded as
    /// compact JSON text.
    pub async fn post_json_message<T>(
        &self,
        id: InstanceId,
        game_object: &str,
        method_name: &str,
        message: &T,
    ) -> Result<(), BridgeError>
    where
        T: Serialize + ?Sized,
    {
        let text = serde_json::to_string(message).map_err(|source| BridgeError::Encode { instance: id, source })?;
        self.post_message(id, game_object, method_name, &text).await
    }

    pub async fn pause_player(&self, id: InstanceId) -> Result<(), BridgeError> {
        self.unit(id, BridgeMethod::PausePlayer).await
    }

    pub async fn resume_player(&self, id: InstanceId) -> Result<(), BridgeError> {
        self.unit(id, BridgeMethod::ResumePlayer).await
    }

    pub async fn open_in_native_process(&self, id: InstanceId) -> Result<(), BridgeError> {
        self.unit(id, BridgeMethod::OpenInNativeProcess).await
    }

    pub async fn unload_player(&self, id: InstanceId) -> Result<(), BridgeError> {
        self.unit(id, BridgeMethod::UnloadPlayer).await
    }

    pub async fn quit_player(&self, id: InstanceId) -> Result<(), BridgeError> {
        self.unit(id, BridgeMethod::QuitPlayer).await
    }

    async fn unit(&self, id: InstanceId, method: BridgeMethod) -> Result<(), BridgeError> {
        let channel = self.registry.get_channel(id)?;
        self.call(&channel, method, None).await.map(drop)
    }

    async fn query(&self, id: InstanceId, method: BridgeMethod) -> Result<Option<bool>, BridgeError> {
        let channel = self.registry.get_channel(id)?;
        let reply = self.call(&channel, method, None).await?;
        serde_json::from_value::<Option<bool>>(reply).map_err(|err| BridgeError::Dispatch {
            operation: method,
            instance: id,
            source: TransportError::Json(err),
        })
    }

    async fn call(&self, channel: &Channel, method: BridgeMethod, params: Option<Value>) -> Result<Value, BridgeError> {
        let instance = channel.instance();
        self.telemetry
            .instrument(method.as_ref(), instance, || channel.invoke(method, params, self.call_timeout))
            .await
            .map_err(|source| BridgeError::Dispatch {
                operation: method,
                instance,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::registry::DEFAULT_CHANNEL_PREFIX;
    use bridge_rpc::loopback::LoopbackTransport;

    fn dispatcher(transport: &LoopbackTransport, timeout: Duration) -> CommandDispatcher {
        let registry = ChannelRegistry::new(
            Arc::new(transport.clone()),
            Arc::new(EventBus::new()),
            DEFAULT_CHANNEL_PREFIX,
        );
        CommandDispatcher::new(Arc::new(registry), timeout)
    }

    #[tokio::test]
    async fn commands_before_init_fail_with_unknown_instance() {
        let transport = LoopbackTransport::new();
        let commands = dispatcher(&transport, DEFAULT_CALL_TIMEOUT);

        let err = commands.pause_player(InstanceId(4)).await.unwrap_err();
        assert!(matches!(err, BridgeError::UnknownInstance { id: InstanceId(4), .. }));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn init_opens_the_channel_and_waits_for_ready() {
        let transport = LoopbackTransport::new();
        let commands = dispatcher(&transport, DEFAULT_CALL_TIMEOUT);

        commands.init(InstanceId(2)).await.unwrap();
        commands.init(InstanceId(2)).await.unwrap();

        assert_eq!(transport.open_count("engine_bridge/instance_2"), 1);
        let calls = transport.calls_to("init/waitForReady");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].channel, "engine_bridge/instance_2");
        assert_eq!(calls[0].params, None);
    }

    #[tokio::test]
    async fn queries_decode_optional_booleans() {
        let transport = LoopbackTransport::new();
        transport.reply("isPaused", json!(true));
        transport.reply("isReady", Value::Null);
        transport.reply("isLoaded", json!("yes"));
        let commands = dispatcher(&transport, DEFAULT_CALL_TIMEOUT);
        commands.init(InstanceId(1)).await.unwrap();

        assert_eq!(commands.is_paused(InstanceId(1)).await.unwrap(), Some(true));
        assert_eq!(commands.is_ready(InstanceId(1)).await.unwrap(), None);

        let err = commands.is_loaded(InstanceId(1)).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Dispatch {
                operation: BridgeMethod::IsLoaded,
                source: TransportError::Json(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn post_message_sends_three_named_fields() {
        let transport = LoopbackTransport::new();
        let commands = dispatcher(&transport, DEFAULT_CALL_TIMEOUT);
        commands.init(InstanceId(1)).await.unwrap();

        commands.post_message(InstanceId(1), "Cube", "SetColor", "red").await.unwrap();

        let calls = transport.calls_to("postMessage");
        assert_eq!(
            calls[0].params,
            Some(json!({"gameObject": "Cube", "methodName": "SetColor", "message": "red"}))
        );
    }

    #[tokio::test]
    async fn remote_errors_and_timeouts_surface_as_dispatch() {
        let transport = LoopbackTransport::new();
        transport.fail("quitPlayer", -32000, "engine busy");
        transport.hang("resumePlayer");
        let commands = dispatcher(&transport, Duration::from_millis(30));
        commands.init(InstanceId(6)).await.unwrap();

        let err = commands.quit_player(InstanceId(6)).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Dispatch {
                operation: BridgeMethod::QuitPlayer,
                source: TransportError::Remote { code: -32000, .. },
                ..
            }
        ));

        let err = commands.resume_player(InstanceId(6)).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Dispatch {
                source: TransportError::Timeout(30),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unserializable_messages_fail_with_encode() {
        use std::collections::BTreeMap;

        let transport = LoopbackTransport::new();
        let commands = dispatcher(&transport, DEFAULT_CALL_TIMEOUT);
        commands.init(InstanceId(1)).await.unwrap();

        // non-string map keys cannot become JSON object keys
        let mut bad = BTreeMap::new();
        bad.insert((1, 2), "v");
        let err = commands
            .post_json_message(InstanceId(1), "Obj", "Method", &bad)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Encode { instance: InstanceId(1), .. }));
        assert!(transport.calls_to("postMessage").is_empty());
    }
}

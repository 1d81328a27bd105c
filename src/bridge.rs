use std::sync::Arc;

use bridge_rpc::Transport;
use tracing::debug;

use crate::config::BridgeConfig;
use crate::dispatcher::CommandDispatcher;
use crate::error::BridgeError;
use crate::events::{
    CreatedEvent, EventBus, EventFilter, EventKind, EventStream, KindEvents, MessageEvent, SceneLoadedEvent,
    UnloadedEvent,
};
use crate::instance::InstanceId;
use crate::registry::ChannelRegistry;
use crate::view::{ViewFactory, ViewRequest};

/// Host-facing entry point: one registry, one dispatcher and one event bus
/// sharing a transport.
#[derive(Debug, Clone)]
pub struct EngineBridge {
    registry: Arc<ChannelRegistry>,
    commands: CommandDispatcher,
    bus: Arc<EventBus>,
}

impl EngineBridge {
    pub fn new(transport: Arc<dyn Transport>, config: &BridgeConfig) -> Self {
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(ChannelRegistry::new(
            transport,
            Arc::clone(&bus),
            config.channel_prefix.clone(),
        ));
        let commands = CommandDispatcher::new(Arc::clone(&registry), config.call_timeout());
        debug!(prefix = %config.channel_prefix, timeout_ms = config.call_timeout_ms, "bridge created");
        Self { registry, commands, bus }
    }

    pub fn commands(&self) -> &CommandDispatcher {
        &self.commands
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Everything instance `id` pushes from now on, faults included.
    pub fn events(&self, id: InstanceId) -> EventStream {
        self.bus.subscribe(EventFilter::instance(id))
    }

    pub fn events_of(&self, id: InstanceId, kind: EventKind) -> EventStream {
        self.bus.subscribe(EventFilter::instance(id).with_kind(kind))
    }

    /// Every event from every instance.
    pub fn all_events(&self) -> EventStream {
        self.bus.subscribe(EventFilter::all())
    }

    pub fn on_message(&self, id: InstanceId) -> KindEvents<MessageEvent> {
        KindEvents::new(&self.bus, id)
    }

    pub fn on_unloaded(&self, id: InstanceId) -> KindEvents<UnloadedEvent> {
        KindEvents::new(&self.bus, id)
    }

    pub fn on_scene_loaded(&self, id: InstanceId) -> KindEvents<SceneLoadedEvent> {
        KindEvents::new(&self.bus, id)
    }

    pub fn on_created(&self, id: InstanceId) -> KindEvents<CreatedEvent> {
        KindEvents::new(&self.bus, id)
    }

    /// Open the channel for `id` if needed, then let `factory` build the view.
    pub async fn create_view<F: ViewFactory>(&self, id: InstanceId, factory: &F) -> Result<F::View, BridgeError> {
        let channel = self.registry.ensure_channel(id).await?;
        let request = ViewRequest {
            instance: id,
            channel_name: channel.name().to_string(),
        };
        factory
            .create_view(request)
            .await
            .map_err(|err| BridgeError::View {
                instance: id,
                source: err.into(),
            })
    }

    pub fn instances(&self) -> Vec<InstanceId> {
        self.registry.instances()
    }

    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }
}

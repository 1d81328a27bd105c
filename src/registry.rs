use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bridge_rpc::{BridgeMethod, ChannelEndpoint, Transport, TransportError};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::info;

use crate::error::BridgeError;
use crate::events::EventBus;
use crate::inbound::InboundCallHandler;
use crate::instance::InstanceId;

pub const DEFAULT_CHANNEL_PREFIX: &str = "engine_bridge/instance_";

/// The host's handle on one instance's channel. Clones share the endpoint.
#[derive(Clone)]
pub struct Channel {
    instance: InstanceId,
    endpoint: Arc<dyn ChannelEndpoint>,
}

impl Channel {
    fn new(instance: InstanceId, endpoint: Arc<dyn ChannelEndpoint>) -> Self {
        Self { instance, endpoint }
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    pub fn name(&self) -> &str {
        self.endpoint.name()
    }

    /// True when both handles talk to the very same endpoint.
    pub fn same_endpoint(&self, other: &Channel) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.endpoint), Arc::as_ptr(&other.endpoint))
    }

    /// One round-trip, bounded by `timeout`.
    pub async fn invoke(
        &self,
        method: BridgeMethod,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        match tokio::time::timeout(timeout, self.endpoint.invoke(method.as_ref(), params)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout.as_millis() as u64)),
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("instance", &self.instance)
            .field("name", &self.name())
            .finish()
    }
}

/// Owns the instance → channel map.
///
/// Entries are added by [`ChannelRegistry::ensure_channel`] and, once opened,
/// never removed. Each slot is a `OnceCell`, so racing first uses of an id
/// share one open; a slot whose open failed is dropped again.
pub struct ChannelRegistry {
    transport: Arc<dyn Transport>,
    bus: Arc<EventBus>,
    prefix: String,
    channels: DashMap<InstanceId, Arc<OnceCell<Channel>>>,
}

impl ChannelRegistry {
    pub fn new(transport: Arc<dyn Transport>, bus: Arc<EventBus>, prefix: impl Into<String>) -> Self {
        Self {
            transport,
            bus,
            prefix: prefix.into(),
            channels: DashMap::new(),
        }
    }

    /// Deterministic transport name for `id`.
    pub fn channel_name(&self, id: InstanceId) -> String {
        format!("{}{}", self.prefix, id)
    }

    /// Existing channel for `id`, or a freshly opened one.
    ///
    /// A failed open leaves the slot empty so a later call can try again.
    pub async fn ensure_channel(&self, id: InstanceId) -> Result<Channel, BridgeError> {
        // clone the slot out so no map guard is held across the await
        let slot = Arc::clone(&*self.channels.entry(id).or_default());
        match slot.get_or_try_init(|| self.open_channel(id)).await {
            Ok(channel) => Ok(channel.clone()),
            Err(err) => {
                // an unopened slot must not outlive its failed open
                self.channels.remove_if(&id, |_, slot| !slot.initialized());
                Err(err)
            }
        }
    }

    /// Existing channel for `id`. Never opens one.
    pub fn get_channel(&self, id: InstanceId) -> Result<Channel, BridgeError> {
        self.channels
            .get(&id)
            .and_then(|slot| slot.get().cloned())
            .ok_or(BridgeError::UnknownInstance {
                id,
                message: Some("no channel has been created for this instance; call init first".to_string()),
            })
    }

    /// Ids with a live channel, ascending.
    pub fn instances(&self) -> Vec<InstanceId> {
        let mut ids: Vec<InstanceId> = self
            .channels
            .iter()
            .filter(|kv| kv.value().initialized())
            .map(|kv| *kv.key())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.instances().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn open_channel(&self, id: InstanceId) -> Result<Channel, BridgeError> {
        let name = self.channel_name(id);
        let handler = Arc::new(InboundCallHandler::new(id, Arc::clone(&self.bus)));
        let endpoint = self
            .transport
            .open(&name, handler)
            .await
            .map_err(|source| BridgeError::ChannelOpen { instance: id, source })?;
        info!(instance = %id, channel = %name, "channel opened");
        Ok(Channel::new(id, endpoint))
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("prefix", &self.prefix)
            .field("instances", &self.instances())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_rpc::loopback::LoopbackTransport;

    fn registry(transport: &LoopbackTransport) -> ChannelRegistry {
        ChannelRegistry::new(
            Arc::new(transport.clone()),
            Arc::new(EventBus::new()),
            DEFAULT_CHANNEL_PREFIX,
        )
    }

    #[tokio::test]
    async fn ensure_channel_is_identity_stable() {
        let transport = LoopbackTransport::new();
        let reg = registry(&transport);

        let a = reg.ensure_channel(InstanceId(1)).await.unwrap();
        let b = reg.ensure_channel(InstanceId(1)).await.unwrap();
        assert!(a.same_endpoint(&b));
        assert_eq!(a.name(), "engine_bridge/instance_1");
        assert_eq!(transport.open_count("engine_bridge/instance_1"), 1);
    }

    #[tokio::test]
    async fn get_channel_never_creates() {
        let transport = LoopbackTransport::new();
        let reg = registry(&transport);

        let err = reg.get_channel(InstanceId(42)).unwrap_err();
        assert!(matches!(err, BridgeError::UnknownInstance { id: InstanceId(42), .. }));
        assert_eq!(transport.open_count("engine_bridge/instance_42"), 0);
        assert!(reg.is_empty());

        let opened = reg.ensure_channel(InstanceId(42)).await.unwrap();
        assert!(reg.get_channel(InstanceId(42)).unwrap().same_endpoint(&opened));
    }

    #[tokio::test]
    async fn failed_open_can_be_retried() {
        let transport = LoopbackTransport::new();
        let reg = registry(&transport);

        transport.refuse_opens(true);
        let err = reg.ensure_channel(InstanceId(3)).await.unwrap_err();
        assert!(matches!(err, BridgeError::ChannelOpen { instance: InstanceId(3), .. }));
        assert!(reg.get_channel(InstanceId(3)).is_err());
        assert!(reg.instances().is_empty());
        assert!(reg.channels.is_empty());

        transport.refuse_opens(false);
        reg.ensure_channel(InstanceId(3)).await.unwrap();
        assert_eq!(reg.instances(), vec![InstanceId(3)]);
        assert_eq!(reg.channels.len(), 1);
    }

    #[tokio::test]
    async fn channel_names_use_the_prefix() {
        let transport = LoopbackTransport::new();
        let reg = ChannelRegistry::new(Arc::new(transport), Arc::new(EventBus::new()), "demo/view_");
        assert_eq!(reg.channel_name(InstanceId(17)), "demo/view_17");
    }
}

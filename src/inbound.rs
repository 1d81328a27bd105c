use std::sync::Arc;

use async_trait::async_trait;
use bridge_rpc::jsonrpc::{self, INVALID_PARAMS, METHOD_NOT_FOUND};
use bridge_rpc::{InboundHandler, InboundMethod};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::events::{
    CreatedEvent, EngineEvent, EventBus, EventFault, MessageEvent, SceneLoaded, SceneLoadedEvent, UnloadedEvent,
};
use crate::instance::InstanceId;

/// Installed on a channel when the registry opens it; turns the engine's
/// pushes for that one instance into bus events.
#[derive(Debug, Clone)]
pub struct InboundCallHandler {
    instance: InstanceId,
    bus: Arc<EventBus>,
}

impl InboundCallHandler {
    pub fn new(instance: InstanceId, bus: Arc<EventBus>) -> Self {
        Self { instance, bus }
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// Decode one inbound call without publishing it.
    pub fn classify(&self, method: &str, params: Option<Value>) -> Result<EngineEvent, BridgeError> {
        let instance = self.instance;
        let method = method.parse::<InboundMethod>().map_err(|_| BridgeError::UnimplementedCall {
            instance,
            method: method.to_string(),
        })?;
        let payload = params.unwrap_or(Value::Null);

        let event = match method {
            InboundMethod::OnMessage => EngineEvent::Message(MessageEvent { instance, message: payload }),
            InboundMethod::OnUnloaded => EngineEvent::Unloaded(UnloadedEvent { instance, payload }),
            InboundMethod::OnSceneLoaded => {
                let scene = SceneLoaded::decode(Some(&payload)).map_err(|reason| BridgeError::PayloadDecode {
                    instance,
                    method,
                    reason,
                })?;
                EngineEvent::SceneLoaded(SceneLoadedEvent { instance, scene })
            }
            InboundMethod::OnCreated => EngineEvent::Created(CreatedEvent { instance, payload }),
        };
        Ok(event)
    }

    /// Classify and publish. Malformed payloads fail the call and are also
    /// published as faults so the instance's subscribers see them.
    pub fn handle(&self, method: &str, params: Option<Value>) -> Result<(), BridgeError> {
        match self.classify(method, params) {
            Ok(event) => {
                debug!(instance = %self.instance, kind = ?event.kind(), "inbound event");
                self.bus.publish(Ok(event));
                Ok(())
            }
            Err(BridgeError::PayloadDecode { instance, method, reason }) => {
                self.bus.publish(Err(EventFault {
                    instance,
                    method,
                    reason: reason.clone(),
                }));
                Err(BridgeError::PayloadDecode { instance, method, reason })
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl InboundHandler for InboundCallHandler {
    async fn handle_call(&self, method: &str, params: Option<Value>) -> Result<Value, jsonrpc::Error> {
        self.handle(method, params).map(|_| Value::Null).map_err(|err| {
            warn!(instance = %self.instance, method, "inbound call rejected: {err}");
            match err {
                BridgeError::UnimplementedCall { method, .. } => jsonrpc::Error::new(
                    METHOD_NOT_FOUND,
                    format!("unimplemented call `{method}`"),
                    Some(json!(method)),
                ),
                BridgeError::PayloadDecode { reason, .. } => {
                    jsonrpc::Error::new(INVALID_PARAMS, "Invalid params", Some(json!(reason)))
                }
                other => jsonrpc::Error::new(jsonrpc::INTERNAL_ERROR, other.to_string(), None),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventFilter, EventKind};
    use futures::{FutureExt, StreamExt};

    fn handler(id: u64) -> (InboundCallHandler, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        (InboundCallHandler::new(InstanceId(id), bus.clone()), bus)
    }

    #[test]
    fn classify_passes_opaque_payloads_through() {
        let (h, _) = handler(3);
        let ev = h.classify("onMessage", Some(json!({"any": ["thing"]}))).unwrap();
        assert_eq!(
            ev,
            EngineEvent::Message(MessageEvent {
                instance: InstanceId(3),
                message: json!({"any": ["thing"]}),
            })
        );
        assert_eq!(h.classify("onCreated", None).unwrap().kind(), EventKind::Created);
        assert_eq!(h.classify("onUnloaded", None).unwrap().kind(), EventKind::Unloaded);
    }

    #[test]
    fn unknown_method_is_unimplemented() {
        let (h, _) = handler(3);
        let err = h.classify("onBogus", None).unwrap_err();
        assert!(matches!(err, BridgeError::UnimplementedCall { ref method, .. } if method == "onBogus"));
    }

    #[tokio::test]
    async fn rejected_calls_map_to_rpc_codes() {
        let (h, bus) = handler(3);
        let mut all = bus.subscribe(EventFilter::all());

        let err = h.handle_call("onBogus", None).await.unwrap_err();
        assert_eq!(err.code, METHOD_NOT_FOUND);
        assert!(all.next().now_or_never().is_none(), "unimplemented calls publish nothing");

        let err = h.handle_call("onSceneLoaded", Some(json!(42))).await.unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);
        let fault = all.next().await.unwrap().unwrap_err();
        assert_eq!(fault.method, InboundMethod::OnSceneLoaded);
        assert_eq!(fault.instance, InstanceId(3));
    }

    #[tokio::test]
    async fn scene_loaded_is_decoded() {
        let (h, bus) = handler(8);
        let mut events = bus.subscribe(EventFilter::instance(InstanceId(8)));

        h.handle_call("onSceneLoaded", Some(json!({"name": "Level1", "buildIndex": 1, "isValid": true})))
            .await
            .unwrap();

        match events.next().await.unwrap().unwrap() {
            EngineEvent::SceneLoaded(SceneLoadedEvent { scene, .. }) => {
                assert_eq!(scene.name, "Level1");
                assert_eq!(scene.build_index, 1);
                assert!(scene.is_valid);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

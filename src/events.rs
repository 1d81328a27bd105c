//! Event bus for inbound engine calls.
//!
//! Design:
//! - One bus per bridge; inbound handlers publish, subscribers only read.
//! - Fan-out to a list of subscriber queues: every live subscriber sees every
//!   item its filter accepts exactly once, in publish order.
//! - No history. A subscriber only sees what is published after it attached.
//! - Views (`events(id)`, per-kind streams) register a filter that the bus
//!   checks before queueing; dropping one detaches only that subscriber.

use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll, ready};

use bridge_rpc::InboundMethod;
use futures::Stream;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

use crate::instance::InstanceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Message,
    Unloaded,
    SceneLoaded,
    Created,
}

impl From<InboundMethod> for EventKind {
    fn from(method: InboundMethod) -> Self {
        match method {
            InboundMethod::OnMessage => EventKind::Message,
            InboundMethod::OnUnloaded => EventKind::Unloaded,
            InboundMethod::OnSceneLoaded => EventKind::SceneLoaded,
            InboundMethod::OnCreated => EventKind::Created,
        }
    }
}

/// Scene information pushed with `onSceneLoaded`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SceneLoaded {
    pub name: String,
    pub build_index: i64,
    #[serde(default)]
    pub is_loaded: bool,
    #[serde(default)]
    pub is_valid: bool,
}

impl SceneLoaded {
    /// Accepts a JSON object, or a JSON string holding one.
    pub fn decode(payload: Option<&Value>) -> Result<Self, String> {
        match payload {
            Some(Value::Object(_)) => {
                serde_json::from_value(payload.cloned().unwrap_or(Value::Null)).map_err(|e| e.to_string())
            }
            Some(Value::String(text)) => serde_json::from_str(text).map_err(|e| e.to_string()),
            Some(other) => Err(format!("expected an object or a JSON string, got {}", json_type(other))),
            None => Err("missing payload".to_string()),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MessageEvent {
    pub instance: InstanceId,
    pub message: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UnloadedEvent {
    pub instance: InstanceId,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SceneLoadedEvent {
    pub instance: InstanceId,
    pub scene: SceneLoaded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CreatedEvent {
    pub instance: InstanceId,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EngineEvent {
    Message(MessageEvent),
    Unloaded(UnloadedEvent),
    SceneLoaded(SceneLoadedEvent),
    Created(CreatedEvent),
}

impl EngineEvent {
    pub fn instance(&self) -> InstanceId {
        match self {
            EngineEvent::Message(e) => e.instance,
            EngineEvent::Unloaded(e) => e.instance,
            EngineEvent::SceneLoaded(e) => e.instance,
            EngineEvent::Created(e) => e.instance,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            EngineEvent::Message(_) => EventKind::Message,
            EngineEvent::Unloaded(_) => EventKind::Unloaded,
            EngineEvent::SceneLoaded(_) => EventKind::SceneLoaded,
            EngineEvent::Created(_) => EventKind::Created,
        }
    }
}

/// A malformed inbound call, delivered to the instance's subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("instance {instance} sent an undecodable `{method}` payload: {reason}")]
pub struct EventFault {
    pub instance: InstanceId,
    pub method: InboundMethod,
    pub reason: String,
}

pub type EventItem = Result<EngineEvent, EventFault>;

fn item_instance(item: &EventItem) -> InstanceId {
    match item {
        Ok(event) => event.instance(),
        Err(fault) => fault.instance,
    }
}

fn item_kind(item: &EventItem) -> EventKind {
    match item {
        Ok(event) => event.kind(),
        Err(fault) => fault.method.into(),
    }
}

/// Which items a subscription lets through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub instance: Option<InstanceId>,
    pub kind: Option<EventKind>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn instance(id: InstanceId) -> Self {
        Self { instance: Some(id), kind: None }
    }

    pub fn with_kind(mut self, kind: EventKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn matches(&self, item: &EventItem) -> bool {
        self.instance.is_none_or(|id| item_instance(item) == id)
            && self.kind.is_none_or(|kind| item_kind(item) == kind)
    }
}

#[derive(Debug)]
struct Subscriber {
    filter: EventFilter,
    tx: mpsc::UnboundedSender<EventItem>,
}

#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand `item` to every live subscriber whose filter accepts it; forget
    /// the ones that went away.
    pub fn publish(&self, item: EventItem) {
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.retain(|sub| {
            if sub.filter.matches(&item) {
                sub.tx.send(item.clone()).is_ok()
            } else {
                !sub.tx.is_closed()
            }
        });
        trace!(subscribers = subscribers.len(), "event published");
    }

    pub fn subscribe(&self, filter: EventFilter) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = Subscriber { filter, tx };
        match self.subscribers.lock() {
            Ok(mut guard) => guard.push(sub),
            Err(poisoned) => poisoned.into_inner().push(sub),
        }
        EventStream { rx, filter }
    }

    /// Subscribers that have not been dropped yet.
    pub fn subscriber_count(&self) -> usize {
        let subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.iter().filter(|sub| !sub.tx.is_closed()).count()
    }
}

/// A filtered view of the bus. Only items matching its filter are ever
/// queued for it. Ends only when the bus is dropped.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<EventItem>,
    filter: EventFilter,
}

impl EventStream {
    pub fn filter(&self) -> EventFilter {
        self.filter
    }

    /// Items delivered to this view and not yet taken.
    pub fn queued(&self) -> usize {
        self.rx.len()
    }
}

impl Stream for EventStream {
    type Item = EventItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Event payloads that belong to exactly one [`EventKind`].
pub trait KindedEvent: Sized {
    const KIND: EventKind;
    fn from_event(event: EngineEvent) -> Option<Self>;
}

macro_rules! kinded {
    ($ty:ty, $variant:ident) => {
        impl KindedEvent for $ty {
            const KIND: EventKind = EventKind::$variant;
            fn from_event(event: EngineEvent) -> Option<Self> {
                match event {
                    EngineEvent::$variant(e) => Some(e),
                    _ => None,
                }
            }
        }
    };
}

kinded!(MessageEvent, Message);
kinded!(UnloadedEvent, Unloaded);
kinded!(SceneLoadedEvent, SceneLoaded);
kinded!(CreatedEvent, Created);

/// An [`EventStream`] narrowed to one kind and unwrapped to its payload type.
#[derive(Debug)]
pub struct KindEvents<T> {
    inner: EventStream,
    _kind: PhantomData<fn() -> T>,
}

impl<T: KindedEvent> KindEvents<T> {
    pub fn new(bus: &EventBus, id: InstanceId) -> Self {
        Self {
            inner: bus.subscribe(EventFilter::instance(id).with_kind(T::KIND)),
            _kind: PhantomData,
        }
    }
}

impl<T: KindedEvent> Stream for KindEvents<T> {
    type Item = Result<T, EventFault>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(Pin::new(&mut self.inner).poll_next(cx)) {
                Some(Ok(event)) => match T::from_event(event) {
                    Some(typed) => return Poll::Ready(Some(Ok(typed))),
                    None => continue,
                },
                Some(Err(fault)) => return Poll::Ready(Some(Err(fault))),
                None => return Poll::Ready(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{FutureExt, StreamExt};
    use serde_json::json;

    fn message(id: u64, text: &str) -> EventItem {
        Ok(EngineEvent::Message(MessageEvent {
            instance: InstanceId(id),
            message: json!(text),
        }))
    }

    #[test]
    fn scene_loaded_accepts_object_and_text() {
        let from_obj = SceneLoaded::decode(Some(&json!({"name": "Main", "buildIndex": 2, "isLoaded": true}))).unwrap();
        assert_eq!(from_obj.name, "Main");
        assert_eq!(from_obj.build_index, 2);
        assert!(from_obj.is_loaded);
        assert!(!from_obj.is_valid);

        let from_text = SceneLoaded::decode(Some(&json!(r#"{"name":"Main","buildIndex":2,"isLoaded":true}"#))).unwrap();
        assert_eq!(from_text, from_obj);
    }

    #[test]
    fn scene_loaded_rejects_other_shapes() {
        assert!(SceneLoaded::decode(None).is_err());
        assert!(SceneLoaded::decode(Some(&json!(3))).unwrap_err().contains("a number"));
        assert!(SceneLoaded::decode(Some(&json!({"name": "Main"}))).is_err());
        assert!(SceneLoaded::decode(Some(&json!("not json"))).is_err());
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events() {
        let bus = EventBus::new();
        let mut early = bus.subscribe(EventFilter::all());
        bus.publish(message(1, "first"));

        let mut late = bus.subscribe(EventFilter::all());
        bus.publish(message(1, "second"));

        assert_eq!(early.next().await.unwrap(), message(1, "first"));
        assert_eq!(early.next().await.unwrap(), message(1, "second"));
        assert_eq!(late.next().await.unwrap(), message(1, "second"));
    }

    #[tokio::test]
    async fn filters_by_instance_and_kind() {
        let bus = EventBus::new();
        let mut only_two = bus.subscribe(EventFilter::instance(InstanceId(2)));
        let mut created = KindEvents::<CreatedEvent>::new(&bus, InstanceId(2));

        bus.publish(message(1, "other"));
        bus.publish(message(2, "mine"));
        bus.publish(Ok(EngineEvent::Created(CreatedEvent {
            instance: InstanceId(2),
            payload: Value::Null,
        })));

        assert_eq!(only_two.next().await.unwrap(), message(2, "mine"));
        assert_eq!(only_two.next().await.unwrap().unwrap().kind(), EventKind::Created);

        let ev = created.next().await.unwrap().unwrap();
        assert_eq!(ev.instance, InstanceId(2));
    }

    #[tokio::test]
    async fn faults_reach_matching_kind_views() {
        let bus = EventBus::new();
        let mut scenes = KindEvents::<SceneLoadedEvent>::new(&bus, InstanceId(4));
        let mut messages = KindEvents::<MessageEvent>::new(&bus, InstanceId(4));

        bus.publish(Err(EventFault {
            instance: InstanceId(4),
            method: InboundMethod::OnSceneLoaded,
            reason: "missing field `name`".into(),
        }));
        bus.publish(message(4, "after"));

        assert!(scenes.next().await.unwrap().is_err());
        assert_eq!(messages.next().await.unwrap().unwrap().message, json!("after"));
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let keep = bus.subscribe(EventFilter::all());
        let gone = bus.subscribe(EventFilter::all());
        assert_eq!(bus.subscriber_count(), 2);

        drop(gone);
        assert_eq!(bus.subscriber_count(), 1);
        bus.publish(message(1, "x"));
        assert_eq!(bus.subscribers.lock().unwrap().len(), 1);
        drop(keep);
    }

    #[tokio::test]
    async fn unrelated_instances_queue_nothing() {
        let bus = EventBus::new();
        let mut seven = bus.subscribe(EventFilter::instance(InstanceId(7)));
        let three = bus.subscribe(EventFilter::instance(InstanceId(3)));
        let created = bus.subscribe(EventFilter::instance(InstanceId(3)).with_kind(EventKind::Created));

        for n in 0..1_000 {
            bus.publish(message(3, &n.to_string()));
        }

        assert_eq!(seven.queued(), 0);
        assert_eq!(created.queued(), 0);
        assert_eq!(three.queued(), 1_000);
        assert!(seven.next().now_or_never().is_none());
    }
}

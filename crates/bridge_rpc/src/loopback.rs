//! In-memory transport for tests.
//!
//! Every outbound call is recorded and answered from a per-method script;
//! inbound calls are injected with [`LoopbackTransport::deliver`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::jsonrpc;
use crate::transport::{ChannelEndpoint, InboundHandler, Transport, TransportError};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub channel: String,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone)]
enum Scripted {
    Reply(Value),
    Fail(jsonrpc::Error),
    Hang,
}

#[derive(Default)]
struct Inner {
    handlers: DashMap<String, Arc<dyn InboundHandler>>,
    opens: DashMap<String, usize>,
    script: DashMap<String, Scripted>,
    disconnected: Mutex<HashSet<String>>,
    calls: Mutex<Vec<RecordedCall>>,
    open_delay: Mutex<Option<Duration>>,
    refuse_opens: Mutex<bool>,
}

#[derive(Clone, Default)]
pub struct LoopbackTransport {
    inner: Arc<Inner>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `open` take this long, so racing openers overlap.
    pub fn with_open_delay(self, delay: Duration) -> Self {
        *self.inner.open_delay.lock().unwrap() = Some(delay);
        self
    }

    /// Answer `method` with `value` on every channel.
    pub fn reply(&self, method: impl Into<String>, value: Value) {
        self.inner.script.insert(method.into(), Scripted::Reply(value));
    }

    /// Answer `method` with a JSON-RPC error on every channel.
    pub fn fail(&self, method: impl Into<String>, code: i64, message: impl Into<String>) {
        self.inner
            .script
            .insert(method.into(), Scripted::Fail(jsonrpc::Error::new(code, message, None)));
    }

    /// Never answer `method`.
    pub fn hang(&self, method: impl Into<String>) {
        self.inner.script.insert(method.into(), Scripted::Hang);
    }

    /// Subsequent calls on `channel` fail as if the engine went away.
    pub fn disconnect(&self, channel: &str) {
        self.inner.disconnected.lock().unwrap().insert(channel.to_string());
    }

    pub fn refuse_opens(&self, refuse: bool) {
        *self.inner.refuse_opens.lock().unwrap() = refuse;
    }

    /// How many times a handler was registered for `channel`.
    pub fn open_count(&self, channel: &str) -> usize {
        self.inner.opens.get(channel).map(|n| *n).unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<RecordedCall> {
        self.calls().into_iter().filter(|c| c.method == method).collect()
    }

    /// Push an inbound call to whatever handler `channel` registered.
    pub async fn deliver(
        &self,
        channel: &str,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, jsonrpc::Error> {
        let handler = self
            .inner
            .handlers
            .get(channel)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| jsonrpc::Error::new(jsonrpc::INTERNAL_ERROR, format!("no channel `{channel}`"), None))?;
        handler.handle_call(method, params).await
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn open(
        &self,
        name: &str,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<Arc<dyn ChannelEndpoint>, TransportError> {
        let delay = *self.inner.open_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.inner.refuse_opens.lock().unwrap() {
            return Err(TransportError::Disconnected(name.to_string()));
        }
        *self.inner.opens.entry(name.to_string()).or_insert(0) += 1;
        self.inner.handlers.insert(name.to_string(), handler);
        Ok(Arc::new(LoopbackChannel {
            name: name.to_string(),
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct LoopbackChannel {
    name: String,
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LoopbackChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackChannel").field("name", &self.name).finish()
    }
}

#[async_trait]
impl ChannelEndpoint for LoopbackChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, method: &str, params: Option<Value>) -> Result<Value, TransportError> {
        if self.inner.disconnected.lock().unwrap().contains(&self.name) {
            return Err(TransportError::Disconnected(self.name.clone()));
        }
        self.inner.calls.lock().unwrap().push(RecordedCall {
            channel: self.name.clone(),
            method: method.to_string(),
            params,
        });
        let scripted = self.inner.script.get(method).map(|s| s.value().clone());
        match scripted {
            Some(Scripted::Reply(value)) => Ok(value),
            Some(Scripted::Fail(err)) => Err(err.into()),
            Some(Scripted::Hang) => std::future::pending().await,
            None => Ok(Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl InboundHandler for Echo {
        async fn handle_call(&self, method: &str, params: Option<Value>) -> Result<Value, jsonrpc::Error> {
            Ok(json!({ "method": method, "params": params }))
        }
    }

    #[tokio::test]
    async fn records_calls_and_plays_script() {
        let transport = LoopbackTransport::new();
        transport.reply("isReady", json!(true));
        transport.fail("quitPlayer", -32000, "boom");

        let ch = transport.open("x/1", Arc::new(Echo)).await.unwrap();
        assert_eq!(ch.invoke("isReady", None).await.unwrap(), json!(true));
        assert_eq!(ch.invoke("pausePlayer", None).await.unwrap(), Value::Null);
        assert!(matches!(
            ch.invoke("quitPlayer", None).await,
            Err(TransportError::Remote { code: -32000, .. })
        ));

        let methods: Vec<_> = transport.calls().into_iter().map(|c| c.method).collect();
        assert_eq!(methods, ["isReady", "pausePlayer", "quitPlayer"]);
        assert_eq!(transport.open_count("x/1"), 1);
    }

    #[tokio::test]
    async fn deliver_reaches_registered_handler() {
        let transport = LoopbackTransport::new();
        let _ch = transport.open("x/2", Arc::new(Echo)).await.unwrap();

        let out = transport.deliver("x/2", "onCreated", Some(json!(1))).await.unwrap();
        assert_eq!(out["method"], json!("onCreated"));
        assert!(transport.deliver("x/3", "onCreated", None).await.is_err());
    }

    #[tokio::test]
    async fn disconnected_channel_fails_calls() {
        let transport = LoopbackTransport::new();
        let ch = transport.open("x/4", Arc::new(Echo)).await.unwrap();
        transport.disconnect("x/4");
        assert!(matches!(ch.invoke("isReady", None).await, Err(TransportError::Disconnected(_))));
    }
}

//! The contract every host ⇄ engine transport fulfils.
//!
//! A transport opens one named, ordered, bidirectional channel per engine
//! instance. Outbound traffic is request/response ([`ChannelEndpoint::invoke`]);
//! inbound traffic is pushed to the [`InboundHandler`] registered when the
//! channel was opened. Calls arriving on one channel reach the handler one at
//! a time, in the order the engine sent them.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::jsonrpc;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The other side went away, or the channel was never connected.
    #[error("channel `{0}` is disconnected")]
    Disconnected(String),

    #[error("call timed out after {0} ms")]
    Timeout(u64),

    /// The engine answered with a JSON-RPC error object.
    #[error("remote error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine process could not be launched.
    #[error("could not spawn engine for channel `{channel}`: {source}")]
    Spawn {
        channel: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<jsonrpc::Error> for TransportError {
    fn from(err: jsonrpc::Error) -> Self {
        TransportError::Remote {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

/// Receives the calls an engine pushes over one channel.
#[async_trait]
pub trait InboundHandler: Send + Sync + 'static {
    async fn handle_call(&self, method: &str, params: Option<Value>) -> Result<Value, jsonrpc::Error>;
}

/// The host side of one open channel.
#[async_trait]
pub trait ChannelEndpoint: Send + Sync + fmt::Debug + 'static {
    fn name(&self) -> &str;

    /// Send `method` and wait for the engine's reply. `Value::Null` stands
    /// for a void reply.
    async fn invoke(&self, method: &str, params: Option<Value>) -> Result<Value, TransportError>;
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open the channel called `name` and route its inbound calls to `handler`.
    async fn open(
        &self,
        name: &str,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<Arc<dyn ChannelEndpoint>, TransportError>;
}

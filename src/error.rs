use bridge_rpc::{BridgeMethod, InboundMethod, TransportError};
use thiserror::Error;

use crate::instance::InstanceId;

/// Everything the bridge can report back to a caller.
///
/// Errors stay local to the operation or channel that produced them.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A command addressed an instance that has no live channel.
    #[error("unknown instance id {id}: {}", .message.as_deref().unwrap_or("no channel registered"))]
    UnknownInstance {
        id: InstanceId,
        message: Option<String>,
    },

    /// The engine pushed a call we do not recognise.
    #[error("instance {instance} sent unimplemented call `{method}`")]
    UnimplementedCall { instance: InstanceId, method: String },

    /// An inbound payload did not have the expected shape.
    #[error("instance {instance} sent an undecodable `{method}` payload: {reason}")]
    PayloadDecode {
        instance: InstanceId,
        method: InboundMethod,
        reason: String,
    },

    /// A command round-trip failed.
    #[error("`{operation}` on instance {instance} failed: {source}")]
    Dispatch {
        operation: BridgeMethod,
        instance: InstanceId,
        #[source]
        source: TransportError,
    },

    #[error("could not open a channel for instance {instance}: {source}")]
    ChannelOpen {
        instance: InstanceId,
        #[source]
        source: TransportError,
    },

    /// A structured message could not be turned into text.
    #[error("could not encode message for instance {instance}: {source}")]
    Encode {
        instance: InstanceId,
        #[source]
        source: serde_json::Error,
    },

    /// The embedding layer failed to build a view.
    #[error("view creation for instance {instance} failed: {source}")]
    View {
        instance: InstanceId,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl BridgeError {
    /// The instance the failure belongs to.
    pub fn instance(&self) -> InstanceId {
        match self {
            BridgeError::UnknownInstance { id, .. } => *id,
            BridgeError::UnimplementedCall { instance, .. }
            | BridgeError::PayloadDecode { instance, .. }
            | BridgeError::Dispatch { instance, .. }
            | BridgeError::ChannelOpen { instance, .. }
            | BridgeError::Encode { instance, .. }
            | BridgeError::View { instance, .. } => *instance,
        }
    }
}

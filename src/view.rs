//! Boundary toward whatever embeds a rendering surface for an instance.
//!
//! The bridge only guarantees ordering: by the time a factory runs, the
//! instance's channel is open and its events are flowing to the bus.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::instance::InstanceId;

/// What a factory needs to attach its surface to the right engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ViewRequest {
    pub instance: InstanceId,
    pub channel_name: String,
}

#[async_trait]
pub trait ViewFactory: Send + Sync {
    type View: Send;
    type Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send;

    async fn create_view(&self, request: ViewRequest) -> Result<Self::View, Self::Error>;
}

//! Control-plane bridge between a host application and embedded engine
//! instances.
//!
//! Commands go out through [`CommandDispatcher`]; whatever the engines push
//! back comes in through the event streams on [`EngineBridge`].

pub mod bridge;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod inbound;
pub mod instance;
pub mod logger;
pub mod registry;
pub mod schema;
pub mod telemetry;
pub mod view;

pub use bridge::EngineBridge;
pub use config::BridgeConfig;
pub use dispatcher::CommandDispatcher;
pub use error::BridgeError;
pub use events::{EngineEvent, EventFault, EventKind, SceneLoaded};
pub use instance::InstanceId;
pub use registry::{Channel, ChannelRegistry};
pub use view::{ViewFactory, ViewRequest};

pub mod jsonrpc;
pub mod process;
pub mod runtime;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod loopback;

pub use jsonrpc::{BridgeMethod, InboundMethod};
pub use process::ProcessTransport;
pub use transport::{ChannelEndpoint, InboundHandler, Transport, TransportError};

pub mod client;
pub mod identity;
pub mod protocol;

pub use client::{GatewayClient, ServerHello};
pub use identity::DeviceIdentity;
pub use protocol::Frame;

//! HTTP surfaces of tldraw-relay.
//!
//! The broadcast server fans operations out to every connected rendering
//! surface as an event stream and accepts snapshot answers. The relay proxy
//! sits in front of it for browser clients, re-framing the upstream stream
//! onto a same-origin endpoint.

pub mod broadcast;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod relay;
pub mod server;
pub mod state;

pub use server::{broadcast_router, relay_router, start_broadcast_server, start_relay_proxy};
pub use state::{GatewayState, RelayState};

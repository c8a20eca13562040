//! Real-time messaging and presence engine.
//!
//! Leaves first: [`registry`] maps identities to live connections,
//! [`heartbeat`] reclaims stale ones, [`presence`] derives debounced
//! online/offline state, [`delivery`] drives the Sent → Delivered → Read
//! lifecycle, and [`dispatcher`] + [`connection`] form the session gateway
//! that authenticates sockets and routes their events.

pub mod auth;
pub mod clock;
pub mod config;
pub mod connection;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod presence;
pub mod registry;

pub use config::GatewayConfig;
pub use dispatcher::Dispatcher;
pub use error::{AuthError, GatewayError};

#[cfg(test)]
pub(crate) mod testing;

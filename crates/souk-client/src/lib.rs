//! Client side of the gateway: a reconnecting session actor plus the
//! pieces it is built from.

pub mod dedup;
pub mod error;
pub mod history;
pub mod reconnect;
pub mod session;
pub mod typing;

pub use error::ClientError;
pub use history::HistoryClient;
pub use reconnect::ReconnectPolicy;
pub use session::{ChatSession, SessionConfig, SessionEvent};

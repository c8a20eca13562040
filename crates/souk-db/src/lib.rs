pub mod memory;
pub mod migrations;
pub mod models;
pub mod queries;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use souk_types::models::{DeliveryState, Message};

pub use memory::MemoryStore;

/// Durable message persistence. The real-time engine only drives state
/// transitions; this trait owns durability.
///
/// Implementations are synchronous. Async callers should go through
/// `tokio::task::spawn_blocking`.
pub trait MessageStore: Send + Sync {
    /// Store a freshly submitted message and return it as stored.
    fn persist(&self, message: &Message) -> Result<Message>;

    fn get(&self, id: Uuid) -> Result<Option<Message>>;

    /// Look up an earlier submission by its client-generated nonce.
    fn find_by_nonce(&self, sender_id: Uuid, nonce: &str) -> Result<Option<Message>>;

    /// Raise the stored state to `state`. Returns false if the message is
    /// unknown or already at or past `state`; stored states never regress.
    fn update_state(&self, id: Uuid, state: DeliveryState) -> Result<bool>;

    /// Conversation between two identities, oldest first.
    fn fetch_history(&self, a: Uuid, b: Uuid) -> Result<Vec<Message>>;

    /// Messages received by `user_id` that have not been read, newest first.
    fn fetch_unread(&self, user_id: Uuid) -> Result<Vec<Message>>;
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }
}

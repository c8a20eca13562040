use anyhow::Result;
use rusqlite::{Connection, Row};
use uuid::Uuid;

use souk_types::models::{DeliveryState, Message};

use crate::models::MessageRow;
use crate::{Database, MessageStore};

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, body, created_at, state, client_nonce";

impl MessageStore for Database {
    fn persist(&self, message: &Message) -> Result<Message> {
        let row = MessageRow::from_message(message)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, body, created_at, state, client_nonce)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    row.id,
                    row.sender_id,
                    row.receiver_id,
                    row.body,
                    row.created_at,
                    row.state,
                    row.client_nonce
                ],
            )?;
            Ok(())
        })?;
        Ok(message.clone())
    }

    fn get(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
            conn.query_row(&sql, [id.to_string()], read_row)
                .optional()?
                .map(MessageRow::into_message)
                .transpose()
        })
    }

    fn find_by_nonce(&self, sender_id: Uuid, nonce: &str) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE sender_id = ?1 AND client_nonce = ?2"
            );
            conn.query_row(&sql, rusqlite::params![sender_id.to_string(), nonce], read_row)
                .optional()?
                .map(MessageRow::into_message)
                .transpose()
        })
    }

    fn update_state(&self, id: Uuid, state: DeliveryState) -> Result<bool> {
        self.with_conn(|conn| {
            // The `state < ?2` guard keeps stored states monotone
            let changed = conn.execute(
                "UPDATE messages SET state = ?2 WHERE id = ?1 AND state < ?2",
                rusqlite::params![id.to_string(), state.rank()],
            )?;
            Ok(changed > 0)
        })
    }

    fn fetch_history(&self, a: Uuid, b: Uuid) -> Result<Vec<Message>> {
        self.with_conn(|conn| query_history(conn, a, b))
    }

    fn fetch_unread(&self, user_id: Uuid) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE receiver_id = ?1 AND state < ?2
                 ORDER BY created_at DESC, rowid DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![user_id.to_string(), DeliveryState::Read.rank()],
                    read_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(MessageRow::into_message).collect()
        })
    }
}

fn query_history(conn: &Connection, a: Uuid, b: Uuid) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE (sender_id = ?1 AND receiver_id = ?2)
            OR (sender_id = ?2 AND receiver_id = ?1)
         ORDER BY created_at ASC, rowid ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params![a.to_string(), b.to_string()], read_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(MessageRow::into_message).collect()
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        body: row.get(3)?,
        created_at: row.get(4)?,
        state: row.get(5)?,
        client_nonce: row.get(6)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use souk_types::models::MessageBody;

    use super::*;

    fn message(sender: Uuid, receiver: Uuid, text: &str) -> Message {
        Message::new(sender, receiver, MessageBody::text(text), None)
    }

    #[test]
    fn persist_and_get_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("souk.db")).unwrap();
        let msg = message(Uuid::new_v4(), Uuid::new_v4(), "is the lamp still available?");

        db.persist(&msg).unwrap();
        assert_eq!(db.get(msg.id).unwrap(), Some(msg));
        assert_eq!(db.get(Uuid::new_v4()).unwrap(), None);
    }

    #[test]
    fn state_updates_never_regress() {
        let db = Database::open_in_memory().unwrap();
        let msg = message(Uuid::new_v4(), Uuid::new_v4(), "hi");
        db.persist(&msg).unwrap();

        assert!(db.update_state(msg.id, DeliveryState::Delivered).unwrap());
        assert!(db.update_state(msg.id, DeliveryState::Read).unwrap());
        assert!(!db.update_state(msg.id, DeliveryState::Delivered).unwrap());
        assert!(!db.update_state(msg.id, DeliveryState::Read).unwrap());
        assert_eq!(db.get(msg.id).unwrap().unwrap().state, DeliveryState::Read);
    }

    #[test]
    fn history_is_both_directions_oldest_first() {
        let db = Database::open_in_memory().unwrap();
        let (buyer, seller, other) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let first = message(buyer, seller, "first");
        std::thread::sleep(Duration::from_millis(2));
        let second = message(seller, buyer, "second");
        let unrelated = message(buyer, other, "elsewhere");
        for m in [&second, &first, &unrelated] {
            db.persist(m).unwrap();
        }

        let history = db.fetch_history(seller, buyer).unwrap();
        let ids: Vec<Uuid> = history.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn unread_excludes_read_messages() {
        let db = Database::open_in_memory().unwrap();
        let (buyer, seller) = (Uuid::new_v4(), Uuid::new_v4());
        let a = message(seller, buyer, "a");
        let b = message(seller, buyer, "b");
        db.persist(&a).unwrap();
        db.persist(&b).unwrap();
        db.update_state(a.id, DeliveryState::Delivered).unwrap();
        db.update_state(b.id, DeliveryState::Delivered).unwrap();
        db.update_state(b.id, DeliveryState::Read).unwrap();

        let unread = db.fetch_unread(buyer).unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].id, a.id);
        assert!(db.fetch_unread(seller).unwrap().is_empty());
    }

    #[test]
    fn nonce_is_unique_per_sender() {
        let db = Database::open_in_memory().unwrap();
        let sender = Uuid::new_v4();
        let receiver = Uuid::new_v4();
        let first = Message::new(sender, receiver, MessageBody::text("x"), Some("n-1".into()));
        let again = Message::new(sender, receiver, MessageBody::text("x"), Some("n-1".into()));

        db.persist(&first).unwrap();
        assert!(db.persist(&again).is_err());
        assert_eq!(db.find_by_nonce(sender, "n-1").unwrap().map(|m| m.id), Some(first.id));
        assert!(db.find_by_nonce(receiver, "n-1").unwrap().is_none());
    }
}

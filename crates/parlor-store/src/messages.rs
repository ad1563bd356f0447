use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::models::{MessageInput, StoredMessage};

impl Database {
    /// Insert the message and one target row per recipient in a single
    /// transaction. Returns the stored message with its assigned id.
    pub fn store_message(
        &mut self,
        input: &MessageInput,
        recipients: &[String],
        now: i64,
    ) -> Result<StoredMessage> {
        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO messages (conversation_type, conversation_id, sender_id,
                                   sender_nickname, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                input.conversation_type,
                input.conversation_id,
                input.sender_id,
                input.sender_nickname,
                input.content,
                now
            ],
        )?;
        let message_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO message_targets (message_id, user_id, delivered_at)
                 VALUES (?1, ?2, NULL)",
            )?;
            for user_id in recipients {
                stmt.execute(params![message_id, user_id])?;
            }
        }
        tx.commit()?;

        Ok(StoredMessage {
            message_id,
            conversation_type: input.conversation_type.clone(),
            conversation_id: input.conversation_id.clone(),
            sender_id: input.sender_id.clone(),
            sender_nickname: input.sender_nickname.clone(),
            content: input.content.clone(),
            created_at: now,
        })
    }

    /// Messages still pending replay for `user_id`, oldest first.
    pub fn fetch_undelivered_messages(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<StoredMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT m.message_id, m.conversation_type, m.conversation_id, m.sender_id,
                    m.sender_nickname, m.content, m.created_at
             FROM message_targets t
             JOIN messages m ON t.message_id = m.message_id
             WHERE t.user_id = ?1 AND t.delivered_at IS NULL
             ORDER BY m.message_id ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn mark_messages_delivered(
        &mut self,
        user_id: &str,
        message_ids: &[i64],
        now: i64,
    ) -> Result<()> {
        if message_ids.is_empty() {
            return Ok(());
        }
        let tx = self.conn_mut().transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE message_targets SET delivered_at = ?1
                 WHERE user_id = ?2 AND message_id = ?3",
            )?;
            for message_id in message_ids {
                stmt.execute(params![now, user_id, message_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// One page of a group conversation, newest first. A `before_message_id`
    /// of 0 starts from the newest message.
    pub fn group_history(
        &self,
        group_id: &str,
        before_message_id: i64,
        limit: i64,
    ) -> Result<Vec<StoredMessage>> {
        let before = if before_message_id > 0 {
            before_message_id
        } else {
            i64::MAX
        };
        let mut stmt = self.conn().prepare(
            "SELECT message_id, conversation_type, conversation_id, sender_id,
                    sender_nickname, content, created_at
             FROM messages
             WHERE conversation_type = 'group' AND conversation_id = ?1
               AND message_id < ?2
             ORDER BY message_id DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![group_id, before, limit], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// One page of a private conversation, both directions between the two
    /// users, newest first.
    pub fn private_history(
        &self,
        viewer_id: &str,
        peer_id: &str,
        before_message_id: i64,
        limit: i64,
    ) -> Result<Vec<StoredMessage>> {
        let before = if before_message_id > 0 {
            before_message_id
        } else {
            i64::MAX
        };
        let mut stmt = self.conn().prepare(
            "SELECT message_id, conversation_type, conversation_id, sender_id,
                    sender_nickname, content, created_at
             FROM messages
             WHERE conversation_type = 'private'
               AND ((sender_id = ?1 AND conversation_id = ?2)
                 OR (sender_id = ?2 AND conversation_id = ?1))
               AND message_id < ?3
             ORDER BY message_id DESC LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![viewer_id, peer_id, before, limit],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        message_id: row.get(0)?,
        conversation_type: row.get(1)?,
        conversation_id: row.get(2)?,
        sender_id: row.get(3)?,
        sender_nickname: row.get(4)?,
        content: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(dir.path().join("test.db")).unwrap();
        (db, dir)
    }

    fn private_message(content: &str) -> MessageInput {
        MessageInput {
            conversation_type: "private".into(),
            conversation_id: "bob".into(),
            sender_id: "alice".into(),
            sender_nickname: "Alice".into(),
            content: content.into(),
        }
    }

    #[test]
    fn store_assigns_monotonic_ids() {
        let (mut db, _dir) = test_db();
        let first = db
            .store_message(&private_message("one"), &["bob".to_owned()], 100)
            .unwrap();
        let second = db
            .store_message(&private_message("two"), &["bob".to_owned()], 101)
            .unwrap();
        assert!(second.message_id > first.message_id);
    }

    #[test]
    fn undelivered_flow_consumes_targets() {
        let (mut db, _dir) = test_db();
        let stored = db
            .store_message(&private_message("hi"), &["bob".to_owned()], 100)
            .unwrap();

        let pending = db.fetch_undelivered_messages("bob", 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].content, "hi");
        assert_eq!(pending[0].created_at, 100);

        db.mark_messages_delivered("bob", &[stored.message_id], 101)
            .unwrap();

        // Delivered exactly once: the target is now invisible.
        assert!(db.fetch_undelivered_messages("bob", 10).unwrap().is_empty());
        // The sender never had a target row.
        assert!(db.fetch_undelivered_messages("alice", 10).unwrap().is_empty());
    }

    #[test]
    fn undelivered_is_ordered_and_limited() {
        let (mut db, _dir) = test_db();
        for i in 0..5 {
            db.store_message(&private_message(&format!("m{i}")), &["bob".to_owned()], 100 + i)
                .unwrap();
        }
        let page = db.fetch_undelivered_messages("bob", 3).unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].content, "m0");
        assert_eq!(page[2].content, "m2");
    }

    #[test]
    fn private_history_covers_both_directions() {
        let (mut db, _dir) = test_db();
        db.store_message(&private_message("from alice"), &["bob".to_owned()], 100)
            .unwrap();
        let reply = MessageInput {
            conversation_type: "private".into(),
            conversation_id: "alice".into(),
            sender_id: "bob".into(),
            sender_nickname: "Bob".into(),
            content: "from bob".into(),
        };
        db.store_message(&reply, &["alice".to_owned()], 101).unwrap();

        let page = db.private_history("alice", "bob", 0, 10).unwrap();
        assert_eq!(page.len(), 2);
        // Newest first.
        assert_eq!(page[0].content, "from bob");
        assert_eq!(page[1].content, "from alice");

        let older = db
            .private_history("alice", "bob", page[0].message_id, 10)
            .unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].content, "from alice");
    }
}

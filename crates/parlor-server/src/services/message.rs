//! Message storage with per-recipient delivery receipts.
//!
//! "Delivered" means a push was queued for write at least once, not that the
//! peer acknowledged it; replay is prevented by consuming the target row.

use parlor_store::{Database, MessageInput, StoreError, StoredMessage};
use thiserror::Error;

use super::now_seconds;

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("recipients empty")]
    NoRecipients,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub fn store_message(
    db: &mut Database,
    input: &MessageInput,
    recipients: &[String],
) -> Result<StoredMessage, MessageError> {
    if recipients.is_empty() {
        return Err(MessageError::NoRecipients);
    }
    Ok(db.store_message(input, recipients, now_seconds())?)
}

pub fn fetch_undelivered(
    db: &Database,
    user_id: &str,
    limit: i64,
) -> Result<Vec<StoredMessage>, MessageError> {
    Ok(db.fetch_undelivered_messages(user_id, limit.max(1))?)
}

pub fn mark_delivered(
    db: &mut Database,
    user_id: &str,
    message_ids: &[i64],
) -> Result<(), MessageError> {
    Ok(db.mark_messages_delivered(user_id, message_ids, now_seconds())?)
}

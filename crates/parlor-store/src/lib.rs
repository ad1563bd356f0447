pub mod database;
pub mod error;
pub mod files;
pub mod groups;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::{
    FileNotice, FileOffer, Group, GroupRole, MessageInput, StoredMessage, UploadInfo, User,
};

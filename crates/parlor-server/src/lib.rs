pub mod connection;
pub mod error;
pub mod handlers;
pub mod server;
pub mod services;
pub mod session;

pub use error::ServerError;
pub use server::ChatServer;

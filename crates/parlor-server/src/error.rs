use thiserror::Error;

/// Startup and infrastructure failures. Per-request failures are typed per
/// service and translated into wire codes by the handlers.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("store error: {0}")]
    Store(#[from] parlor_store::StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] parlor_shared::ConfigError),
}

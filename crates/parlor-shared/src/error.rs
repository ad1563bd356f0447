use thiserror::Error;

/// Fatal wire-level failures. Any of these tears the connection down; a
/// partial packet is not an error, the decoder just waits for more bytes.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid magic")]
    InvalidMagic,

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),

    #[error("payload too large: meta {meta_len} bytes, binary {bin_len} bytes")]
    PayloadTooLarge { meta_len: u32, bin_len: u32 },

    #[error("packet metadata is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

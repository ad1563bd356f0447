pub mod api;
pub mod error;
pub mod history;
pub mod net;
pub mod state;
pub mod transfer;

pub use api::ClientApi;
pub use error::ClientError;
pub use net::{NetClient, Transport};
pub use state::ClientState;
pub use transfer::{DownloadRequest, FileTransferManager, TransferState, UploadRequest};

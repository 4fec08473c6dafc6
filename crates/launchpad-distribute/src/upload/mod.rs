//! Binary upload: extension checks, chunked transfer and the upload session

mod extensions;
mod session;
mod transfer;

pub use extensions::{allowed_extensions, matching_extension, validate_file_name};
pub use session::{
    NoopObserver, UploadCancelHandle, UploadObserver, UploadOptions, UploadProgress,
    UploadSession, UploadSessionState, UploadStatus,
};
pub use transfer::{
    HttpChunkedTransfer, TransferEvent, TransferProgress, TransferSettings, TransferState,
};

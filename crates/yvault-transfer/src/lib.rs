//! yvault-transfer: moving sealed chunks between clients and the backend
//!
//! - `chunks`: boundary arithmetic shared by uploads and downloads
//! - `coordinator`: server-side vault and send transfers
//! - `send`: send-object limits
//! - `pipeline`: client-side bounded worker pool that feeds a coordinator

pub mod chunks;
pub mod coordinator;
pub mod pipeline;
pub mod send;

pub use chunks::{ChunkLayout, ChunkRange};
pub use coordinator::{
    DownloadedChunk, FlushReport, SendInfo, SendUpload, TransferCoordinator, UploadTarget,
};
pub use pipeline::{upload_all, ChunkSender, ChunkSource, LocalSender, SealingSource};
pub use send::SendLimits;

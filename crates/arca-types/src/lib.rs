pub mod blob_id;
pub mod error;
pub mod pack_id;
pub mod snapshot_id;

pub use blob_id::{BlobHandle, BlobId, BlobType};
pub use error::{ArcaError, Result, ResultExt};
pub use pack_id::PackId;
pub use snapshot_id::SnapshotId;

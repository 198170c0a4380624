//! Checkpoint persistence for the VReel pipeline.
//!
//! This crate provides:
//! - One JSON checkpoint file per stage, written atomically
//! - Field-level validation with the offending field and location
//! - Manual segment edits applied in place
//! - An exclusive run lock on the checkpoint directory

pub mod error;
pub mod fs_utils;
pub mod lock;
pub mod store;
pub mod validate;

pub use error::{StorageError, StorageResult, ValidationError};
pub use fs_utils::{remove_if_exists, write_atomic};
pub use lock::{RunLock, LOCK_FILE_NAME};
pub use store::CheckpointStore;
pub use validate::{parse_checkpoint, validate_checkpoint, validate_checkpoint_value};

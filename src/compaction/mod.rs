//! Storage levels and the compaction contract they share.

pub mod file;
pub mod memory;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::{
    codec::CodecError,
    part::{Part, ReleaseFn},
};

/// Errors surfaced by level operations.
#[derive(Debug, Error)]
pub enum CompactionError {
    /// `compact` was called with no input parts.
    #[error("no parts to compact")]
    EmptyInput,
    #[error("compaction codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("compaction io error: {0}")]
    Io(#[from] std::io::Error),
    /// A level file's trailer chain runs past the start of the file. The
    /// tail was torn by a crash mid-write.
    #[error("level file {path:?} is truncated at offset {offset}")]
    Truncated {
        /// File whose trailer chain failed to validate.
        path: PathBuf,
        /// Offset at which the chain ran out of bytes.
        offset: u64,
    },
}

/// A tier in the storage hierarchy: a size bound plus a compaction action.
///
/// Levels are not synchronized against concurrent `compact` calls; the
/// storage layer above serializes compactions per level.
pub trait Level: Send {
    /// Soft byte-size threshold the layer above uses to decide when to
    /// cascade compactions into this level.
    fn max_size(&self) -> u64;

    /// Merge `inputs` into a single part owned by this level.
    ///
    /// `inputs` must be transaction-ordered: the output part is stamped
    /// with `inputs[0].tx()`. `options` are additional release hooks for
    /// the output part. Returns the new part, the codec-reported logical
    /// size of the inputs, and the serialized size of the output.
    fn compact(
        &mut self,
        inputs: &[Part],
        options: &[ReleaseFn],
    ) -> Result<(Vec<Part>, u64, u64), CompactionError>;

    /// Persist the level for later recovery.
    ///
    /// The in-memory level ignores `dir` and feeds each of `live_parts` to
    /// `writer`; the file level ignores `live_parts`/`writer` and hard
    /// links its files into `dir`.
    fn snapshot(
        &mut self,
        live_parts: &[Part],
        writer: &mut dyn FnMut(&Part) -> Result<(), CompactionError>,
        dir: &Path,
    ) -> Result<(), CompactionError>;

    /// Reinitialize the level after all of its parts have been handed off.
    ///
    /// Blocks until every part the level produced has been released.
    /// Errors are logged, never returned.
    fn reset(&mut self);
}

//! Buffer-backed level.

use std::{path::Path, sync::Arc};

use bytes::Bytes;
use parquet::format::KeyValue;

use super::{CompactionError, Level};
use crate::{
    codec::{Compaction, SerializedBuffer, COMPACTION_TX_KEY},
    part::{Part, ReleaseFn},
};

/// A level that compacts into a growable in-memory buffer.
///
/// Parts produced here never pin level-owned resources, so there is no
/// live-part counter and `reset` has nothing to do.
pub struct InMemoryLevel {
    compact: Arc<dyn Compaction>,
    max_size: u64,
}

impl InMemoryLevel {
    /// Create a buffer-backed level with the given size threshold.
    pub fn new(max_size: u64, compact: Arc<dyn Compaction>) -> Self {
        Self { compact, max_size }
    }
}

impl Level for InMemoryLevel {
    fn max_size(&self) -> u64 {
        self.max_size
    }

    fn compact(
        &mut self,
        inputs: &[Part],
        options: &[ReleaseFn],
    ) -> Result<(Vec<Part>, u64, u64), CompactionError> {
        if inputs.is_empty() {
            return Err(CompactionError::EmptyInput);
        }

        let tx = inputs[0].tx();
        let mut buffer = Vec::new();
        let pre_compaction_size = self.compact.compact(
            &mut buffer,
            inputs,
            vec![KeyValue::new(COMPACTION_TX_KEY.to_owned(), tx.to_string())],
        )?;

        let post_compaction_size = buffer.len() as u64;
        let buffer = SerializedBuffer::from_bytes(Bytes::from(buffer))?;
        Ok((
            vec![Part::new(tx, buffer, options.to_vec())],
            pre_compaction_size,
            post_compaction_size,
        ))
    }

    fn snapshot(
        &mut self,
        live_parts: &[Part],
        writer: &mut dyn FnMut(&Part) -> Result<(), CompactionError>,
        _dir: &Path,
    ) -> Result<(), CompactionError> {
        for part in live_parts {
            writer(part)?;
        }
        Ok(())
    }

    fn reset(&mut self) {}
}

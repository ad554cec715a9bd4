//! Parquet codec surface used by the levels.
//!
//! Levels never inspect codec internals: they hand a writer plus input
//! parts to a [`Compaction`] and get back serialized bytes, then reopen
//! those bytes through [`SerializedBuffer`], an opaque row-group view with
//! the statistics accessors the pruning layer consumes.

use std::{fmt, io::Write, sync::Arc};

use arrow_schema::{ArrowError, SchemaRef};
use bytes::Bytes;
use parquet::{
    arrow::{
        arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder},
        parquet_to_arrow_schema, ArrowWriter,
    },
    bloom_filter::Sbbf,
    errors::ParquetError,
    file::{
        metadata::ParquetMetaData,
        properties::{EnabledStatistics, ReaderProperties, WriterProperties},
        reader::FileReader,
        serialized_reader::{ReadOptionsBuilder, SerializedFileReader},
    },
    format::KeyValue,
};
use thiserror::Error;

use crate::{fs::SectionReader, part::Part};

/// Key/value metadata key stamped on every compacted row group: the
/// decimal transaction the compaction ran up through.
pub const COMPACTION_TX_KEY: &str = "compaction_tx";

/// Errors surfaced by the codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("codec parquet error: {0}")]
    Parquet(#[from] ParquetError),
    #[error("codec arrow error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("codec io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("input parts do not share one arrow schema")]
    SchemaMismatch,
}

/// Merges input parts into a single serialized row group.
pub trait Compaction: Send + Sync {
    /// Write the merged row group to `w`, carrying `metadata` in the file
    /// footer. Returns the sum of the input parts' serialized sizes, used
    /// by the layer above for compaction accounting.
    fn compact(
        &self,
        w: &mut (dyn Write + Send),
        inputs: &[Part],
        metadata: Vec<KeyValue>,
    ) -> Result<u64, CodecError>;
}

/// Default codec: concatenates the inputs' record batches through one
/// Arrow Parquet writer.
///
/// Inputs are written in slice order; callers order them by transaction so
/// later writes shadow earlier ones downstream.
pub struct ArrowCompaction {
    properties: WriterProperties,
}

impl ArrowCompaction {
    /// Codec with page-level statistics and bloom filters enabled, which
    /// the pruning layer depends on.
    pub fn new() -> Self {
        Self {
            properties: WriterProperties::builder()
                .set_statistics_enabled(EnabledStatistics::Page)
                .set_bloom_filter_enabled(true)
                .build(),
        }
    }

    /// Codec with caller-supplied writer properties.
    pub fn with_properties(properties: WriterProperties) -> Self {
        Self { properties }
    }
}

impl Default for ArrowCompaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Compaction for ArrowCompaction {
    fn compact(
        &self,
        w: &mut (dyn Write + Send),
        inputs: &[Part],
        metadata: Vec<KeyValue>,
    ) -> Result<u64, CodecError> {
        let schema = inputs[0].buffer().arrow_schema()?;
        let mut writer = ArrowWriter::try_new(w, schema.clone(), Some(self.properties.clone()))?;
        for kv in metadata {
            writer.append_key_value_metadata(kv);
        }

        let mut pre_compaction_size = 0u64;
        for (index, part) in inputs.iter().enumerate() {
            if index > 0 && part.buffer().arrow_schema()? != schema {
                return Err(CodecError::SchemaMismatch);
            }
            pre_compaction_size += part.size();
            for batch in part.buffer().batch_reader()? {
                writer.write(&batch?)?;
            }
        }
        writer.close()?;
        Ok(pre_compaction_size)
    }
}

/// An opened, immutable row-group view over a bounded byte range.
///
/// Opening eagerly reads the footer, the page index, and any bloom
/// filters, so the statistics accessors below never touch storage again.
#[derive(Clone)]
pub struct SerializedBuffer {
    reader: Arc<SerializedFileReader<SectionReader>>,
    section: SectionReader,
}

impl SerializedBuffer {
    /// Open the Parquet file occupying exactly `section`.
    pub fn open(section: SectionReader) -> Result<Self, CodecError> {
        let options = ReadOptionsBuilder::new()
            .with_page_index()
            .with_reader_properties(
                ReaderProperties::builder()
                    .set_read_bloom_filter(true)
                    .build(),
            )
            .build();
        let reader = SerializedFileReader::new_with_options(section.clone(), options)?;
        Ok(Self {
            reader: Arc::new(reader),
            section,
        })
    }

    /// Open a Parquet file held entirely in memory.
    pub fn from_bytes(bytes: Bytes) -> Result<Self, CodecError> {
        Self::open(SectionReader::bytes(bytes))
    }

    /// Parquet metadata, including the page index.
    pub fn metadata(&self) -> &ParquetMetaData {
        self.reader.metadata()
    }

    /// Serialized size in bytes.
    pub fn size(&self) -> u64 {
        self.section.len()
    }

    /// Look up a footer key/value metadata entry.
    pub fn lookup_metadata(&self, key: &str) -> Option<String> {
        self.metadata()
            .file_metadata()
            .key_value_metadata()?
            .iter()
            .find(|kv| kv.key == key)
            .and_then(|kv| kv.value.clone())
    }

    /// Bloom filter for one column chunk, if the writer produced one.
    pub fn bloom_filter(&self, row_group: usize, column: usize) -> Option<Sbbf> {
        let row_group = self.reader.get_row_group(row_group).ok()?;
        row_group.get_column_bloom_filter(column).cloned()
    }

    /// Arrow schema of the stored rows, derived from the cached metadata.
    ///
    /// File key/value metadata is left out so schemas of parts that differ
    /// only in their transaction stamp compare equal.
    pub fn arrow_schema(&self) -> Result<SchemaRef, CodecError> {
        let descr = self.metadata().file_metadata().schema_descr();
        Ok(Arc::new(parquet_to_arrow_schema(descr, None)?))
    }

    /// Iterate the stored rows as Arrow record batches.
    pub fn batch_reader(&self) -> Result<ParquetRecordBatchReader, CodecError> {
        Ok(ParquetRecordBatchReaderBuilder::try_new(self.section.clone())?.build()?)
    }
}

impl fmt::Debug for SerializedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializedBuffer")
            .field("size", &self.size())
            .field("row_groups", &self.metadata().num_row_groups())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::test_util::serialized_buffer;
    use super::*;

    #[test]
    fn compact_merges_batches_and_stamps_metadata() {
        let inputs = vec![
            Part::new(3, serialized_buffer(&[1, 2]), vec![]),
            Part::new(5, serialized_buffer(&[3]), vec![]),
        ];
        let expected_pre: u64 = inputs.iter().map(Part::size).sum();

        let mut out = Vec::new();
        let pre = ArrowCompaction::new()
            .compact(
                &mut out,
                &inputs,
                vec![KeyValue::new(COMPACTION_TX_KEY.to_owned(), "3".to_owned())],
            )
            .unwrap();
        assert_eq!(pre, expected_pre);

        let merged = SerializedBuffer::from_bytes(out.into()).unwrap();
        assert_eq!(merged.metadata().file_metadata().num_rows(), 3);
        assert_eq!(
            merged.lookup_metadata(COMPACTION_TX_KEY).as_deref(),
            Some("3")
        );
        assert!(merged.lookup_metadata("missing").is_none());
    }

    #[test]
    fn mismatched_schemas_are_rejected() {
        use arrow_array::{ArrayRef, RecordBatch, StringArray};
        use arrow_schema::{DataType, Field, Schema};

        let schema = Arc::new(Schema::new(vec![Field::new("name", DataType::Utf8, false)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(StringArray::from(vec!["a"])) as ArrayRef],
        )
        .unwrap();
        let mut bytes = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut bytes, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let inputs = vec![
            Part::new(1, serialized_buffer(&[1]), vec![]),
            Part::new(2, SerializedBuffer::from_bytes(bytes.into()).unwrap(), vec![]),
        ];
        let mut out = Vec::new();
        let err = ArrowCompaction::new()
            .compact(&mut out, &inputs, vec![])
            .unwrap_err();
        assert!(matches!(err, CodecError::SchemaMismatch));
    }
}

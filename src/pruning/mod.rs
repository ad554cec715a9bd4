//! Column-chunk predicate pruning.
//!
//! Readers use the Parquet page statistics and bloom filters a part
//! already carries to decide whether a column chunk can possibly satisfy a
//! scalar predicate. `true` means the execution engine must scan the
//! chunk; `false` means the chunk definitely holds no matching value.
//! False positives are allowed, false negatives never.

use std::cmp::Ordering;

use parquet::{
    bloom_filter::Sbbf,
    data_type::ByteArray,
    file::{
        metadata::ColumnChunkMetaData,
        page_index::index::{Index, PageIndex},
    },
};

use crate::codec::SerializedBuffer;

/// Scalar comparison operators supported by pruning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    /// `=`
    Eq,
    /// `≠`
    NotEq,
    /// `<`
    Lt,
    /// `≤`
    LtEq,
    /// `>`
    Gt,
    /// `≥`
    GtEq,
}

/// A scalar constant compared against a column.
///
/// Only the physical types the columnar format indexes are representable;
/// comparing mismatched or unsupported types is a programming error and
/// panics.
#[derive(Clone, Debug, PartialEq)]
pub enum ScalarValue {
    /// SQL NULL.
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    /// Byte array or fixed-length byte array, compared lexicographically
    /// on unsigned bytes.
    Bytes(Vec<u8>),
}

impl ScalarValue {
    /// Whether this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    fn compare(&self, other: &ScalarValue) -> Ordering {
        match (self, other) {
            (ScalarValue::Boolean(a), ScalarValue::Boolean(b)) => a.cmp(b),
            (ScalarValue::Int32(a), ScalarValue::Int32(b)) => a.cmp(b),
            (ScalarValue::Int64(a), ScalarValue::Int64(b)) => a.cmp(b),
            (ScalarValue::Float(a), ScalarValue::Float(b)) => a.total_cmp(b),
            (ScalarValue::Double(a), ScalarValue::Double(b)) => a.total_cmp(b),
            (ScalarValue::Bytes(a), ScalarValue::Bytes(b)) => a.cmp(b),
            (a, b) => panic!("unsupported value comparison: {a:?} vs {b:?}"),
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Boolean(v)
    }
}

impl From<i32> for ScalarValue {
    fn from(v: i32) -> Self {
        ScalarValue::Int32(v)
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Int64(v)
    }
}

impl From<f32> for ScalarValue {
    fn from(v: f32) -> Self {
        ScalarValue::Float(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Double(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::Bytes(v.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for ScalarValue {
    fn from(v: Vec<u8>) -> Self {
        ScalarValue::Bytes(v)
    }
}

/// Reference to a column by name.
#[derive(Clone, Debug)]
pub struct ColumnRef {
    name: String,
}

impl ColumnRef {
    /// Refer to the column called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A `column <op> constant` predicate evaluated against chunk statistics.
#[derive(Clone, Debug)]
pub struct BinaryScalarExpr {
    left: ColumnRef,
    op: Op,
    right: ScalarValue,
}

impl BinaryScalarExpr {
    /// Build a predicate from its parts.
    pub fn new(left: ColumnRef, op: Op, right: impl Into<ScalarValue>) -> Self {
        Self {
            left,
            op,
            right: right.into(),
        }
    }

    /// `column = value`
    pub fn eq(left: ColumnRef, right: impl Into<ScalarValue>) -> Self {
        Self::new(left, Op::Eq, right)
    }

    /// `column ≠ value`
    pub fn neq(left: ColumnRef, right: impl Into<ScalarValue>) -> Self {
        Self::new(left, Op::NotEq, right)
    }

    /// `column < value`
    pub fn lt(left: ColumnRef, right: impl Into<ScalarValue>) -> Self {
        Self::new(left, Op::Lt, right)
    }

    /// `column ≤ value`
    pub fn lt_eq(left: ColumnRef, right: impl Into<ScalarValue>) -> Self {
        Self::new(left, Op::LtEq, right)
    }

    /// `column > value`
    pub fn gt(left: ColumnRef, right: impl Into<ScalarValue>) -> Self {
        Self::new(left, Op::Gt, right)
    }

    /// `column ≥ value`
    pub fn gt_eq(left: ColumnRef, right: impl Into<ScalarValue>) -> Self {
        Self::new(left, Op::GtEq, right)
    }

    /// Whether row group `row_group` of `buffer` may contain rows matching
    /// this predicate.
    ///
    /// With `ignore_missing_col`, a column absent from the row group
    /// evaluates to `true` (scan); otherwise absence follows NULL and
    /// empty-string semantics: a missing column only matches `= NULL`,
    /// `= ""`, or `≠ <non-empty bytes>`.
    pub fn eval(&self, buffer: &SerializedBuffer, row_group: usize, ignore_missing_col: bool) -> bool {
        let metadata = buffer.metadata();
        let columns = metadata.row_group(row_group).columns();
        let position = columns
            .iter()
            .position(|chunk| chunk.column_descr().name() == self.left.name);

        let Some(column) = position else {
            if ignore_missing_col {
                return true;
            }
            if self.right.is_null() {
                match self.op {
                    Op::Eq => return true,
                    Op::NotEq => return false,
                    _ => {}
                }
            }
            if let ScalarValue::Bytes(bytes) = &self.right {
                match self.op {
                    Op::Eq if bytes.is_empty() => return true,
                    Op::NotEq if !bytes.is_empty() => return true,
                    _ => {}
                }
            }
            return false;
        };

        let index = metadata
            .column_index()
            .and_then(|index| index.get(row_group))
            .and_then(|indices| indices.get(column));
        let bloom = || buffer.bloom_filter(row_group, column);
        may_contain(&columns[column], index, bloom, self.op, &self.right)
    }
}

/// Decide whether a present column chunk may satisfy `column <op> right`.
fn may_contain(
    chunk: &ColumnChunkMetaData,
    index: Option<&Index>,
    bloom: impl FnOnce() -> Option<Sbbf>,
    op: Op,
    right: &ScalarValue,
) -> bool {
    let Some(stats) = index.and_then(column_stats) else {
        // Without page statistics nothing can be proven; scan.
        return true;
    };
    let full_of_nulls = stats.null_count == chunk.num_values();

    if op == Op::Eq {
        if right.is_null() {
            return stats.null_count > 0;
        }
        if full_of_nulls {
            // A non-null value cannot match a chunk with no non-null rows.
            return false;
        }

        if !matches!(right, ScalarValue::Boolean(_)) {
            if let Some(filter) = bloom() {
                // Bloom filters admit false positives but never false
                // negatives: a miss proves the value is absent.
                return check_bloom(&filter, right);
            }
        }

        if stats.min.is_null() || stats.max.is_null() {
            return true;
        }
        return right.compare(&stats.max) != Ordering::Greater
            && right.compare(&stats.min) != Ordering::Less;
    }

    if right.is_null() {
        // NULL is not comparable; delegate to the execution engine.
        return true;
    }
    if full_of_nulls {
        // Min/max are meaningless here, and no non-null value can match.
        return false;
    }

    match op {
        Op::LtEq => endpoint_allows(&stats.min, |ord| ord != Ordering::Greater, right),
        Op::Lt => endpoint_allows(&stats.min, |ord| ord == Ordering::Less, right),
        Op::Gt => endpoint_allows(&stats.max, |ord| ord == Ordering::Greater, right),
        Op::GtEq => endpoint_allows(&stats.max, |ord| ord != Ordering::Less, right),
        // Equality was handled above; inequality is never provable from
        // min/max alone.
        Op::Eq | Op::NotEq => true,
    }
}

/// Compare `endpoint <op> right`, scanning when the endpoint is unknown.
fn endpoint_allows(
    endpoint: &ScalarValue,
    test: impl FnOnce(Ordering) -> bool,
    right: &ScalarValue,
) -> bool {
    if endpoint.is_null() {
        // The non-null endpoint is unknown; the chunk must be scanned.
        return true;
    }
    test(endpoint.compare(right))
}

fn check_bloom(filter: &Sbbf, value: &ScalarValue) -> bool {
    match value {
        ScalarValue::Int32(v) => filter.check(v),
        ScalarValue::Int64(v) => filter.check(v),
        ScalarValue::Float(v) => filter.check(v),
        ScalarValue::Double(v) => filter.check(v),
        ScalarValue::Bytes(v) => filter.check(&ByteArray::from(v.clone())),
        ScalarValue::Null | ScalarValue::Boolean(_) => true,
    }
}

struct ColumnStats {
    min: ScalarValue,
    max: ScalarValue,
    null_count: i64,
}

/// Aggregate the per-page statistics of one column chunk.
///
/// Min (resp. max) is the smallest (largest) non-null per-page endpoint;
/// null endpoints are skipped when a non-null candidate exists. The null
/// count is the sum over pages.
fn column_stats(index: &Index) -> Option<ColumnStats> {
    match index {
        Index::NONE | Index::INT96(_) => None,
        Index::BOOLEAN(native) => {
            Some(native_stats(&native.indexes, |v| ScalarValue::Boolean(*v)))
        }
        Index::INT32(native) => Some(native_stats(&native.indexes, |v| ScalarValue::Int32(*v))),
        Index::INT64(native) => Some(native_stats(&native.indexes, |v| ScalarValue::Int64(*v))),
        Index::FLOAT(native) => Some(native_stats(&native.indexes, |v| ScalarValue::Float(*v))),
        Index::DOUBLE(native) => Some(native_stats(&native.indexes, |v| ScalarValue::Double(*v))),
        Index::BYTE_ARRAY(native) => Some(native_stats(&native.indexes, |v| {
            ScalarValue::Bytes(v.data().to_vec())
        })),
        Index::FIXED_LEN_BYTE_ARRAY(native) => Some(native_stats(&native.indexes, |v| {
            ScalarValue::Bytes(v.data().to_vec())
        })),
    }
}

fn native_stats<T>(
    indexes: &[PageIndex<T>],
    to_scalar: impl Fn(&T) -> ScalarValue,
) -> ColumnStats {
    let mut min = ScalarValue::Null;
    let mut max = ScalarValue::Null;
    let mut null_count = 0i64;

    for page in indexes {
        null_count += page.null_count.unwrap_or(0);
        if let Some(value) = page.min.as_ref().map(&to_scalar) {
            if min.is_null() || value.compare(&min) == Ordering::Less {
                min = value;
            }
        }
        if let Some(value) = page.max.as_ref().map(&to_scalar) {
            if max.is_null() || value.compare(&max) == Ordering::Greater {
                max = value;
            }
        }
    }

    ColumnStats {
        min,
        max,
        null_count,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_array::{ArrayRef, Int64Array, RecordBatch, StringArray};
    use arrow_schema::{DataType, Field, Schema};
    use parquet::{
        arrow::ArrowWriter,
        file::properties::{EnabledStatistics, WriterProperties},
    };

    use super::*;

    fn buffer_with_blooms(ids: &[i64]) -> SerializedBuffer {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Int64Array::from(ids.to_vec())) as ArrayRef],
        )
        .unwrap();

        let props = WriterProperties::builder()
            .set_statistics_enabled(EnabledStatistics::Page)
            .set_bloom_filter_enabled(true)
            .build();
        let mut bytes = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut bytes, schema, Some(props)).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
        SerializedBuffer::from_bytes(bytes.into()).unwrap()
    }

    fn nullable_buffer(ids: Vec<Option<i64>>, names: Vec<Option<&str>>) -> SerializedBuffer {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, true),
            Field::new("name", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(ids)) as ArrayRef,
                Arc::new(StringArray::from(names)) as ArrayRef,
            ],
        )
        .unwrap();

        let props = WriterProperties::builder()
            .set_statistics_enabled(EnabledStatistics::Page)
            .build();
        let mut bytes = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut bytes, schema, Some(props)).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
        SerializedBuffer::from_bytes(bytes.into()).unwrap()
    }

    fn id() -> ColumnRef {
        ColumnRef::new("id")
    }

    #[test]
    fn equality_uses_bloom_filter() {
        let buffer = buffer_with_blooms(&[1, 17, 100]);
        assert!(!BinaryScalarExpr::eq(id(), 42i64).eval(&buffer, 0, false));
        assert!(BinaryScalarExpr::eq(id(), 17i64).eval(&buffer, 0, false));
    }

    #[test]
    fn range_operators_use_min_max() {
        let buffer = buffer_with_blooms(&[10, 20, 30]);
        assert!(BinaryScalarExpr::lt(id(), 11i64).eval(&buffer, 0, false));
        assert!(!BinaryScalarExpr::lt(id(), 10i64).eval(&buffer, 0, false));
        assert!(BinaryScalarExpr::lt_eq(id(), 10i64).eval(&buffer, 0, false));
        assert!(!BinaryScalarExpr::lt_eq(id(), 9i64).eval(&buffer, 0, false));
        assert!(BinaryScalarExpr::gt(id(), 29i64).eval(&buffer, 0, false));
        assert!(!BinaryScalarExpr::gt(id(), 30i64).eval(&buffer, 0, false));
        assert!(BinaryScalarExpr::gt_eq(id(), 30i64).eval(&buffer, 0, false));
        assert!(!BinaryScalarExpr::gt_eq(id(), 31i64).eval(&buffer, 0, false));
        assert!(BinaryScalarExpr::neq(id(), 20i64).eval(&buffer, 0, false));
    }

    #[test]
    fn all_null_chunk_only_matches_null_equality() {
        let buffer = nullable_buffer(vec![None, None], vec![Some("a"), Some("b")]);
        for expr in [
            BinaryScalarExpr::eq(id(), 1i64),
            BinaryScalarExpr::lt(id(), 1i64),
            BinaryScalarExpr::lt_eq(id(), 1i64),
            BinaryScalarExpr::gt(id(), 1i64),
            BinaryScalarExpr::gt_eq(id(), 1i64),
        ] {
            assert!(!expr.eval(&buffer, 0, false), "{expr:?}");
        }
        assert!(BinaryScalarExpr::new(id(), Op::Eq, ScalarValue::Null).eval(&buffer, 0, false));
    }

    #[test]
    fn null_right_hand_side() {
        let buffer = nullable_buffer(vec![Some(1), None], vec![Some("a"), None]);
        assert!(BinaryScalarExpr::new(id(), Op::Eq, ScalarValue::Null).eval(&buffer, 0, false));
        assert!(BinaryScalarExpr::new(id(), Op::Lt, ScalarValue::Null).eval(&buffer, 0, false));

        let no_nulls = buffer_with_blooms(&[1, 2]);
        assert!(!BinaryScalarExpr::new(id(), Op::Eq, ScalarValue::Null).eval(&no_nulls, 0, false));
    }

    #[test]
    fn missing_column_rules() {
        let buffer = buffer_with_blooms(&[1]);
        let ghost = ColumnRef::new("ghost");

        assert!(BinaryScalarExpr::eq(ghost.clone(), 1i64).eval(&buffer, 0, true));
        assert!(!BinaryScalarExpr::eq(ghost.clone(), 1i64).eval(&buffer, 0, false));

        assert!(
            BinaryScalarExpr::new(ghost.clone(), Op::Eq, ScalarValue::Null).eval(&buffer, 0, false)
        );
        assert!(!BinaryScalarExpr::new(ghost.clone(), Op::NotEq, ScalarValue::Null)
            .eval(&buffer, 0, false));

        assert!(BinaryScalarExpr::eq(ghost.clone(), "").eval(&buffer, 0, false));
        assert!(BinaryScalarExpr::neq(ghost.clone(), "x").eval(&buffer, 0, false));
        assert!(!BinaryScalarExpr::neq(ghost.clone(), "").eval(&buffer, 0, false));
        assert!(!BinaryScalarExpr::eq(ghost, "x").eval(&buffer, 0, false));
    }

    #[test]
    fn string_ranges_compare_lexicographically() {
        let buffer = nullable_buffer(
            vec![Some(1), Some(2)],
            vec![Some("apple"), Some("pear")],
        );
        let name = ColumnRef::new("name");
        assert!(BinaryScalarExpr::gt(name.clone(), "orange").eval(&buffer, 0, false));
        assert!(!BinaryScalarExpr::gt(name.clone(), "pear").eval(&buffer, 0, false));
        assert!(BinaryScalarExpr::lt(name, "banana").eval(&buffer, 0, false));
    }

    #[test]
    #[should_panic(expected = "unsupported value comparison")]
    fn mismatched_types_panic() {
        let buffer = buffer_with_blooms(&[1]);
        // An i32 probe against an i64 column is a caller bug.
        BinaryScalarExpr::lt(id(), 5i32).eval(&buffer, 0, false);
    }
}

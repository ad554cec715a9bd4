//! Leveled compaction engine for columnar, append-only table stores.
//!
//! terrace maintains a stack of storage levels holding immutable,
//! Parquet-encoded parts. This crate provides:
//! - [`Part`]: a reference-counted immutable handle to one serialized row
//!   group, stamped with the transaction it contains data up through.
//! - [`Level`]: the shared level contract, with an in-memory
//!   ([`InMemoryLevel`]) and a file-backed ([`FileCompaction`]) variant.
//!   The file level persists parts to an append-only multi-file log with
//!   embedded length trailers, recovers it after a crash, and snapshots
//!   it via hard links.
//! - [`pruning`]: scalar predicate pruning over the column statistics and
//!   bloom filters a part already carries, used by readers to skip parts
//!   that cannot match.
//!
//! The columnar codec is pluggable through [`Compaction`]; write-ahead
//! logging, transaction management, and query planning live in the layers
//! above.

pub mod codec;
pub mod compaction;
pub mod fs;
mod logging;
pub mod part;
pub mod pruning;

pub use codec::{ArrowCompaction, CodecError, Compaction, SerializedBuffer, COMPACTION_TX_KEY};
pub use compaction::{file::FileCompaction, memory::InMemoryLevel, CompactionError, Level};
pub use part::{Part, ReleaseFn, WaitGroup};

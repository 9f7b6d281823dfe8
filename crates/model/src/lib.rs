//! # Model — keys, columns, and slice metadata
//!
//! The data model shared by the Tessera storage core: hierarchical column
//! keys with their per-family comparators, the column record with its
//! conflict-resolution priority, and the per-slice deletion metadata that
//! makes tombstone semantics work across replicas and compactions.
//!
//! A column lives at a [`ColumnKey`]: a partitioner-decorated row key plus
//! `D` ordered name components (`D = 1` for standard column families, `2`
//! for super families). All columns sharing their first `D-1` name
//! components form a *parent group*; a [`Slice`] is a run of columns from
//! one parent group sharing one [`SliceMetadata`], and is the unit both the
//! on-disk format and compaction operate on.

mod column;
mod compare;
mod key;
mod meta;
mod slice;

pub use column::{flags, Column};
pub use compare::{BytesOrdering, KeyComparator, LongOrdering, NameOrdering};
pub use key::{
    ColumnKey, DecoratedKey, HashPartitioner, Name, OrderPreservingPartitioner, Partitioner,
};
pub use meta::{LevelDeletion, SliceMetadata};
pub use slice::{Slice, SliceBuffer};

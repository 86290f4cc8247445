//! Interfaces of the per-segment point index.
//!
//! The aggregation fast path never owns a point index. It navigates whatever a
//! segment hands out through these traits: a cursor over a tree whose nodes
//! carry the min/max packed value of their subtree, and leaves that enumerate
//! `(value, doc)` pairs in ascending value order.

use crate::error::Result;
use std::ops::ControlFlow;
use std::sync::Arc;

pub type DocId = u32;

/// Relation of a tree cell to the active range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    CellInsideQuery,
    CellOutsideQuery,
    CellCrossesQuery,
}

/// Callback driven by a [`PointTree`].
///
/// Every method can ask the tree to stop by returning `ControlFlow::Break`.
pub trait IntersectVisitor {
    /// A document inside a cell that matched as a whole.
    fn visit(&mut self, doc: DocId) -> Result<ControlFlow<()>>;

    /// A single document with its packed value.
    fn visit_value(&mut self, doc: DocId, packed_value: &[u8]) -> Result<ControlFlow<()>>;

    /// Classify a cell by its bounds.
    fn compare(
        &mut self,
        min_packed: &[u8],
        max_packed: &[u8],
    ) -> Result<ControlFlow<(), Relation>>;
}

/// Cursor over the nodes of a point tree. Starts at the root.
pub trait PointTree {
    fn min_packed_value(&self) -> &[u8];
    fn max_packed_value(&self) -> &[u8];

    /// Move to the first child. Returns false on a leaf.
    fn move_to_child(&mut self) -> bool;

    /// Move to the next sibling. Returns false when there is none.
    fn move_to_sibling(&mut self) -> bool;

    /// Move to the parent. Returns false at the root.
    fn move_to_parent(&mut self) -> bool;

    /// Number of points below the current node.
    fn size(&self) -> u64;

    /// Visit every doc id below the current node without decoding values.
    fn visit_doc_ids(&self, visitor: &mut dyn IntersectVisitor) -> Result<ControlFlow<()>>;

    /// Visit every `(doc, value)` pair below the current node in ascending value order.
    fn visit_doc_values(&self, visitor: &mut dyn IntersectVisitor) -> Result<ControlFlow<()>>;
}

/// Point index of one field in one segment.
pub trait PointValues: Send + Sync {
    fn point_tree(&self) -> Result<Box<dyn PointTree + '_>>;
    fn min_packed_value(&self) -> &[u8];
    fn max_packed_value(&self) -> &[u8];
    fn bytes_per_dim(&self) -> usize;

    /// Number of documents that have at least one point.
    fn doc_count(&self) -> u64;

    /// Total number of points.
    fn size(&self) -> u64;
}

/// The slice of a segment reader the optimization needs.
pub trait Segment {
    /// Position of the segment within its shard.
    fn ord(&self) -> u32;

    fn has_deletions(&self) -> bool;

    /// Point index for `field`, or `None` when the segment has no points for it.
    fn point_values(&self, field: &str) -> Result<Option<Arc<dyn PointValues>>>;

    /// Whether any document carries a per-document `_doc_count` override.
    fn has_doc_count_field(&self) -> Result<bool>;
}

/// Name of the per-document weight field.
pub const DOC_COUNT_FIELD: &str = "_doc_count";

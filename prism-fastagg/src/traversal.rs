//! Single pass intersection of a point tree with a sorted list of ranges.
//!
//! The tree hands out values in ascending order and the ranges are sorted and
//! disjoint, so the active range only ever moves forward. Documents matched
//! by the active range are buffered and flushed when a value past its upper
//! bound shows up. Cost is linear in scanned documents plus range crossings.

use crate::error::{Error, Result};
use crate::point::{DocId, IntersectVisitor, PointTree, Relation};
use crate::ranges::Ranges;
use std::ops::ControlFlow;

/// Node visit counters of one traversal, reported in profiles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugInfo {
    /// Leaf nodes crossing a range boundary, visited value by value.
    pub leaf: u64,
    /// Nodes counted in bulk.
    pub inner: u64,
    /// Traversal stopped before the whole tree was scanned.
    pub terminated_early: bool,
}

impl DebugInfo {
    pub fn visit_leaf(&mut self) {
        self.leaf += 1;
    }

    pub fn visit_inner(&mut self) {
        self.inner += 1;
    }

    pub fn merge(&mut self, other: &DebugInfo) {
        self.leaf += other.leaf;
        self.inner += other.inner;
        self.terminated_early |= other.terminated_early;
    }
}

/// Receives the document count of a range when the cursor moves past it.
///
/// `docs` holds the matched doc ids when the traversal was asked to collect
/// them, and is empty otherwise.
pub type RangeConsumer<'a> = dyn FnMut(usize, u64, &[DocId]) -> Result<()> + 'a;

/// Forward-only cursor over `ranges` with the buffer of the active range.
struct RangeCursor<'a, 'c> {
    ranges: &'a Ranges,
    active_index: usize,
    count: u64,
    docs: Vec<DocId>,
    collect_doc_ids: bool,
    non_zero_ranges: usize,
    max_non_zero_ranges: usize,
    consumer: &'c mut RangeConsumer<'c>,
}

impl RangeCursor<'_, '_> {
    fn count(&mut self, doc: DocId) {
        self.count += 1;
        if self.collect_doc_ids {
            self.docs.push(doc);
        }
    }

    fn count_node(&mut self, tree: &dyn PointTree) -> Result<ControlFlow<()>> {
        if self.collect_doc_ids {
            tree.visit_doc_ids(self)
        } else {
            self.count += tree.size();
            Ok(ControlFlow::Continue(()))
        }
    }

    fn finalize_previous_range(&mut self) -> Result<()> {
        if self.count > 0 {
            (self.consumer)(self.active_index, self.count, &self.docs)?;
            self.non_zero_ranges += 1;
            self.count = 0;
            self.docs.clear();
        }
        Ok(())
    }

    /// Advance to the first range whose upper bound exceeds `value`.
    ///
    /// Breaks when the ranges are exhausted or enough non-zero ranges were
    /// collected.
    fn iterate_range_end(&mut self, value: &[u8]) -> ControlFlow<()> {
        if self.non_zero_ranges >= self.max_non_zero_ranges {
            return ControlFlow::Break(());
        }
        // the new value may not be contiguous to the previous one
        while !self.within_upper_bound(value) {
            self.active_index += 1;
            if self.active_index >= self.ranges.len() {
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Flush and move on when `value` is past the active range.
    fn advance_past(&mut self, value: &[u8]) -> Result<ControlFlow<()>> {
        if !self.within_upper_bound(value) {
            self.finalize_previous_range()?;
            return Ok(self.iterate_range_end(value));
        }
        Ok(ControlFlow::Continue(()))
    }

    fn within_lower_bound(&self, value: &[u8]) -> bool {
        self.ranges.within_lower_bound(value, self.active_index)
    }

    fn within_upper_bound(&self, value: &[u8]) -> bool {
        self.ranges.within_upper_bound(value, self.active_index)
    }

    fn within_range(&self, value: &[u8]) -> bool {
        self.ranges.within_range(value, self.active_index)
    }
}

impl IntersectVisitor for RangeCursor<'_, '_> {
    fn visit(&mut self, doc: DocId) -> Result<ControlFlow<()>> {
        self.count(doc);
        Ok(ControlFlow::Continue(()))
    }

    fn visit_value(&mut self, doc: DocId, packed_value: &[u8]) -> Result<ControlFlow<()>> {
        if self.advance_past(packed_value)?.is_break() {
            return Ok(ControlFlow::Break(()));
        }
        if self.within_range(packed_value) {
            self.count(doc);
        }
        Ok(ControlFlow::Continue(()))
    }

    fn compare(
        &mut self,
        min_packed: &[u8],
        max_packed: &[u8],
    ) -> Result<ControlFlow<(), Relation>> {
        // find the first range that may collect values from this cell
        if self.advance_past(min_packed)?.is_break() {
            return Ok(ControlFlow::Break(()));
        }
        // min < upper now, the cell can still end below the lower bound
        let relation = if !self.within_lower_bound(max_packed) {
            Relation::CellOutsideQuery
        } else if self.within_range(min_packed) && self.within_range(max_packed) {
            Relation::CellInsideQuery
        } else {
            Relation::CellCrossesQuery
        };
        Ok(ControlFlow::Continue(relation))
    }
}

/// Count the documents of `tree` per range of `ranges`.
///
/// `consumer` is called once per non-empty range, in range order. After an
/// early termination the ranges past the last reported one are unknown.
pub fn multi_ranges_traverse(
    tree: &mut dyn PointTree,
    ranges: &Ranges,
    max_non_zero_ranges: usize,
    collect_doc_ids: bool,
    consumer: &mut RangeConsumer<'_>,
) -> Result<DebugInfo> {
    if tree.min_packed_value().len() != ranges.byte_len() {
        return Err(Error::InvalidRanges(format!(
            "{} byte ranges over {} byte points",
            ranges.byte_len(),
            tree.min_packed_value().len()
        )));
    }

    let mut debug = DebugInfo::default();
    let first = ranges.first_range_index(tree.min_packed_value(), tree.max_packed_value());
    let Some(active_index) = first else {
        tracing::debug!("No ranges match the segment, skip the fast filter traversal");
        return Ok(debug);
    };

    let mut cursor = RangeCursor {
        ranges,
        active_index,
        count: 0,
        docs: Vec::new(),
        collect_doc_ids,
        non_zero_ranges: 0,
        max_non_zero_ranges,
        consumer,
    };

    if intersect_with_ranges(tree, &mut cursor, &mut debug)?.is_break() {
        tracing::debug!(
            range = cursor.active_index,
            "Early terminate since no more range to collect"
        );
        debug.terminated_early = true;
    }
    cursor.finalize_previous_range()?;

    Ok(debug)
}

fn intersect_with_ranges(
    tree: &mut dyn PointTree,
    cursor: &mut RangeCursor<'_, '_>,
    debug: &mut DebugInfo,
) -> Result<ControlFlow<()>> {
    let relation = match cursor.compare(tree.min_packed_value(), tree.max_packed_value())? {
        ControlFlow::Continue(relation) => relation,
        ControlFlow::Break(()) => return Ok(ControlFlow::Break(())),
    };

    match relation {
        Relation::CellInsideQuery => {
            debug.visit_inner();
            cursor.count_node(tree)
        }
        Relation::CellCrossesQuery => {
            if tree.move_to_child() {
                loop {
                    if intersect_with_ranges(tree, cursor, debug)?.is_break() {
                        return Ok(ControlFlow::Break(()));
                    }
                    if !tree.move_to_sibling() {
                        break;
                    }
                }
                tree.move_to_parent();
                Ok(ControlFlow::Continue(()))
            } else {
                debug.visit_leaf();
                tree.visit_doc_values(cursor)
            }
        }
        Relation::CellOutsideQuery => Ok(ControlFlow::Continue(())),
    }
}

//! In-memory point index.
//!
//! A one-dimensional BKD-style tree: points are sorted by packed value, cut
//! into leaves of at most `max_points_in_leaf`, and grouped under a binary
//! tree of inner nodes whose bounds summarize their subtree.

use crate::encoding::NumericType;
use crate::error::{Error, Result};
use crate::point::{DocId, IntersectVisitor, PointTree, PointValues, Segment};
use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::sync::Arc;

pub const DEFAULT_MAX_POINTS_IN_LEAF: usize = 512;

#[derive(Debug, Clone)]
struct Node {
    start: usize,
    end: usize,
    children: Option<[usize; 2]>,
}

#[derive(Debug, Clone)]
pub struct MemoryPointValues {
    bytes_per_dim: usize,
    values: Vec<u8>,
    docs: Vec<DocId>,
    nodes: Vec<Node>,
    doc_count: u64,
}

impl MemoryPointValues {
    pub fn new(bytes_per_dim: usize, points: Vec<(Vec<u8>, DocId)>) -> Result<Self> {
        Self::with_max_points_in_leaf(bytes_per_dim, points, DEFAULT_MAX_POINTS_IN_LEAF)
    }

    pub fn with_max_points_in_leaf(
        bytes_per_dim: usize,
        mut points: Vec<(Vec<u8>, DocId)>,
        max_points_in_leaf: usize,
    ) -> Result<Self> {
        if points.is_empty() {
            return Err(Error::InvalidPoints("a point index needs at least one point".to_string()));
        }
        if bytes_per_dim == 0 || max_points_in_leaf == 0 {
            return Err(Error::InvalidPoints(
                "bytes_per_dim and max_points_in_leaf must be positive".to_string(),
            ));
        }
        if let Some((value, _)) = points.iter().find(|(v, _)| v.len() != bytes_per_dim) {
            return Err(Error::InvalidPoints(format!(
                "point of {} bytes in a {bytes_per_dim} byte index",
                value.len()
            )));
        }

        points.sort_unstable();
        let doc_count = points.iter().map(|(_, doc)| *doc).collect::<HashSet<_>>().len() as u64;

        let mut values = Vec::with_capacity(points.len() * bytes_per_dim);
        let mut docs = Vec::with_capacity(points.len());
        for (value, doc) in points {
            values.extend_from_slice(&value);
            docs.push(doc);
        }

        let mut tree = Self {
            bytes_per_dim,
            values,
            docs,
            nodes: Vec::new(),
            doc_count,
        };
        let len = tree.docs.len();
        tree.build(0, len, max_points_in_leaf);
        Ok(tree)
    }

    /// Build an index over integral values of `numeric_type`.
    pub fn from_longs(numeric_type: NumericType, values: &[(DocId, i64)]) -> Result<Self> {
        let points = values
            .iter()
            .map(|(doc, v)| (numeric_type.encode_long(*v), *doc))
            .collect();
        Self::new(numeric_type.bytes_len(), points)
    }

    fn build(&mut self, start: usize, end: usize, max_points_in_leaf: usize) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node {
            start,
            end,
            children: None,
        });
        let count = end - start;
        if count > max_points_in_leaf {
            let num_leaves = count.div_ceil(max_points_in_leaf);
            let mid = start + (num_leaves / 2) * max_points_in_leaf;
            let left = self.build(start, mid, max_points_in_leaf);
            let right = self.build(mid, end, max_points_in_leaf);
            self.nodes[id].children = Some([left, right]);
        }
        id
    }

    fn value(&self, idx: usize) -> &[u8] {
        &self.values[idx * self.bytes_per_dim..(idx + 1) * self.bytes_per_dim]
    }

    pub fn num_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.children.is_none()).count()
    }
}

impl PointValues for MemoryPointValues {
    fn point_tree(&self) -> Result<Box<dyn PointTree + '_>> {
        Ok(Box::new(MemoryPointTree {
            points: self,
            path: vec![0],
        }))
    }

    fn min_packed_value(&self) -> &[u8] {
        self.value(0)
    }

    fn max_packed_value(&self) -> &[u8] {
        self.value(self.docs.len() - 1)
    }

    fn bytes_per_dim(&self) -> usize {
        self.bytes_per_dim
    }

    fn doc_count(&self) -> u64 {
        self.doc_count
    }

    fn size(&self) -> u64 {
        self.docs.len() as u64
    }
}

struct MemoryPointTree<'a> {
    points: &'a MemoryPointValues,
    path: Vec<usize>,
}

impl MemoryPointTree<'_> {
    fn node(&self) -> &Node {
        // path always holds at least the root
        &self.points.nodes[self.path[self.path.len() - 1]]
    }
}

impl PointTree for MemoryPointTree<'_> {
    fn min_packed_value(&self) -> &[u8] {
        self.points.value(self.node().start)
    }

    fn max_packed_value(&self) -> &[u8] {
        self.points.value(self.node().end - 1)
    }

    fn move_to_child(&mut self) -> bool {
        match self.node().children {
            Some([left, _]) => {
                self.path.push(left);
                true
            }
            None => false,
        }
    }

    fn move_to_sibling(&mut self) -> bool {
        let depth = self.path.len();
        if depth < 2 {
            return false;
        }
        let current = self.path[depth - 1];
        match self.points.nodes[self.path[depth - 2]].children {
            Some([left, right]) if left == current => {
                self.path[depth - 1] = right;
                true
            }
            _ => false,
        }
    }

    fn move_to_parent(&mut self) -> bool {
        if self.path.len() < 2 {
            return false;
        }
        self.path.pop();
        true
    }

    fn size(&self) -> u64 {
        let node = self.node();
        (node.end - node.start) as u64
    }

    fn visit_doc_ids(&self, visitor: &mut dyn IntersectVisitor) -> Result<ControlFlow<()>> {
        let node = self.node();
        for &doc in &self.points.docs[node.start..node.end] {
            if visitor.visit(doc)?.is_break() {
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    fn visit_doc_values(&self, visitor: &mut dyn IntersectVisitor) -> Result<ControlFlow<()>> {
        let node = self.node();
        for idx in node.start..node.end {
            if visitor
                .visit_value(self.points.docs[idx], self.points.value(idx))?
                .is_break()
            {
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }
}

/// Segment backed by in-memory point indexes.
#[derive(Debug, Clone, Default)]
pub struct MemorySegment {
    ord: u32,
    deleted_docs: u32,
    doc_count_field: bool,
    fields: HashMap<String, Arc<MemoryPointValues>>,
}

impl MemorySegment {
    pub fn new(ord: u32) -> Self {
        Self {
            ord,
            ..Default::default()
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, points: MemoryPointValues) -> Self {
        self.fields.insert(name.into(), Arc::new(points));
        self
    }

    pub fn with_deleted_docs(mut self, deleted_docs: u32) -> Self {
        self.deleted_docs = deleted_docs;
        self
    }

    pub fn with_doc_count_field(mut self) -> Self {
        self.doc_count_field = true;
        self
    }
}

impl Segment for MemorySegment {
    fn ord(&self) -> u32 {
        self.ord
    }

    fn has_deletions(&self) -> bool {
        self.deleted_docs > 0
    }

    fn point_values(&self, field: &str) -> Result<Option<Arc<dyn PointValues>>> {
        Ok(self
            .fields
            .get(field)
            .map(|points| Arc::clone(points) as Arc<dyn PointValues>))
    }

    fn has_doc_count_field(&self) -> Result<bool> {
        Ok(self.doc_count_field)
    }
}

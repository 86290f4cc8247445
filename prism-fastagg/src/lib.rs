//! Point-tree fast path for range and date histogram aggregations.
//!
//! Instead of visiting every matching document, eligible aggregations walk
//! the BKD point tree of a numeric field once per segment and count whole
//! subtrees whose value range falls inside a single bucket.

pub mod aggregations;
pub mod bridge;
pub mod config;
pub mod context;
pub mod encoding;
pub mod error;
pub mod field;
pub mod memory;
pub mod point;
pub mod ranges;
pub mod rounding;
pub mod tantivy_adapter;
pub mod traversal;

pub use aggregations::{FastFilterAgg, PreparedFastFilter, SegmentOutcome};
pub use bridge::{AggregatorBridge, BucketRanges, SubCollector};
pub use config::FastFilterConfig;
pub use context::{OptimizationContext, SearchContext, TopLevelQuery};
pub use encoding::NumericType;
pub use error::{Error, Result};
pub use point::{DocId, PointTree, PointValues, Relation, Segment};
pub use ranges::Ranges;
pub use traversal::{multi_ranges_traverse, DebugInfo};

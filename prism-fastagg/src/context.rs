//! Shard and segment orchestration of the fast filter optimization.
//!
//! An aggregator owns one [`OptimizationContext`]. It asks
//! [`can_optimize`](OptimizationContext::can_optimize) once per shard, calls
//! [`prepare`](OptimizationContext::prepare) to build the shard level ranges,
//! then offers every segment to
//! [`try_optimize`](OptimizationContext::try_optimize). A segment that is
//! declined is collected the normal way by the caller.

use crate::bridge::{AggregatorBridge, BucketRanges, SubCollector};
use crate::config::FastFilterConfig;
use crate::encoding::NumericType;
use crate::error::{Error, Result};
use crate::point::{PointValues, Segment};
use crate::traversal::DebugInfo;
use serde::Serialize;

/// Shape of the top level query, as far as bound inference cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopLevelQuery {
    MatchAll,
    FieldExists { field: String },
    /// Point range on a long/date field, both bounds inclusive.
    PointRange { field: String, lower: i64, upper: i64 },
    Other,
}

/// What the optimization sees of the shard being searched.
pub struct SearchContext<'a> {
    pub shard_id: String,
    pub config: FastFilterConfig,
    pub query: TopLevelQuery,
    pub segments: Vec<&'a dyn Segment>,
}

impl<'a> SearchContext<'a> {
    pub fn new(shard_id: impl Into<String>, config: FastFilterConfig) -> Self {
        Self {
            shard_id: shard_id.into(),
            config,
            query: TopLevelQuery::MatchAll,
            segments: Vec::new(),
        }
    }

    pub fn with_query(mut self, query: TopLevelQuery) -> Self {
        self.query = query;
        self
    }

    pub fn with_segment(mut self, segment: &'a dyn Segment) -> Self {
        self.segments.push(segment);
        self
    }
}

fn decoded_bounds(values: &dyn PointValues) -> (i64, i64) {
    (
        NumericType::Date.decode_to_long(values.min_packed_value()),
        NumericType::Date.decode_to_long(values.max_packed_value()),
    )
}

/// Decoded min and max of a segment's long/date point index.
pub fn segment_bounds(segment: &dyn Segment, field: &str) -> Result<Option<(i64, i64)>> {
    Ok(segment
        .point_values(field)?
        .map(|values| decoded_bounds(values.as_ref())))
}

/// Min and max of `field` over every segment of the shard.
pub fn index_bounds(context: &SearchContext<'_>, field: &str) -> Result<Option<(i64, i64)>> {
    let mut bounds: Option<(i64, i64)> = None;
    for segment in &context.segments {
        if let Some((min, max)) = segment_bounds(*segment, field)? {
            bounds = Some(match bounds {
                Some((lo, hi)) => (lo.min(min), hi.max(max)),
                None => (min, max),
            });
        }
    }
    Ok(bounds)
}

/// Shard bounds of a date histogram, when the top level query lets us know
/// which documents are collected.
pub fn date_histogram_bounds(
    context: &SearchContext<'_>,
    field: &str,
) -> Result<Option<(i64, i64)>> {
    match &context.query {
        TopLevelQuery::MatchAll => index_bounds(context, field),
        TopLevelQuery::FieldExists { field: exists } if exists == field => {
            index_bounds(context, field)
        }
        TopLevelQuery::PointRange {
            field: range_field,
            lower,
            upper,
        } if range_field == field => Ok(index_bounds(context, field)?
            .map(|(min, max)| (min.max(*lower), max.min(*upper)))),
        _ => Ok(None),
    }
}

/// Lifecycle of an [`OptimizationContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationState {
    Uninitialized,
    Eligible,
    Ineligible,
    Prepared,
}

/// Profile output of the optimization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FastFilterStats {
    pub optimized_segments: u64,
    pub unoptimized_segments: u64,
    pub leaf_visited: u64,
    pub inner_visited: u64,
    /// Segments whose traversal stopped before the end of the tree.
    pub terminated_early_segments: u64,
}

pub struct OptimizationContext {
    bridge: AggregatorBridge,
    config: FastFilterConfig,
    state: OptimizationState,
    prepare_called: bool,
    prepared_at_shard_level: bool,
    shard_id: Option<String>,

    ranges: Option<BucketRanges>,
    ranges_from_segment: Option<BucketRanges>,

    // debug info
    visits: DebugInfo,
    terminated_early_segments: u64,
    segments: u64,
    optimized_segments: u64,
}

impl OptimizationContext {
    pub fn new(bridge: AggregatorBridge) -> Self {
        Self {
            bridge,
            config: FastFilterConfig::default(),
            state: OptimizationState::Uninitialized,
            prepare_called: false,
            prepared_at_shard_level: false,
            shard_id: None,
            ranges: None,
            ranges_from_segment: None,
            visits: DebugInfo::default(),
            terminated_early_segments: 0,
            segments: 0,
            optimized_segments: 0,
        }
    }

    pub fn bridge(&self) -> &AggregatorBridge {
        &self.bridge
    }

    pub fn state(&self) -> OptimizationState {
        self.state
    }

    pub fn prepared_at_shard_level(&self) -> bool {
        self.prepared_at_shard_level
    }

    /// Shard level ranges, once prepared.
    pub fn ranges(&self) -> Option<&BucketRanges> {
        self.ranges.as_ref()
    }

    /// Decide once per shard whether the aggregation can use the fast path.
    ///
    /// Only top level aggregations qualify: a `parent` bucket aggregation
    /// would need its own ordinal mapping.
    pub fn can_optimize(&mut self, parent: Option<&str>, context: &SearchContext<'_>) -> bool {
        if !context.config.enabled() || parent.is_some() {
            self.state = OptimizationState::Ineligible;
            return false;
        }

        let can_optimize = self.bridge.can_optimize();
        if can_optimize {
            self.config = context.config.clone();
            self.shard_id = Some(context.shard_id.clone());
            self.state = OptimizationState::Eligible;
        } else {
            self.state = OptimizationState::Ineligible;
        }
        tracing::debug!(
            shard = %context.shard_id,
            "Fast filter rewriteable: {}",
            can_optimize
        );
        can_optimize
    }

    /// Build the shard level ranges. Must be called at most once.
    pub fn prepare(&mut self, context: &SearchContext<'_>) -> Result<()> {
        if self.prepare_called {
            return Err(Error::AlreadyPrepared);
        }
        self.prepare_called = true;
        if self.state != OptimizationState::Eligible {
            return Ok(());
        }
        self.ranges = self
            .bridge
            .build_ranges_at_shard_level(context, self.config.max_rewrite_filters)?;
        self.prepared_at_shard_level = self.ranges.is_some();
        self.state = OptimizationState::Prepared;
        Ok(())
    }

    /// Try to populate the bucket doc counts of a segment from its point index.
    ///
    /// Returns `false` when the segment must be collected the normal way.
    /// `segment_match_all` tells whether every document of the segment is
    /// collected, which allows building ranges from the segment bounds when
    /// the shard level ones are missing.
    pub fn try_optimize(
        &mut self,
        segment: &dyn Segment,
        sub: Option<&mut dyn SubCollector>,
        increment_doc_count: &mut dyn FnMut(i64, u64),
        segment_match_all: bool,
    ) -> Result<bool> {
        self.segments += 1;
        metrics::counter!("prism_fastfilter_segments_total").increment(1);
        if !matches!(
            self.state,
            OptimizationState::Eligible | OptimizationState::Prepared
        ) {
            return Ok(false);
        }
        let Some(field) = self.bridge.field_type().map(|f| f.name.clone()) else {
            return Ok(false);
        };
        let shard = self.shard_id.clone().unwrap_or_default();

        // the point index does not know about deletions
        if segment.has_deletions() {
            return Ok(false);
        }
        let Some(values) = segment.point_values(&field)? else {
            return Ok(false);
        };
        // only proceed if every document corresponds to exactly one point
        if values.doc_count() != values.size() {
            return Ok(false);
        }
        if segment.has_doc_count_field()? {
            tracing::debug!(
                shard = %shard,
                segment = segment.ord(),
                "Segment has at least one document with _doc_count field, \
                 skip fast filter optimization"
            );
            return Ok(false);
        }

        let values = values.as_ref();
        if !self.try_build_ranges_from_segment(segment, values, &field, segment_match_all)? {
            return Ok(false);
        }
        // segment level ranges only live for this segment
        let segment_ranges = self.ranges_from_segment.take();
        let Some(ranges) = segment_ranges.as_ref().or(self.ranges.as_ref()) else {
            return Ok(false);
        };
        // points must be encoded the way the ranges are
        if values.bytes_per_dim() != ranges.ranges.byte_len() {
            tracing::debug!(
                shard = %shard,
                segment = segment.ord(),
                point_bytes = values.bytes_per_dim(),
                range_bytes = ranges.ranges.byte_len(),
                "Point width differs from the range width, skip fast filter optimization"
            );
            return Ok(false);
        }

        if ranges
            .ranges
            .first_range_index(values.min_packed_value(), values.max_packed_value())
            .is_none()
        {
            tracing::debug!(
                shard = %shard,
                segment = segment.ord(),
                "No range overlaps the segment, nothing to collect"
            );
            return Ok(true);
        }

        let debug_info = self.bridge.collect(
            values,
            ranges,
            self.config.non_zero_range_cap(),
            increment_doc_count,
            sub,
        )?;
        self.optimized_segments += 1;
        metrics::counter!("prism_fastfilter_segments_optimized_total").increment(1);

        tracing::debug!(
            shard = %shard,
            segment = segment.ord(),
            terminated_early = debug_info.terminated_early,
            "Fast filter optimization applied"
        );
        self.consume_debug_info(&debug_info);
        tracing::debug!(
            "crossed leaf nodes: {}, inner nodes: {}",
            self.visits.leaf,
            self.visits.inner
        );
        Ok(true)
    }

    /// Even when ranges cannot be built at shard level, they can be built
    /// for a segment that is functionally match-all.
    fn try_build_ranges_from_segment(
        &mut self,
        segment: &dyn Segment,
        values: &dyn PointValues,
        field: &str,
        segment_match_all: bool,
    ) -> Result<bool> {
        if self.prepared_at_shard_level {
            return Ok(true);
        }
        if !segment_match_all {
            return Ok(false);
        }
        tracing::debug!(
            shard = self.shard_id.as_deref().unwrap_or_default(),
            segment = segment.ord(),
            field,
            "Segment functionally matches all documents, build the fast filter"
        );
        let bounds = decoded_bounds(values);
        self.ranges_from_segment = self
            .bridge
            .build_ranges_for_segment(bounds, self.config.max_rewrite_filters)?;
        Ok(self.ranges_from_segment.is_some())
    }

    fn consume_debug_info(&mut self, debug: &DebugInfo) {
        self.visits.merge(debug);
        if debug.terminated_early {
            self.terminated_early_segments += 1;
        }
    }

    pub fn stats(&self) -> FastFilterStats {
        FastFilterStats {
            optimized_segments: self.optimized_segments,
            unoptimized_segments: self.segments - self.optimized_segments,
            leaf_visited: self.visits.leaf,
            inner_visited: self.visits.inner,
            terminated_early_segments: self.terminated_early_segments,
        }
    }

    /// Add the profile entries, only once a segment was optimized.
    pub fn populate_debug_info(&self, add: &mut dyn FnMut(&str, serde_json::Value)) {
        if self.optimized_segments > 0 {
            let stats = self.stats();
            add("optimized_segments", stats.optimized_segments.into());
            add("unoptimized_segments", stats.unoptimized_segments.into());
            add("leaf_visited", stats.leaf_visited.into());
            add("inner_visited", stats.inner_visited.into());
            add("terminated_early_segments", stats.terminated_early_segments.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{DateHistogramBridge, HistogramInterval, RangeBridge, RangeSpec};
    use crate::field::{MappedFieldType, ValuesSourceConfig};
    use crate::memory::{MemoryPointValues, MemorySegment};
    use crate::rounding::{DateInterval, Rounding};
    use std::collections::BTreeMap;

    fn range_context() -> OptimizationContext {
        OptimizationContext::new(AggregatorBridge::Range(RangeBridge::new(
            ValuesSourceConfig::field(MappedFieldType::numeric("price", NumericType::Long)),
            vec![
                RangeSpec::new(0.0, 10.0),
                RangeSpec::new(10.0, 20.0),
                RangeSpec::new(20.0, 30.0),
            ],
        )))
    }

    fn price_segment(ord: u32, values: &[i64]) -> MemorySegment {
        let docs: Vec<_> = values.iter().enumerate().map(|(d, v)| (d as u32, *v)).collect();
        MemorySegment::new(ord).with_field(
            "price",
            MemoryPointValues::from_longs(NumericType::Long, &docs).unwrap(),
        )
    }

    fn run(
        ctx: &mut OptimizationContext,
        segment: &MemorySegment,
        match_all: bool,
    ) -> (bool, BTreeMap<i64, u64>) {
        let mut counts = BTreeMap::new();
        let mut increment = |ord, n| *counts.entry(ord).or_insert(0) += n;
        let optimized = ctx
            .try_optimize(segment, None, &mut increment, match_all)
            .unwrap();
        (optimized, counts)
    }

    #[test]
    fn test_lifecycle() {
        let search = SearchContext::new("[idx][0]", FastFilterConfig::default());
        let mut ctx = range_context();
        assert_eq!(ctx.state(), OptimizationState::Uninitialized);
        assert!(ctx.can_optimize(None, &search));
        assert_eq!(ctx.state(), OptimizationState::Eligible);
        ctx.prepare(&search).unwrap();
        assert_eq!(ctx.state(), OptimizationState::Prepared);
        assert!(ctx.prepared_at_shard_level());
        assert!(matches!(ctx.prepare(&search), Err(Error::AlreadyPrepared)));
    }

    #[test]
    fn test_declines_nested_and_disabled() {
        let search = SearchContext::new("s", FastFilterConfig::default());
        assert!(!range_context().can_optimize(Some("parent_terms"), &search));

        let disabled = SearchContext::new("s", FastFilterConfig::disabled());
        let mut ctx = range_context();
        assert!(!ctx.can_optimize(None, &disabled));
        assert_eq!(ctx.state(), OptimizationState::Ineligible);
        let (optimized, _) = run(&mut ctx, &price_segment(0, &[1]), true);
        assert!(!optimized);
    }

    #[test]
    fn test_segment_counts() {
        let search = SearchContext::new("s", FastFilterConfig::default());
        let mut ctx = range_context();
        ctx.can_optimize(None, &search);
        ctx.prepare(&search).unwrap();

        let (optimized, counts) = run(&mut ctx, &price_segment(0, &[5, 5, 15, 25, 9]), false);
        assert!(optimized);
        assert_eq!(counts, BTreeMap::from([(0, 3), (1, 1), (2, 1)]));
        assert_eq!(ctx.stats().optimized_segments, 1);
    }

    #[test]
    fn test_disqualified_segments() {
        let search = SearchContext::new("s", FastFilterConfig::default());
        let mut ctx = range_context();
        ctx.can_optimize(None, &search);
        ctx.prepare(&search).unwrap();

        let deleted = price_segment(0, &[1, 2]).with_deleted_docs(1);
        assert!(!run(&mut ctx, &deleted, true).0);

        let weighted = price_segment(1, &[1, 2]).with_doc_count_field();
        assert!(!run(&mut ctx, &weighted, true).0);

        let no_points = MemorySegment::new(2);
        assert!(!run(&mut ctx, &no_points, true).0);

        let multi_valued = MemorySegment::new(3).with_field(
            "price",
            MemoryPointValues::from_longs(NumericType::Long, &[(0, 1), (0, 2), (1, 3)]).unwrap(),
        );
        assert!(!run(&mut ctx, &multi_valued, true).0);

        let stats = ctx.stats();
        assert_eq!(stats.optimized_segments, 0);
        assert_eq!(stats.unoptimized_segments, 4);
    }

    #[test]
    fn test_segment_outside_every_range() {
        let search = SearchContext::new("s", FastFilterConfig::default());
        let mut ctx = OptimizationContext::new(AggregatorBridge::Range(RangeBridge::new(
            ValuesSourceConfig::field(MappedFieldType::numeric("price", NumericType::Long)),
            vec![RangeSpec::new(5.0, 10.0), RangeSpec::new(20.0, 30.0)],
        )));
        ctx.can_optimize(None, &search);
        ctx.prepare(&search).unwrap();

        let (handled, counts) = run(&mut ctx, &price_segment(0, &[0, 2, 4]), false);
        assert!(handled);
        assert!(counts.is_empty());
        assert_eq!(ctx.stats().optimized_segments, 0);

        let mut debug = Vec::new();
        ctx.populate_debug_info(&mut |key, value| debug.push((key.to_string(), value)));
        assert!(debug.is_empty());
    }

    #[test]
    fn test_date_histogram_segment_fallback_needs_match_all() {
        let day = 86_400_000;
        let points = [(0, day), (1, day + 5), (2, 3 * day)];
        let segment = MemorySegment::new(0).with_field(
            "ts",
            MemoryPointValues::from_longs(NumericType::Date, &points).unwrap(),
        );
        // a query we cannot infer bounds from
        let search = SearchContext::new("s", FastFilterConfig::default())
            .with_query(TopLevelQuery::Other)
            .with_segment(&segment);

        let bridge = DateHistogramBridge::new(
            ValuesSourceConfig::field(MappedFieldType::date("ts")),
            HistogramInterval::Rounding(Rounding::Calendar(DateInterval::Day)),
        );
        let mut ctx = OptimizationContext::new(AggregatorBridge::DateHistogram(bridge));
        assert!(ctx.can_optimize(None, &search));
        ctx.prepare(&search).unwrap();
        assert!(!ctx.prepared_at_shard_level());

        assert!(!run(&mut ctx, &segment, false).0);

        let (optimized, counts) = run(&mut ctx, &segment, true);
        assert!(optimized);
        assert_eq!(counts, BTreeMap::from([(day, 2), (3 * day, 1)]));
        assert!(ctx.ranges_from_segment.is_none());
    }

    #[test]
    fn test_date_histogram_bounds_from_query() {
        let a = MemorySegment::new(0).with_field(
            "ts",
            MemoryPointValues::from_longs(NumericType::Date, &[(0, 100), (1, 500)]).unwrap(),
        );
        let b = MemorySegment::new(1).with_field(
            "ts",
            MemoryPointValues::from_longs(NumericType::Date, &[(0, 50), (1, 300)]).unwrap(),
        );
        let search = SearchContext::new("s", FastFilterConfig::default())
            .with_segment(&a)
            .with_segment(&b);
        assert_eq!(date_histogram_bounds(&search, "ts").unwrap(), Some((50, 500)));
        assert_eq!(date_histogram_bounds(&search, "other").unwrap(), None);

        let ranged = search.with_query(TopLevelQuery::PointRange {
            field: "ts".to_string(),
            lower: 200,
            upper: 1_000,
        });
        assert_eq!(date_histogram_bounds(&ranged, "ts").unwrap(), Some((200, 500)));

        let exists = ranged.with_query(TopLevelQuery::FieldExists {
            field: "other".to_string(),
        });
        assert_eq!(date_histogram_bounds(&exists, "ts").unwrap(), None);
    }

    #[test]
    fn test_populate_debug_info() {
        let search = SearchContext::new("s", FastFilterConfig::default());
        let mut ctx = range_context();
        ctx.can_optimize(None, &search);
        ctx.prepare(&search).unwrap();
        run(&mut ctx, &price_segment(0, &[1, 11, 21]), false);
        run(&mut ctx, &price_segment(1, &[1]).with_deleted_docs(1), false);

        let mut debug = BTreeMap::new();
        ctx.populate_debug_info(&mut |key, value| {
            debug.insert(key.to_string(), value);
        });
        assert_eq!(debug["optimized_segments"], serde_json::json!(1));
        assert_eq!(debug["unoptimized_segments"], serde_json::json!(1));
        assert!(debug.contains_key("leaf_visited"));
        assert!(debug.contains_key("inner_visited"));
        assert_eq!(debug["terminated_early_segments"], serde_json::json!(0));
    }

    #[test]
    fn test_point_width_must_match_range_width() {
        let search = SearchContext::new("s", FastFilterConfig::default());
        let mut ctx = OptimizationContext::new(AggregatorBridge::Range(RangeBridge::new(
            ValuesSourceConfig::field(MappedFieldType::numeric("price", NumericType::Integer)),
            vec![RangeSpec::new(0.0, 10.0), RangeSpec::new(10.0, 20.0)],
        )));
        ctx.can_optimize(None, &search);
        ctx.prepare(&search).unwrap();

        // long points indexed under an integer mapping
        let segment = MemorySegment::new(0).with_field(
            "price",
            MemoryPointValues::from_longs(NumericType::Long, &[(0, 1), (1, 5), (2, 15)]).unwrap(),
        );
        let (optimized, counts) = run(&mut ctx, &segment, true);
        assert!(!optimized);
        assert!(counts.is_empty());
        assert_eq!(ctx.stats().optimized_segments, 0);
        assert_eq!(ctx.stats().unoptimized_segments, 1);
    }

    #[test]
    fn test_stats_accumulate_over_segments() {
        let config = FastFilterConfig {
            max_non_zero_ranges: Some(1),
            ..Default::default()
        };
        let search = SearchContext::new("s", config);
        let mut ctx = range_context();
        ctx.can_optimize(None, &search);
        ctx.prepare(&search).unwrap();

        let (_, first) = run(&mut ctx, &price_segment(0, &[1, 11, 21]), false);
        let after_first = ctx.stats();
        assert_eq!(first, BTreeMap::from([(0, 1)]));
        assert_eq!(after_first.terminated_early_segments, 1);

        run(&mut ctx, &price_segment(1, &[2, 12]), false);
        let stats = ctx.stats();
        assert_eq!(stats.optimized_segments, 2);
        assert_eq!(stats.terminated_early_segments, 2);
        assert!(
            stats.leaf_visited + stats.inner_visited
                > after_first.leaf_visited + after_first.inner_visited
        );
    }
}

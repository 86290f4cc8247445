//! Aggregation specific side of the fast filter optimization.
//!
//! An [`AggregatorBridge`] knows how one aggregation kind decides eligibility,
//! turns its buckets into [`Ranges`], and maps a range back to a bucket
//! ordinal. Everything else lives in [`OptimizationContext`].
//!
//! [`OptimizationContext`]: crate::context::OptimizationContext

use crate::context::{date_histogram_bounds, SearchContext};
use crate::encoding::NumericType;
use crate::error::Result;
use crate::field::{MappedFieldType, ValuesSourceConfig};
use crate::point::{DocId, PointValues};
use crate::ranges::Ranges;
use crate::rounding::Rounding;
use crate::traversal::{multi_ranges_traverse, DebugInfo};
use serde::{Deserialize, Serialize};

/// Receives every matched document of an optimized segment together with
/// its bucket ordinal. Only used when a sub-aggregation is registered.
pub trait SubCollector {
    fn collect(&mut self, doc: DocId, bucket_ord: i64) -> Result<()>;
}

/// Ranges ready for traversal, with what is needed to map them back to buckets.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketRanges {
    pub ranges: Ranges,
    /// Rounding the ranges were cut with, for date histograms.
    pub rounding: Option<Rounding>,
}

#[derive(Debug, Clone)]
pub enum AggregatorBridge {
    Range(RangeBridge),
    DateHistogram(DateHistogramBridge),
}

impl AggregatorBridge {
    pub fn can_optimize(&self) -> bool {
        match self {
            AggregatorBridge::Range(bridge) => bridge.can_optimize(),
            AggregatorBridge::DateHistogram(bridge) => bridge.can_optimize(),
        }
    }

    pub fn field_type(&self) -> Option<&MappedFieldType> {
        self.values_source().field_type.as_ref()
    }

    fn values_source(&self) -> &ValuesSourceConfig {
        match self {
            AggregatorBridge::Range(bridge) => &bridge.values_source,
            AggregatorBridge::DateHistogram(bridge) => &bridge.values_source,
        }
    }

    pub fn build_ranges_at_shard_level(
        &self,
        context: &SearchContext<'_>,
        max_rewrite_filters: usize,
    ) -> Result<Option<BucketRanges>> {
        match self {
            AggregatorBridge::Range(bridge) => bridge.build_ranges(),
            AggregatorBridge::DateHistogram(bridge) => {
                bridge.build_ranges_at_shard_level(context, max_rewrite_filters)
            }
        }
    }

    /// Ranges for a single segment with decoded bounds `segment_bounds`.
    pub fn build_ranges_for_segment(
        &self,
        segment_bounds: (i64, i64),
        max_rewrite_filters: usize,
    ) -> Result<Option<BucketRanges>> {
        match self {
            AggregatorBridge::Range(_) => {
                tracing::debug!("Range aggregation builds its ranges at shard level only");
                Ok(None)
            }
            AggregatorBridge::DateHistogram(bridge) if bridge.is_auto() => {
                // a rounding picked per segment would not match across segments
                tracing::debug!("Auto date histogram builds its ranges at shard level only");
                Ok(None)
            }
            AggregatorBridge::DateHistogram(bridge) => {
                Ok(bridge.build_ranges(segment_bounds, max_rewrite_filters))
            }
        }
    }

    /// Bucket ordinal of range `idx`: the index itself for range
    /// aggregations, the rounded start of the range for date histograms.
    pub fn ordinal_for_range_index(&self, ranges: &BucketRanges, idx: usize) -> i64 {
        match (self, ranges.rounding) {
            (AggregatorBridge::DateHistogram(_), Some(rounding)) => {
                let start = NumericType::Date.decode_to_long(ranges.ranges.lower(idx));
                rounding.round(start).unwrap_or(start)
            }
            _ => idx as i64,
        }
    }

    /// Count the documents of a segment per bucket.
    ///
    /// Counts go to `increment_doc_count(ordinal, count)`. Doc ids are only
    /// enumerated when `sub` is present.
    pub fn collect(
        &self,
        values: &dyn PointValues,
        ranges: &BucketRanges,
        max_non_zero_ranges: usize,
        increment_doc_count: &mut dyn FnMut(i64, u64),
        mut sub: Option<&mut dyn SubCollector>,
    ) -> Result<DebugInfo> {
        let mut tree = values.point_tree()?;
        let collect_doc_ids = sub.is_some();
        multi_ranges_traverse(
            tree.as_mut(),
            &ranges.ranges,
            max_non_zero_ranges,
            collect_doc_ids,
            &mut |idx, count, docs| {
                let ord = self.ordinal_for_range_index(ranges, idx);
                increment_doc_count(ord, count);
                if let Some(sub) = sub.as_mut() {
                    for &doc in docs {
                        sub.collect(doc, ord)?;
                    }
                }
                Ok(())
            },
        )
    }
}

/// One bucket of a range aggregation: `[from, to)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeSpec {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default = "neg_infinity")]
    pub from: f64,
    #[serde(default = "infinity")]
    pub to: f64,
}

fn neg_infinity() -> f64 {
    f64::NEG_INFINITY
}

fn infinity() -> f64 {
    f64::INFINITY
}

impl RangeSpec {
    pub fn new(from: f64, to: f64) -> Self {
        Self { key: None, from, to }
    }

    pub fn keyed(key: impl Into<String>, from: f64, to: f64) -> Self {
        Self {
            key: Some(key.into()),
            from,
            to,
        }
    }

    /// Bucket key, `"*"` standing in for an open bound.
    pub fn key(&self) -> String {
        if let Some(key) = &self.key {
            return key.clone();
        }
        let bound = |v: f64| if v.is_finite() { v.to_string() } else { "*".to_string() };
        format!("{}-{}", bound(self.from), bound(self.to))
    }
}

#[derive(Debug, Clone)]
pub struct RangeBridge {
    values_source: ValuesSourceConfig,
    ranges: Vec<RangeSpec>,
}

impl RangeBridge {
    pub fn new(values_source: ValuesSourceConfig, ranges: Vec<RangeSpec>) -> Self {
        Self {
            values_source,
            ranges,
        }
    }

    pub fn ranges(&self) -> &[RangeSpec] {
        &self.ranges
    }

    /// Eligible when the field is a point indexed number and the ranges are
    /// sorted and do not overlap.
    pub fn can_optimize(&self) -> bool {
        if self.values_source.numeric_field_data().is_none() || self.ranges.is_empty() {
            return false;
        }
        if self.ranges.iter().any(|r| r.from.is_nan() || r.to.is_nan() || r.from > r.to) {
            return false;
        }
        self.ranges.windows(2).all(|pair| pair[0].to <= pair[1].from)
    }

    fn build_ranges(&self) -> Result<Option<BucketRanges>> {
        let Some((_, numeric_type)) = self.values_source.numeric_field_data() else {
            return Ok(None);
        };
        let lowers = self.ranges.iter().map(|r| numeric_type.encode_point(r.from)).collect();
        let uppers = self.ranges.iter().map(|r| numeric_type.encode_point(r.to)).collect();
        Ok(Some(BucketRanges {
            ranges: Ranges::new(lowers, uppers)?,
            rounding: None,
        }))
    }
}

/// Clipping bounds of a date histogram: `min` inclusive, `max` exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongBounds {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

/// Interval of a date histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistogramInterval {
    Rounding(Rounding),
    /// Pick a calendar interval from the bounds, aiming at `target_buckets`.
    Auto { target_buckets: usize },
}

#[derive(Debug, Clone)]
pub struct DateHistogramBridge {
    values_source: ValuesSourceConfig,
    interval: HistogramInterval,
    hard_bounds: Option<LongBounds>,
}

impl DateHistogramBridge {
    pub fn new(values_source: ValuesSourceConfig, interval: HistogramInterval) -> Self {
        Self {
            values_source,
            interval,
            hard_bounds: None,
        }
    }

    pub fn with_hard_bounds(mut self, hard_bounds: LongBounds) -> Self {
        self.hard_bounds = Some(hard_bounds);
        self
    }

    pub fn is_auto(&self) -> bool {
        matches!(self.interval, HistogramInterval::Auto { .. })
    }

    pub fn can_optimize(&self) -> bool {
        matches!(
            self.values_source.numeric_field_data(),
            Some((field_type, _)) if field_type.is_date()
        )
    }

    fn build_ranges_at_shard_level(
        &self,
        context: &SearchContext<'_>,
        max_rewrite_filters: usize,
    ) -> Result<Option<BucketRanges>> {
        let Some(field_type) = self.values_source.field_type.as_ref() else {
            return Ok(None);
        };
        let bounds = date_histogram_bounds(context, &field_type.name)?;
        Ok(bounds.and_then(|bounds| self.build_ranges(bounds, max_rewrite_filters)))
    }

    /// Clip `bounds` (both inclusive) by the hard bounds. `None` when nothing is left.
    pub fn process_hard_bounds(&self, bounds: (i64, i64)) -> Option<(i64, i64)> {
        let (mut low, mut high) = bounds;
        if let Some(hard_bounds) = self.hard_bounds {
            if let Some(min) = hard_bounds.min {
                low = low.max(min);
            }
            if let Some(max) = hard_bounds.max {
                // hard bounds max is exclusive
                high = high.min(max.saturating_sub(1));
            }
        }
        (low <= high).then_some((low, high))
    }

    fn rounding(&self, low: i64, high: i64) -> Rounding {
        match self.interval {
            HistogramInterval::Rounding(rounding) => rounding,
            HistogramInterval::Auto { target_buckets } => {
                Rounding::auto(low, high, target_buckets)
            }
        }
    }

    /// One range per bucket between `low` and `high`, both inclusive.
    ///
    /// The first range starts at `low` and the last one ends right after
    /// `high`. Declines when more than `max_rewrite_filters` buckets would be
    /// needed.
    pub fn build_ranges(
        &self,
        bounds: (i64, i64),
        max_rewrite_filters: usize,
    ) -> Option<BucketRanges> {
        let (low, high) = self.process_hard_bounds(bounds)?;
        let rounding = self.rounding(low, high);
        let encode = |v: i64| NumericType::Date.encode_long(v);

        let mut lowers = Vec::new();
        let mut uppers = Vec::new();
        let mut bucket_start = rounding.round(low)?;
        while bucket_start <= high {
            if lowers.len() >= max_rewrite_filters {
                tracing::debug!(
                    max_rewrite_filters,
                    "Max number of range filters reached, skip the optimization"
                );
                return None;
            }
            let next = rounding.next_rounding_value(bucket_start);
            let upper = match next {
                Some(next) => next.min(high.saturating_add(1)),
                None => high.saturating_add(1),
            };
            lowers.push(encode(bucket_start.max(low)));
            uppers.push(encode(upper));
            match next {
                Some(next) if next > bucket_start => bucket_start = next,
                _ => break,
            }
        }

        let ranges = Ranges::new(lowers, uppers).ok()?;
        Some(BucketRanges {
            ranges,
            rounding: Some(rounding),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rounding::DateInterval;
    use chrono::{TimeZone, Utc};

    fn price_source() -> ValuesSourceConfig {
        ValuesSourceConfig::field(MappedFieldType::numeric("price", NumericType::Long))
    }

    fn date_source() -> ValuesSourceConfig {
        ValuesSourceConfig::field(MappedFieldType::date("ts"))
    }

    fn day(d: u32) -> i64 {
        Utc.with_ymd_and_hms(2024, 3, d, 0, 0, 0).unwrap().timestamp_millis()
    }

    fn daily() -> DateHistogramBridge {
        DateHistogramBridge::new(
            date_source(),
            HistogramInterval::Rounding(Rounding::Calendar(DateInterval::Day)),
        )
    }

    #[test]
    fn test_range_bridge_eligibility() {
        let sorted = vec![RangeSpec::new(0.0, 10.0), RangeSpec::new(10.0, 20.0)];
        assert!(RangeBridge::new(price_source(), sorted.clone()).can_optimize());

        let overlapping = vec![RangeSpec::new(0.0, 15.0), RangeSpec::new(10.0, 20.0)];
        assert!(!RangeBridge::new(price_source(), overlapping).can_optimize());

        let inverted = vec![RangeSpec::new(20.0, 10.0)];
        assert!(!RangeBridge::new(price_source(), inverted).can_optimize());

        assert!(!RangeBridge::new(price_source(), vec![]).can_optimize());

        let keyword = ValuesSourceConfig::field(MappedFieldType::keyword("tag"));
        assert!(!RangeBridge::new(keyword, sorted).can_optimize());
    }

    #[test]
    fn test_range_bridge_open_bounds() {
        let bridge = RangeBridge::new(
            price_source(),
            vec![RangeSpec::new(f64::NEG_INFINITY, 0.0), RangeSpec::new(0.0, f64::INFINITY)],
        );
        assert!(bridge.can_optimize());
        let built = bridge.build_ranges().unwrap().unwrap();
        assert_eq!(built.ranges.len(), 2);
        assert_eq!(built.ranges.lower(0), NumericType::Long.encode_long(i64::MIN).as_slice());
        assert_eq!(built.ranges.upper(1), NumericType::Long.encode_long(i64::MAX).as_slice());
        assert_eq!(bridge.ranges()[0].key(), "*-0");
        assert_eq!(RangeSpec::keyed("cheap", 0.0, 5.0).key(), "cheap");
    }

    #[test]
    fn test_date_histogram_only_for_dates() {
        assert!(daily().can_optimize());
        let on_long = DateHistogramBridge::new(
            price_source(),
            HistogramInterval::Rounding(Rounding::Calendar(DateInterval::Day)),
        );
        assert!(!on_long.can_optimize());
    }

    #[test]
    fn test_date_ranges_start_at_low_and_end_after_high() {
        let low = day(1) + 3_600_000;
        let high = day(3) + 7_200_000;
        let built = daily().build_ranges((low, high), 100).unwrap();
        let ranges = &built.ranges;
        assert_eq!(ranges.len(), 3);

        let decode = |b: &[u8]| NumericType::Date.decode_to_long(b);
        assert_eq!(decode(ranges.lower(0)), low);
        assert_eq!(decode(ranges.upper(0)), day(2));
        assert_eq!(decode(ranges.lower(1)), day(2));
        assert_eq!(decode(ranges.upper(2)), high + 1);

        let bridge = AggregatorBridge::DateHistogram(daily());
        assert_eq!(bridge.ordinal_for_range_index(&built, 0), day(1));
        assert_eq!(bridge.ordinal_for_range_index(&built, 2), day(3));
    }

    #[test]
    fn test_auto_interval_needs_shard_bounds() {
        let auto =
            DateHistogramBridge::new(date_source(), HistogramInterval::Auto { target_buckets: 10 });
        assert!(auto.is_auto());
        assert!(auto.build_ranges((day(1), day(5)), 100).is_some());

        let bridge = AggregatorBridge::DateHistogram(auto);
        assert!(bridge.build_ranges_for_segment((day(1), day(5)), 100).unwrap().is_none());

        let fixed = AggregatorBridge::DateHistogram(daily());
        assert!(fixed.build_ranges_for_segment((day(1), day(5)), 100).unwrap().is_some());
    }

    #[test]
    fn test_date_ranges_respect_budget() {
        assert!(daily().build_ranges((day(1), day(10)), 5).is_none());
        assert!(daily().build_ranges((day(1), day(5)), 5).is_some());
    }

    #[test]
    fn test_hard_bounds_clip_and_reject() {
        let clipped = daily().with_hard_bounds(LongBounds {
            min: Some(day(2)),
            max: Some(day(4)),
        });
        let built = clipped.build_ranges((day(1), day(10)), 100).unwrap();
        assert_eq!(built.ranges.len(), 2);
        assert_eq!(NumericType::Date.decode_to_long(built.ranges.upper(1)), day(4));

        let disjoint = daily().with_hard_bounds(LongBounds {
            min: Some(day(20)),
            max: None,
        });
        assert_eq!(disjoint.process_hard_bounds((day(1), day(10))), None);
        assert!(disjoint.build_ranges((day(1), day(10)), 100).is_none());
    }

    #[test]
    fn test_range_ordinals_are_indexes() {
        let bridge = AggregatorBridge::Range(RangeBridge::new(
            price_source(),
            vec![RangeSpec::new(0.0, 10.0), RangeSpec::new(10.0, 20.0)],
        ));
        let AggregatorBridge::Range(inner) = &bridge else {
            unreachable!()
        };
        let built = inner.build_ranges().unwrap().unwrap();
        assert_eq!(bridge.ordinal_for_range_index(&built, 1), 1);
        assert!(bridge.build_ranges_for_segment((0, 100), 10).unwrap().is_none());
    }
}

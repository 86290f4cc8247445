//! Range and date histogram aggregations driven through the fast filter path.
//!
//! [`FastFilterAgg`] is prepared once per shard, then asked for every
//! segment. A segment comes back either with its bucket counts or as
//! [`SegmentOutcome::Fallback`], in which case the caller collects it
//! document by document.

pub mod types;

pub use types::{AggregationRequest, AggregationResult, AggregationType, Bucket};

use crate::bridge::{AggregatorBridge, SubCollector};
use crate::context::{FastFilterStats, OptimizationContext, SearchContext};
use crate::error::{Error, Result};
use crate::field::MappedFieldType;
use crate::point::Segment;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;

/// Doc counts keyed by bucket ordinal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketCounts(pub BTreeMap<i64, u64>);

impl BucketCounts {
    pub fn increment(&mut self, ord: i64, count: u64) {
        *self.0.entry(ord).or_insert(0) += count;
    }

    pub fn get(&self, ord: i64) -> u64 {
        self.0.get(&ord).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentOutcome {
    Optimized(BucketCounts),
    Fallback,
}

pub struct FastFilterAgg {
    name: String,
    bridge: AggregatorBridge,
}

impl FastFilterAgg {
    pub fn new(name: impl Into<String>, bridge: AggregatorBridge) -> Self {
        Self {
            name: name.into(),
            bridge,
        }
    }

    /// Build from a request whose field is mapped as `field_type`.
    pub fn from_request(request: &AggregationRequest, field_type: MappedFieldType) -> Result<Self> {
        let field = request.agg_type.field();
        if field != field_type.name {
            return Err(Error::InvalidAggregation(format!(
                "aggregation [{}] targets field [{}] but was given the mapping of [{}]",
                request.name, field, field_type.name
            )));
        }
        Ok(Self::new(
            request.name.clone(),
            request.agg_type.to_bridge(field_type)?,
        ))
    }

    /// Decide eligibility and build the shard level ranges.
    pub fn prepare(
        self,
        context: &SearchContext<'_>,
        parent: Option<&str>,
    ) -> Result<PreparedFastFilter> {
        let mut optimization = OptimizationContext::new(self.bridge);
        if optimization.can_optimize(parent, context) {
            optimization.prepare(context)?;
        }
        Ok(PreparedFastFilter {
            name: self.name,
            optimization,
        })
    }
}

pub struct PreparedFastFilter {
    name: String,
    optimization: OptimizationContext,
}

impl PreparedFastFilter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn optimization(&self) -> &OptimizationContext {
        &self.optimization
    }

    pub fn create_fruit(&self) -> BucketCounts {
        BucketCounts::default()
    }

    pub fn for_segment(
        &mut self,
        segment: &dyn Segment,
        segment_match_all: bool,
        sub: Option<&mut dyn SubCollector>,
    ) -> Result<SegmentOutcome> {
        let mut counts = BucketCounts::default();
        let optimized = self.optimization.try_optimize(
            segment,
            sub,
            &mut |ord, count| counts.increment(ord, count),
            segment_match_all,
        )?;
        Ok(if optimized {
            SegmentOutcome::Optimized(counts)
        } else {
            SegmentOutcome::Fallback
        })
    }

    pub fn merge(&self, acc: &mut BucketCounts, fruit: BucketCounts) {
        for (ord, count) in fruit.0 {
            acc.increment(ord, count);
        }
    }

    pub fn stats(&self) -> FastFilterStats {
        self.optimization.stats()
    }

    pub fn into_result(&self, counts: &BucketCounts) -> AggregationResult {
        let buckets = match self.optimization.bridge() {
            AggregatorBridge::Range(bridge) => bridge
                .ranges()
                .iter()
                .enumerate()
                .map(|(idx, range)| Bucket {
                    key: range.key(),
                    doc_count: counts.get(idx as i64),
                    from: range.from.is_finite().then_some(range.from),
                    to: range.to.is_finite().then_some(range.to),
                })
                .collect(),
            AggregatorBridge::DateHistogram(_) => counts
                .0
                .iter()
                .map(|(&key, &doc_count)| Bucket {
                    key: date_key(key),
                    doc_count,
                    from: None,
                    to: None,
                })
                .collect(),
        };
        AggregationResult {
            name: self.name.clone(),
            buckets,
        }
    }
}

fn date_key(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| millis.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FastFilterConfig;
    use crate::encoding::NumericType;
    use crate::memory::{MemoryPointValues, MemorySegment};
    use serde_json::json;

    fn request(value: serde_json::Value) -> AggregationRequest {
        serde_json::from_value(value).unwrap()
    }

    fn price_type() -> MappedFieldType {
        MappedFieldType::numeric("price", NumericType::Long)
    }

    fn price_segment(ord: u32, values: &[(u32, i64)]) -> MemorySegment {
        MemorySegment::new(ord).with_field(
            "price",
            MemoryPointValues::from_longs(NumericType::Long, values).unwrap(),
        )
    }

    #[test]
    fn test_range_request_end_to_end() {
        let req = request(json!({
            "name": "prices",
            "type": "range",
            "field": "price",
            "ranges": [{"to": 10.0}, {"from": 10.0, "to": 20.0}, {"from": 20.0}]
        }));
        let segments = [
            price_segment(0, &[(0, 1), (1, 12), (2, 30)]),
            price_segment(1, &[(0, 5), (1, 7)]),
        ];
        let search = SearchContext::new("shard-0", FastFilterConfig::default());
        let agg = FastFilterAgg::from_request(&req, price_type()).unwrap();
        let mut prepared = agg.prepare(&search, None).unwrap();

        let mut acc = prepared.create_fruit();
        for segment in &segments {
            match prepared.for_segment(segment, false, None).unwrap() {
                SegmentOutcome::Optimized(counts) => prepared.merge(&mut acc, counts),
                SegmentOutcome::Fallback => {
                    panic!("segment {} was not optimized", segment.ord())
                }
            }
        }

        let result = prepared.into_result(&acc);
        assert_eq!(result.name, "prices");
        let summary: Vec<_> = result
            .buckets
            .iter()
            .map(|b| (b.key.as_str(), b.doc_count))
            .collect();
        assert_eq!(summary, vec![("*-10", 3), ("10-20", 1), ("20-*", 1)]);
        assert_eq!(result.buckets[0].from, None);
        assert_eq!(result.buckets[1].to, Some(20.0));
        assert_eq!(prepared.stats().optimized_segments, 2);
    }

    #[test]
    fn test_date_histogram_request_keys() {
        let req = request(json!({
            "name": "per_day",
            "type": "date_histogram",
            "field": "ts",
            "calendar_interval": "day"
        }));
        let day = 86_400_000;
        let points = [(0, 10), (1, day + 10), (2, day + 20)];
        let segment = MemorySegment::new(0).with_field(
            "ts",
            MemoryPointValues::from_longs(NumericType::Date, &points).unwrap(),
        );
        let search =
            SearchContext::new("shard-0", FastFilterConfig::default()).with_segment(&segment);
        let mut prepared = FastFilterAgg::from_request(&req, MappedFieldType::date("ts"))
            .unwrap()
            .prepare(&search, None)
            .unwrap();
        assert!(prepared.optimization().prepared_at_shard_level());

        let outcome = prepared.for_segment(&segment, true, None).unwrap();
        let SegmentOutcome::Optimized(counts) = outcome else {
            panic!("expected optimized segment");
        };
        let result = prepared.into_result(&counts);
        assert_eq!(result.buckets.len(), 2);
        assert_eq!(result.buckets[0].key, "1970-01-01T00:00:00.000Z");
        assert_eq!(result.buckets[1].key, "1970-01-02T00:00:00.000Z");
        assert_eq!(result.buckets[1].doc_count, 2);
    }

    #[test]
    fn test_invalid_intervals_rejected() {
        let both = request(json!({
            "name": "bad",
            "type": "date_histogram",
            "field": "ts",
            "calendar_interval": "day",
            "fixed_interval": "1h"
        }));
        assert!(FastFilterAgg::from_request(&both, MappedFieldType::date("ts")).is_err());

        let unknown = request(json!({
            "name": "bad",
            "type": "date_histogram",
            "field": "ts",
            "calendar_interval": "fortnight"
        }));
        assert!(FastFilterAgg::from_request(&unknown, MappedFieldType::date("ts")).is_err());
    }

    #[test]
    fn test_nested_aggregation_falls_back() {
        let req = request(json!({
            "name": "prices",
            "type": "range",
            "field": "price",
            "ranges": [{"from": 0.0, "to": 10.0}]
        }));
        let segment = price_segment(0, &[(0, 1)]);
        let search = SearchContext::new("shard-0", FastFilterConfig::default());
        let mut prepared = FastFilterAgg::from_request(&req, price_type())
            .unwrap()
            .prepare(&search, Some("by_category"))
            .unwrap();
        assert_eq!(
            prepared.for_segment(&segment, true, None).unwrap(),
            SegmentOutcome::Fallback
        );
    }

    #[test]
    fn test_mapping_of_another_field_rejected() {
        let req = request(json!({
            "name": "prices",
            "type": "range",
            "field": "price",
            "ranges": [{"from": 0.0, "to": 10.0}]
        }));
        let other = MappedFieldType::numeric("quantity", NumericType::Long);
        assert!(matches!(
            FastFilterAgg::from_request(&req, other),
            Err(Error::InvalidAggregation(_))
        ));
        assert_eq!(req.agg_type.field(), "price");
        assert!(FastFilterAgg::from_request(&req, price_type()).is_ok());
    }
}

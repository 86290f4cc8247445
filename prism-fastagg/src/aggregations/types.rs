use crate::bridge::{
    AggregatorBridge, DateHistogramBridge, HistogramInterval, LongBounds, RangeBridge, RangeSpec,
};
use crate::error::{Error, Result};
use crate::field::{MappedFieldType, ValuesSourceConfig};
use crate::rounding::{DateInterval, Rounding};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationRequest {
    pub name: String,
    #[serde(flatten)]
    pub agg_type: AggregationType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AggregationType {
    Range {
        field: String,
        ranges: Vec<RangeSpec>,
    },
    DateHistogram {
        field: String,
        #[serde(default)]
        calendar_interval: Option<String>,
        #[serde(default)]
        fixed_interval: Option<String>,
        #[serde(default)]
        hard_bounds: Option<LongBounds>,
    },
    AutoDateHistogram {
        field: String,
        buckets: usize,
    },
}

impl AggregationType {
    pub fn field(&self) -> &str {
        match self {
            AggregationType::Range { field, .. }
            | AggregationType::DateHistogram { field, .. }
            | AggregationType::AutoDateHistogram { field, .. } => field,
        }
    }

    /// Bridge of this aggregation over a field mapped as `field_type`.
    pub fn to_bridge(&self, field_type: MappedFieldType) -> Result<AggregatorBridge> {
        let values_source = ValuesSourceConfig::field(field_type);
        let bridge = match self {
            AggregationType::Range { ranges, .. } => {
                AggregatorBridge::Range(RangeBridge::new(values_source, ranges.clone()))
            }
            AggregationType::DateHistogram {
                calendar_interval,
                fixed_interval,
                hard_bounds,
                ..
            } => {
                let rounding = match (calendar_interval, fixed_interval) {
                    (Some(calendar), None) => DateInterval::parse_interval(calendar)
                        .map(Rounding::Calendar)
                        .ok_or_else(|| {
                            let msg = format!("unknown calendar_interval {calendar}");
                            Error::InvalidAggregation(msg)
                        })?,
                    (None, Some(fixed)) => Rounding::parse_fixed_interval(fixed).ok_or_else(|| {
                        Error::InvalidAggregation(format!("unknown fixed_interval {fixed}"))
                    })?,
                    _ => {
                        return Err(Error::InvalidAggregation(
                            "exactly one of calendar_interval and fixed_interval is required"
                                .to_string(),
                        ))
                    }
                };
                let mut bridge =
                    DateHistogramBridge::new(values_source, HistogramInterval::Rounding(rounding));
                if let Some(hard_bounds) = hard_bounds {
                    bridge = bridge.with_hard_bounds(*hard_bounds);
                }
                AggregatorBridge::DateHistogram(bridge)
            }
            AggregationType::AutoDateHistogram { buckets, .. } => {
                AggregatorBridge::DateHistogram(DateHistogramBridge::new(
                    values_source,
                    HistogramInterval::Auto {
                        target_buckets: *buckets,
                    },
                ))
            }
        };
        Ok(bridge)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationResult {
    pub name: String,
    pub buckets: Vec<Bucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub key: String,
    pub doc_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<f64>,
}

//! Segment view over a tantivy [`SegmentReader`].
//!
//! tantivy keeps numeric values in columnar fast fields rather than a point
//! tree, so the point index of a field is rebuilt from its column on demand.

use crate::encoding::{unsigned_long_to_sortable_bytes, NumericType};
use crate::error::Result;
use crate::field::MappedFieldType;
use crate::memory::MemoryPointValues;
use crate::point::{DocId, PointValues, Segment, DOC_COUNT_FIELD};
use std::sync::Arc;
use tantivy::schema::{FieldType, Schema};
use tantivy::SegmentReader;

/// Field types the fast path can read, as mapped by a tantivy schema.
pub fn mapped_field_type(schema: &Schema, name: &str) -> Option<MappedFieldType> {
    let field = schema.get_field(name).ok()?;
    let entry = schema.get_field_entry(field);
    let (numeric_type, options_fast, options_indexed) = match entry.field_type() {
        FieldType::I64(options) => (NumericType::Long, options.is_fast(), options.is_indexed()),
        FieldType::U64(options) => {
            (NumericType::UnsignedLong, options.is_fast(), options.is_indexed())
        }
        FieldType::F64(options) => (NumericType::Double, options.is_fast(), options.is_indexed()),
        FieldType::Date(options) => (NumericType::Date, options.is_fast(), options.is_indexed()),
        _ => return None,
    };
    let mut mapped = MappedFieldType::numeric(name, numeric_type);
    mapped.searchable = options_indexed;
    mapped.has_points = options_fast;
    Some(mapped)
}

pub struct TantivySegment<'a> {
    reader: &'a SegmentReader,
    ord: u32,
}

impl<'a> TantivySegment<'a> {
    pub fn new(reader: &'a SegmentReader, ord: u32) -> Self {
        Self { reader, ord }
    }

    fn alive_docs(&self) -> impl Iterator<Item = DocId> + '_ {
        let alive = self.reader.alive_bitset();
        (0..self.reader.max_doc()).filter(move |doc| alive.map_or(true, |bits| bits.is_alive(*doc)))
    }

    /// Encoded `(value, doc)` pairs of every live document.
    fn collect_points<I, F>(&self, encoded_values: F) -> Vec<(Vec<u8>, DocId)>
    where
        I: Iterator<Item = Vec<u8>>,
        F: Fn(DocId) -> I,
    {
        let mut points = Vec::new();
        for doc in self.alive_docs() {
            points.extend(encoded_values(doc).map(|value| (value, doc)));
        }
        points
    }
}

impl Segment for TantivySegment<'_> {
    fn ord(&self) -> u32 {
        self.ord
    }

    fn has_deletions(&self) -> bool {
        self.reader.has_deletes()
    }

    fn point_values(&self, field: &str) -> Result<Option<Arc<dyn PointValues>>> {
        let Some(mapped) = mapped_field_type(self.reader.schema(), field) else {
            return Ok(None);
        };
        if !mapped.has_points {
            return Ok(None);
        }
        let Some(numeric_type) = mapped.point_encoder() else {
            return Ok(None);
        };

        let fast_fields = self.reader.fast_fields();
        let points = match numeric_type {
            NumericType::UnsignedLong => {
                let column = fast_fields.u64(field)?;
                self.collect_points(|doc| {
                    column
                        .values_for_doc(doc)
                        .map(|v| unsigned_long_to_sortable_bytes(v).to_vec())
                })
            }
            NumericType::Double => {
                let column = fast_fields.f64(field)?;
                self.collect_points(|doc| {
                    column
                        .values_for_doc(doc)
                        .map(|v| NumericType::Double.encode_point(v))
                })
            }
            NumericType::Date => {
                let column = fast_fields.date(field)?;
                self.collect_points(|doc| {
                    column
                        .values_for_doc(doc)
                        .map(|v| NumericType::Date.encode_long(v.into_timestamp_millis()))
                })
            }
            _ => {
                let column = fast_fields.i64(field)?;
                self.collect_points(|doc| {
                    column
                        .values_for_doc(doc)
                        .map(move |v| numeric_type.encode_long(v))
                })
            }
        };

        if points.is_empty() {
            return Ok(None);
        }
        tracing::trace!(
            segment = self.ord,
            field,
            points = points.len(),
            "Built point index from fast field"
        );
        let values = MemoryPointValues::new(numeric_type.bytes_len(), points)?;
        Ok(Some(Arc::new(values)))
    }

    fn has_doc_count_field(&self) -> Result<bool> {
        let schema = self.reader.schema();
        let Ok(field) = schema.get_field(DOC_COUNT_FIELD) else {
            return Ok(false);
        };
        let fast_fields = self.reader.fast_fields();
        let present = match schema.get_field_entry(field).field_type() {
            FieldType::U64(options) if options.is_fast() => {
                let column = fast_fields.u64(DOC_COUNT_FIELD)?;
                self.alive_docs().any(|doc| column.first(doc).is_some())
            }
            FieldType::I64(options) if options.is_fast() => {
                let column = fast_fields.i64(DOC_COUNT_FIELD)?;
                self.alive_docs().any(|doc| column.first(doc).is_some())
            }
            // declared but not readable per document
            _ => true,
        };
        Ok(present)
    }
}

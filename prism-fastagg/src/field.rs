//! Field metadata the bridges inspect when deciding eligibility.

use crate::encoding::NumericType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Numeric(NumericType),
    Keyword,
    Text,
    Boolean,
}

/// Mapping of the aggregated field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedFieldType {
    pub name: String,
    pub kind: FieldKind,
    /// Field is indexed for search.
    #[serde(default = "default_true")]
    pub searchable: bool,
    /// Field values are indexed as points.
    #[serde(default = "default_true")]
    pub has_points: bool,
}

fn default_true() -> bool {
    true
}

impl MappedFieldType {
    pub fn numeric(name: impl Into<String>, numeric_type: NumericType) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Numeric(numeric_type),
            searchable: true,
            has_points: true,
        }
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::numeric(name, NumericType::Date)
    }

    pub fn keyword(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Keyword,
            searchable: true,
            has_points: false,
        }
    }

    /// Point encoder of the field, if its values are numeric or dates.
    pub fn point_encoder(&self) -> Option<NumericType> {
        match self.kind {
            FieldKind::Numeric(numeric_type) => Some(numeric_type),
            _ => None,
        }
    }

    pub fn is_date(&self) -> bool {
        self.kind == FieldKind::Numeric(NumericType::Date)
    }

    /// Searchable and backed by a point index.
    pub fn is_point_searchable(&self) -> bool {
        self.searchable && self.has_points
    }
}

/// How an aggregation reads its values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValuesSourceConfig {
    pub field_type: Option<MappedFieldType>,
    /// Values come from a script instead of the field.
    #[serde(default)]
    pub script: Option<String>,
    /// Substitute for documents without a value.
    #[serde(default)]
    pub missing: Option<serde_json::Value>,
    #[serde(default)]
    pub execution_hint: Option<String>,
}

impl ValuesSourceConfig {
    pub fn field(field_type: MappedFieldType) -> Self {
        Self {
            field_type: Some(field_type),
            ..Default::default()
        }
    }

    /// Plain field data of a point-indexed numeric or date field.
    pub fn numeric_field_data(&self) -> Option<(&MappedFieldType, NumericType)> {
        if self.script.is_some() || self.missing.is_some() {
            return None;
        }
        if !matches!(self.execution_hint.as_deref(), None | Some("auto")) {
            return None;
        }
        let field_type = self.field_type.as_ref()?;
        if !field_type.is_point_searchable() {
            return None;
        }
        Some((field_type, field_type.point_encoder()?))
    }
}

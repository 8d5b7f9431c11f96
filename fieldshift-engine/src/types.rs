use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Logical field types a form editor can pick.
///
/// The set is closed: an unknown token fails at parse time instead of
/// silently falling back to a generic text column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    ShortText,
    LongText,
    Email,
    Url,
    Phone,
    Select,
    Number,
    Integer,
    Rating,
    Boolean,
    Date,
    Time,
    DateTime,
    GeoPoint,
    Json,
}

impl FieldType {
    /// Concrete storage type backing this logical field type.
    pub fn storage(&self) -> DataType {
        match self {
            Self::ShortText | Self::Select => DataType::VarChar(255),
            Self::Email | Self::Url => DataType::VarChar(320),
            Self::Phone => DataType::VarChar(32),
            Self::LongText => DataType::Text,
            Self::Number => DataType::Numeric,
            Self::Integer | Self::Rating => DataType::Integer,
            Self::Boolean => DataType::Boolean,
            Self::Date => DataType::Date,
            Self::Time => DataType::Time,
            Self::DateTime => DataType::TimestampTz,
            Self::GeoPoint | Self::Json => DataType::Jsonb,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShortText => "short_text",
            Self::LongText => "long_text",
            Self::Email => "email",
            Self::Url => "url",
            Self::Phone => "phone",
            Self::Select => "select",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Rating => "rating",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "date_time",
            Self::GeoPoint => "geo_point",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let field_type = match s {
            "short_text" => Self::ShortText,
            "long_text" => Self::LongText,
            "email" => Self::Email,
            "url" => Self::Url,
            "phone" => Self::Phone,
            "select" => Self::Select,
            "number" => Self::Number,
            "integer" => Self::Integer,
            "rating" => Self::Rating,
            "boolean" => Self::Boolean,
            "date" => Self::Date,
            "time" => Self::Time,
            "date_time" => Self::DateTime,
            "geo_point" => Self::GeoPoint,
            "json" => Self::Json,
            _ => return Err(EngineError::UnknownFieldType(s.to_owned())),
        };

        Ok(field_type)
    }
}

/// Storage types the engine is willing to emit in DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    VarChar(u16),
    Text,
    Numeric,
    Integer,
    BigInt,
    DoublePrecision,
    Boolean,
    Date,
    Time,
    TimestampTz,
    Jsonb,
}

impl DataType {
    /// Coarse category used by the conversion policy.
    pub fn category(&self) -> TypeCategory {
        match self {
            Self::VarChar(_) => TypeCategory::BoundedString,
            Self::Text => TypeCategory::Text,
            Self::Numeric => TypeCategory::Numeric,
            Self::Integer | Self::BigInt => TypeCategory::Integer,
            Self::DoublePrecision => TypeCategory::Float,
            Self::Boolean => TypeCategory::Boolean,
            Self::Date | Self::TimestampTz => TypeCategory::DateLike,
            Self::Time => TypeCategory::TimeLike,
            Self::Jsonb => TypeCategory::Json,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VarChar(len) => write!(f, "VARCHAR({len})"),
            Self::Text => f.write_str("TEXT"),
            Self::Numeric => f.write_str("NUMERIC"),
            Self::Integer => f.write_str("INTEGER"),
            Self::BigInt => f.write_str("BIGINT"),
            Self::DoublePrecision => f.write_str("DOUBLE PRECISION"),
            Self::Boolean => f.write_str("BOOLEAN"),
            Self::Date => f.write_str("DATE"),
            Self::Time => f.write_str("TIME"),
            Self::TimestampTz => f.write_str("TIMESTAMPTZ"),
            Self::Jsonb => f.write_str("JSONB"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    BoundedString,
    Text,
    Numeric,
    Integer,
    Float,
    Boolean,
    DateLike,
    TimeLike,
    Json,
}

/// Row-level checks the store runs before a risky conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCheck {
    /// Value does not match `^[0-9]*\.?[0-9]+$`.
    NumericFormat,
    /// Value does not start with an ISO `YYYY-MM-DD` prefix.
    IsoDateFormat,
    /// Value is not equal to its own floor.
    IntegerNarrowing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionRule {
    /// Known-safe pair, no row scan needed.
    Safe,
    /// Scan rows first; `blocking` conversions abort on any invalid row,
    /// non-blocking ones proceed with a truncation warning.
    CheckRows { check: RowCheck, blocking: bool },
    /// Unverified pair, allowed but always carries a data-loss warning.
    Lossy,
}

pub fn conversion_rule(old: TypeCategory, new: TypeCategory) -> ConversionRule {
    use TypeCategory::*;

    match (old, new) {
        _ if old == new => ConversionRule::Safe,
        (_, Text) => ConversionRule::Safe,
        (Integer, Numeric | Float | BoundedString) => ConversionRule::Safe,
        (Numeric, Float | BoundedString) | (Float, Numeric | BoundedString) => {
            ConversionRule::Safe
        }
        (Text | BoundedString, Numeric | Float | Integer) => ConversionRule::CheckRows {
            check: RowCheck::NumericFormat,
            blocking: true,
        },
        (Text | BoundedString, DateLike) => ConversionRule::CheckRows {
            check: RowCheck::IsoDateFormat,
            blocking: true,
        },
        (Numeric | Float, Integer) => ConversionRule::CheckRows {
            check: RowCheck::IntegerNarrowing,
            blocking: false,
        },
        _ => ConversionRule::Lossy,
    }
}

/// Outcome of validating one type conversion. Computed identically by
/// preview and the live run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionCheck {
    pub valid: bool,
    pub invalid_count: i64,
    pub warnings: Vec<String>,
}

//! Composable query predicates
//!
//! [`Filter`] is an immutable predicate tree over document fields. Use
//! [`FilterBuilder`] to construct filters for an entity: every builder that
//! takes a field name validates it against the entity's schema first, so an
//! unknown field fails with [`Error::InvalidField`](crate::Error::InvalidField)
//! before any query is issued.
//!
//! # Example
//!
//! ```rust,ignore
//! use docstore_repository::filter::FilterBuilder;
//!
//! let active_admins = FilterBuilder::<User>::and(vec![
//!     FilterBuilder::<User>::eq("role", "admin")?,
//!     FilterBuilder::<User>::ne("status", "suspended")?,
//! ]);
//! ```

use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt;
use std::marker::PhantomData;

use crate::error::{Error, Result};
use crate::ids::DocumentId;
use crate::schema::{Entity, DELETED_AT_FIELD, ID_FIELD};
use crate::types::{GeoPoint, NearBy};

/// Offset applied to availability windows when none is given: UTC+03:00.
pub const DEFAULT_AVAILABILITY_OFFSET_MINUTES: i32 = 180;

/// A boolean predicate over document fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document
    Empty,
    Eq { field: String, value: Value },
    Ne { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    Nin { field: String, values: Vec<Value> },
    Gt { field: String, value: Value },
    Gte { field: String, value: Value },
    Lt { field: String, value: Value },
    Lte { field: String, value: Value },
    /// Regular-expression match on a string field
    Regex {
        field: String,
        pattern: String,
        case_insensitive: bool,
    },
    /// Full-text search over the collection's text index
    Text { search: String, case_sensitive: bool },
    /// Documents whose GeoJSON point lies within `max_distance` meters
    Near {
        field: String,
        point: GeoPoint,
        max_distance: f64,
    },
    /// Array field with at least one element matching the inner filter
    ElemMatch { field: String, filter: Box<Filter> },
    /// Field is absent or null
    IsNull { field: String },
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    /// Equality on a raw field name, without schema validation.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Absent-or-null check on a raw field name.
    pub fn is_null(field: impl Into<String>) -> Self {
        Filter::IsNull {
            field: field.into(),
        }
    }

    /// Conjunction. No filters collapse to [`Filter::Empty`], a single
    /// filter is returned as is.
    pub fn and(mut filters: Vec<Filter>) -> Self {
        match filters.len() {
            0 => Filter::Empty,
            1 => filters.remove(0),
            _ => Filter::And(filters),
        }
    }

    /// Disjunction, with the same collapse rule as [`Filter::and`].
    pub fn or(mut filters: Vec<Filter>) -> Self {
        match filters.len() {
            0 => Filter::Empty,
            1 => filters.remove(0),
            _ => Filter::Or(filters),
        }
    }

    /// True when the filter (or one of its top-level conjuncts) pins `field`
    /// to a single value.
    pub fn pins_field(&self, field: &str) -> bool {
        match self {
            Filter::Eq { field: f, .. } => f == field,
            Filter::And(filters) => filters.iter().any(|f| f.pins_field(field)),
            _ => false,
        }
    }

    /// Renders the predicate as a store query document.
    pub fn to_document(&self) -> Value {
        match self {
            Filter::Empty => json!({}),
            Filter::Eq { field, value } => single(field, value.clone()),
            Filter::Ne { field, value } => single(field, json!({ "$ne": value })),
            Filter::In { field, values } => single(field, json!({ "$in": values })),
            Filter::Nin { field, values } => single(field, json!({ "$nin": values })),
            Filter::Gt { field, value } => single(field, json!({ "$gt": value })),
            Filter::Gte { field, value } => single(field, json!({ "$gte": value })),
            Filter::Lt { field, value } => single(field, json!({ "$lt": value })),
            Filter::Lte { field, value } => single(field, json!({ "$lte": value })),
            Filter::Regex {
                field,
                pattern,
                case_insensitive,
            } => {
                let options = if *case_insensitive { "i" } else { "" };
                single(field, json!({ "$regex": pattern, "$options": options }))
            }
            Filter::Text {
                search,
                case_sensitive,
            } => json!({ "$text": { "$search": search, "$caseSensitive": case_sensitive } }),
            Filter::Near {
                field,
                point,
                max_distance,
            } => single(
                field,
                json!({ "$near": { "$geometry": point.to_geojson(), "$maxDistance": max_distance } }),
            ),
            Filter::ElemMatch { field, filter } => {
                single(field, json!({ "$elemMatch": filter.to_document() }))
            }
            Filter::IsNull { field } => single(field, Value::Null),
            Filter::And(filters) => {
                json!({ "$and": filters.iter().map(Filter::to_document).collect::<Vec<_>>() })
            }
            Filter::Or(filters) => {
                json!({ "$or": filters.iter().map(Filter::to_document).collect::<Vec<_>>() })
            }
        }
    }
}

fn single(field: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(field.to_string(), value);
    Value::Object(map)
}

impl Default for Filter {
    fn default() -> Self {
        Filter::Empty
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_document())
    }
}

/// Schema-validated filter construction for entity `E`.
pub struct FilterBuilder<E>(PhantomData<fn() -> E>);

impl<E: Entity> FilterBuilder<E> {
    /// Resolves a field name against the entity schema.
    pub fn field(name: &str) -> Result<&'static str> {
        E::SCHEMA.resolve(name)
    }

    /// The soft-delete exclusion, for entities that support soft delete.
    pub fn not_deleted() -> Option<Filter> {
        E::SCHEMA
            .supports_soft_delete()
            .then(|| Filter::is_null(DELETED_AT_FIELD))
    }

    /// ANDs the soft-delete exclusion into `filter` when applicable.
    pub fn exclude_deleted(filter: Filter) -> Filter {
        match Self::not_deleted() {
            Some(not_deleted) => Filter::and(vec![filter, not_deleted]),
            None => filter,
        }
    }

    /// Matches the live document with the given identifier.
    pub fn id(id: &str) -> Result<Filter> {
        let id = DocumentId::parse_with_prefix(id, E::ID_PREFIX)?;
        Ok(Self::exclude_deleted(Filter::eq(ID_FIELD, id.as_str())))
    }

    pub fn eq<V: Serialize>(field: &str, value: V) -> Result<Filter> {
        Ok(Filter::Eq {
            field: Self::field(field)?.to_string(),
            value: serde_json::to_value(value)?,
        })
    }

    pub fn ne<V: Serialize>(field: &str, value: V) -> Result<Filter> {
        Ok(Filter::Ne {
            field: Self::field(field)?.to_string(),
            value: serde_json::to_value(value)?,
        })
    }

    /// Field value is one of `values`.
    pub fn in_list<I, V>(field: &str, values: I) -> Result<Filter>
    where
        I: IntoIterator<Item = V>,
        V: Serialize,
    {
        Ok(Filter::In {
            field: Self::field(field)?.to_string(),
            values: to_values(values)?,
        })
    }

    /// Field value is none of `values`.
    pub fn not_in_list<I, V>(field: &str, values: I) -> Result<Filter>
    where
        I: IntoIterator<Item = V>,
        V: Serialize,
    {
        Ok(Filter::Nin {
            field: Self::field(field)?.to_string(),
            values: to_values(values)?,
        })
    }

    pub fn gt<V: Serialize>(field: &str, value: V) -> Result<Filter> {
        Ok(Filter::Gt {
            field: Self::field(field)?.to_string(),
            value: serde_json::to_value(value)?,
        })
    }

    pub fn gte<V: Serialize>(field: &str, value: V) -> Result<Filter> {
        Ok(Filter::Gte {
            field: Self::field(field)?.to_string(),
            value: serde_json::to_value(value)?,
        })
    }

    pub fn lt<V: Serialize>(field: &str, value: V) -> Result<Filter> {
        Ok(Filter::Lt {
            field: Self::field(field)?.to_string(),
            value: serde_json::to_value(value)?,
        })
    }

    pub fn lte<V: Serialize>(field: &str, value: V) -> Result<Filter> {
        Ok(Filter::Lte {
            field: Self::field(field)?.to_string(),
            value: serde_json::to_value(value)?,
        })
    }

    /// Half-open range: `from <= field < to`.
    pub fn date_range(field: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Filter> {
        Ok(Filter::and(vec![Self::gte(field, from)?, Self::lt(field, to)?]))
    }

    /// Availability window for the current instant at UTC+03:00.
    pub fn time_availability(field: &str, available: bool) -> Result<Filter> {
        let offset = FixedOffset::east_opt(DEFAULT_AVAILABILITY_OFFSET_MINUTES * 60)
            .unwrap_or_else(|| Utc.fix());
        Self::time_availability_at(field, Utc::now(), offset, available)
    }

    /// Matches documents whose [`DayTiming`](crate::types::DayTiming) array
    /// has an entry for the local weekday of `at` that is open
    /// (`start <= t < end`) or closed (`t < start || t >= end`) at that
    /// local minute of the day.
    pub fn time_availability_at(
        field: &str,
        at: DateTime<Utc>,
        offset: FixedOffset,
        available: bool,
    ) -> Result<Filter> {
        let field = Self::field(field)?;
        let local = at.with_timezone(&offset);
        let minutes = local.hour() * 60 + local.minute();
        let day = local.weekday().num_days_from_sunday();

        let same_day = Filter::eq("day", day);
        let window = if available {
            Filter::and(vec![
                same_day,
                Filter::Lte {
                    field: "start".to_string(),
                    value: minutes.into(),
                },
                Filter::Gt {
                    field: "end".to_string(),
                    value: minutes.into(),
                },
            ])
        } else {
            Filter::and(vec![
                same_day,
                Filter::or(vec![
                    Filter::Gt {
                        field: "start".to_string(),
                        value: minutes.into(),
                    },
                    Filter::Lte {
                        field: "end".to_string(),
                        value: minutes.into(),
                    },
                ]),
            ])
        };

        Ok(Filter::ElemMatch {
            field: field.to_string(),
            filter: Box::new(window),
        })
    }

    /// Case-insensitive full-text search; `None` for an empty search.
    pub fn text_search(value: &str) -> Option<Filter> {
        if value.is_empty() {
            return None;
        }
        Some(Filter::Text {
            search: value.to_string(),
            case_sensitive: false,
        })
    }

    /// Case-insensitive partial match. An absent or empty value falls back
    /// to plain equality with that value.
    pub fn text_match(field: &str, value: Option<&str>) -> Result<Filter> {
        let field = Self::field(field)?;
        match value {
            None => Ok(Filter::eq(field, Value::Null)),
            Some("") => Ok(Filter::eq(field, "")),
            Some(pattern) => {
                regex::RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| Error::InvalidPattern {
                        pattern: pattern.to_string(),
                        message: e.to_string(),
                    })?;
                Ok(Filter::Regex {
                    field: field.to_string(),
                    pattern: pattern.to_string(),
                    case_insensitive: true,
                })
            }
        }
    }

    /// Documents within `near.radius` meters of the given point.
    pub fn geo_near(field: &str, near: &NearBy) -> Result<Filter> {
        Ok(Filter::Near {
            field: Self::field(field)?.to_string(),
            point: near.point(),
            max_distance: near.radius,
        })
    }

    pub fn and(filters: Vec<Filter>) -> Filter {
        Filter::and(filters)
    }

    pub fn or(filters: Vec<Filter>) -> Filter {
        Filter::or(filters)
    }
}

fn to_values<I, V>(values: I) -> Result<Vec<Value>>
where
    I: IntoIterator<Item = V>,
    V: Serialize,
{
    values
        .into_iter()
        .map(|v| serde_json::to_value(v).map_err(Error::from))
        .collect()
}

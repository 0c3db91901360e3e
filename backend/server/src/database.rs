//! # Data Store
//!
//! Row-level access to the hosted relational database.
//!
//! Every table is addressed by name and every row is a JSON object, the same
//! shape the hosted REST dialect speaks. Typed access goes through
//! [`fetch_all`], [`fetch_one`] and [`insert_as`], which decode rows with serde.
//!
//! ## Requirements
//!
//! - select with filters, ordering, limit and offset
//! - insert, update, delete
//! - upsert keyed by a conflict column set
//! - exact counts
//!
//! ## Backends
//!
//! - [`postgrest::PostgrestStore`]: the hosted database over HTTP
//! - [`memory::MemoryStore`]: in-process tables for development and tests
//!
//! Filters are evaluated by the backend. The memory backend reuses
//! [`Filter::matches`] so both agree on semantics.
use std::cmp::Ordering;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;

pub mod memory;
pub mod postgrest;

pub type Row = Map<String, Value>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Duplicate key in {table}: {message}")]
    Conflict { table: String, message: String },

    #[error("Request to {table} failed: {source}")]
    Transport {
        table: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Store rejected {table} request with status {status}: {message}")]
    Rejected {
        table: String,
        status: u16,
        message: String,
    },

    #[error("Malformed row in {table}: {source}")]
    Malformed {
        table: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Rows written to {0} must be JSON objects")]
    NotAnObject(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
    NotIn(String, Vec<Value>),
    Gte(String, Value),
    Lte(String, Value),
    /// Case-insensitive substring match.
    Contains(String, String),
    IsNull(String),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(column.to_string(), value.into())
    }

    pub fn is_in<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(column.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn not_in<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::NotIn(column.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn gte(column: &str, value: impl Into<Value>) -> Self {
        Filter::Gte(column.to_string(), value.into())
    }

    pub fn lte(column: &str, value: impl Into<Value>) -> Self {
        Filter::Lte(column.to_string(), value.into())
    }

    pub fn contains(column: &str, needle: &str) -> Self {
        Filter::Contains(column.to_string(), needle.to_string())
    }

    pub fn is_null(column: &str) -> Self {
        Filter::IsNull(column.to_string())
    }

    pub fn matches(&self, row: &Row) -> bool {
        let field = |column: &str| row.get(column).unwrap_or(&Value::Null);

        match self {
            Filter::Eq(column, value) => values_equal(field(column), value),
            Filter::In(column, values) => values.iter().any(|v| values_equal(field(column), v)),
            Filter::NotIn(column, values) => {
                !values.iter().any(|v| values_equal(field(column), v))
            }
            Filter::Gte(column, value) => matches!(
                compare_values(field(column), value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Filter::Lte(column, value) => matches!(
                compare_values(field(column), value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Filter::Contains(column, needle) => field(column)
                .as_str()
                .is_some_and(|s| s.to_lowercase().contains(&needle.to_lowercase())),
            Filter::IsNull(column) => field(column).is_null(),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(row)),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    /// Column and ascending flag, applied in order.
    pub order: Vec<(String, bool)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::eq(column, value))
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order.push((column.to_string(), ascending));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, StoreError>;

    async fn insert(&self, table: &str, row: Row) -> Result<Row, StoreError>;

    async fn update(&self, table: &str, filters: &[Filter], patch: Row)
    -> Result<Vec<Row>, StoreError>;

    /// Inserts rows, or merges them into existing rows that share every
    /// `on_conflict` column.
    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Row>,
        on_conflict: &[&str],
    ) -> Result<Vec<Row>, StoreError>;

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<u64, StoreError>;

    async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64, StoreError>;
}

pub fn to_row<T: Serialize>(table: &str, value: &T) -> Result<Row, StoreError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(_) => Err(StoreError::NotAnObject(table.to_string())),
        Err(source) => Err(StoreError::Malformed {
            table: table.to_string(),
            source,
        }),
    }
}

pub fn from_row<T: DeserializeOwned>(table: &str, row: Row) -> Result<T, StoreError> {
    serde_json::from_value(Value::Object(row)).map_err(|source| StoreError::Malformed {
        table: table.to_string(),
        source,
    })
}

pub async fn fetch_all<T: DeserializeOwned>(
    store: &dyn Store,
    table: &str,
    query: &Query,
) -> Result<Vec<T>, StoreError> {
    store
        .select(table, query)
        .await?
        .into_iter()
        .map(|row| from_row(table, row))
        .collect()
}

pub async fn fetch_one<T: DeserializeOwned>(
    store: &dyn Store,
    table: &str,
    query: Query,
) -> Result<Option<T>, StoreError> {
    let rows = store.select(table, &query.limit(1)).await?;

    rows.into_iter().next().map(|row| from_row(table, row)).transpose()
}

pub async fn insert_as<T: DeserializeOwned>(
    store: &dyn Store,
    table: &str,
    row: Row,
) -> Result<T, StoreError> {
    let inserted = store.insert(table, row).await?;

    from_row(table, inserted)
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn row(value: Value) -> Row {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_filters_match_rows() {
        let guideline = row(json!({
            "vaccine_code": "MMR",
            "recommended_age_months": 12,
            "region_code": null,
            "vaccine_name": "Measles, Mumps and Rubella",
        }));

        assert!(Filter::eq("vaccine_code", "MMR").matches(&guideline));
        assert!(Filter::eq("recommended_age_months", 12.0).matches(&guideline));
        assert!(Filter::is_in("vaccine_code", ["DTAP", "MMR"]).matches(&guideline));
        assert!(!Filter::not_in("vaccine_code", ["MMR"]).matches(&guideline));
        assert!(Filter::gte("recommended_age_months", 12).matches(&guideline));
        assert!(!Filter::lte("recommended_age_months", 6).matches(&guideline));
        assert!(Filter::contains("vaccine_name", "mumps").matches(&guideline));
        assert!(Filter::is_null("region_code").matches(&guideline));
        assert!(Filter::is_null("missing_column").matches(&guideline));
        assert!(
            Filter::Or(vec![
                Filter::eq("region_code", "ON"),
                Filter::is_null("region_code"),
            ])
            .matches(&guideline)
        );
    }

    #[test]
    fn test_query_requires_every_filter() {
        let child = row(json!({"id": "c1", "parent_id": "p1"}));

        assert!(Query::new().eq("id", "c1").eq("parent_id", "p1").matches(&child));
        assert!(!Query::new().eq("id", "c1").eq("parent_id", "p2").matches(&child));
        assert!(Query::new().matches(&child));
    }

    #[test]
    fn test_to_row_rejects_non_objects() {
        assert!(matches!(
            to_row("tenants", &vec![1, 2]),
            Err(StoreError::NotAnObject(_))
        ));
    }
}

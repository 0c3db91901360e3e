use std::{cmp::Ordering, collections::HashMap};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Filter, Query, Row, Store, StoreError, compare_values, values_equal};
use crate::models::{PARENTS, SCHEDULES, TENANT_USERS, TENANTS, VACCINATION_RECORDS};

/// In-process tables with optional unique keys.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    unique_keys: HashMap<String, Vec<Vec<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The unique keys the hosted schema declares.
    pub fn with_schema_constraints() -> Self {
        Self::new()
            .with_unique(TENANTS, &["subdomain"])
            .with_unique(TENANT_USERS, &["tenant_id", "user_id"])
            .with_unique(PARENTS, &["user_id"])
            .with_unique(SCHEDULES, &["child_id", "vaccine_code", "dose_number"])
            .with_unique(VACCINATION_RECORDS, &["child_id", "vaccine_code", "dose_number"])
    }

    pub fn with_unique(mut self, table: &str, columns: &[&str]) -> Self {
        self.unique_keys
            .entry(table.to_string())
            .or_default()
            .push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub async fn seed(&self, table: &str, rows: Vec<Row>) -> Result<(), StoreError> {
        for row in rows {
            self.insert(table, row).await?;
        }

        Ok(())
    }

    pub async fn row_count(&self, table: &str) -> usize {
        self.tables.read().await.get(table).map_or(0, Vec::len)
    }

    fn violation(&self, table: &str, rows: &[Row], candidate: &Row, skip: Option<usize>) -> Option<String> {
        let keys = self.unique_keys.get(table)?;

        keys.iter().find_map(|columns| {
            let values: Vec<&Value> = columns
                .iter()
                .map(|c| candidate.get(c).unwrap_or(&Value::Null))
                .collect();

            if values.iter().any(|v| v.is_null()) {
                return None;
            }

            rows.iter()
                .enumerate()
                .filter(|(index, _)| Some(*index) != skip)
                .any(|(_, existing)| {
                    columns
                        .iter()
                        .zip(&values)
                        .all(|(c, v)| values_equal(existing.get(c).unwrap_or(&Value::Null), v))
                })
                .then(|| format!("({}) already exists", columns.join(", ")))
        })
    }
}

fn stamp(mut row: Row) -> Row {
    if row.get("id").is_none_or(Value::is_null) {
        row.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
    }
    if row.get("created_at").is_none_or(Value::is_null) {
        row.insert("created_at".to_string(), Value::String(Utc::now().to_rfc3339()));
    }

    row
}

fn merge(target: &mut Row, patch: &Row) {
    for (key, value) in patch {
        target.insert(key.clone(), value.clone());
    }
}

fn compare_rows(a: &Row, b: &Row, order: &[(String, bool)]) -> Ordering {
    for (column, ascending) in order {
        let left = a.get(column).unwrap_or(&Value::Null);
        let right = b.get(column).unwrap_or(&Value::Null);

        // nulls last
        let ordering = match (left.is_null(), right.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (false, false) => compare_values(left, right).unwrap_or(Ordering::Equal),
        };

        let ordering = if *ascending { ordering } else { ordering.reverse() };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

fn matches_all(filters: &[Filter], row: &Row) -> bool {
    filters.iter().all(|f| f.matches(row))
}

#[async_trait]
impl Store for MemoryStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, StoreError> {
        let tables = self.tables.read().await;
        let Some(rows) = tables.get(table) else {
            return Ok(Vec::new());
        };

        let mut selected: Vec<Row> = rows.iter().filter(|r| query.matches(r)).cloned().collect();
        selected.sort_by(|a, b| compare_rows(a, b, &query.order));

        Ok(selected
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, StoreError> {
        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.to_string()).or_default();
        let row = stamp(row);

        if let Some(message) = self.violation(table, rows, &row, None) {
            return Err(StoreError::Conflict {
                table: table.to_string(),
                message,
            });
        }

        rows.push(row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(table) else {
            return Ok(Vec::new());
        };

        let targets: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, r)| matches_all(filters, r))
            .map(|(index, _)| index)
            .collect();

        for &index in &targets {
            let mut candidate = rows[index].clone();
            merge(&mut candidate, &patch);

            if let Some(message) = self.violation(table, rows, &candidate, Some(index)) {
                return Err(StoreError::Conflict {
                    table: table.to_string(),
                    message,
                });
            }
        }

        Ok(targets
            .into_iter()
            .map(|index| {
                merge(&mut rows[index], &patch);
                rows[index].clone()
            })
            .collect())
    }

    async fn upsert(
        &self,
        table: &str,
        incoming: Vec<Row>,
        on_conflict: &[&str],
    ) -> Result<Vec<Row>, StoreError> {
        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.to_string()).or_default();
        let mut written = Vec::with_capacity(incoming.len());

        for row in incoming {
            let existing = rows.iter().position(|r| {
                on_conflict.iter().all(|c| {
                    values_equal(
                        r.get(*c).unwrap_or(&Value::Null),
                        row.get(*c).unwrap_or(&Value::Null),
                    )
                })
            });

            match existing {
                Some(index) => {
                    merge(&mut rows[index], &row);
                    written.push(rows[index].clone());
                }
                None => {
                    let row = stamp(row);
                    if let Some(message) = self.violation(table, rows, &row, None) {
                        return Err(StoreError::Conflict {
                            table: table.to_string(),
                            message,
                        });
                    }
                    rows.push(row.clone());
                    written.push(row);
                }
            }
        }

        Ok(written)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };

        let before = rows.len();
        rows.retain(|r| !matches_all(filters, r));

        Ok((before - rows.len()) as u64)
    }

    async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64, StoreError> {
        let tables = self.tables.read().await;

        Ok(tables
            .get(table)
            .map_or(0, |rows| rows.iter().filter(|r| matches_all(filters, r)).count()) as u64)
    }
}

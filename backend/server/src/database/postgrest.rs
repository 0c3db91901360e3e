//! Hosted database access through its PostgREST endpoint (`/rest/v1/<table>`).
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::debug;

use super::{Filter, Query, Row, Store, StoreError};

const UNIQUE_VIOLATION: &str = "23505";

pub struct PostgrestStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl PostgrestStore {
    pub fn new(project_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: format!("{}/rest/v1", project_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
        }
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{table}", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn send(&self, table: &str, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = request.send().await.map_err(|source| StoreError::Transport {
            table: table.to_string(),
            source,
        })?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let message = response.text().await.unwrap_or_default();
        debug!("{table} request failed with {status}: {message}");

        if status == StatusCode::CONFLICT || message.contains(UNIQUE_VIOLATION) {
            return Err(StoreError::Conflict {
                table: table.to_string(),
                message,
            });
        }

        Err(StoreError::Rejected {
            table: table.to_string(),
            status: status.as_u16(),
            message,
        })
    }

    async fn rows(&self, table: &str, response: Response) -> Result<Vec<Row>, StoreError> {
        let body = response.bytes().await.map_err(|source| StoreError::Transport {
            table: table.to_string(),
            source,
        })?;

        serde_json::from_slice(&body).map_err(|source| StoreError::Malformed {
            table: table.to_string(),
            source,
        })
    }
}

#[async_trait]
impl Store for PostgrestStore {
    fn backend_tag(&self) -> &'static str {
        "postgrest"
    }

    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, StoreError> {
        let request = self.request(Method::GET, table).query(&query_params(query));
        let response = self.send(table, request).await?;

        self.rows(table, response).await
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, StoreError> {
        let request = self
            .request(Method::POST, table)
            .header("Prefer", "return=representation")
            .json(&row);
        let response = self.send(table, request).await?;

        self.rows(table, response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Rejected {
                table: table.to_string(),
                status: StatusCode::OK.as_u16(),
                message: "insert returned no row".to_string(),
            })
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>, StoreError> {
        let request = self
            .request(Method::PATCH, table)
            .query(&filter_params(filters))
            .header("Prefer", "return=representation")
            .json(&patch);
        let response = self.send(table, request).await?;

        self.rows(table, response).await
    }

    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Row>,
        on_conflict: &[&str],
    ) -> Result<Vec<Row>, StoreError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let request = self
            .request(Method::POST, table)
            .query(&[("on_conflict", on_conflict.join(","))])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&rows);
        let response = self.send(table, request).await?;

        self.rows(table, response).await
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<u64, StoreError> {
        let request = self
            .request(Method::DELETE, table)
            .query(&filter_params(filters))
            .header("Prefer", "return=representation");
        let response = self.send(table, request).await?;

        Ok(self.rows(table, response).await?.len() as u64)
    }

    async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64, StoreError> {
        let mut params = filter_params(filters);
        params.push(("select".to_string(), "*".to_string()));
        params.push(("limit".to_string(), "1".to_string()));

        let request = self
            .request(Method::GET, table)
            .query(&params)
            .header("Prefer", "count=exact");
        let response = self.send(table, request).await?;

        let content_range = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        parse_total(&content_range).ok_or_else(|| StoreError::Rejected {
            table: table.to_string(),
            status: response.status().as_u16(),
            message: format!("unreadable content-range: {content_range:?}"),
        })
    }
}

/// `Content-Range: 0-9/42` or `*/0`
pub fn parse_total(content_range: &str) -> Option<u64> {
    content_range.rsplit_once('/')?.1.trim().parse().ok()
}

pub fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];
    params.extend(filter_params(&query.filters));

    if !query.order.is_empty() {
        let order = query
            .order
            .iter()
            .map(|(column, ascending)| {
                format!("{column}.{}", if *ascending { "asc" } else { "desc" })
            })
            .collect::<Vec<_>>()
            .join(",");
        params.push(("order".to_string(), order));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    if let Some(offset) = query.offset {
        params.push(("offset".to_string(), offset.to_string()));
    }

    params
}

pub fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|filter| match filter {
            Filter::Or(inner) => ("or".to_string(), format!("({})", inline_list(inner))),
            Filter::Eq(column, _)
            | Filter::In(column, _)
            | Filter::NotIn(column, _)
            | Filter::Gte(column, _)
            | Filter::Lte(column, _)
            | Filter::Contains(column, _)
            | Filter::IsNull(column) => (column.clone(), operator(filter, false)),
        })
        .collect()
}

fn inline_list(filters: &[Filter]) -> String {
    filters
        .iter()
        .map(|filter| match filter {
            Filter::Or(inner) => format!("or({})", inline_list(inner)),
            Filter::Eq(column, _)
            | Filter::In(column, _)
            | Filter::NotIn(column, _)
            | Filter::Gte(column, _)
            | Filter::Lte(column, _)
            | Filter::Contains(column, _)
            | Filter::IsNull(column) => format!("{column}.{}", operator(filter, true)),
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Operator and operand. Inside `or=(...)` string operands are quoted since
/// commas and parentheses are reserved there.
fn operator(filter: &Filter, inline: bool) -> String {
    let scalar = |value: &Value| match value {
        Value::String(s) if inline => quote(s),
        _ => encode(value),
    };

    match filter {
        Filter::Eq(_, value) => format!("eq.{}", scalar(value)),
        Filter::Gte(_, value) => format!("gte.{}", scalar(value)),
        Filter::Lte(_, value) => format!("lte.{}", scalar(value)),
        Filter::In(_, values) => format!("in.{}", list(values)),
        Filter::NotIn(_, values) => format!("not.in.{}", list(values)),
        Filter::Contains(_, needle) if inline => format!("ilike.{}", quote(&format!("*{needle}*"))),
        Filter::Contains(_, needle) => format!("ilike.*{needle}*"),
        Filter::IsNull(_) => "is.null".to_string(),
        Filter::Or(inner) => format!("or({})", inline_list(inner)),
    }
}

fn encode(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn list(values: &[Value]) -> String {
    let items: Vec<String> = values
        .iter()
        .map(|value| match value {
            Value::String(s) => quote(s),
            other => encode(other),
        })
        .collect();

    format!("({})", items.join(","))
}

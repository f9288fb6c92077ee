use crate::driver::{BackendConnection, BackendDriver, DriverError};
use async_trait::async_trait;
use pgrelay_core::{QueryResult, Row};
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgConnection, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, Postgres, Row as _, TypeInfo};
use tracing::debug;

/// PostgreSQL driver for `postgres://`, `postgresql://` and `pooled://`.
///
/// Result rows become JSON objects keyed by column name; `rowCount` is the
/// number of rows returned.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDriver;

#[async_trait]
impl BackendDriver for PostgresDriver {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn connect(&self, url: &str) -> Result<Box<dyn BackendConnection>, DriverError> {
        let conn = PgConnection::connect(url).await.map_err(classify)?;
        Ok(Box::new(PostgresConnection { conn }))
    }
}

struct PostgresConnection {
    conn: PgConnection,
}

#[async_trait]
impl BackendConnection for PostgresConnection {
    async fn query(&mut self, text: &str, params: &[Value]) -> Result<QueryResult, DriverError> {
        let mut query = sqlx::query(text);
        for param in params {
            query = bind_param(query, param);
        }
        let rows = query.fetch_all(&mut self.conn).await.map_err(classify)?;
        let rows = rows.iter().map(row_to_json).collect();
        Ok(QueryResult::from_rows(rows))
    }

    async fn close(self: Box<Self>) {
        if let Err(err) = self.conn.close().await {
            debug!("error closing postgres connection: {err}");
        }
    }
}

fn bind_param<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Number(n) => match n.as_i64() {
            Some(v) => query.bind(v),
            None => query.bind(n.as_f64()),
        },
        Value::String(v) => query.bind(v.clone()),
        other => query.bind(other.to_string()),
    }
}

fn row_to_json(row: &PgRow) -> Row {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "BOOL" => json_of(row.try_get::<Option<bool>, _>(idx)),
            "INT2" => json_of(row.try_get::<Option<i16>, _>(idx)),
            "INT4" => json_of(row.try_get::<Option<i32>, _>(idx)),
            "INT8" => json_of(row.try_get::<Option<i64>, _>(idx)),
            "FLOAT4" => json_of(row.try_get::<Option<f32>, _>(idx)),
            "FLOAT8" => json_of(row.try_get::<Option<f64>, _>(idx)),
            "JSON" | "JSONB" => row
                .try_get::<Option<Value>, _>(idx)
                .ok()
                .flatten()
                .unwrap_or(Value::Null),
            _ => json_of(row.try_get::<Option<String>, _>(idx)),
        };
        out.insert(column.name().to_string(), value);
    }
    out
}

fn json_of<T: Into<Value>>(value: Result<Option<T>, sqlx::Error>) -> Value {
    value.ok().flatten().map(Into::into).unwrap_or(Value::Null)
}

/// Statement-level failures keep the session; everything else poisons it.
fn classify(err: sqlx::Error) -> DriverError {
    match err {
        sqlx::Error::Database(_)
        | sqlx::Error::RowNotFound
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_) => DriverError::query(err.to_string()),
        other => DriverError::connection(other.to_string()),
    }
}

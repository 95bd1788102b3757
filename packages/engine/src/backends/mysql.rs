use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlRow};
use sqlx::{Column, Executor, Row, ValueRef};
use tokio::sync::OnceCell;

use crate::backend::{Backend, Session};
use crate::{LightningError, QueryResult, Value};

#[derive(Debug, Clone)]
pub struct MySqlConfig {
    pub connection_string: String,
}

pub struct MySqlBackend {
    conn: String,
    pool: OnceCell<MySqlPool>,
}

struct MySqlSession {
    conn: sqlx::pool::PoolConnection<sqlx::MySql>,
}

impl MySqlBackend {
    pub fn new(config: MySqlConfig) -> Self {
        Self {
            conn: config.connection_string,
            pool: OnceCell::const_new(),
        }
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        let cell = OnceCell::const_new();
        cell.set(pool).ok();
        Self {
            conn: String::new(),
            pool: cell,
        }
    }

    async fn pool(&self) -> Result<&MySqlPool, LightningError> {
        self.pool
            .get_or_try_init(|| async {
                MySqlPool::connect(&self.conn)
                    .await
                    .map_err(|error| LightningError::unknown(error.to_string()))
            })
            .await
    }
}

#[async_trait]
impl Backend for MySqlBackend {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, LightningError> {
        let pool = self.pool().await?;

        // Parameterless statements go over the text protocol: LOCK TABLES,
        // UNLOCK TABLES, CREATE TRIGGER and TRUNCATE are not preparable.
        if params.is_empty() {
            let rows = pool
                .fetch_all(sql)
                .await
                .map_err(|error| LightningError::unknown(error.to_string()))?;
            return rows_to_result(rows);
        }

        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_mysql(query, param);
        }
        let rows = query
            .fetch_all(pool)
            .await
            .map_err(|error| LightningError::unknown(error.to_string()))?;
        rows_to_result(rows)
    }

    async fn session(&self) -> Result<Box<dyn Session>, LightningError> {
        let pool = self.pool().await?;
        let conn = pool
            .acquire()
            .await
            .map_err(|error| LightningError::unknown(error.to_string()))?;
        Ok(Box::new(MySqlSession { conn }))
    }
}

#[async_trait]
impl Session for MySqlSession {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult, LightningError> {
        if params.is_empty() {
            let rows = (&mut *self.conn)
                .fetch_all(sql)
                .await
                .map_err(|error| LightningError::unknown(error.to_string()))?;
            return rows_to_result(rows);
        }

        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_mysql(query, param);
        }
        let rows = query
            .fetch_all(&mut *self.conn)
            .await
            .map_err(|error| LightningError::unknown(error.to_string()))?;
        rows_to_result(rows)
    }
}

fn rows_to_result(rows: Vec<MySqlRow>) -> Result<QueryResult, LightningError> {
    let columns = rows
        .first()
        .map(|row| {
            row.columns()
                .iter()
                .map(|column| column.name().to_string())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let mut out_rows = Vec::with_capacity(rows.len());
    for row in rows {
        let mut out = Vec::with_capacity(row.columns().len());
        for idx in 0..row.columns().len() {
            out.push(map_mysql_value(&row, idx)?);
        }
        out_rows.push(out);
    }
    Ok(QueryResult {
        columns,
        rows: out_rows,
    })
}

fn bind_mysql<'q>(
    query: sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments>,
    param: &'q Value,
) -> sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments> {
    match param {
        Value::Null => query.bind(Option::<i64>::None),
        Value::Integer(v) => query.bind(*v),
        Value::Unsigned(v) => query.bind(*v),
        Value::Real(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Blob(v) => query.bind(v.as_slice()),
    }
}

fn map_mysql_value(row: &MySqlRow, index: usize) -> Result<Value, LightningError> {
    if row
        .try_get_raw(index)
        .map_err(|error| LightningError::unknown(error.to_string()))?
        .is_null()
    {
        return Ok(Value::Null);
    }

    if let Ok(value) = row.try_get::<i64, _>(index) {
        return Ok(Value::Integer(value));
    }
    if let Ok(value) = row.try_get::<u64, _>(index) {
        return Ok(Value::Unsigned(value));
    }
    if let Ok(value) = row.try_get::<f64, _>(index) {
        return Ok(Value::Real(value));
    }
    // DECIMAL and temporal values are carried as their SQL text rendering;
    // the engine only ever compares or re-binds them server-side.
    if let Ok(value) = row.try_get::<sqlx::types::Decimal, _>(index) {
        return Ok(Value::Text(value.to_string()));
    }
    if let Ok(value) = row.try_get::<chrono::NaiveDateTime, _>(index) {
        return Ok(Value::Text(
            value.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        ));
    }
    if let Ok(value) = row.try_get::<chrono::DateTime<chrono::Utc>, _>(index) {
        return Ok(Value::Text(
            value.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        ));
    }
    if let Ok(value) = row.try_get::<String, _>(index) {
        return Ok(Value::Text(value));
    }
    if let Ok(value) = row.try_get::<Vec<u8>, _>(index) {
        return Ok(Value::Blob(value));
    }

    Ok(Value::Null)
}

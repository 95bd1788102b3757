#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lightning_engine::{Backend, LightningError, QueryResult, Session, Value};

/// One recorded statement, tagged with the connection it ran on.
#[derive(Debug, Clone)]
pub struct RecordedStatement {
    pub source: &'static str,
    pub sql: String,
    pub params: Vec<Value>,
}

struct Failure {
    needle: String,
    remaining: u32,
    message: String,
}

struct Inner {
    /// `(name, column_type, nullable, primary_key)` rows served for
    /// INFORMATION_SCHEMA queries.
    columns: Vec<(String, String, bool, bool)>,
    now: String,
    pk_range: (Value, Value),
    log: Mutex<Vec<RecordedStatement>>,
    failures: Mutex<Vec<Failure>>,
}

impl Inner {
    fn run(
        &self,
        source: &'static str,
        sql: &str,
        params: &[Value],
    ) -> Result<QueryResult, LightningError> {
        self.log.lock().unwrap().push(RecordedStatement {
            source,
            sql: sql.to_string(),
            params: params.to_vec(),
        });

        {
            let mut failures = self.failures.lock().unwrap();
            for failure in failures.iter_mut() {
                if failure.remaining > 0 && sql.contains(&failure.needle) {
                    failure.remaining -= 1;
                    return Err(LightningError::unknown(failure.message.clone()));
                }
            }
        }

        if sql.contains("INFORMATION_SCHEMA.COLUMNS") {
            let pk_only = sql.contains("COLUMN_KEY = 'PRI'");
            let rows = self
                .columns
                .iter()
                .filter(|(_, _, _, is_pk)| !pk_only || *is_pk)
                .map(|(name, column_type, nullable, _)| {
                    vec![
                        Value::Text(name.clone()),
                        Value::Text(column_type.clone()),
                        Value::Text(if *nullable { "YES" } else { "NO" }.to_string()),
                    ]
                })
                .collect();
            return Ok(QueryResult {
                columns: vec![
                    "COLUMN_NAME".to_string(),
                    "COLUMN_TYPE".to_string(),
                    "IS_NULLABLE".to_string(),
                ],
                rows,
            });
        }

        if sql.starts_with("SELECT NOW()") {
            return Ok(QueryResult {
                columns: vec!["NOW()".to_string()],
                rows: vec![vec![Value::Text(self.now.clone())]],
            });
        }

        if sql.starts_with("SELECT MIN(") {
            return Ok(QueryResult {
                columns: vec!["MIN".to_string(), "MAX".to_string()],
                rows: vec![vec![self.pk_range.0.clone(), self.pk_range.1.clone()]],
            });
        }

        Ok(QueryResult::default())
    }
}

/// In-memory [`Backend`] that records every statement and serves canned
/// metadata, so installation protocols can be asserted without a server.
pub struct ScriptedBackend {
    inner: Arc<Inner>,
}

pub struct ScriptedBackendBuilder {
    columns: Vec<(String, String, bool, bool)>,
    now: String,
    pk_range: (Value, Value),
}

impl ScriptedBackend {
    pub fn builder() -> ScriptedBackendBuilder {
        ScriptedBackendBuilder {
            columns: Vec::new(),
            now: "2026-08-02 10:00:00".to_string(),
            pk_range: (Value::Null, Value::Null),
        }
    }

    /// The canonical `transactions` base table used across tests.
    pub fn transactions() -> ScriptedBackendBuilder {
        Self::builder()
            .column("id", "int", false, true)
            .column("user_id", "int", false, false)
            .column("cost", "decimal(10,2)", false, false)
            .column("status", "varchar(16)", true, false)
            .column("updated_at", "timestamp", false, false)
    }

    pub fn statements(&self) -> Vec<RecordedStatement> {
        self.inner.log.lock().unwrap().clone()
    }

    pub fn statements_matching(&self, needle: &str) -> Vec<RecordedStatement> {
        self.statements()
            .into_iter()
            .filter(|entry| entry.sql.contains(needle))
            .collect()
    }

    pub fn session_statements(&self) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|entry| entry.source == "session")
            .map(|entry| entry.sql)
            .collect()
    }

    /// Makes the next `times` statements containing `needle` fail with
    /// `message`.
    pub fn fail_times(&self, needle: &str, times: u32, message: &str) {
        self.inner.failures.lock().unwrap().push(Failure {
            needle: needle.to_string(),
            remaining: times,
            message: message.to_string(),
        });
    }
}

impl ScriptedBackendBuilder {
    pub fn column(
        mut self,
        name: &str,
        column_type: &str,
        nullable: bool,
        primary_key: bool,
    ) -> Self {
        self.columns.push((
            name.to_string(),
            column_type.to_string(),
            nullable,
            primary_key,
        ));
        self
    }

    pub fn without_column(mut self, name: &str) -> Self {
        self.columns.retain(|(column, _, _, _)| column != name);
        self
    }

    pub fn pk_range(mut self, min_pk: i64, max_pk: i64) -> Self {
        self.pk_range = (Value::Integer(min_pk), Value::Integer(max_pk));
        self
    }

    /// Raw values for the MIN/MAX probe, for bounds that are not plain
    /// signed integers.
    pub fn pk_range_values(mut self, min_pk: Value, max_pk: Value) -> Self {
        self.pk_range = (min_pk, max_pk);
        self
    }

    pub fn build(self) -> Arc<ScriptedBackend> {
        Arc::new(ScriptedBackend {
            inner: Arc::new(Inner {
                columns: self.columns,
                now: self.now,
                pk_range: self.pk_range,
                log: Mutex::new(Vec::new()),
                failures: Mutex::new(Vec::new()),
            }),
        })
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, LightningError> {
        self.inner.run("pool", sql, params)
    }

    async fn session(&self) -> Result<Box<dyn Session>, LightningError> {
        Ok(Box::new(ScriptedSession {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct ScriptedSession {
    inner: Arc<Inner>,
}

#[async_trait]
impl Session for ScriptedSession {
    async fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> Result<QueryResult, LightningError> {
        self.inner.run("session", sql, params)
    }
}

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::backend::{Backend, Session};
use crate::config::EngineConfig;
use crate::error_classification::is_transient_database_error;
use crate::errors::{
    cancelled_error, missing_updated_at_error, transient_database_error, unsupported_schema_error,
};
use crate::schema::SchemaProbe;
use crate::sql::{
    duplicate_key_update, quote_ident, summary_columns, trigger_name, AggregateFunc,
    BackfillContext, TriggerOp, TriggerSet,
};
use crate::{LightningError, Value};

const CHUNK_RETRY_LIMIT: u32 = 3;
const CHUNK_RETRY_BACKOFF: Duration = Duration::from_millis(100);
const UPDATED_AT_COLUMN: &str = "updated_at";

/// High-water mark captured inside the lock window.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BackfillSnapshot {
    /// Server-side `NOW()`; rows with `updated_at <= db_now` are historical.
    pub db_now: String,
    pub min_pk: i64,
    pub max_pk: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BackfillReport {
    /// `None` when the base table had no historical rows to copy.
    pub snapshot: Option<BackfillSnapshot>,
    pub total_chunks: u64,
    pub completed_chunks: u64,
}

/// Cooperative cancellation flag, observed between chunk submissions.
/// An in-flight chunk always runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Invoked as `(completed_chunks, total_chunks)` once per completed chunk.
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Runs the lock → install-triggers → snapshot → truncate → unlock →
/// chunked-copy protocol that converges a summary table to exactness while
/// inserts continue.
pub struct BackfillCoordinator {
    backend: Arc<dyn Backend>,
    config: EngineConfig,
}

impl BackfillCoordinator {
    pub fn new(backend: Arc<dyn Backend>, config: &EngineConfig) -> Self {
        Self {
            backend,
            config: config.normalized(),
        }
    }

    pub async fn backfill(
        &self,
        ctx: &BackfillContext,
        triggers: Option<&TriggerSet>,
        on_progress: Option<ProgressCallback>,
        cancel: &CancelFlag,
    ) -> Result<BackfillReport, LightningError> {
        if cancel.is_cancelled() {
            return Err(cancelled_error("backfill"));
        }

        // Pre-flight, outside any lock.
        let probe = SchemaProbe::new(self.backend.as_ref());
        if !probe.has_column(&ctx.base_table, UPDATED_AT_COLUMN).await? {
            return Err(missing_updated_at_error(&ctx.base_table));
        }
        let pk = probe.primary_key_column(&ctx.base_table).await?;
        if !pk.is_integer() {
            return Err(unsupported_schema_error(
                &ctx.base_table,
                &format!(
                    "primary key `{}` has non-integer type `{}`",
                    pk.name, pk.column_type
                ),
            ));
        }

        let mut session = self.backend.session().await?;
        let snapshot = run_lock_window(session.as_mut(), ctx, triggers, &pk.name).await?;
        drop(session);

        let Some(snapshot) = snapshot else {
            log::info!(
                "backfill: `{}` has no historical rows; summary `{}` starts empty",
                ctx.base_table,
                ctx.summary_name
            );
            return Ok(BackfillReport {
                snapshot: None,
                total_chunks: 0,
                completed_chunks: 0,
            });
        };

        let report = self
            .run_chunks(ctx, &pk.name, &snapshot, on_progress, cancel)
            .await?;
        log::info!(
            "backfill: summary `{}` materialized ({} chunks)",
            ctx.summary_name,
            report.total_chunks
        );
        Ok(report)
    }

    async fn run_chunks(
        &self,
        ctx: &BackfillContext,
        pk_column: &str,
        snapshot: &BackfillSnapshot,
        on_progress: Option<ProgressCallback>,
        cancel: &CancelFlag,
    ) -> Result<BackfillReport, LightningError> {
        let ranges = chunk_ranges(snapshot.min_pk, snapshot.max_pk, self.config.chunk_size);
        let total = ranges.len() as u64;
        log::info!(
            "backfill: `{}` pk range [{}, {}] split into {} chunks of {}",
            ctx.base_table,
            snapshot.min_pk,
            snapshot.max_pk,
            total,
            self.config.chunk_size
        );

        let chunk_sql = Arc::new(build_chunk_insert(ctx, pk_column));
        let db_now = Arc::new(snapshot.db_now.clone());
        let semaphore = Arc::new(Semaphore::new(self.config.thread_count));
        let completed = Arc::new(AtomicU64::new(0));
        // Set when a chunk exhausts its retries, so queued chunks stand down.
        let abort = CancelFlag::new();

        let mut join_set = JoinSet::new();
        for (index, (lo, hi)) in ranges.into_iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            let backend = Arc::clone(&self.backend);
            let chunk_sql = Arc::clone(&chunk_sql);
            let db_now = Arc::clone(&db_now);
            let semaphore = Arc::clone(&semaphore);
            let completed = Arc::clone(&completed);
            let on_progress = on_progress.clone();
            let cancel = cancel.clone();
            let abort = abort.clone();

            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|error| LightningError::unknown(error.to_string()))?;
                if cancel.is_cancelled() || abort.is_cancelled() {
                    return Ok(());
                }

                let result =
                    run_chunk(backend.as_ref(), &chunk_sql, lo, hi, &db_now, index).await;
                match result {
                    Ok(()) => {
                        let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                        if let Some(callback) = &on_progress {
                            callback(done, total);
                        }
                        Ok(())
                    }
                    Err(error) => {
                        abort.cancel();
                        Err(error)
                    }
                }
            });
        }

        let mut first_error: Option<LightningError> = None;
        while let Some(joined) = join_set.join_next().await {
            let outcome =
                joined.map_err(|error| LightningError::unknown(error.to_string()))?;
            if let Err(error) = outcome {
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }
        if let Some(error) = first_error {
            return Err(error);
        }

        let completed = completed.load(Ordering::SeqCst);
        if cancel.is_cancelled() && completed != total {
            return Err(cancelled_error("backfill"));
        }

        Ok(BackfillReport {
            snapshot: Some(snapshot.clone()),
            total_chunks: total,
            completed_chunks: completed,
        })
    }
}

/// Executes the lock window on one dedicated session. `UNLOCK TABLES` runs
/// on every exit path; a failure after trigger installation drops the
/// already-installed triggers before the locks release so the window either
/// fully succeeds or leaves the system untouched.
async fn run_lock_window(
    session: &mut dyn Session,
    ctx: &BackfillContext,
    triggers: Option<&TriggerSet>,
    pk_column: &str,
) -> Result<Option<BackfillSnapshot>, LightningError> {
    session
        .execute(
            &format!(
                "LOCK TABLES {} WRITE, {} WRITE",
                quote_ident(&ctx.base_table),
                quote_ident(&ctx.summary_name)
            ),
            &[],
        )
        .await
        .map_err(|error| error.in_component("backfill lock window"))?;
    log::info!(
        "backfill: lock window open on `{}` and `{}`",
        ctx.base_table,
        ctx.summary_name
    );

    let mut installed = 0usize;
    let outcome = lock_window_body(session, ctx, triggers, pk_column, &mut installed).await;

    if outcome.is_err() && installed > 0 {
        drop_installed_triggers(session, &ctx.base_table, installed).await;
    }

    let unlock = session.execute("UNLOCK TABLES", &[]).await;
    log::info!("backfill: lock window closed on `{}`", ctx.base_table);

    let snapshot = outcome?;
    unlock.map_err(|error| error.in_component("backfill lock window"))?;
    Ok(snapshot)
}

async fn lock_window_body(
    session: &mut dyn Session,
    ctx: &BackfillContext,
    triggers: Option<&TriggerSet>,
    pk_column: &str,
    installed: &mut usize,
) -> Result<Option<BackfillSnapshot>, LightningError> {
    if let Some(triggers) = triggers {
        for statement in triggers.statements() {
            session
                .execute(statement, &[])
                .await
                .map_err(|error| error.in_component("trigger install"))?;
            *installed += 1;
        }
    }

    let now_result = session.execute("SELECT NOW()", &[]).await?;
    let db_now = now_result
        .rows
        .first()
        .and_then(|row| row.first())
        .and_then(|value| value.as_text())
        .ok_or_else(|| {
            LightningError::unknown("backfill: SELECT NOW() returned no timestamp")
        })?
        .to_string();

    let range_result = session
        .execute(
            &format!(
                "SELECT MIN({pk}), MAX({pk}) FROM {base} WHERE {updated} <= ?",
                pk = quote_ident(pk_column),
                base = quote_ident(&ctx.base_table),
                updated = quote_ident(UPDATED_AT_COLUMN)
            ),
            &[Value::Text(db_now.clone())],
        )
        .await?;
    let bounds = range_result.rows.first().map(|row| row.as_slice());
    let (min_pk, max_pk) = match bounds {
        Some([min, max]) => (
            snapshot_bound(min, &ctx.base_table)?,
            snapshot_bound(max, &ctx.base_table)?,
        ),
        _ => (None, None),
    };

    session
        .execute(
            &format!("TRUNCATE TABLE {}", quote_ident(&ctx.summary_name)),
            &[],
        )
        .await?;

    match (min_pk, max_pk) {
        (Some(min_pk), Some(max_pk)) => Ok(Some(BackfillSnapshot {
            db_now,
            min_pk,
            max_pk,
        })),
        _ => Ok(None),
    }
}

/// `NULL` means the base table has no historical rows. A non-NULL value
/// that does not fit `i64` must fail loudly: falling through to the
/// empty-table path would wipe a summary whose base table has rows.
fn snapshot_bound(value: &Value, table: &str) -> Result<Option<i64>, LightningError> {
    match value {
        Value::Null => Ok(None),
        other => match other.as_i64() {
            Some(bound) => Ok(Some(bound)),
            None => Err(unsupported_schema_error(
                table,
                "primary key values exceed the signed 64-bit range",
            )),
        },
    }
}

async fn drop_installed_triggers(session: &mut dyn Session, base_table: &str, installed: usize) {
    let ops = [TriggerOp::Insert, TriggerOp::Update, TriggerOp::Delete];
    for op in ops.iter().take(installed) {
        let name = trigger_name(base_table, *op);
        if let Err(error) = session
            .execute(
                &format!("DROP TRIGGER IF EXISTS {}", quote_ident(&name)),
                &[],
            )
            .await
        {
            log::warn!(
                "backfill: failed to drop trigger `{name}` during rollback: {}",
                error.description
            );
        }
    }
}

async fn run_chunk(
    backend: &dyn Backend,
    sql: &str,
    lo: i64,
    hi: i64,
    db_now: &str,
    index: usize,
) -> Result<(), LightningError> {
    let params = [
        Value::Integer(lo),
        Value::Integer(hi),
        Value::Text(db_now.to_string()),
    ];
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match backend.execute(sql, &params).await {
            Ok(_) => return Ok(()),
            Err(error) if attempt < CHUNK_RETRY_LIMIT && is_transient_database_error(&error) => {
                log::warn!(
                    "backfill chunk #{index}: transient failure on attempt {attempt}: {}",
                    error.description
                );
                tokio::time::sleep(CHUNK_RETRY_BACKOFF * attempt).await;
            }
            Err(error) => {
                return Err(transient_database_error(
                    &format!("backfill chunk #{index}"),
                    &error.description,
                ))
            }
        }
    }
}

/// Contiguous inclusive pk ranges of `chunk_size`, covering `[min_pk, max_pk]`.
fn chunk_ranges(min_pk: i64, max_pk: i64, chunk_size: u64) -> Vec<(i64, i64)> {
    let size = i64::try_from(chunk_size).unwrap_or(i64::MAX).max(1);
    let mut ranges = Vec::new();
    let mut lo = min_pk;
    while lo <= max_pk {
        let hi = lo.saturating_add(size - 1).min(max_pk);
        ranges.push((lo, hi));
        if hi == i64::MAX {
            break;
        }
        lo = hi + 1;
    }
    ranges
}

/// One chunk's `INSERT … SELECT` upsert. Parameters: pk lower bound, pk
/// upper bound, snapshot timestamp.
fn build_chunk_insert(ctx: &BackfillContext, pk_column: &str) -> String {
    let columns = summary_columns(&ctx.group_by, &ctx.aggregates)
        .iter()
        .map(|column| quote_ident(column))
        .collect::<Vec<_>>()
        .join(", ");

    let mut select_items = Vec::new();
    if ctx.group_by.is_empty() {
        select_items.push("1".to_string());
    } else {
        for key in &ctx.group_by {
            select_items.push(quote_ident(key));
        }
    }
    for aggregate in &ctx.aggregates {
        match (&aggregate.func, &aggregate.column) {
            (AggregateFunc::Sum, Some(column)) => {
                select_items.push(format!("SUM({})", quote_ident(column)))
            }
            _ => select_items.push("COUNT(*)".to_string()),
        }
    }

    let mut predicates = Vec::new();
    if let Some(where_text) = &ctx.where_text {
        predicates.push(format!("({where_text})"));
    }
    predicates.push(format!("{} BETWEEN ? AND ?", quote_ident(pk_column)));
    predicates.push(format!("{} <= ?", quote_ident(UPDATED_AT_COLUMN)));

    let group_by = if ctx.group_by.is_empty() {
        String::new()
    } else {
        format!(
            " GROUP BY {}",
            ctx.group_by
                .iter()
                .map(|key| quote_ident(key))
                .collect::<Vec<_>>()
                .join(", ")
        )
    };

    format!(
        "INSERT INTO {summary} ({columns}) SELECT {select} FROM {base} WHERE {predicates}{group_by} ON DUPLICATE KEY UPDATE {update}",
        summary = quote_ident(&ctx.summary_name),
        columns = columns,
        select = select_items.join(", "),
        base = quote_ident(&ctx.base_table),
        predicates = predicates.join(" AND "),
        group_by = group_by,
        update = duplicate_key_update(&ctx.aggregates)
    )
}

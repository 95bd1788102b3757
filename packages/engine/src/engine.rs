use std::sync::Arc;

use crate::backend::Backend;
use crate::backfill::{BackfillCoordinator, BackfillReport, CancelFlag, ProgressCallback};
use crate::config::EngineConfig;
use crate::schema::SchemaProbe;
use crate::sql::{analyze, synthesize, Artifacts};
use crate::LightningError;

pub struct BootArgs {
    pub backend: Arc<dyn Backend>,
    pub config: EngineConfig,
}

pub fn boot(args: BootArgs) -> Engine {
    Engine {
        backend: args.backend,
        config: args.config,
    }
}

/// Options for [`Engine::apply`].
#[derive(Clone, Default)]
pub struct ApplyOptions {
    pub on_progress: Option<ProgressCallback>,
    pub cancel: CancelFlag,
}

/// Façade wiring the analyzer, schema probe, synthesizer and backfill
/// coordinator into a `generate` + `apply` pair.
pub struct Engine {
    backend: Arc<dyn Backend>,
    config: EngineConfig,
}

impl Engine {
    /// Analyzes the query against live schema metadata and synthesizes the
    /// artifact bundle. No database side effects beyond metadata reads.
    pub async fn generate(
        &self,
        sql: &str,
        summary_name: Option<&str>,
    ) -> Result<Artifacts, LightningError> {
        let analyzed = analyze(sql)?;

        let mut wanted = analyzed.group_by.clone();
        for aggregate in &analyzed.aggregates {
            if let Some(column) = &aggregate.column {
                if !wanted.iter().any(|seen| seen.eq_ignore_ascii_case(column)) {
                    wanted.push(column.clone());
                }
            }
        }
        let probe = SchemaProbe::new(self.backend.as_ref());
        let profiles = probe
            .column_profiles(&analyzed.base_table, &wanted)
            .await?;

        let artifacts = synthesize(&analyzed, &profiles, summary_name)?;
        log::debug!(
            "generate: `{}` -> summary `{}`",
            analyzed.base_table,
            artifacts.summary_name
        );
        Ok(artifacts)
    }

    /// Creates the summary table, installs the triggers and backfills
    /// historical rows until the summary is an exact materialization.
    pub async fn apply(
        &self,
        artifacts: &Artifacts,
        options: ApplyOptions,
    ) -> Result<BackfillReport, LightningError> {
        self.backend
            .execute(&artifacts.summary_ddl, &[])
            .await
            .map_err(|error| error.in_component("summary ddl"))?;

        let coordinator = BackfillCoordinator::new(Arc::clone(&self.backend), &self.config);
        coordinator
            .backfill(
                &artifacts.backfill,
                Some(&artifacts.triggers),
                options.on_progress,
                &options.cancel,
            )
            .await
    }
}

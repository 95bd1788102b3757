use crate::errors::missing_column_error;
use crate::schema::ColumnProfile;
use crate::sql::analyzer::{Aggregate, AggregateFunc, AnalyzedQuery};
use crate::sql::ast_utils::quote_ident;
use crate::sql::rewrite::{prefix_predicate, RowImage};
use crate::LightningError;

/// Synthetic key column used when the query has no GROUP BY, so the summary
/// always holds exactly one row.
pub const SYNTHETIC_KEY: &str = "summary_id";

/// The three row-level triggers that keep a summary current.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TriggerSet {
    pub insert: String,
    pub update: String,
    pub delete: String,
}

impl TriggerSet {
    pub fn statements(&self) -> [&str; 3] {
        [&self.insert, &self.update, &self.delete]
    }
}

/// Everything the coordinator needs to backfill a summary table.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BackfillContext {
    pub base_table: String,
    pub summary_name: String,
    pub group_by: Vec<String>,
    pub aggregates: Vec<Aggregate>,
    pub where_text: Option<String>,
}

/// The generated artifact bundle for one accepted query.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Artifacts {
    pub summary_name: String,
    pub summary_ddl: String,
    pub triggers: TriggerSet,
    pub backfill: BackfillContext,
}

impl Artifacts {
    /// Human-readable rendering of the generated SQL, for display surfaces.
    pub fn preview(&self) -> String {
        format!(
            "-- summary table\n{};\n\n-- insert trigger\n{};\n\n-- update trigger\n{};\n\n-- delete trigger\n{};\n",
            self.summary_ddl, self.triggers.insert, self.triggers.update, self.triggers.delete
        )
    }
}

/// Builds the summary DDL and the three delta triggers from an analyzed
/// query plus the base-table column profiles it references.
pub fn synthesize(
    analyzed: &AnalyzedQuery,
    profiles: &[ColumnProfile],
    summary_name_override: Option<&str>,
) -> Result<Artifacts, LightningError> {
    let summary_name = match summary_name_override {
        Some(name) => name.to_string(),
        None => summary_table_name(&analyzed.base_table, &analyzed.group_by),
    };

    let summary_ddl = summary_ddl(analyzed, profiles, &summary_name)?;
    let triggers = TriggerSet {
        insert: trigger_statement(analyzed, &summary_name, TriggerOp::Insert)?,
        update: trigger_statement(analyzed, &summary_name, TriggerOp::Update)?,
        delete: trigger_statement(analyzed, &summary_name, TriggerOp::Delete)?,
    };

    Ok(Artifacts {
        summary_name: summary_name.clone(),
        summary_ddl,
        triggers,
        backfill: BackfillContext {
            base_table: analyzed.base_table.clone(),
            summary_name,
            group_by: analyzed.group_by.clone(),
            aggregates: analyzed.aggregates.clone(),
            where_text: analyzed.where_text.clone(),
        },
    })
}

/// `snake_case(base + "_" + group_cols.join("_") + "_summary")`, the group
/// segment dropped when the query has no GROUP BY.
pub fn summary_table_name(base_table: &str, group_by: &[String]) -> String {
    let mut raw = base_table.to_string();
    if !group_by.is_empty() {
        raw.push('_');
        raw.push_str(&group_by.join("_"));
    }
    raw.push_str("_summary");
    snake_case(&raw)
}

/// `<base>_after_<op>_lightning`, sanitized to `[A-Za-z0-9_]`.
pub fn trigger_name(base_table: &str, op: TriggerOp) -> String {
    format!("{}_after_{}_lightning", sanitize_identifier(base_table), op.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOp {
    Insert,
    Update,
    Delete,
}

impl TriggerOp {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerOp::Insert => "insert",
            TriggerOp::Update => "update",
            TriggerOp::Delete => "delete",
        }
    }
}

fn snake_case(input: &str) -> String {
    input
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn sanitize_identifier(input: &str) -> String {
    input
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Summary-table column names: the key tuple followed by one column per
/// aggregate alias.
pub(crate) fn summary_columns(group_by: &[String], aggregates: &[Aggregate]) -> Vec<String> {
    let mut columns = key_columns(group_by);
    columns.extend(aggregates.iter().map(|agg| agg.alias.clone()));
    columns
}

pub(crate) fn key_columns(group_by: &[String]) -> Vec<String> {
    if group_by.is_empty() {
        vec![SYNTHETIC_KEY.to_string()]
    } else {
        group_by.to_vec()
    }
}

/// `alias = alias + VALUES(alias)` for every aggregate column.
pub(crate) fn duplicate_key_update(aggregates: &[Aggregate]) -> String {
    aggregates
        .iter()
        .map(|agg| {
            let column = quote_ident(&agg.alias);
            format!("{column} = {column} + VALUES({column})")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn summary_ddl(
    analyzed: &AnalyzedQuery,
    profiles: &[ColumnProfile],
    summary_name: &str,
) -> Result<String, LightningError> {
    let mut lines = Vec::new();

    if analyzed.group_by.is_empty() {
        lines.push(format!(
            "    {} tinyint unsigned NOT NULL DEFAULT 1",
            quote_ident(SYNTHETIC_KEY)
        ));
    } else {
        for key in &analyzed.group_by {
            let profile = find_profile(profiles, &analyzed.base_table, key)?;
            let nullability = if profile.nullable { "" } else { " NOT NULL" };
            lines.push(format!(
                "    {} {}{}",
                quote_ident(key),
                profile.column_type,
                nullability
            ));
        }
    }

    for aggregate in &analyzed.aggregates {
        let column_type = match (&aggregate.func, &aggregate.column) {
            (AggregateFunc::Sum, Some(column)) => {
                find_profile(profiles, &analyzed.base_table, column)?
                    .column_type
                    .clone()
            }
            _ => "bigint unsigned".to_string(),
        };
        lines.push(format!(
            "    {} {} NOT NULL DEFAULT 0",
            quote_ident(&aggregate.alias),
            column_type
        ));
    }

    let primary_key = key_columns(&analyzed.group_by)
        .iter()
        .map(|key| quote_ident(key))
        .collect::<Vec<_>>()
        .join(", ");
    lines.push(format!("    PRIMARY KEY ({primary_key})"));

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci",
        quote_ident(summary_name),
        lines.join(",\n")
    ))
}

fn trigger_statement(
    analyzed: &AnalyzedQuery,
    summary_name: &str,
    op: TriggerOp,
) -> Result<String, LightningError> {
    // The negative delta is applied before the positive one so an UPDATE
    // that moves a row between groups passes through clean intermediate
    // totals.
    let upserts = match op {
        TriggerOp::Insert => vec![guarded_upsert(analyzed, summary_name, RowImage::New, false)?],
        TriggerOp::Delete => vec![guarded_upsert(analyzed, summary_name, RowImage::Old, true)?],
        TriggerOp::Update => vec![
            guarded_upsert(analyzed, summary_name, RowImage::Old, true)?,
            guarded_upsert(analyzed, summary_name, RowImage::New, false)?,
        ],
    };

    Ok(format!(
        "CREATE TRIGGER {} AFTER {} ON {} FOR EACH ROW\nBEGIN\n{}\nEND",
        quote_ident(&trigger_name(&analyzed.base_table, op)),
        op.as_str().to_ascii_uppercase(),
        quote_ident(&analyzed.base_table),
        upserts.join("\n")
    ))
}

fn guarded_upsert(
    analyzed: &AnalyzedQuery,
    summary_name: &str,
    image: RowImage,
    negate: bool,
) -> Result<String, LightningError> {
    let predicate = match &analyzed.where_text {
        Some(text) => prefix_predicate(text, image)?,
        None => "1".to_string(),
    };

    let mut values = Vec::new();
    if analyzed.group_by.is_empty() {
        values.push("1".to_string());
    } else {
        for key in &analyzed.group_by {
            values.push(format!("{}.{}", image.as_str(), quote_ident(key)));
        }
    }
    for aggregate in &analyzed.aggregates {
        values.push(delta_expression(aggregate, image, negate));
    }

    let columns = summary_columns(&analyzed.group_by, &analyzed.aggregates)
        .iter()
        .map(|column| quote_ident(column))
        .collect::<Vec<_>>()
        .join(", ");

    Ok(format!(
        "    IF {} THEN\n        INSERT INTO {} ({})\n        VALUES ({})\n        ON DUPLICATE KEY UPDATE {};\n    END IF;",
        predicate,
        quote_ident(summary_name),
        columns,
        values.join(", "),
        duplicate_key_update(&analyzed.aggregates)
    ))
}

fn delta_expression(aggregate: &Aggregate, image: RowImage, negate: bool) -> String {
    match (&aggregate.func, &aggregate.column) {
        (AggregateFunc::Sum, Some(column)) => {
            let source = format!("{}.{}", image.as_str(), quote_ident(column));
            if negate {
                format!("-({source})")
            } else {
                source
            }
        }
        _ => {
            if negate {
                "-1".to_string()
            } else {
                "1".to_string()
            }
        }
    }
}

fn find_profile<'a>(
    profiles: &'a [ColumnProfile],
    table: &str,
    column: &str,
) -> Result<&'a ColumnProfile, LightningError> {
    profiles
        .iter()
        .find(|profile| profile.name.eq_ignore_ascii_case(column))
        .ok_or_else(|| missing_column_error(table, column))
}

#[cfg(test)]
mod tests {
    use super::{summary_table_name, synthesize, trigger_name, TriggerOp};
    use crate::schema::ColumnProfile;
    use crate::sql::analyzer::analyze;

    fn transactions_profiles() -> Vec<ColumnProfile> {
        vec![
            ColumnProfile {
                name: "user_id".to_string(),
                column_type: "int".to_string(),
                nullable: false,
            },
            ColumnProfile {
                name: "cost".to_string(),
                column_type: "decimal(10,2)".to_string(),
                nullable: false,
            },
        ]
    }

    #[test]
    fn summary_name_follows_the_naming_rule() {
        assert_eq!(
            summary_table_name("transactions", &["user_id".to_string()]),
            "transactions_user_id_summary"
        );
        assert_eq!(summary_table_name("transactions", &[]), "transactions_summary");
        assert_eq!(
            summary_table_name("Orders-2024", &["Region Code".to_string()]),
            "orders_2024_region_code_summary"
        );
    }

    #[test]
    fn trigger_names_are_sanitized() {
        assert_eq!(
            trigger_name("transactions", TriggerOp::Insert),
            "transactions_after_insert_lightning"
        );
        assert_eq!(
            trigger_name("weird table!", TriggerOp::Delete),
            "weird_table__after_delete_lightning"
        );
    }

    #[test]
    fn grouped_summary_ddl_copies_base_types() {
        let analyzed =
            analyze("SELECT user_id, SUM(cost) AS total_cost FROM transactions GROUP BY user_id")
                .unwrap();
        let artifacts = synthesize(&analyzed, &transactions_profiles(), None).unwrap();
        assert_eq!(
            artifacts.summary_ddl,
            "CREATE TABLE IF NOT EXISTS `transactions_user_id_summary` (\n\
             \x20   `user_id` int NOT NULL,\n\
             \x20   `total_cost` decimal(10,2) NOT NULL DEFAULT 0,\n\
             \x20   PRIMARY KEY (`user_id`)\n\
             ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci"
        );
    }

    #[test]
    fn ungrouped_summary_ddl_uses_the_synthetic_key() {
        let analyzed = analyze("SELECT COUNT(*) AS row_count FROM transactions").unwrap();
        let artifacts = synthesize(&analyzed, &[], None).unwrap();
        assert_eq!(
            artifacts.summary_ddl,
            "CREATE TABLE IF NOT EXISTS `transactions_summary` (\n\
             \x20   `summary_id` tinyint unsigned NOT NULL DEFAULT 1,\n\
             \x20   `row_count` bigint unsigned NOT NULL DEFAULT 0,\n\
             \x20   PRIMARY KEY (`summary_id`)\n\
             ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci"
        );
    }

    #[test]
    fn nullable_key_columns_stay_nullable() {
        let analyzed = analyze("SELECT region, COUNT(*) FROM t GROUP BY region").unwrap();
        let profiles = vec![ColumnProfile {
            name: "region".to_string(),
            column_type: "varchar(32)".to_string(),
            nullable: true,
        }];
        let artifacts = synthesize(&analyzed, &profiles, None).unwrap();
        assert!(artifacts.summary_ddl.contains("`region` varchar(32),"));
        assert!(!artifacts.summary_ddl.contains("`region` varchar(32) NOT NULL"));
    }

    #[test]
    fn insert_trigger_applies_positive_new_image_deltas() {
        let analyzed =
            analyze("SELECT user_id, SUM(cost) AS total_cost FROM transactions GROUP BY user_id")
                .unwrap();
        let artifacts = synthesize(&analyzed, &transactions_profiles(), None).unwrap();
        assert_eq!(
            artifacts.triggers.insert,
            "CREATE TRIGGER `transactions_after_insert_lightning` AFTER INSERT ON `transactions` FOR EACH ROW\n\
             BEGIN\n\
             \x20   IF 1 THEN\n\
             \x20       INSERT INTO `transactions_user_id_summary` (`user_id`, `total_cost`)\n\
             \x20       VALUES (NEW.`user_id`, NEW.`cost`)\n\
             \x20       ON DUPLICATE KEY UPDATE `total_cost` = `total_cost` + VALUES(`total_cost`);\n\
             \x20   END IF;\n\
             END"
        );
    }

    #[test]
    fn delete_trigger_applies_negative_old_image_deltas() {
        let analyzed =
            analyze("SELECT user_id, SUM(cost) AS total_cost FROM transactions GROUP BY user_id")
                .unwrap();
        let artifacts = synthesize(&analyzed, &transactions_profiles(), None).unwrap();
        assert!(artifacts
            .triggers
            .delete
            .contains("AFTER DELETE ON `transactions` FOR EACH ROW"));
        assert!(artifacts
            .triggers
            .delete
            .contains("VALUES (OLD.`user_id`, -(OLD.`cost`))"));
    }

    #[test]
    fn update_trigger_applies_old_negative_then_new_positive() {
        let analyzed = analyze(
            "SELECT user_id, SUM(cost) AS total_cost FROM transactions WHERE status = 'paid' GROUP BY user_id",
        )
        .unwrap();
        let artifacts = synthesize(&analyzed, &transactions_profiles(), None).unwrap();
        let update = &artifacts.triggers.update;

        let old_upsert = update
            .find("VALUES (OLD.`user_id`, -(OLD.`cost`))")
            .expect("old-image upsert present");
        let new_upsert = update
            .find("VALUES (NEW.`user_id`, NEW.`cost`)")
            .expect("new-image upsert present");
        assert!(old_upsert < new_upsert, "old delta must be applied first");

        assert!(update.contains("IF OLD.status = 'paid' THEN"));
        assert!(update.contains("IF NEW.status = 'paid' THEN"));
    }

    #[test]
    fn count_deltas_are_unit_increments() {
        let analyzed = analyze("SELECT COUNT(*) AS row_count FROM transactions").unwrap();
        let artifacts = synthesize(&analyzed, &[], None).unwrap();
        assert!(artifacts
            .triggers
            .insert
            .contains("INSERT INTO `transactions_summary` (`summary_id`, `row_count`)"));
        assert!(artifacts.triggers.insert.contains("VALUES (1, 1)"));
        assert!(artifacts.triggers.delete.contains("VALUES (1, -1)"));
    }

    #[test]
    fn override_replaces_the_derived_summary_name() {
        let analyzed = analyze("SELECT COUNT(*) FROM transactions").unwrap();
        let artifacts = synthesize(&analyzed, &[], Some("txn_totals")).unwrap();
        assert_eq!(artifacts.summary_name, "txn_totals");
        assert!(artifacts.summary_ddl.contains("`txn_totals`"));
        assert!(artifacts.triggers.insert.contains("INSERT INTO `txn_totals`"));
    }

    #[test]
    fn preview_concatenates_all_artifacts() {
        let analyzed = analyze("SELECT COUNT(*) FROM transactions").unwrap();
        let artifacts = synthesize(&analyzed, &[], None).unwrap();
        let preview = artifacts.preview();
        assert!(preview.contains("-- summary table"));
        assert!(preview.contains("-- insert trigger"));
        assert!(preview.contains("-- update trigger"));
        assert!(preview.contains("-- delete trigger"));
        assert!(preview.contains(&artifacts.summary_ddl));
    }
}

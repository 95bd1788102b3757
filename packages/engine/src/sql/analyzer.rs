use sqlparser::ast::{
    Expr, Function, FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr, SelectItem,
    TableFactor,
};

use crate::errors::invalid_query_error;
use crate::sql::ast_utils::{bare_column_name, object_name_ident, parse_single_select};
use crate::LightningError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AggregateFunc {
    Sum,
    Count,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Aggregate {
    pub func: AggregateFunc,
    /// Source column; `None` exactly for `COUNT(*)`.
    pub column: Option<String>,
    pub alias: String,
}

/// The validated shape of an accepted aggregation query.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AnalyzedQuery {
    pub base_table: String,
    /// Verbatim predicate text between `WHERE` and `GROUP BY` / end of statement.
    pub where_text: Option<String>,
    pub group_by: Vec<String>,
    pub aggregates: Vec<Aggregate>,
}

pub fn analyze(sql: &str) -> Result<AnalyzedQuery, LightningError> {
    let sql = sql.trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    let select = parse_single_select(sql)?;

    if select.distinct.is_some() {
        return Err(invalid_query_error("DISTINCT is not supported"));
    }
    if select.top.is_some() {
        return Err(invalid_query_error("TOP is not supported"));
    }
    if select.into.is_some() {
        return Err(invalid_query_error("SELECT INTO is not supported"));
    }
    if !select.lateral_views.is_empty() {
        return Err(invalid_query_error("LATERAL VIEW is not supported"));
    }
    if select.having.is_some() {
        return Err(invalid_query_error("HAVING is not supported"));
    }
    if select.qualify.is_some() || !select.named_window.is_empty() {
        return Err(invalid_query_error("window clauses are not supported"));
    }
    if !select.cluster_by.is_empty() || !select.distribute_by.is_empty() || !select.sort_by.is_empty()
    {
        return Err(invalid_query_error("distribution clauses are not supported"));
    }

    let base_table = base_table_name(&select.from)?;
    let group_by = group_by_columns(&select.group_by)?;

    let mut aggregates = Vec::new();
    for item in &select.projection {
        match item {
            SelectItem::UnnamedExpr(expr) => {
                classify_select_item(expr, None, &group_by, &mut aggregates)?
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                classify_select_item(expr, Some(alias.value.clone()), &group_by, &mut aggregates)?
            }
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(_, _) => {
                return Err(invalid_query_error("wildcard select items are not supported"))
            }
        }
    }

    if aggregates.is_empty() {
        return Err(invalid_query_error(
            "at least one aggregate (SUM(col) or COUNT(*)) is required",
        ));
    }

    let where_text = match &select.selection {
        Some(_) => extract_where_text(sql),
        None => None,
    };

    Ok(AnalyzedQuery {
        base_table,
        where_text,
        group_by,
        aggregates,
    })
}

fn base_table_name(
    from: &[sqlparser::ast::TableWithJoins],
) -> Result<String, LightningError> {
    let [table] = from else {
        return Err(invalid_query_error("exactly one FROM table is required"));
    };
    if !table.joins.is_empty() {
        return Err(invalid_query_error("joins are not supported"));
    }
    match &table.relation {
        TableFactor::Table { name, args: None, .. } => object_name_ident(name)
            .map(|ident| ident.value.clone())
            .ok_or_else(|| invalid_query_error("FROM must name a base table")),
        _ => Err(invalid_query_error(
            "FROM must be a base table (no subqueries or table functions)",
        )),
    }
}

fn group_by_columns(group_by: &GroupByExpr) -> Result<Vec<String>, LightningError> {
    match group_by {
        GroupByExpr::Expressions(exprs, modifiers) => {
            if !modifiers.is_empty() {
                return Err(invalid_query_error("GROUP BY modifiers are not supported"));
            }
            exprs
                .iter()
                .map(|expr| {
                    bare_column_name(expr).ok_or_else(|| {
                        invalid_query_error("GROUP BY items must be bare columns")
                    })
                })
                .collect()
        }
        GroupByExpr::All(_) => Err(invalid_query_error("GROUP BY ALL is not supported")),
    }
}

fn classify_select_item(
    expr: &Expr,
    alias: Option<String>,
    group_by: &[String],
    aggregates: &mut Vec<Aggregate>,
) -> Result<(), LightningError> {
    if let Expr::Function(function) = expr {
        aggregates.push(classify_aggregate(function, alias)?);
        return Ok(());
    }

    let Some(column) = bare_column_name(expr) else {
        return Err(invalid_query_error(
            "select items must be bare columns or supported aggregates",
        ));
    };
    if !group_by
        .iter()
        .any(|key| key.eq_ignore_ascii_case(&column))
    {
        return Err(invalid_query_error(&format!(
            "selected column `{column}` must appear in GROUP BY"
        )));
    }
    Ok(())
}

fn classify_aggregate(
    function: &Function,
    alias: Option<String>,
) -> Result<Aggregate, LightningError> {
    if function.over.is_some() {
        return Err(invalid_query_error("window functions are not supported"));
    }
    if function.filter.is_some()
        || function.null_treatment.is_some()
        || !function.within_group.is_empty()
        || function.uses_odbc_syntax
        || !matches!(function.parameters, FunctionArguments::None)
    {
        return Err(invalid_query_error("unsupported aggregate syntax"));
    }

    let args = match &function.args {
        FunctionArguments::List(list) => {
            if list.duplicate_treatment.is_some() {
                return Err(invalid_query_error(
                    "DISTINCT / ALL inside aggregates is not supported",
                ));
            }
            if !list.clauses.is_empty() {
                return Err(invalid_query_error("unsupported aggregate syntax"));
            }
            &list.args
        }
        _ => return Err(invalid_query_error("unsupported aggregate syntax")),
    };

    let is_sum = crate::sql::ast_utils::object_name_matches(&function.name, "sum");
    let is_count = crate::sql::ast_utils::object_name_matches(&function.name, "count");

    if is_sum {
        let [FunctionArg::Unnamed(FunctionArgExpr::Expr(arg))] = args.as_slice() else {
            return Err(invalid_query_error("SUM takes exactly one bare column"));
        };
        let Some(column) = bare_column_name(arg) else {
            return Err(invalid_query_error(
                "SUM over expressions is not supported; use a bare column",
            ));
        };
        let alias = alias.unwrap_or_else(|| format!("sum_{column}"));
        return Ok(Aggregate {
            func: AggregateFunc::Sum,
            column: Some(column),
            alias,
        });
    }

    if is_count {
        let [FunctionArg::Unnamed(FunctionArgExpr::Wildcard)] = args.as_slice() else {
            return Err(invalid_query_error("only COUNT(*) is supported"));
        };
        let alias = alias.unwrap_or_else(|| "row_count".to_string());
        return Ok(Aggregate {
            func: AggregateFunc::Count,
            column: None,
            alias,
        });
    }

    Err(invalid_query_error(&format!(
        "unsupported aggregate function `{}`",
        function.name
    )))
}

/// Returns the verbatim text between `WHERE` and `GROUP BY` (or end of
/// statement), skipping string literals and quoted identifiers.
pub(crate) fn extract_where_text(sql: &str) -> Option<String> {
    let spans = unquoted_word_spans(sql);
    let where_idx = spans
        .iter()
        .position(|&(start, end)| sql[start..end].eq_ignore_ascii_case("where"))?;
    let (_, where_end) = spans[where_idx];

    let mut end = sql.len();
    let rest = &spans[where_idx + 1..];
    for (idx, &(start, word_end)) in rest.iter().enumerate() {
        if sql[start..word_end].eq_ignore_ascii_case("group") {
            if let Some(&(by_start, by_end)) = rest.get(idx + 1) {
                if sql[by_start..by_end].eq_ignore_ascii_case("by") {
                    end = start;
                    break;
                }
            }
        }
    }

    let text = sql[where_end..end].trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Word spans outside single-quoted / double-quoted strings and backticked
/// identifiers. Backslash escapes inside strings are honored.
fn unquoted_word_spans(sql: &str) -> Vec<(usize, usize)> {
    let bytes = sql.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\\' {
                        i += 2;
                        continue;
                    }
                    if bytes[i] == quote {
                        i += 1;
                        break;
                    }
                    i += 1;
                }
            }
            b'`' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'`' {
                    i += 1;
                }
                i += 1;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                spans.push((start, i));
            }
            _ => i += 1,
        }
    }
    spans
}

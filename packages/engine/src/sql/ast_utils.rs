use sqlparser::ast::{
    Expr, Ident, ObjectName, ObjectNamePart, Select, SelectItem, SetExpr, Statement,
};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;

use crate::errors::invalid_query_error;
use crate::LightningError;

pub(crate) fn object_name_matches(name: &ObjectName, target: &str) -> bool {
    name.0
        .last()
        .and_then(ObjectNamePart::as_ident)
        .map(|ident| ident.value.eq_ignore_ascii_case(target))
        .unwrap_or(false)
}

pub(crate) fn object_name_ident(name: &ObjectName) -> Option<&Ident> {
    name.0.last().and_then(ObjectNamePart::as_ident)
}

/// Parses exactly one statement and unwraps it down to the plain SELECT.
pub(crate) fn parse_single_select(sql: &str) -> Result<Select, LightningError> {
    let mut statements = Parser::parse_sql(&MySqlDialect {}, sql)
        .map_err(|error| invalid_query_error(&error.to_string()))?;
    if statements.len() != 1 {
        return Err(invalid_query_error("expected a single SELECT statement"));
    }
    let query = match statements.remove(0) {
        Statement::Query(query) => *query,
        _ => return Err(invalid_query_error("expected a SELECT statement")),
    };

    if query.with.is_some() {
        return Err(invalid_query_error("WITH / common table expressions are not supported"));
    }
    if query.order_by.is_some() {
        return Err(invalid_query_error("ORDER BY is not supported"));
    }
    if query.limit_clause.is_some() || query.fetch.is_some() {
        return Err(invalid_query_error("LIMIT / FETCH is not supported"));
    }
    if !query.locks.is_empty() {
        return Err(invalid_query_error("locking clauses are not supported"));
    }

    match *query.body {
        SetExpr::Select(select) => Ok(*select),
        _ => Err(invalid_query_error(
            "set operations and VALUES bodies are not supported",
        )),
    }
}

/// Parses a bare predicate (the text that followed `WHERE`) by wrapping it
/// in a one-item SELECT.
pub(crate) fn parse_predicate(text: &str) -> Result<Expr, LightningError> {
    let wrapper_sql = format!("SELECT {text}");
    let mut select = parse_single_select(&wrapper_sql)
        .map_err(|error| invalid_query_error(&format!("WHERE predicate: {}", error.description)))?;
    if select.projection.len() != 1 {
        return Err(invalid_query_error("WHERE predicate: expected one expression"));
    }
    match select.projection.remove(0) {
        SelectItem::UnnamedExpr(expr) => Ok(expr),
        _ => Err(invalid_query_error("WHERE predicate: expected one expression")),
    }
}

/// A bare or table-qualified column reference, with the qualifier stripped.
pub(crate) fn bare_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|ident| ident.value.clone()),
        _ => None,
    }
}

pub(crate) fn quote_ident(value: &str) -> String {
    format!("`{}`", value.replace('`', "``"))
}

#[cfg(test)]
mod tests {
    use super::{bare_column_name, parse_predicate, parse_single_select, quote_ident};
    use sqlparser::ast::Expr;

    #[test]
    fn parses_a_plain_select() {
        let select =
            parse_single_select("SELECT user_id, SUM(cost) FROM transactions GROUP BY user_id")
                .expect("plain select should parse");
        assert_eq!(select.projection.len(), 2);
        assert_eq!(select.from.len(), 1);
    }

    #[test]
    fn rejects_multiple_statements_and_non_selects() {
        assert!(parse_single_select("SELECT 1; SELECT 2").is_err());
        assert!(parse_single_select("DELETE FROM t").is_err());
        assert!(parse_single_select("SELECT 1 UNION SELECT 2").is_err());
        assert!(parse_single_select("WITH c AS (SELECT 1) SELECT * FROM c").is_err());
        assert!(parse_single_select("SELECT COUNT(*) FROM t ORDER BY 1").is_err());
        assert!(parse_single_select("SELECT COUNT(*) FROM t LIMIT 1").is_err());
    }

    #[test]
    fn strips_table_qualifiers() {
        let expr = parse_predicate("t.user_id").expect("qualified column should parse");
        assert_eq!(bare_column_name(&expr).as_deref(), Some("user_id"));
        let bare = parse_predicate("user_id").expect("bare column should parse");
        assert_eq!(bare_column_name(&bare).as_deref(), Some("user_id"));
        let non_column = parse_predicate("1 + 1").expect("arithmetic should parse");
        assert_eq!(bare_column_name(&non_column), None);
    }

    #[test]
    fn predicate_parser_handles_keywords_and_literals() {
        let expr = parse_predicate("status IN ('a', 'b') AND cost > 10")
            .expect("predicate should parse");
        assert!(matches!(expr, Expr::BinaryOp { .. }));
    }

    #[test]
    fn quotes_backticks() {
        assert_eq!(quote_ident("user_id"), "`user_id`");
        assert_eq!(quote_ident("we`ird"), "`we``ird`");
    }
}

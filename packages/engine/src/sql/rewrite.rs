use std::ops::ControlFlow;

use sqlparser::ast::{Expr, Ident, VisitMut, VisitorMut};

use crate::sql::ast_utils::parse_predicate;
use crate::LightningError;

/// Which row image a trigger predicate reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RowImage {
    New,
    Old,
}

impl RowImage {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            RowImage::New => "NEW",
            RowImage::Old => "OLD",
        }
    }
}

/// Rewrites the verbatim WHERE text so every column reference reads the
/// given row image: `status = 'paid'` becomes `NEW.status = 'paid'`.
///
/// The rewrite is structural: the predicate is parsed and only identifier
/// nodes are touched, so keywords and string literals can never be
/// prefixed. Existing table qualifiers are replaced by the row image.
pub(crate) fn prefix_predicate(
    where_text: &str,
    image: RowImage,
) -> Result<String, LightningError> {
    let mut expr = parse_predicate(where_text)?;
    let mut prefixer = ImagePrefixer {
        image: image.as_str(),
    };
    let _ = VisitMut::visit(&mut expr, &mut prefixer);
    Ok(expr.to_string())
}

struct ImagePrefixer {
    image: &'static str,
}

impl VisitorMut for ImagePrefixer {
    type Break = ();

    fn post_visit_expr(&mut self, expr: &mut Expr) -> ControlFlow<()> {
        match expr {
            Expr::Identifier(ident) => {
                *expr =
                    Expr::CompoundIdentifier(vec![Ident::new(self.image), ident.clone()]);
            }
            Expr::CompoundIdentifier(parts) => {
                if let Some(column) = parts.last() {
                    *expr =
                        Expr::CompoundIdentifier(vec![Ident::new(self.image), column.clone()]);
                }
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

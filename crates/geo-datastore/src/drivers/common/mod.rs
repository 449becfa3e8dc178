//! Shared statement rendering used by every driver.
//!
//! Renderers take a [`Dialect`] plus a generic change-set or query shape and
//! produce SQL text with an ordered parameter list. `Bound` values and `?`
//! markers inside `Raw` fragments are rewritten to the dialect's positional
//! placeholders in left-to-right order, so mixed raw/bound change-sets bind
//! correctly.

use crate::core::traits::{Dialect, SelectColumn, SelectQuery};
use crate::core::value::{ChangeSet, IdPredicate, SqlExpr, SqlValue};
use crate::error::{Result, StoreError};

/// Render an INSERT statement. An empty change-set becomes
/// `INSERT INTO t DEFAULT VALUES`, letting database defaults fill the row.
pub fn render_insert(
    dialect: &dyn Dialect,
    table: &str,
    changes: &ChangeSet,
) -> (String, Vec<SqlValue>) {
    let table = dialect.quote_ident(table);
    if changes.is_empty() {
        return (format!("INSERT INTO {} DEFAULT VALUES", table), Vec::new());
    }

    let mut columns = Vec::with_capacity(changes.len());
    let mut exprs = Vec::with_capacity(changes.len());
    let mut params = Vec::new();
    let mut next_index = 1usize;

    for (column, expr) in changes.entries() {
        columns.push(dialect.quote_ident(column));
        exprs.push(render_expr(dialect, expr, &mut params, &mut next_index));
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        exprs.join(", ")
    );
    (sql, params)
}

/// Render an UPDATE statement.
///
/// Identifier columns are excluded from the SET clause; an effectively empty
/// change-set is a caller error, not a silent no-op.
pub fn render_update(
    dialect: &dyn Dialect,
    table: &str,
    changes: &ChangeSet,
    id: &IdPredicate,
) -> Result<(String, Vec<SqlValue>)> {
    let mut params = Vec::new();
    let mut next_index = 1usize;
    let mut assignments = Vec::new();

    for (column, expr) in changes.entries() {
        if column.eq_ignore_ascii_case(&id.column) {
            continue;
        }
        let rendered = render_expr(dialect, expr, &mut params, &mut next_index);
        assignments.push(format!("{} = {}", dialect.quote_ident(column), rendered));
    }

    if assignments.is_empty() {
        return Err(StoreError::NoChanges {
            table: table.to_string(),
        });
    }

    let placeholder = dialect.param_placeholder(next_index);
    params.push(id.value.clone());

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = {}",
        dialect.quote_ident(table),
        assignments.join(", "),
        dialect.quote_ident(&id.column),
        placeholder
    );
    Ok((sql, params))
}

/// Render a DELETE statement with parameterized identifier equality.
pub fn render_delete(
    dialect: &dyn Dialect,
    table: &str,
    id: &IdPredicate,
) -> (String, Vec<SqlValue>) {
    let sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        dialect.quote_ident(table),
        dialect.quote_ident(&id.column),
        dialect.param_placeholder(1)
    );
    (sql, vec![id.value.clone()])
}

/// Render a SELECT shape.
pub fn render_select(dialect: &dyn Dialect, query: &SelectQuery) -> (String, Vec<SqlValue>) {
    let projection = if query.count_only {
        format!("COUNT(*) AS {}", dialect.quote_ident("cnt"))
    } else if query.columns.is_empty() {
        "*".to_string()
    } else {
        query
            .columns
            .iter()
            .map(|c| match c {
                SelectColumn::Name(name) => dialect.quote_ident(name),
                SelectColumn::Expr { sql, alias } => {
                    format!("{} AS {}", sql, dialect.quote_ident(alias))
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut sql = format!(
        "SELECT {} FROM {}",
        projection,
        dialect.quote_ident(&query.table)
    );

    let mut params = Vec::new();
    let mut next_index = 1usize;

    if !query.conditions.is_empty() {
        let rendered: Vec<String> = query
            .conditions
            .iter()
            .map(|cond| {
                let fragment = if cond.params.is_empty() {
                    cond.sql.clone()
                } else {
                    let rendered = number_markers(dialect, &cond.sql, &mut next_index);
                    params.extend(cond.params.iter().cloned());
                    rendered
                };
                format!("({})", fragment)
            })
            .collect();
        sql.push_str(" WHERE ");
        sql.push_str(&rendered.join(" AND "));
    }

    if let Some(order_by) = &query.order_by {
        sql.push_str(" ORDER BY ");
        sql.push_str(order_by);
    }

    if let Some(limit) = query.limit {
        sql = dialect.apply_limit(sql, limit);
    }

    (sql, params)
}

fn render_expr(
    dialect: &dyn Dialect,
    expr: &SqlExpr,
    params: &mut Vec<SqlValue>,
    next_index: &mut usize,
) -> String {
    match expr {
        SqlExpr::Bound(value) => {
            let placeholder = dialect.param_placeholder(*next_index);
            *next_index += 1;
            params.push(value.clone());
            placeholder
        }
        SqlExpr::Raw { sql, params: raw } => {
            if raw.is_empty() {
                return sql.clone();
            }
            let rendered = number_markers(dialect, sql, next_index);
            params.extend(raw.iter().cloned());
            rendered
        }
    }
}

/// Replace each `?` marker with the dialect's next positional placeholder.
///
/// Callers only route fragments with bound parameters through here;
/// parameter-free fragments (trusted passthrough SQL) render verbatim, so a
/// literal `?` inside them is left alone.
fn number_markers(dialect: &dyn Dialect, sql: &str, next_index: &mut usize) -> String {
    let mut out = String::with_capacity(sql.len());
    for c in sql.chars() {
        if c == '?' {
            out.push_str(&dialect.param_placeholder(*next_index));
            *next_index += 1;
        } else {
            out.push(c);
        }
    }
    out
}

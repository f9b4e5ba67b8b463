//! Composable SQL text with positional binds.
//!
//! Fragments keep literal SQL and bound values interleaved so that
//! placeholders are numbered only once, when the whole statement is
//! rendered. Null is always rendered inline: an untyped bound null would
//! make Postgres guess the column type.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

// ---

/// A value bound to a `$n` placeholder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Long(i64),
    Double(f64),
    Bool(bool),
    Text(String),
    TextArray(Vec<String>),
    Json(Value),
    Timestamp(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Sql(String),
    Bind(SqlValue),
}

/// SQL text with embedded bind values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlFragment {
    parts: Vec<Part>,
}

impl SqlFragment {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new().sql(sql)
    }

    pub fn value(value: SqlValue) -> Self {
        Self::new().bind(value)
    }

    pub fn sql(mut self, sql: impl Into<String>) -> Self {
        self.parts.push(Part::Sql(sql.into()));
        self
    }

    pub fn bind(mut self, value: SqlValue) -> Self {
        self.parts.push(Part::Bind(value));
        self
    }

    pub fn append(mut self, other: SqlFragment) -> Self {
        self.parts.extend(other.parts);
        self
    }

    /// Wrap in parentheses.
    pub fn grouped(self) -> Self {
        SqlFragment::raw("(").append(self).sql(")")
    }

    /// Render, appending bound values to `binds` and numbering from there.
    pub fn render(&self, binds: &mut Vec<SqlValue>) -> String {
        // ---
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Sql(s) => out.push_str(s),
                Part::Bind(v) => {
                    binds.push(v.clone());
                    out.push('$');
                    out.push_str(&binds.len().to_string());
                }
            }
        }
        out
    }
}

// ---

/// Rendered statement ready for execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedQuery {
    pub sql: String,
    pub binds: Vec<SqlValue>,
}

/// Bind every value of a [`RenderedQuery`] onto an sqlx query or scalar query.
#[macro_export]
macro_rules! bind_all {
    ($query:expr, $binds:expr) => {{
        let mut q = $query;
        for value in $binds {
            q = match value {
                $crate::query::SqlValue::Long(v) => q.bind(*v),
                $crate::query::SqlValue::Double(v) => q.bind(*v),
                $crate::query::SqlValue::Bool(v) => q.bind(*v),
                $crate::query::SqlValue::Text(v) => q.bind(v.clone()),
                $crate::query::SqlValue::TextArray(v) => q.bind(v.clone()),
                $crate::query::SqlValue::Json(v) => q.bind(v.clone()),
                $crate::query::SqlValue::Timestamp(v) => q.bind(*v),
            };
        }
        q
    }};
}

/// A `SELECT` assembled from its clauses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectQuery {
    pub distinct: bool,
    pub select: Vec<SqlFragment>,
    pub from: Option<String>,
    pub joins: Vec<String>,
    pub wheres: Vec<SqlFragment>,
    pub order_by: Vec<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl SelectQuery {
    // ---
    pub fn render(&self) -> RenderedQuery {
        // ---
        let mut binds = Vec::new();
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        let select: Vec<String> = self.select.iter().map(|f| f.render(&mut binds)).collect();
        sql.push_str(&select.join(", "));

        if let Some(from) = &self.from {
            sql.push_str(" FROM ");
            sql.push_str(from);
        }
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if !self.wheres.is_empty() {
            let wheres: Vec<String> = self.wheres.iter().map(|f| f.render(&mut binds)).collect();
            sql.push_str(" WHERE ");
            sql.push_str(&wheres.join(" AND "));
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        RenderedQuery { sql, binds }
    }

    /// `SELECT COUNT(*)` over the distinct rows of this query, unpaged.
    pub fn render_count(&self) -> RenderedQuery {
        // ---
        let inner = SelectQuery {
            order_by: Vec::new(),
            limit: None,
            offset: None,
            select: self
                .select
                .iter()
                .filter(|f| !is_order_column(f))
                .cloned()
                .collect(),
            ..self.clone()
        };
        let RenderedQuery { sql, binds } = inner.render();
        RenderedQuery {
            sql: format!("SELECT COUNT(*) FROM ({sql}) AS counted"),
            binds,
        }
    }
}

/// Order terms are projected as `... AS o<n>`; a count does not need them.
fn is_order_column(fragment: &SqlFragment) -> bool {
    // ---
    match fragment.parts.last() {
        Some(Part::Sql(s)) => s
            .rsplit_once(" AS o")
            .is_some_and(|(_, n)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit())),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn binds_are_numbered_across_clauses() {
        // ---
        let query = SelectQuery {
            distinct: true,
            select: vec![SqlFragment::raw("e1.id")],
            from: Some("things AS e1".into()),
            wheres: vec![
                SqlFragment::raw("e1.id = ").bind(SqlValue::Long(5)),
                SqlFragment::raw("e1.name = ").bind(SqlValue::Text("x".into())),
            ],
            ..Default::default()
        };
        let rendered = query.render();
        assert_eq!(
            rendered.sql,
            "SELECT DISTINCT e1.id FROM things AS e1 WHERE e1.id = $1 AND e1.name = $2"
        );
        assert_eq!(
            rendered.binds,
            vec![SqlValue::Long(5), SqlValue::Text("x".into())]
        );
    }

    #[test]
    fn count_drops_paging_and_order_columns() {
        // ---
        let query = SelectQuery {
            distinct: true,
            select: vec![
                SqlFragment::raw("e1.id"),
                SqlFragment::raw("e1.name AS o1"),
            ],
            from: Some("things AS e1".into()),
            order_by: vec!["o1 ASC".into()],
            limit: Some(10),
            offset: Some(20),
            ..Default::default()
        };
        let rendered = query.render_count();
        assert_eq!(
            rendered.sql,
            "SELECT COUNT(*) FROM (SELECT DISTINCT e1.id FROM things AS e1) AS counted"
        );
    }
}

//! `INSERT`/`UPDATE` builders used by every entity routine.

use sqlx::{PgConnection, Postgres};
use tracing::{debug, error};

use crate::bind_all;
use crate::error::{StaError, StaResult};
use crate::geometry::{EncodedGeometry, DEFAULT_SRID};
use crate::id_policy::IdAssignment;
use crate::query::{RenderedQuery, SqlFragment, SqlValue};

// ---

/// Column assignments shared by inserts and updates.
pub trait Assignments {
    fn assign(&mut self, column: &'static str, value: SqlFragment);

    fn set(&mut self, column: &'static str, value: SqlValue) {
        self.assign(column, SqlFragment::value(value));
    }

    fn set_null(&mut self, column: &'static str) {
        self.assign(column, SqlFragment::raw("NULL"));
    }

    fn set_opt(&mut self, column: &'static str, value: Option<SqlValue>) {
        match value {
            Some(v) => self.set(column, v),
            None => self.set_null(column),
        }
    }

    /// Payload text plus the native geometry built from it, or a cleared
    /// geometry for non-geospatial encodings.
    fn set_geometry(&mut self, payload_column: &'static str, encoded: EncodedGeometry) {
        // ---
        self.set(payload_column, SqlValue::Text(encoded.payload));
        match encoded.native {
            Some(geojson) => self.assign(
                "geom",
                SqlFragment::raw("ST_Force2D(ST_Transform(ST_GeomFromGeoJSON(")
                    .bind(SqlValue::Text(geojson))
                    .sql(format!("), {DEFAULT_SRID}))")),
            ),
            None => self.set_null("geom"),
        }
    }
}

/// `INSERT ... RETURNING id` for one row.
#[derive(Debug, Clone)]
pub struct InsertStatement {
    table: &'static str,
    columns: Vec<&'static str>,
    values: Vec<SqlFragment>,
}

impl Assignments for InsertStatement {
    fn assign(&mut self, column: &'static str, value: SqlFragment) {
        self.columns.push(column);
        self.values.push(value);
    }
}

impl InsertStatement {
    // ---
    pub fn new(table: &'static str) -> Self {
        Self {
            table,
            columns: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Write a forced key, or leave the key to the sequence.
    pub fn id(&mut self, assignment: IdAssignment) {
        if let IdAssignment::Forced(key) = assignment {
            self.set("id", SqlValue::Long(key));
        }
    }

    pub fn render(&self) -> RenderedQuery {
        // ---
        let mut binds = Vec::new();
        let values: Vec<String> = self.values.iter().map(|v| v.render(&mut binds)).collect();
        let sql = if self.columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES RETURNING id", self.table)
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING id",
                self.table,
                self.columns.join(", "),
                values.join(", ")
            )
        };
        RenderedQuery { sql, binds }
    }

    /// Execute and return the assigned key.
    pub async fn execute(&self, conn: &mut PgConnection) -> StaResult<i64> {
        // ---
        let rendered = self.render();
        let id: i64 = bind_all!(sqlx::query_scalar::<Postgres, i64>(&rendered.sql), &rendered.binds)
            .fetch_one(&mut *conn)
            .await?;
        debug!(table = self.table, id, "inserted");
        Ok(id)
    }
}

/// `UPDATE ... WHERE id = $n` for exactly one row.
#[derive(Debug, Clone)]
pub struct UpdateStatement {
    table: &'static str,
    id: i64,
    sets: Vec<(&'static str, SqlFragment)>,
}

impl Assignments for UpdateStatement {
    fn assign(&mut self, column: &'static str, value: SqlFragment) {
        self.sets.push((column, value));
    }
}

impl UpdateStatement {
    // ---
    pub fn new(table: &'static str, id: i64) -> Self {
        Self {
            table,
            id,
            sets: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn render(&self) -> RenderedQuery {
        // ---
        let mut binds = Vec::new();
        let sets: Vec<String> = self
            .sets
            .iter()
            .map(|(col, value)| format!("{col} = {}", value.render(&mut binds)))
            .collect();
        binds.push(SqlValue::Long(self.id));
        RenderedQuery {
            sql: format!(
                "UPDATE {} SET {} WHERE id = ${}",
                self.table,
                sets.join(", "),
                binds.len()
            ),
            binds,
        }
    }

    /// Execute unless nothing was assigned. Anything other than one
    /// affected row aborts the operation.
    pub async fn execute(&self, conn: &mut PgConnection) -> StaResult<()> {
        // ---
        if self.is_empty() {
            return Ok(());
        }
        let rendered = self.render();
        let affected = bind_all!(sqlx::query::<Postgres>(&rendered.sql), &rendered.binds)
            .execute(&mut *conn)
            .await?
            .rows_affected();
        match affected {
            1 => {
                debug!(table = self.table, id = self.id, "updated");
                Ok(())
            }
            0 => Err(StaError::no_such_entity(format!(
                "no row {} in {}",
                self.id, self.table
            ))),
            n => {
                error!(table = self.table, id = self.id, rows = n, "update changed multiple rows");
                Err(StaError::consistency(format!(
                    "updating {} {} changed {n} rows",
                    self.table, self.id
                )))
            }
        }
    }
}

/// Run a statement that returns no rows; yields the affected row count.
pub async fn execute(conn: &mut PgConnection, statement: SqlFragment) -> StaResult<u64> {
    // ---
    let mut binds = Vec::new();
    let sql = statement.render(&mut binds);
    let result = bind_all!(sqlx::query::<Postgres>(&sql), &binds).execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

/// Run a rendered `SELECT COUNT(*)`.
pub async fn fetch_count(conn: &mut PgConnection, query: &RenderedQuery) -> StaResult<i64> {
    // ---
    let count: i64 = bind_all!(sqlx::query_scalar::<Postgres, i64>(&query.sql), &query.binds)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn insert_renders_forced_id_and_inline_null() {
        // ---
        let mut insert = InsertStatement::new("things");
        insert.id(IdAssignment::Forced(42));
        insert.set("name", SqlValue::Text("Station".into()));
        insert.set_opt("properties", None);

        let rendered = insert.render();
        assert_eq!(
            rendered.sql,
            "INSERT INTO things (id, name, properties) VALUES ($1, $2, NULL) RETURNING id"
        );
        assert_eq!(
            rendered.binds,
            vec![SqlValue::Long(42), SqlValue::Text("Station".into())]
        );
    }

    #[test]
    fn store_assigned_id_is_not_written() {
        // ---
        let mut insert = InsertStatement::new("sensors");
        insert.id(IdAssignment::StoreAssigned);
        insert.set("name", SqlValue::Text("s".into()));
        assert!(!insert.render().sql.contains("(id"));
    }

    #[test]
    fn geometry_is_transformed_and_flattened() {
        // ---
        let mut insert = InsertStatement::new("locations");
        insert.set_geometry(
            "location",
            EncodedGeometry {
                payload: "{}".into(),
                native: Some("{\"type\":\"Point\"}".into()),
            },
        );
        assert_eq!(
            insert.render().sql,
            "INSERT INTO locations (location, geom) VALUES ($1, \
             ST_Force2D(ST_Transform(ST_GeomFromGeoJSON($2), 4326))) RETURNING id"
        );

        let mut update = UpdateStatement::new("locations", 3);
        update.set_geometry(
            "location",
            EncodedGeometry {
                payload: "\"somewhere\"".into(),
                native: None,
            },
        );
        assert_eq!(
            update.render().sql,
            "UPDATE locations SET location = $1, geom = NULL WHERE id = $2"
        );
    }

    #[test]
    fn empty_update_has_nothing_to_render() {
        // ---
        let update = UpdateStatement::new("things", 1);
        assert!(update.is_empty());
    }
}

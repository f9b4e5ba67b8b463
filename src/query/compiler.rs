//! Path Query Compiler.
//!
//! Walks a resolved path from the terminal element back to the root,
//! threading a [`PathState`] accumulator through a fold. The first table
//! opened is the terminal entity: it becomes the `FROM` root, the
//! projected table and the frame of reference for filter/order terms.
//! Every following table is joined onto the previously visited one via
//! the static adjacency table.

use serde::Serialize;
use tracing::trace;

use super::adjacency::{lookup, Join};
use super::columns::projection;
use super::expression::{Direction, ExpressionTranslator, QueryOptions};
use super::path::{PathElement, ResourcePath};
use super::sql::{RenderedQuery, SelectQuery, SqlFragment, SqlValue};
use crate::error::{StaError, StaResult};
use crate::model::{EntityType, Id, Property};

/// A table opened by the compiler, with its alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRef {
    pub entity_type: EntityType,
    pub alias: String,
}

/// A composed query plus the table its rows belong to.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub main: TableRef,
    pub query: SelectQuery,
}

impl CompiledQuery {
    // ---
    pub fn render(&self) -> RenderedQuery {
        self.query.render()
    }

    /// Count of distinct rows, ignoring paging and ordering.
    pub fn render_count(&self) -> RenderedQuery {
        self.query.render_count()
    }
}

/// Accumulator threaded through the reversed path.
#[derive(Debug, Default)]
struct PathState {
    last: Option<TableRef>,
    main: Option<TableRef>,
    aliases: usize,
    selected: Vec<Property>,
    query: SelectQuery,
}

impl PathState {
    // ---
    fn visit(mut self, element: &PathElement) -> StaResult<Self> {
        // ---
        match element {
            PathElement::Property { property } => {
                if self.main.is_none() {
                    self.selected.push(*property);
                }
                Ok(self)
            }
            // JSON keys only matter to whoever hydrates the row.
            PathElement::CustomProperty { .. } => Ok(self),
            PathElement::Entity { entity_type, id } => self.visit_entity(*entity_type, id.as_ref()),
        }
    }

    fn visit_entity(mut self, entity_type: EntityType, id: Option<&Id>) -> StaResult<Self> {
        // ---
        let table = match self.last.take() {
            // Same type twice in a row: no new join, only the filter.
            Some(prev) if prev.entity_type == entity_type => prev,
            Some(prev) => self.join(entity_type, &prev)?,
            None => self.open_root(entity_type),
        };

        if let Some(id) = id {
            let key = native_key(id)?;
            self.query
                .wheres
                .push(SqlFragment::raw(format!("{}.id = ", table.alias)).bind(SqlValue::Long(key)));
        }

        self.last = Some(table);
        Ok(self)
    }

    fn next_alias(&mut self) -> String {
        self.aliases += 1;
        format!("e{}", self.aliases)
    }

    fn open_root(&mut self, entity_type: EntityType) -> TableRef {
        // ---
        let alias = self.next_alias();
        self.query.from = Some(format!("{} AS {alias}", entity_type.table()));
        self.query.select = projection(entity_type, &self.selected)
            .into_iter()
            .map(|col| SqlFragment::raw(format!("{alias}.{col}")))
            .collect();

        let table = TableRef { entity_type, alias };
        self.main = Some(table.clone());
        table
    }

    fn join(&mut self, entity_type: EntityType, prev: &TableRef) -> StaResult<TableRef> {
        // ---
        let join = lookup(entity_type, prev.entity_type).ok_or_else(|| {
            StaError::configuration(format!(
                "no join from {} to {entity_type}",
                prev.entity_type
            ))
        })?;

        let alias = self.next_alias();
        let table = entity_type.table();
        match *join {
            Join::Direct {
                new_column,
                prev_column,
            } => self.query.joins.push(format!(
                "INNER JOIN {table} AS {alias} ON {alias}.{new_column} = {}.{prev_column}",
                prev.alias
            )),
            Join::Link {
                table: link,
                prev_key,
                new_key,
            } => {
                let link_alias = format!("{alias}j1");
                self.query.joins.push(format!(
                    "INNER JOIN {link} AS {link_alias} ON {link_alias}.{prev_key} = {}.id",
                    prev.alias
                ));
                self.query.joins.push(format!(
                    "INNER JOIN {table} AS {alias} ON {alias}.id = {link_alias}.{new_key}"
                ));
            }
        }
        Ok(TableRef { entity_type, alias })
    }
}

/// The store keys everything by `BIGINT`; text ids mean the resolver was
/// configured for another store.
fn native_key(id: &Id) -> StaResult<i64> {
    match id {
        Id::Long(key) => Ok(*key),
        Id::Text(text) => Err(StaError::configuration(format!(
            "identifier {text:?} is not a numeric key"
        ))),
    }
}

// ---

/// Compiles resolved paths into a single `SELECT DISTINCT`.
#[derive(Debug, Clone, Copy)]
pub struct PathCompiler {
    default_top: i64,
    max_top: i64,
}

impl Default for PathCompiler {
    fn default() -> Self {
        Self::new(100, 1000)
    }
}

impl PathCompiler {
    // ---
    pub fn new(default_top: i64, max_top: i64) -> Self {
        Self {
            default_top,
            max_top,
        }
    }

    pub fn compile(
        &self,
        path: &ResourcePath,
        options: Option<&QueryOptions>,
    ) -> StaResult<CompiledQuery> {
        // ---
        let state = path
            .elements
            .iter()
            .rev()
            .try_fold(PathState::default(), PathState::visit)?;

        let main = state
            .main
            .ok_or_else(|| StaError::configuration("path addresses no entity"))?;
        let mut query = state.query;
        // Joins fan out, so rows are always de-duplicated.
        query.distinct = true;

        if let Some(options) = options {
            self.apply_options(&main, &mut query, options)?;
        }

        trace!(sql = %query.render().sql, "compiled path");
        Ok(CompiledQuery { main, query })
    }

    fn apply_options(
        &self,
        main: &TableRef,
        query: &mut SelectQuery,
        options: &QueryOptions,
    ) -> StaResult<()> {
        // ---
        let translator = ExpressionTranslator::new(main.entity_type, &main.alias);

        if let Some(filter) = &options.filter {
            query.wheres.push(translator.filter(filter)?);
        }

        // DISTINCT requires every ORDER BY term in the select list.
        let mut n = 0;
        for order in &options.order_by {
            let direction = match order.direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            for term in translator.order_terms(&order.expression)? {
                n += 1;
                query.select.push(term.sql(format!(" AS o{n}")));
                query.order_by.push(format!("o{n} {direction}"));
            }
        }
        // Stable paging.
        query.order_by.push(format!("{}.id ASC", main.alias));

        let top = options.top.unwrap_or(self.default_top).clamp(0, self.max_top);
        query.limit = Some(top);
        query.offset = options.skip.filter(|skip| *skip > 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::query::expression::{CompareOp, Expression, Literal, OrderBy};
    use EntityType::*;

    #[test]
    fn thing_datastreams_sensor() {
        // ---
        let path = ResourcePath::new()
            .entity(Thing, 5)
            .set(Datastream)
            .set(Sensor);
        let compiled = PathCompiler::default().compile(&path, None).unwrap();
        let rendered = compiled.render();

        assert_eq!(compiled.main.entity_type, Sensor);
        assert_eq!(
            rendered.sql,
            "SELECT DISTINCT e1.id, e1.name, e1.description, e1.encoding_type, e1.metadata, e1.properties \
             FROM sensors AS e1 \
             INNER JOIN datastreams AS e2 ON e2.sensor_id = e1.id \
             INNER JOIN things AS e3 ON e3.id = e2.thing_id \
             WHERE e3.id = $1"
        );
        assert_eq!(rendered.binds, vec![SqlValue::Long(5)]);
    }

    #[test]
    fn link_tables_get_their_own_alias() {
        // ---
        let path = ResourcePath::new().entity(Thing, 1).set(Location);
        let sql = PathCompiler::default().compile(&path, None).unwrap().render().sql;
        assert!(sql.contains("FROM locations AS e1"));
        assert!(sql.contains(
            "INNER JOIN things_locations AS e2j1 ON e2j1.location_id = e1.id \
             INNER JOIN things AS e2 ON e2.id = e2j1.thing_id"
        ));
        assert!(sql.ends_with("WHERE e2.id = $1"));
    }

    #[test]
    fn property_element_narrows_projection() {
        // ---
        let path = ResourcePath::new()
            .entity(Datastream, 3)
            .property(Property::UnitOfMeasurement);
        let sql = PathCompiler::default().compile(&path, None).unwrap().render().sql;
        assert_eq!(
            sql,
            "SELECT DISTINCT e1.id, e1.unit_name, e1.unit_symbol, e1.unit_definition \
             FROM datastreams AS e1 WHERE e1.id = $1"
        );
    }

    #[test]
    fn repeated_type_adds_filter_without_join() {
        // ---
        let path = ResourcePath::new().set(Thing).entity(Thing, 7);
        let rendered = PathCompiler::default().compile(&path, None).unwrap().render();
        assert!(!rendered.sql.contains("JOIN"));
        assert!(rendered.sql.ends_with("WHERE e1.id = $1"));
    }

    #[test]
    fn unknown_adjacency_is_a_configuration_error() {
        // ---
        let path = ResourcePath::new().entity(Sensor, 1).set(Thing);
        let err = PathCompiler::default().compile(&path, None).unwrap_err();
        assert!(matches!(err, StaError::Configuration(_)));
    }

    #[test]
    fn text_identifier_is_a_configuration_error() {
        // ---
        let path = ResourcePath::new().entity(Thing, Id::Text("abc".into()));
        let err = PathCompiler::default().compile(&path, None).unwrap_err();
        assert!(matches!(err, StaError::Configuration(_)));
        assert!(PathCompiler::default()
            .compile(&ResourcePath::new().property(Property::Name), None)
            .is_err());
    }

    #[test]
    fn filter_order_and_paging_target_main_table() {
        // ---
        let path = ResourcePath::new().entity(Datastream, 2).set(Observation);
        let options = QueryOptions {
            filter: Some(Expression::compare(
                CompareOp::Gt,
                Expression::property(Property::Result),
                Expression::literal(Literal::Integer(10)),
            )),
            order_by: vec![OrderBy {
                expression: Expression::property(Property::PhenomenonTime),
                direction: Direction::Desc,
            }],
            top: Some(5000),
            skip: Some(20),
        };
        let compiled = PathCompiler::new(100, 1000)
            .compile(&path, Some(&options))
            .unwrap();
        let rendered = compiled.render();

        assert!(rendered.sql.contains("e1.phenomenon_time_start AS o1 FROM observations AS e1"));
        assert!(rendered
            .sql
            .contains("WHERE e2.id = $1 AND e1.result_number > $2"));
        assert!(rendered
            .sql
            .ends_with("ORDER BY o1 DESC, e1.id ASC LIMIT 1000 OFFSET 20"));
        assert_eq!(rendered.binds, vec![SqlValue::Long(2), SqlValue::Long(10)]);

        let count = compiled.render_count();
        assert!(count.sql.starts_with("SELECT COUNT(*) FROM (SELECT DISTINCT e1.id,"));
        assert!(!count.sql.contains("o1"));
        assert!(!count.sql.contains("LIMIT"));
    }

    #[test]
    fn default_top_applies_when_unset() {
        // ---
        let path = ResourcePath::new().set(Thing);
        let options = QueryOptions::default();
        let sql = PathCompiler::new(25, 1000)
            .compile(&path, Some(&options))
            .unwrap()
            .render()
            .sql;
        assert!(sql.ends_with("ORDER BY e1.id ASC LIMIT 25"));
    }
}

//! Entity Mutation Engine.
//!
//! One insert and one update routine per entity type, all running on the
//! caller's connection inside the caller's transaction. Nested payloads are
//! created through the same dispatcher, so a failure anywhere in a cascade
//! fails the whole call and the caller rolls back.

use std::future::Future;
use std::pin::Pin;

use sqlx::{PgConnection, Postgres};
use tracing::{debug, error};

use crate::error::{StaError, StaResult};
use crate::geometry::GeometryCodec;
use crate::id_policy::IdPolicy;
use crate::model::{Entity, EntityChange, EntityType, Field, Id};
use crate::query::{PathCompiler, ResourcePath, SqlValue};

mod datastream;
mod feature;
mod historical_location;
mod links;
mod location;
mod multi_datastream;
mod observation;
mod observed_property;
mod sensor;
mod statement;
mod thing;

pub use multi_datastream::check_rank_alignment;
pub use observation::{ResultColumns, ResultType};
pub use statement::{Assignments, InsertStatement, UpdateStatement};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ---

/// Inserts and updates entities while keeping the graph invariants.
///
/// Holds only immutable collaborators, so one instance is shared by all
/// workers.
#[derive(Debug, Clone, Default)]
pub struct MutationEngine {
    ids: IdPolicy,
    codec: GeometryCodec,
    compiler: PathCompiler,
}

impl MutationEngine {
    // ---
    pub fn new(ids: IdPolicy, codec: GeometryCodec, compiler: PathCompiler) -> Self {
        Self {
            ids,
            codec,
            compiler,
        }
    }

    /// Create an entity and everything nested in it; returns the new key.
    ///
    /// Boxed because nested payloads recurse back into it.
    pub fn insert<'a>(
        &'a self,
        conn: &'a mut PgConnection,
        entity: Entity,
    ) -> BoxFuture<'a, StaResult<i64>> {
        Box::pin(async move {
            entity.complete()?;
            match entity {
                Entity::Thing(e) => self.insert_thing(conn, e).await,
                Entity::Location(e) => self.insert_location(conn, e).await,
                Entity::HistoricalLocation(e) => self.insert_historical_location(conn, e).await,
                Entity::Sensor(e) => self.insert_sensor(conn, e).await,
                Entity::ObservedProperty(e) => self.insert_observed_property(conn, e).await,
                Entity::Datastream(e) => self.insert_datastream(conn, e).await,
                Entity::MultiDatastream(e) => self.insert_multi_datastream(conn, e).await,
                Entity::Observation(e) => self.insert_observation(conn, e).await,
                Entity::FeatureOfInterest(e) => self.insert_feature(conn, e).await,
            }
        })
    }

    /// Apply the fields set in `entity` to row `id` of `entity_type`.
    pub async fn update(
        &self,
        conn: &mut PgConnection,
        entity_type: EntityType,
        id: i64,
        entity: Entity,
    ) -> StaResult<EntityChange> {
        // ---
        if entity.entity_type() != entity_type {
            return Err(StaError::illegal_argument(format!(
                "can not update a {entity_type} with a {} payload",
                entity.entity_type()
            )));
        }
        if !self.exists(conn, entity_type, id).await? {
            return Err(StaError::no_such_entity(format!(
                "No such {entity_type} with id {id}."
            )));
        }

        let change = match entity {
            Entity::Thing(e) => self.update_thing(conn, id, e).await?,
            Entity::Location(e) => self.update_location(conn, id, e).await?,
            Entity::HistoricalLocation(e) => self.update_historical_location(conn, id, e).await?,
            Entity::Sensor(e) => self.update_sensor(conn, id, e).await?,
            Entity::ObservedProperty(e) => self.update_observed_property(conn, id, e).await?,
            Entity::Datastream(e) => self.update_datastream(conn, id, e).await?,
            Entity::MultiDatastream(e) => self.update_multi_datastream(conn, id, e).await?,
            Entity::Observation(e) => self.update_observation(conn, id, e).await?,
            Entity::FeatureOfInterest(e) => self.update_feature(conn, id, e).await?,
        };
        debug!(%entity_type, id, fields = ?change.fields(), "update applied");
        Ok(change)
    }

    /// Existence by key; more than one row means key uniqueness is broken.
    pub async fn exists(
        &self,
        conn: &mut PgConnection,
        entity_type: EntityType,
        id: i64,
    ) -> StaResult<bool> {
        // ---
        let sql = format!("SELECT COUNT(*) FROM {} WHERE id = $1", entity_type.table());
        let count: i64 = sqlx::query_scalar::<Postgres, i64>(&sql)
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;
        match count {
            0 => Ok(false),
            1 => Ok(true),
            n => {
                error!(%entity_type, id, rows = n, "existence check matched multiple rows");
                Err(StaError::consistency(format!(
                    "{entity_type} {id} exists {n} times"
                )))
            }
        }
    }

    /// Resolve a reference: create it when it carries no id, accept it when
    /// the id exists, otherwise create it under that id if it is complete.
    pub(crate) async fn ensure(&self, conn: &mut PgConnection, entity: Entity) -> StaResult<i64> {
        // ---
        let entity_type = entity.entity_type();
        let Some(id) = entity.id().cloned() else {
            return self.insert(conn, entity).await;
        };
        if let Some(key) = id.as_key() {
            if self.exists(conn, entity_type, key).await? {
                return Ok(key);
            }
        }
        if entity.complete().is_err() {
            return Err(StaError::no_such_entity(format!(
                "No such {entity_type} with id {id}."
            )));
        }
        self.insert(conn, entity).await
    }

    /// A navigation link that must resolve to some row.
    pub(crate) async fn ensure_nav<T>(
        &self,
        conn: &mut PgConnection,
        field: Field<Box<T>>,
        owner: EntityType,
        nav: &str,
    ) -> StaResult<i64>
    where
        T: Send,
        Entity: From<Box<T>>,
    {
        // ---
        match field {
            Field::Set(value) => self.ensure(conn, Entity::from(value)).await,
            _ => Err(StaError::incomplete(format!("{owner} requires a {nav}."))),
        }
    }

    /// Key of a reference that must already exist (update-side linking).
    pub(crate) async fn require_existing(
        &self,
        conn: &mut PgConnection,
        entity_type: EntityType,
        id: Option<&Id>,
    ) -> StaResult<i64> {
        // ---
        let key = id.and_then(Id::as_key).ok_or_else(|| {
            StaError::no_such_entity(format!("{entity_type} with no id or non existing."))
        })?;
        if !self.exists(conn, entity_type, key).await? {
            return Err(StaError::no_such_entity(format!(
                "No such {entity_type} with id {key}."
            )));
        }
        Ok(key)
    }

    /// Recompute a stream's phenomenonTime/resultTime ranges from its
    /// Observations. Ranges are never maintained implicitly.
    pub async fn refresh_time_ranges(
        &self,
        conn: &mut PgConnection,
        entity_type: EntityType,
        id: i64,
    ) -> StaResult<()> {
        // ---
        let stream_column = match entity_type {
            EntityType::Datastream => "datastream_id",
            EntityType::MultiDatastream => "multi_datastream_id",
            other => {
                return Err(StaError::illegal_argument(format!(
                    "{other} has no time ranges"
                )))
            }
        };
        let sql = format!(
            "UPDATE {table} AS s SET \
             phenomenon_time_start = r.pt_start, phenomenon_time_end = r.pt_end, \
             result_time_start = r.rt_start, result_time_end = r.rt_end \
             FROM (SELECT MIN(phenomenon_time_start) AS pt_start, \
                          MAX(COALESCE(phenomenon_time_end, phenomenon_time_start)) AS pt_end, \
                          MIN(result_time) AS rt_start, MAX(result_time) AS rt_end \
                   FROM observations WHERE {stream_column} = $1) AS r \
             WHERE s.id = $1",
            table = entity_type.table()
        );
        let affected = sqlx::query::<Postgres>(&sql)
            .bind(id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
        match affected {
            0 => Err(StaError::no_such_entity(format!(
                "No such {entity_type} with id {id}."
            ))),
            1 => {
                debug!(%entity_type, id, "time ranges refreshed");
                Ok(())
            }
            n => {
                error!(%entity_type, id, rows = n, "range refresh changed multiple rows");
                Err(StaError::consistency(format!(
                    "refreshing {entity_type} {id} changed {n} rows"
                )))
            }
        }
    }

    /// Number of ObservedProperties currently ranked on a MultiDatastream.
    pub(crate) async fn ranked_property_count(
        &self,
        conn: &mut PgConnection,
        multi_datastream_id: i64,
    ) -> StaResult<i64> {
        // ---
        let path = ResourcePath::new()
            .entity(EntityType::MultiDatastream, multi_datastream_id)
            .set(EntityType::ObservedProperty);
        let compiled = self.compiler.compile(&path, None)?;
        statement::fetch_count(conn, &compiled.render_count()).await
    }
}

// ---
// Column value helpers shared by the entity routines.

fn text(value: &str) -> SqlValue {
    SqlValue::Text(value.to_string())
}

/// Nullable JSON document column: absent or null both store NULL.
fn json_field(field: &Field<serde_json::Value>) -> Option<SqlValue> {
    field.value().map(|v| SqlValue::Json(v.clone()))
}

use std::mem;

use serde_json::Value;
use sqlx::PgConnection;
use tracing::debug;

use super::statement::{execute, Assignments, InsertStatement, UpdateStatement};
use super::{json_field, text, MutationEngine};
use crate::error::{StaError, StaResult};
use crate::model::{
    Entity, EntityChange, EntityType, Field, MultiDatastream, Navigation, Property,
};
use crate::query::{SqlFragment, SqlValue};

// ---

/// Observation types, units and ranked ObservedProperties are parallel
/// lists and must have the same length.
pub fn check_rank_alignment(types: usize, units: usize, properties: usize) -> StaResult<()> {
    // ---
    if types != units {
        return Err(StaError::illegal_argument(format!(
            "Size of list of unitOfMeasurements ({units}) is not equal to size of \
             multiObservationDataTypes ({types})."
        )));
    }
    if types != properties {
        return Err(StaError::illegal_argument(format!(
            "Size of list of observedProperties ({properties}) is not equal to size of \
             multiObservationDataTypes ({types})."
        )));
    }
    Ok(())
}

async fn link_ranked_property(
    conn: &mut PgConnection,
    mds_id: i64,
    op_id: i64,
    rank: i32,
) -> StaResult<()> {
    // ---
    execute(
        conn,
        SqlFragment::raw(
            "INSERT INTO multi_datastreams_obs_properties \
             (multi_datastream_id, obs_property_id, rank) VALUES (",
        )
        .bind(SqlValue::Long(mds_id))
        .sql(", ")
        .bind(SqlValue::Long(op_id))
        .sql(", ")
        .bind(SqlValue::Long(i64::from(rank)))
        .sql(")"),
    )
    .await?;
    debug!(mds_id, op_id, rank, "linked ObservedProperty to MultiDatastream");
    Ok(())
}

impl MutationEngine {
    // ---
    pub(super) async fn insert_multi_datastream(
        &self,
        conn: &mut PgConnection,
        mut mds: MultiDatastream,
    ) -> StaResult<i64> {
        // ---
        let types = mds
            .multi_observation_data_types
            .required("multiObservationDataTypes")?
            .clone();
        let units = mds.unit_of_measurements.required("unitOfMeasurements")?;
        check_rank_alignment(types.len(), units.len(), mds.observed_properties.len())?;
        let units = serde_json::to_value(units)?;

        let sensor_id = self
            .ensure_nav(conn, mem::take(&mut mds.sensor), EntityType::MultiDatastream, "Sensor")
            .await?;
        let thing_id = self
            .ensure_nav(conn, mem::take(&mut mds.thing), EntityType::MultiDatastream, "Thing")
            .await?;

        let mut insert = InsertStatement::new(EntityType::MultiDatastream.table());
        insert.id(self.ids.assign(mds.id.as_ref()));
        insert.set("name", text(mds.name.required("name")?));
        insert.set("description", text(mds.description.required("description")?));
        insert.set("observation_types", SqlValue::Json(Value::from(types)));
        insert.set("unit_of_measurements", SqlValue::Json(units));
        insert.set_opt("properties", json_field(&mds.properties));
        insert.set("sensor_id", SqlValue::Long(sensor_id));
        insert.set("thing_id", SqlValue::Long(thing_id));
        let mds_id = insert.execute(conn).await?;
        debug!(mds_id, thing_id, sensor_id, "inserted MultiDatastream");

        for (rank, op) in mem::take(&mut mds.observed_properties).into_iter().enumerate() {
            let op_id = self.ensure(conn, Entity::from(op)).await?;
            let rank = i32::try_from(rank)
                .map_err(|_| StaError::illegal_argument("too many ObservedProperties"))?;
            link_ranked_property(conn, mds_id, op_id, rank).await?;
        }

        for mut obs in mem::take(&mut mds.observations) {
            obs.multi_datastream = Field::Set(Box::new(MultiDatastream::reference(mds_id)));
            obs.datastream = Field::Absent;
            self.insert(conn, Entity::from(obs)).await?;
        }
        Ok(mds_id)
    }

    pub(super) async fn update_multi_datastream(
        &self,
        conn: &mut PgConnection,
        mds_id: i64,
        mds: MultiDatastream,
    ) -> StaResult<EntityChange> {
        // ---
        let mut change = EntityChange::updated(EntityType::MultiDatastream, mds_id);
        let mut update = UpdateStatement::new(EntityType::MultiDatastream.table(), mds_id);

        let new_types = mds
            .multi_observation_data_types
            .non_null("multiObservationDataTypes")?;
        let new_units = mds.unit_of_measurements.non_null("unitOfMeasurements")?;

        // Alignment is checked before anything is written.
        let (stored_types, stored_units): (Option<i32>, Option<i32>) = sqlx::query_as(
            "SELECT jsonb_array_length(observation_types), jsonb_array_length(unit_of_measurements) \
             FROM multi_datastreams WHERE id = $1",
        )
        .bind(mds_id)
        .fetch_one(&mut *conn)
        .await?;
        let (linked, max_rank): (i64, i32) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(MAX(rank), -1) FROM multi_datastreams_obs_properties \
             WHERE multi_datastream_id = $1",
        )
        .bind(mds_id)
        .fetch_one(&mut *conn)
        .await?;

        let as_len = |n: Option<i32>| n.and_then(|n| usize::try_from(n).ok()).unwrap_or(0);
        let types_len = new_types.map_or_else(|| as_len(stored_types), Vec::len);
        let units_len = new_units.map_or_else(|| as_len(stored_units), Vec::len);
        let linked = usize::try_from(linked).unwrap_or(0);
        check_rank_alignment(types_len, units_len, linked + mds.observed_properties.len())?;

        let mut new_property_ids = Vec::with_capacity(mds.observed_properties.len());
        for op in &mds.observed_properties {
            new_property_ids.push(
                self.require_existing(conn, EntityType::ObservedProperty, op.id.as_ref())
                    .await?,
            );
        }

        if let Some(thing) = mds.thing.non_null("Thing")? {
            let thing_id = self
                .require_existing(conn, EntityType::Thing, thing.id.as_ref())
                .await?;
            update.set("thing_id", SqlValue::Long(thing_id));
            change.add_field(Navigation::Thing);
        }
        if let Some(sensor) = mds.sensor.non_null("Sensor")? {
            let sensor_id = self
                .require_existing(conn, EntityType::Sensor, sensor.id.as_ref())
                .await?;
            update.set("sensor_id", SqlValue::Long(sensor_id));
            change.add_field(Navigation::Sensor);
        }
        if let Some(name) = mds.name.non_null("name")? {
            update.set("name", text(name));
            change.add_field(Property::Name);
        }
        if let Some(description) = mds.description.non_null("description")? {
            update.set("description", text(description));
            change.add_field(Property::Description);
        }
        if let Some(types) = new_types {
            update.set("observation_types", SqlValue::Json(Value::from(types.clone())));
            change.add_field(Property::MultiObservationDataTypes);
        }
        if let Some(units) = new_units {
            update.set("unit_of_measurements", SqlValue::Json(serde_json::to_value(units)?));
            change.add_field(Property::UnitOfMeasurements);
        }
        if mds.properties.is_set() {
            update.set_opt("properties", json_field(&mds.properties));
            change.add_field(Property::Properties);
        }
        update.execute(conn).await?;

        let mut rank = max_rank;
        for op_id in new_property_ids {
            rank += 1;
            link_ranked_property(conn, mds_id, op_id, rank).await?;
            change.add_field(Navigation::ObservedProperties);
        }

        for obs in &mds.observations {
            let obs_id = self
                .require_existing(conn, EntityType::Observation, obs.id.as_ref())
                .await?;
            let stored: Option<Value> =
                sqlx::query_scalar("SELECT result_json FROM observations WHERE id = $1")
                    .bind(obs_id)
                    .fetch_one(&mut *conn)
                    .await?;
            self.check_result_length(conn, mds_id, stored.as_ref()).await?;

            let mut rehome = UpdateStatement::new(EntityType::Observation.table(), obs_id);
            rehome.set("multi_datastream_id", SqlValue::Long(mds_id));
            rehome.set_null("datastream_id");
            rehome.execute(conn).await?;
            debug!(obs_id, mds_id, "assigned Observation to MultiDatastream");
            change.add_field(Navigation::Observations);
        }
        Ok(change)
    }

    /// A MultiDatastream result is a list with one entry per ranked
    /// ObservedProperty.
    pub(super) async fn check_result_length(
        &self,
        conn: &mut PgConnection,
        mds_id: i64,
        result: Option<&Value>,
    ) -> StaResult<()> {
        // ---
        let Some(Value::Array(values)) = result else {
            return Err(StaError::illegal_argument(
                "Observation result for a MultiDatastream must be a list.",
            ));
        };
        let expected = self.ranked_property_count(conn, mds_id).await?;
        if i64::try_from(values.len()).ok() != Some(expected) {
            return Err(StaError::illegal_argument(format!(
                "Size of result list ({}) is not equal to number of ObservedProperties ({expected}).",
                values.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn aligned_lists_pass() {
        // ---
        assert_ok!(check_rank_alignment(0, 0, 0));
        assert_ok!(check_rank_alignment(3, 3, 3));
    }

    #[test]
    fn any_mismatch_is_illegal() {
        // ---
        assert!(matches!(
            check_rank_alignment(2, 3, 2),
            Err(StaError::IllegalArgument(_))
        ));
        assert!(matches!(
            check_rank_alignment(2, 2, 1),
            Err(StaError::IllegalArgument(_))
        ));
        assert_err!(check_rank_alignment(1, 0, 0));
    }
}

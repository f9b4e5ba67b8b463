use std::mem;

use sqlx::PgConnection;
use tracing::debug;

use super::statement::{Assignments, InsertStatement, UpdateStatement};
use super::{json_field, text, MutationEngine};
use crate::error::StaResult;
use crate::model::{
    Datastream, Entity, EntityChange, EntityType, Field, Navigation, Property, UnitOfMeasurement,
};
use crate::query::SqlValue;

// ---

fn set_unit(statement: &mut impl Assignments, unit: &UnitOfMeasurement) {
    statement.set_opt("unit_name", unit.name.as_deref().map(text));
    statement.set_opt("unit_symbol", unit.symbol.as_deref().map(text));
    statement.set_opt("unit_definition", unit.definition.as_deref().map(text));
}

impl MutationEngine {
    // ---
    pub(super) async fn insert_datastream(
        &self,
        conn: &mut PgConnection,
        mut ds: Datastream,
    ) -> StaResult<i64> {
        // ---
        let op_id = self
            .ensure_nav(
                conn,
                mem::take(&mut ds.observed_property),
                EntityType::Datastream,
                "ObservedProperty",
            )
            .await?;
        let sensor_id = self
            .ensure_nav(conn, mem::take(&mut ds.sensor), EntityType::Datastream, "Sensor")
            .await?;
        let thing_id = self
            .ensure_nav(conn, mem::take(&mut ds.thing), EntityType::Datastream, "Thing")
            .await?;

        // Time ranges stay NULL until refreshed explicitly.
        let mut insert = InsertStatement::new(EntityType::Datastream.table());
        insert.id(self.ids.assign(ds.id.as_ref()));
        insert.set("name", text(ds.name.required("name")?));
        insert.set("description", text(ds.description.required("description")?));
        insert.set("observation_type", text(ds.observation_type.required("observationType")?));
        set_unit(&mut insert, ds.unit_of_measurement.required("unitOfMeasurement")?);
        insert.set_opt("properties", json_field(&ds.properties));
        insert.set("obs_property_id", SqlValue::Long(op_id));
        insert.set("sensor_id", SqlValue::Long(sensor_id));
        insert.set("thing_id", SqlValue::Long(thing_id));
        let ds_id = insert.execute(conn).await?;
        debug!(ds_id, thing_id, sensor_id, op_id, "inserted Datastream");

        for mut obs in mem::take(&mut ds.observations) {
            obs.datastream = Field::Set(Box::new(Datastream::reference(ds_id)));
            obs.multi_datastream = Field::Absent;
            self.insert(conn, Entity::from(obs)).await?;
        }
        Ok(ds_id)
    }

    pub(super) async fn update_datastream(
        &self,
        conn: &mut PgConnection,
        ds_id: i64,
        ds: Datastream,
    ) -> StaResult<EntityChange> {
        // ---
        let mut change = EntityChange::updated(EntityType::Datastream, ds_id);
        let mut update = UpdateStatement::new(EntityType::Datastream.table(), ds_id);

        if let Some(thing) = ds.thing.non_null("Thing")? {
            let thing_id = self
                .require_existing(conn, EntityType::Thing, thing.id.as_ref())
                .await?;
            update.set("thing_id", SqlValue::Long(thing_id));
            change.add_field(Navigation::Thing);
        }
        if let Some(sensor) = ds.sensor.non_null("Sensor")? {
            let sensor_id = self
                .require_existing(conn, EntityType::Sensor, sensor.id.as_ref())
                .await?;
            update.set("sensor_id", SqlValue::Long(sensor_id));
            change.add_field(Navigation::Sensor);
        }
        if let Some(op) = ds.observed_property.non_null("ObservedProperty")? {
            let op_id = self
                .require_existing(conn, EntityType::ObservedProperty, op.id.as_ref())
                .await?;
            update.set("obs_property_id", SqlValue::Long(op_id));
            change.add_field(Navigation::ObservedProperty);
        }
        if let Some(name) = ds.name.non_null("name")? {
            update.set("name", text(name));
            change.add_field(Property::Name);
        }
        if let Some(description) = ds.description.non_null("description")? {
            update.set("description", text(description));
            change.add_field(Property::Description);
        }
        if let Some(observation_type) = ds.observation_type.non_null("observationType")? {
            update.set("observation_type", text(observation_type));
            change.add_field(Property::ObservationType);
        }
        if let Some(unit) = ds.unit_of_measurement.non_null("unitOfMeasurement")? {
            set_unit(&mut update, unit);
            change.add_field(Property::UnitOfMeasurement);
        }
        if ds.properties.is_set() {
            update.set_opt("properties", json_field(&ds.properties));
            change.add_field(Property::Properties);
        }
        update.execute(conn).await?;

        // Re-homed Observations leave any MultiDatastream they were on.
        for obs in &ds.observations {
            let obs_id = self
                .require_existing(conn, EntityType::Observation, obs.id.as_ref())
                .await?;
            let mut rehome = UpdateStatement::new(EntityType::Observation.table(), obs_id);
            rehome.set("datastream_id", SqlValue::Long(ds_id));
            rehome.set_null("multi_datastream_id");
            rehome.execute(conn).await?;
            debug!(obs_id, ds_id, "assigned Observation to Datastream");
            change.add_field(Navigation::Observations);
        }
        Ok(change)
    }
}

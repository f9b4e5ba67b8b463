use std::mem;

use sqlx::PgConnection;
use tracing::debug;

use super::statement::{Assignments, InsertStatement, UpdateStatement};
use super::{json_field, text, MutationEngine};
use crate::error::StaResult;
use crate::model::{Entity, EntityChange, EntityType, Field, Navigation, Property, Sensor};
use crate::query::SqlValue;

// ---

impl MutationEngine {
    // ---
    pub(super) async fn insert_sensor(&self, conn: &mut PgConnection, mut sensor: Sensor) -> StaResult<i64> {
        // ---
        let mut insert = InsertStatement::new(EntityType::Sensor.table());
        insert.id(self.ids.assign(sensor.id.as_ref()));
        insert.set("name", text(sensor.name.required("name")?));
        insert.set("description", text(sensor.description.required("description")?));
        insert.set("encoding_type", text(sensor.encoding_type.required("encodingType")?));
        insert.set(
            "metadata",
            SqlValue::Json(sensor.metadata.required("metadata")?.clone()),
        );
        insert.set_opt("properties", json_field(&sensor.properties));
        let sensor_id = insert.execute(conn).await?;
        debug!(sensor_id, "inserted Sensor");

        for mut ds in mem::take(&mut sensor.datastreams) {
            ds.sensor = Field::Set(Box::new(Sensor::reference(sensor_id)));
            self.insert(conn, Entity::from(ds)).await?;
        }
        for mut mds in mem::take(&mut sensor.multi_datastreams) {
            mds.sensor = Field::Set(Box::new(Sensor::reference(sensor_id)));
            self.insert(conn, Entity::from(mds)).await?;
        }
        Ok(sensor_id)
    }

    pub(super) async fn update_sensor(
        &self,
        conn: &mut PgConnection,
        sensor_id: i64,
        sensor: Sensor,
    ) -> StaResult<EntityChange> {
        // ---
        let mut change = EntityChange::updated(EntityType::Sensor, sensor_id);
        let mut update = UpdateStatement::new(EntityType::Sensor.table(), sensor_id);

        if let Some(name) = sensor.name.non_null("name")? {
            update.set("name", text(name));
            change.add_field(Property::Name);
        }
        if let Some(description) = sensor.description.non_null("description")? {
            update.set("description", text(description));
            change.add_field(Property::Description);
        }
        if let Some(encoding_type) = sensor.encoding_type.non_null("encodingType")? {
            update.set("encoding_type", text(encoding_type));
            change.add_field(Property::EncodingType);
        }
        if let Some(metadata) = sensor.metadata.non_null("metadata")? {
            update.set("metadata", SqlValue::Json(metadata.clone()));
            change.add_field(Property::Metadata);
        }
        if sensor.properties.is_set() {
            update.set_opt("properties", json_field(&sensor.properties));
            change.add_field(Property::Properties);
        }
        update.execute(conn).await?;

        for ds in &sensor.datastreams {
            let ds_id = self
                .require_existing(conn, EntityType::Datastream, ds.id.as_ref())
                .await?;
            self.reparent(conn, EntityType::Datastream, ds_id, "sensor_id", sensor_id)
                .await?;
            change.add_field(Navigation::Datastreams);
        }
        for mds in &sensor.multi_datastreams {
            let mds_id = self
                .require_existing(conn, EntityType::MultiDatastream, mds.id.as_ref())
                .await?;
            self.reparent(conn, EntityType::MultiDatastream, mds_id, "sensor_id", sensor_id)
                .await?;
            change.add_field(Navigation::MultiDatastreams);
        }
        Ok(change)
    }
}

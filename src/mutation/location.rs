use std::mem;

use sqlx::PgConnection;
use tracing::debug;

use super::links::{link_hist_location, relocate_thing};
use super::statement::{Assignments, InsertStatement, UpdateStatement};
use super::{json_field, text, MutationEngine};
use crate::error::{StaError, StaResult};
use crate::model::{Entity, EntityChange, EntityType, Location, Navigation, Property};

// ---

impl MutationEngine {
    // ---
    pub(super) async fn insert_location(
        &self,
        conn: &mut PgConnection,
        mut location: Location,
    ) -> StaResult<i64> {
        // ---
        let encoding_type = location.encoding_type.required("encodingType")?;
        let encoded = self
            .codec
            .encode(location.location.required("location")?, encoding_type)?;

        let mut insert = InsertStatement::new(EntityType::Location.table());
        insert.id(self.ids.assign(location.id.as_ref()));
        insert.set("name", text(location.name.required("name")?));
        insert.set("description", text(location.description.required("description")?));
        insert.set("encoding_type", text(encoding_type));
        insert.set_geometry("location", encoded);
        insert.set_opt("properties", json_field(&location.properties));
        let location_id = insert.execute(conn).await?;
        debug!(location_id, "inserted Location");

        for thing in mem::take(&mut location.things) {
            let thing_id = self.ensure(conn, Entity::from(thing)).await?;
            relocate_thing(conn, thing_id, &[location_id]).await?;
        }
        for hl in mem::take(&mut location.historical_locations) {
            let hl_id = self.ensure(conn, Entity::from(hl)).await?;
            link_hist_location(conn, hl_id, location_id).await?;
            // The link can make this entry's Location set current.
            self.reapply_recency(conn, hl_id).await?;
        }
        Ok(location_id)
    }

    pub(super) async fn update_location(
        &self,
        conn: &mut PgConnection,
        location_id: i64,
        location: Location,
    ) -> StaResult<EntityChange> {
        // ---
        let mut change = EntityChange::updated(EntityType::Location, location_id);
        let mut update = UpdateStatement::new(EntityType::Location.table(), location_id);

        if let Some(name) = location.name.non_null("name")? {
            update.set("name", text(name));
            change.add_field(Property::Name);
        }
        if let Some(description) = location.description.non_null("description")? {
            update.set("description", text(description));
            change.add_field(Property::Description);
        }
        if location.properties.is_set() {
            update.set_opt("properties", json_field(&location.properties));
            change.add_field(Property::Properties);
        }

        let new_encoding = location.encoding_type.non_null("encodingType")?;
        let new_payload = location.location.non_null("location")?;
        match (new_encoding, new_payload) {
            (Some(encoding_type), Some(payload)) => {
                update.set("encoding_type", text(encoding_type));
                update.set_geometry("location", self.codec.encode(payload, encoding_type)?);
                change.add_field(Property::EncodingType);
                change.add_field(Property::Location);
            }
            (Some(encoding_type), None) => {
                // Re-derive the stored payload under the new encoding.
                let (_, stored) = self.stored_payload(conn, EntityType::Location, location_id).await?;
                update.set("encoding_type", text(encoding_type));
                if let Some(stored) = stored {
                    let payload = self.codec.decode(encoding_type, &stored)?;
                    update.set_geometry("location", self.codec.encode(&payload, encoding_type)?);
                }
                change.add_field(Property::EncodingType);
            }
            (None, Some(payload)) => {
                let (stored_encoding, _) =
                    self.stored_payload(conn, EntityType::Location, location_id).await?;
                let encoding_type = stored_encoding.unwrap_or_default();
                let payload = self.codec.reparse(&encoding_type, payload)?;
                update.set_geometry("location", self.codec.encode(&payload, &encoding_type)?);
                change.add_field(Property::Location);
            }
            (None, None) => {}
        }
        update.execute(conn).await?;

        for hl in &location.historical_locations {
            let hl_id = self
                .require_existing(conn, EntityType::HistoricalLocation, hl.id.as_ref())
                .await?;
            link_hist_location(conn, hl_id, location_id).await?;
            self.reapply_recency(conn, hl_id).await?;
            change.add_field(Navigation::HistoricalLocations);
        }
        for thing in &location.things {
            let thing_id = self
                .require_existing(conn, EntityType::Thing, thing.id.as_ref())
                .await?;
            relocate_thing(conn, thing_id, &[location_id]).await?;
            change.add_field(Navigation::Things);
        }
        Ok(change)
    }

    /// Stored `(encoding_type, payload)` of a Location or FeatureOfInterest.
    pub(super) async fn stored_payload(
        &self,
        conn: &mut PgConnection,
        entity_type: EntityType,
        id: i64,
    ) -> StaResult<(Option<String>, Option<String>)> {
        // ---
        let payload_column = match entity_type {
            EntityType::Location => "location",
            EntityType::FeatureOfInterest => "feature",
            other => {
                return Err(StaError::configuration(format!(
                    "{other} carries no geometry payload"
                )))
            }
        };
        let sql = format!(
            "SELECT encoding_type, {payload_column} FROM {} WHERE id = $1",
            entity_type.table()
        );
        let row: Option<(Option<String>, Option<String>)> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        row.ok_or_else(|| StaError::no_such_entity(format!("No such {entity_type} with id {id}.")))
    }
}

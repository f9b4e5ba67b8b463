use std::mem;

use sqlx::PgConnection;
use tracing::debug;

use super::statement::{execute, Assignments, InsertStatement, UpdateStatement};
use super::{json_field, text, MutationEngine};
use crate::error::{StaError, StaResult};
use crate::model::{
    Entity, EntityChange, EntityType, FeatureOfInterest, Field, Navigation, Property,
};
use crate::query::{SqlFragment, SqlValue};

// ---

impl MutationEngine {
    // ---
    pub(super) async fn insert_feature(
        &self,
        conn: &mut PgConnection,
        mut foi: FeatureOfInterest,
    ) -> StaResult<i64> {
        // ---
        let encoding_type = foi.encoding_type.required("encodingType")?;
        let encoded = self
            .codec
            .encode(foi.feature.required("feature")?, encoding_type)?;

        let mut insert = InsertStatement::new(EntityType::FeatureOfInterest.table());
        insert.id(self.ids.assign(foi.id.as_ref()));
        insert.set("name", text(foi.name.required("name")?));
        insert.set("description", text(foi.description.required("description")?));
        insert.set("encoding_type", text(encoding_type));
        insert.set_geometry("feature", encoded);
        insert.set_opt("properties", json_field(&foi.properties));
        let foi_id = insert.execute(conn).await?;
        debug!(foi_id, "inserted FeatureOfInterest");

        for mut obs in mem::take(&mut foi.observations) {
            obs.feature_of_interest = Field::Set(Box::new(FeatureOfInterest::reference(foi_id)));
            self.insert(conn, Entity::from(obs)).await?;
        }
        Ok(foi_id)
    }

    pub(super) async fn update_feature(
        &self,
        conn: &mut PgConnection,
        foi_id: i64,
        foi: FeatureOfInterest,
    ) -> StaResult<EntityChange> {
        // ---
        let mut change = EntityChange::updated(EntityType::FeatureOfInterest, foi_id);
        let mut update = UpdateStatement::new(EntityType::FeatureOfInterest.table(), foi_id);

        if let Some(name) = foi.name.non_null("name")? {
            update.set("name", text(name));
            change.add_field(Property::Name);
        }
        if let Some(description) = foi.description.non_null("description")? {
            update.set("description", text(description));
            change.add_field(Property::Description);
        }
        if foi.properties.is_set() {
            update.set_opt("properties", json_field(&foi.properties));
            change.add_field(Property::Properties);
        }

        let new_encoding = foi.encoding_type.non_null("encodingType")?;
        let new_feature = foi.feature.non_null("feature")?;
        match (new_encoding, new_feature) {
            (Some(encoding_type), Some(feature)) => {
                update.set("encoding_type", text(encoding_type));
                update.set_geometry("feature", self.codec.encode(feature, encoding_type)?);
                change.add_field(Property::EncodingType);
                change.add_field(Property::Feature);
            }
            (Some(encoding_type), None) => {
                let (_, stored) = self
                    .stored_payload(conn, EntityType::FeatureOfInterest, foi_id)
                    .await?;
                update.set("encoding_type", text(encoding_type));
                if let Some(stored) = stored {
                    let feature = self.codec.decode(encoding_type, &stored)?;
                    update.set_geometry("feature", self.codec.encode(&feature, encoding_type)?);
                }
                change.add_field(Property::EncodingType);
            }
            (None, Some(feature)) => {
                let (stored_encoding, _) = self
                    .stored_payload(conn, EntityType::FeatureOfInterest, foi_id)
                    .await?;
                let encoding_type = stored_encoding.unwrap_or_default();
                let feature = self.codec.reparse(&encoding_type, feature)?;
                update.set_geometry("feature", self.codec.encode(&feature, &encoding_type)?);
                change.add_field(Property::Feature);
            }
            (None, None) => {}
        }
        update.execute(conn).await?;

        for obs in &foi.observations {
            let obs_id = self
                .require_existing(conn, EntityType::Observation, obs.id.as_ref())
                .await?;
            self.reparent(conn, EntityType::Observation, obs_id, "feature_id", foi_id)
                .await?;
            change.add_field(Navigation::Observations);
        }
        Ok(change)
    }

    /// FeatureOfInterest for an Observation that names none, derived from
    /// the Locations of the stream's Thing. A feature generated earlier from
    /// one of those Locations is reused.
    pub(super) async fn generate_feature_of_interest(
        &self,
        conn: &mut PgConnection,
        datastream_id: Option<i64>,
        multi_datastream_id: Option<i64>,
    ) -> StaResult<i64> {
        // ---
        let (stream_table, stream_id) = match (datastream_id, multi_datastream_id) {
            (Some(id), _) => (EntityType::Datastream.table(), id),
            (None, Some(id)) => (EntityType::MultiDatastream.table(), id),
            (None, None) => {
                return Err(StaError::illegal_argument(
                    "Observation must have either a Datastream or a MultiDatastream.",
                ))
            }
        };

        let sql = format!(
            "SELECT l.id, l.encoding_type, l.location, l.gen_foi_id \
             FROM locations AS l \
             INNER JOIN things_locations AS tl ON tl.location_id = l.id \
             INNER JOIN {stream_table} AS s ON s.thing_id = tl.thing_id \
             WHERE s.id = $1 ORDER BY l.id"
        );
        let locations: Vec<(i64, Option<String>, Option<String>, Option<i64>)> =
            sqlx::query_as(&sql)
                .bind(stream_id)
                .fetch_all(&mut *conn)
                .await?;
        if locations.is_empty() {
            return Err(StaError::no_such_entity(
                "Can not generate foi for Thing with no locations.",
            ));
        }

        if let Some(foi_id) = locations.iter().find_map(|(_, _, _, generated)| *generated) {
            debug!(foi_id, stream_id, "reusing generated FeatureOfInterest");
            return Ok(foi_id);
        }

        let source = locations.into_iter().find_map(|(id, encoding, payload, _)| match (encoding, payload) {
            (Some(encoding), Some(payload)) if self.codec.is_geo_encoding(&encoding) => {
                Some((id, encoding, payload))
            }
            _ => None,
        });
        let Some((location_id, encoding_type, payload)) = source else {
            return Err(StaError::no_such_entity(
                "Can not generate foi for Thing, all locations have an unsupported encoding type.",
            ));
        };

        let feature = self.codec.decode(&encoding_type, &payload)?;
        let foi = FeatureOfInterest {
            name: Field::Set(format!("FoI for location {location_id}")),
            description: Field::Set(format!("Generated from location {location_id}")),
            encoding_type: Field::Set(encoding_type),
            feature: Field::Set(feature),
            ..Default::default()
        };
        let foi_id = self.insert(conn, Entity::from(foi)).await?;

        execute(
            conn,
            SqlFragment::raw("UPDATE locations SET gen_foi_id = ")
                .bind(SqlValue::Long(foi_id))
                .sql(" WHERE id = ")
                .bind(SqlValue::Long(location_id)),
        )
        .await?;
        debug!(foi_id, location_id, "generated FeatureOfInterest from Location");
        Ok(foi_id)
    }
}

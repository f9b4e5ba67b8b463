use std::mem;

use sqlx::PgConnection;
use tracing::debug;

use super::statement::{Assignments, InsertStatement, UpdateStatement};
use super::{json_field, text, MutationEngine};
use crate::error::{StaError, StaResult};
use crate::model::{
    Entity, EntityChange, EntityType, Field, Navigation, ObservedProperty, Property,
};

// ---

impl MutationEngine {
    // ---
    pub(super) async fn insert_observed_property(
        &self,
        conn: &mut PgConnection,
        mut op: ObservedProperty,
    ) -> StaResult<i64> {
        // ---
        let mut insert = InsertStatement::new(EntityType::ObservedProperty.table());
        insert.id(self.ids.assign(op.id.as_ref()));
        insert.set("name", text(op.name.required("name")?));
        insert.set("definition", text(op.definition.required("definition")?));
        insert.set("description", text(op.description.required("description")?));
        insert.set_opt("properties", json_field(&op.properties));
        let op_id = insert.execute(conn).await?;
        debug!(op_id, "inserted ObservedProperty");

        for mut ds in mem::take(&mut op.datastreams) {
            ds.observed_property = Field::Set(Box::new(ObservedProperty::reference(op_id)));
            self.insert(conn, Entity::from(ds)).await?;
        }
        // A MultiDatastream created here gets this ObservedProperty at rank 0.
        for mut mds in mem::take(&mut op.multi_datastreams) {
            mds.observed_properties
                .insert(0, ObservedProperty::reference(op_id));
            self.insert(conn, Entity::from(mds)).await?;
        }
        Ok(op_id)
    }

    pub(super) async fn update_observed_property(
        &self,
        conn: &mut PgConnection,
        op_id: i64,
        op: ObservedProperty,
    ) -> StaResult<EntityChange> {
        // ---
        if !op.multi_datastreams.is_empty() {
            return Err(StaError::illegal_argument(
                "Can not add MultiDatastreams to an ObservedProperty.",
            ));
        }

        let mut change = EntityChange::updated(EntityType::ObservedProperty, op_id);
        let mut update = UpdateStatement::new(EntityType::ObservedProperty.table(), op_id);

        if let Some(name) = op.name.non_null("name")? {
            update.set("name", text(name));
            change.add_field(Property::Name);
        }
        if let Some(definition) = op.definition.non_null("definition")? {
            update.set("definition", text(definition));
            change.add_field(Property::Definition);
        }
        if let Some(description) = op.description.non_null("description")? {
            update.set("description", text(description));
            change.add_field(Property::Description);
        }
        if op.properties.is_set() {
            update.set_opt("properties", json_field(&op.properties));
            change.add_field(Property::Properties);
        }
        update.execute(conn).await?;

        for ds in &op.datastreams {
            let ds_id = self
                .require_existing(conn, EntityType::Datastream, ds.id.as_ref())
                .await?;
            self.reparent(conn, EntityType::Datastream, ds_id, "obs_property_id", op_id)
                .await?;
            change.add_field(Navigation::Datastreams);
        }
        Ok(change)
    }
}

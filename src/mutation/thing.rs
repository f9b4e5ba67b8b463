use std::mem;

use sqlx::PgConnection;
use tracing::debug;

use super::links::relocate_thing;
use super::statement::{Assignments, InsertStatement, UpdateStatement};
use super::{json_field, text, MutationEngine};
use crate::error::StaResult;
use crate::model::{Entity, EntityChange, EntityType, Field, Navigation, Property, Thing};
use crate::query::SqlValue;

// ---

impl MutationEngine {
    // ---
    pub(super) async fn insert_thing(&self, conn: &mut PgConnection, mut thing: Thing) -> StaResult<i64> {
        // ---
        let mut insert = InsertStatement::new(EntityType::Thing.table());
        insert.id(self.ids.assign(thing.id.as_ref()));
        insert.set("name", text(thing.name.required("name")?));
        insert.set("description", text(thing.description.required("description")?));
        insert.set_opt("properties", json_field(&thing.properties));
        let thing_id = insert.execute(conn).await?;
        debug!(thing_id, "inserted Thing");

        let mut location_ids = Vec::new();
        for location in mem::take(&mut thing.locations) {
            location_ids.push(self.ensure(conn, Entity::from(location)).await?);
        }
        if !location_ids.is_empty() {
            relocate_thing(conn, thing_id, &location_ids).await?;
        }

        for mut hl in mem::take(&mut thing.historical_locations) {
            hl.thing = Field::Set(Box::new(Thing::reference(thing_id)));
            self.insert(conn, Entity::from(hl)).await?;
        }
        for mut ds in mem::take(&mut thing.datastreams) {
            ds.thing = Field::Set(Box::new(Thing::reference(thing_id)));
            self.insert(conn, Entity::from(ds)).await?;
        }
        for mut mds in mem::take(&mut thing.multi_datastreams) {
            mds.thing = Field::Set(Box::new(Thing::reference(thing_id)));
            self.insert(conn, Entity::from(mds)).await?;
        }
        Ok(thing_id)
    }

    pub(super) async fn update_thing(
        &self,
        conn: &mut PgConnection,
        thing_id: i64,
        thing: Thing,
    ) -> StaResult<EntityChange> {
        // ---
        let mut change = EntityChange::updated(EntityType::Thing, thing_id);
        let mut update = UpdateStatement::new(EntityType::Thing.table(), thing_id);

        if let Some(name) = thing.name.non_null("name")? {
            update.set("name", text(name));
            change.add_field(Property::Name);
        }
        if let Some(description) = thing.description.non_null("description")? {
            update.set("description", text(description));
            change.add_field(Property::Description);
        }
        if thing.properties.is_set() {
            update.set_opt("properties", json_field(&thing.properties));
            change.add_field(Property::Properties);
        }
        update.execute(conn).await?;

        for ds in &thing.datastreams {
            let ds_id = self
                .require_existing(conn, EntityType::Datastream, ds.id.as_ref())
                .await?;
            self.reparent(conn, EntityType::Datastream, ds_id, "thing_id", thing_id)
                .await?;
            change.add_field(Navigation::Datastreams);
        }
        for mds in &thing.multi_datastreams {
            let mds_id = self
                .require_existing(conn, EntityType::MultiDatastream, mds.id.as_ref())
                .await?;
            self.reparent(conn, EntityType::MultiDatastream, mds_id, "thing_id", thing_id)
                .await?;
            change.add_field(Navigation::MultiDatastreams);
        }

        if !thing.locations.is_empty() {
            let mut location_ids = Vec::with_capacity(thing.locations.len());
            for location in &thing.locations {
                location_ids.push(
                    self.require_existing(conn, EntityType::Location, location.id.as_ref())
                        .await?,
                );
            }
            relocate_thing(conn, thing_id, &location_ids).await?;
            change.add_field(Navigation::Locations);
        }
        Ok(change)
    }

    /// Point a child row's foreign key at a new parent.
    pub(super) async fn reparent(
        &self,
        conn: &mut PgConnection,
        child: EntityType,
        child_id: i64,
        column: &'static str,
        parent_id: i64,
    ) -> StaResult<()> {
        // ---
        let mut update = UpdateStatement::new(child.table(), child_id);
        update.set(column, SqlValue::Long(parent_id));
        update.execute(conn).await?;
        debug!(%child, child_id, column, parent_id, "re-parented");
        Ok(())
    }
}

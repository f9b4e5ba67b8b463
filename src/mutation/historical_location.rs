use std::mem;

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::debug;

use super::links::{
    hist_location_locations, is_latest, latest_hist_location, link_hist_location, replace_current_locations,
};
use super::statement::{Assignments, InsertStatement, UpdateStatement};
use super::MutationEngine;
use crate::error::StaResult;
use crate::model::{Entity, EntityChange, EntityType, HistoricalLocation, Navigation, Property};
use crate::query::SqlValue;

// ---

impl MutationEngine {
    // ---
    pub(super) async fn insert_historical_location(
        &self,
        conn: &mut PgConnection,
        mut hl: HistoricalLocation,
    ) -> StaResult<i64> {
        // ---
        let time = *hl.time.required("time")?;
        let thing_id = self
            .ensure_nav(
                conn,
                mem::take(&mut hl.thing),
                EntityType::HistoricalLocation,
                "Thing",
            )
            .await?;

        let mut insert = InsertStatement::new(EntityType::HistoricalLocation.table());
        insert.id(self.ids.assign(hl.id.as_ref()));
        insert.set("time", SqlValue::Timestamp(time));
        insert.set("thing_id", SqlValue::Long(thing_id));
        let hl_id = insert.execute(conn).await?;
        debug!(hl_id, thing_id, "inserted HistoricalLocation");

        let mut location_ids = Vec::with_capacity(hl.locations.len());
        for location in mem::take(&mut hl.locations) {
            let location_id = self.ensure(conn, Entity::from(location)).await?;
            link_hist_location(conn, hl_id, location_id).await?;
            location_ids.push(location_id);
        }

        self.apply_recency(conn, thing_id, time, &location_ids).await?;
        Ok(hl_id)
    }

    pub(super) async fn update_historical_location(
        &self,
        conn: &mut PgConnection,
        hl_id: i64,
        hl: HistoricalLocation,
    ) -> StaResult<EntityChange> {
        // ---
        let mut change = EntityChange::updated(EntityType::HistoricalLocation, hl_id);
        let mut update = UpdateStatement::new(EntityType::HistoricalLocation.table(), hl_id);
        let old_thing_id: Option<i64> =
            sqlx::query_scalar("SELECT thing_id FROM hist_locations WHERE id = $1")
                .bind(hl_id)
                .fetch_optional(&mut *conn)
                .await?;

        if let Some(time) = hl.time.non_null("time")? {
            update.set("time", SqlValue::Timestamp(*time));
            change.add_field(Property::Time);
        }
        if let Some(thing) = hl.thing.non_null("Thing")? {
            let thing_id = self
                .require_existing(conn, EntityType::Thing, thing.id.as_ref())
                .await?;
            update.set("thing_id", SqlValue::Long(thing_id));
            change.add_field(Navigation::Thing);
        }
        update.execute(conn).await?;

        for location in &hl.locations {
            let location_id = self
                .require_existing(conn, EntityType::Location, location.id.as_ref())
                .await?;
            link_hist_location(conn, hl_id, location_id).await?;
            change.add_field(Navigation::Locations);
        }

        if !change.is_empty_update() {
            let thing_id = self.reapply_recency(conn, hl_id).await?;
            // A Thing that lost this entry falls back to its own latest one.
            if let Some(old) = old_thing_id.filter(|old| *old != thing_id) {
                self.current_from_latest(conn, old).await?;
            }
        }
        Ok(change)
    }

    /// Re-derive the current Locations of the Thing owning `hl_id` after
    /// the entry's time, Thing or Locations changed. Returns that Thing.
    pub(super) async fn reapply_recency(&self, conn: &mut PgConnection, hl_id: i64) -> StaResult<i64> {
        // ---
        let thing_id: i64 = sqlx::query_scalar("SELECT thing_id FROM hist_locations WHERE id = $1")
            .bind(hl_id)
            .fetch_one(&mut *conn)
            .await?;
        self.current_from_latest(conn, thing_id).await?;
        Ok(thing_id)
    }

    /// Current Locations follow the Thing's latest HistoricalLocation.
    /// A Thing without history keeps what it has.
    async fn current_from_latest(&self, conn: &mut PgConnection, thing_id: i64) -> StaResult<()> {
        // ---
        let Some(latest) = latest_hist_location(conn, thing_id).await? else {
            return Ok(());
        };
        let location_ids = hist_location_locations(conn, latest).await?;
        replace_current_locations(conn, thing_id, &location_ids).await?;
        debug!(thing_id, latest, "current Locations follow the latest HistoricalLocation");
        Ok(())
    }

    /// When `time` is the latest for the Thing, its current Locations
    /// become `location_ids`; otherwise the entry is history only.
    async fn apply_recency(
        &self,
        conn: &mut PgConnection,
        thing_id: i64,
        time: DateTime<Utc>,
        location_ids: &[i64],
    ) -> StaResult<()> {
        // ---
        if is_latest(conn, thing_id, time).await? {
            replace_current_locations(conn, thing_id, location_ids).await?;
            debug!(thing_id, %time, "HistoricalLocation is the latest, current Locations replaced");
        } else {
            debug!(thing_id, %time, "HistoricalLocation recorded as history");
        }
        Ok(())
    }
}

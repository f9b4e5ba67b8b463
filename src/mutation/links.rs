//! Link-table maintenance.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::debug;

use super::statement::{execute, Assignments, InsertStatement};
use crate::error::StaResult;
use crate::query::{SqlFragment, SqlValue};

// ---

pub(super) async fn link_thing_location(
    conn: &mut PgConnection,
    thing_id: i64,
    location_id: i64,
) -> StaResult<()> {
    // ---
    execute(
        conn,
        SqlFragment::raw("INSERT INTO things_locations (thing_id, location_id) VALUES (")
            .bind(SqlValue::Long(thing_id))
            .sql(", ")
            .bind(SqlValue::Long(location_id))
            .sql(") ON CONFLICT DO NOTHING"),
    )
    .await?;
    debug!(thing_id, location_id, "linked Location to Thing");
    Ok(())
}

pub(super) async fn link_hist_location(
    conn: &mut PgConnection,
    hist_location_id: i64,
    location_id: i64,
) -> StaResult<()> {
    // ---
    execute(
        conn,
        SqlFragment::raw(
            "INSERT INTO locations_hist_locations (hist_location_id, location_id) VALUES (",
        )
        .bind(SqlValue::Long(hist_location_id))
        .sql(", ")
        .bind(SqlValue::Long(location_id))
        .sql(") ON CONFLICT DO NOTHING"),
    )
    .await?;
    debug!(hist_location_id, location_id, "linked Location to HistoricalLocation");
    Ok(())
}

/// Replace a Thing's current Locations with exactly `location_ids`.
pub(super) async fn replace_current_locations(
    conn: &mut PgConnection,
    thing_id: i64,
    location_ids: &[i64],
) -> StaResult<()> {
    // ---
    let removed = execute(
        conn,
        SqlFragment::raw("DELETE FROM things_locations WHERE thing_id = ")
            .bind(SqlValue::Long(thing_id)),
    )
    .await?;
    debug!(thing_id, removed, "unlinked current Locations");

    for location_id in location_ids {
        link_thing_location(conn, thing_id, *location_id).await?;
    }
    Ok(())
}

/// Move a Thing to `location_ids` and record the move as a
/// HistoricalLocation stamped now. Returns the HistoricalLocation key.
pub(super) async fn relocate_thing(
    conn: &mut PgConnection,
    thing_id: i64,
    location_ids: &[i64],
) -> StaResult<i64> {
    // ---
    replace_current_locations(conn, thing_id, location_ids).await?;

    let mut insert = InsertStatement::new("hist_locations");
    insert.set("time", SqlValue::Timestamp(Utc::now()));
    insert.set("thing_id", SqlValue::Long(thing_id));
    let hist_location_id = insert.execute(conn).await?;
    debug!(thing_id, hist_location_id, "created HistoricalLocation");

    for location_id in location_ids {
        link_hist_location(conn, hist_location_id, *location_id).await?;
    }
    Ok(hist_location_id)
}

/// Locations linked to a HistoricalLocation, in key order.
pub(super) async fn hist_location_locations(
    conn: &mut PgConnection,
    hist_location_id: i64,
) -> StaResult<Vec<i64>> {
    // ---
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT location_id FROM locations_hist_locations WHERE hist_location_id = $1 ORDER BY location_id",
    )
    .bind(hist_location_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

/// True when no HistoricalLocation of the Thing is strictly later than `time`.
pub(super) async fn is_latest(
    conn: &mut PgConnection,
    thing_id: i64,
    time: DateTime<Utc>,
) -> StaResult<bool> {
    // ---
    let later: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM hist_locations WHERE thing_id = $1 AND time > $2",
    )
    .bind(thing_id)
    .bind(time)
    .fetch_one(&mut *conn)
    .await?;
    Ok(later == 0)
}

/// The most recent HistoricalLocation of a Thing; ties go to the newer key.
pub(super) async fn latest_hist_location(
    conn: &mut PgConnection,
    thing_id: i64,
) -> StaResult<Option<i64>> {
    // ---
    let id = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM hist_locations WHERE thing_id = $1 ORDER BY time DESC, id DESC LIMIT 1",
    )
    .bind(thing_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(id)
}

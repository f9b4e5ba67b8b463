//! Database schema management for the SensorThings store.
//!
//! Ensures the PostGIS extension, every entity table and the link tables
//! exist before serving requests. Applied once on startup from `main.rs`.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Tables in dependency order; each statement is idempotent.
const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS things (
        id          BIGSERIAL PRIMARY KEY,
        name        TEXT NOT NULL,
        description TEXT NOT NULL,
        properties  JSONB
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS features (
        id            BIGSERIAL PRIMARY KEY,
        name          TEXT NOT NULL,
        description   TEXT NOT NULL,
        encoding_type TEXT NOT NULL,
        feature       TEXT,
        geom          geometry(Geometry, 4326),
        properties    JSONB
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS locations (
        id            BIGSERIAL PRIMARY KEY,
        name          TEXT NOT NULL,
        description   TEXT NOT NULL,
        encoding_type TEXT NOT NULL,
        location      TEXT,
        geom          geometry(Geometry, 4326),
        properties    JSONB,
        gen_foi_id    BIGINT REFERENCES features (id) ON DELETE SET NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS things_locations (
        thing_id    BIGINT NOT NULL REFERENCES things (id) ON DELETE CASCADE,
        location_id BIGINT NOT NULL REFERENCES locations (id) ON DELETE CASCADE,
        PRIMARY KEY (thing_id, location_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS hist_locations (
        id       BIGSERIAL PRIMARY KEY,
        time     TIMESTAMPTZ NOT NULL,
        thing_id BIGINT NOT NULL REFERENCES things (id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS locations_hist_locations (
        location_id      BIGINT NOT NULL REFERENCES locations (id) ON DELETE CASCADE,
        hist_location_id BIGINT NOT NULL REFERENCES hist_locations (id) ON DELETE CASCADE,
        PRIMARY KEY (location_id, hist_location_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sensors (
        id            BIGSERIAL PRIMARY KEY,
        name          TEXT NOT NULL,
        description   TEXT NOT NULL,
        encoding_type TEXT NOT NULL,
        metadata      JSONB NOT NULL,
        properties    JSONB
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS obs_properties (
        id          BIGSERIAL PRIMARY KEY,
        name        TEXT NOT NULL,
        definition  TEXT NOT NULL,
        description TEXT NOT NULL,
        properties  JSONB
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS datastreams (
        id                    BIGSERIAL PRIMARY KEY,
        name                  TEXT NOT NULL,
        description           TEXT NOT NULL,
        observation_type      TEXT NOT NULL,
        unit_name             TEXT,
        unit_symbol           TEXT,
        unit_definition       TEXT,
        properties            JSONB,
        phenomenon_time_start TIMESTAMPTZ,
        phenomenon_time_end   TIMESTAMPTZ,
        result_time_start     TIMESTAMPTZ,
        result_time_end       TIMESTAMPTZ,
        thing_id              BIGINT NOT NULL REFERENCES things (id) ON DELETE CASCADE,
        sensor_id             BIGINT NOT NULL REFERENCES sensors (id) ON DELETE CASCADE,
        obs_property_id       BIGINT NOT NULL REFERENCES obs_properties (id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS multi_datastreams (
        id                    BIGSERIAL PRIMARY KEY,
        name                  TEXT NOT NULL,
        description           TEXT NOT NULL,
        observation_types     JSONB NOT NULL,
        unit_of_measurements  JSONB NOT NULL,
        properties            JSONB,
        phenomenon_time_start TIMESTAMPTZ,
        phenomenon_time_end   TIMESTAMPTZ,
        result_time_start     TIMESTAMPTZ,
        result_time_end       TIMESTAMPTZ,
        thing_id              BIGINT NOT NULL REFERENCES things (id) ON DELETE CASCADE,
        sensor_id             BIGINT NOT NULL REFERENCES sensors (id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS multi_datastreams_obs_properties (
        multi_datastream_id BIGINT NOT NULL REFERENCES multi_datastreams (id) ON DELETE CASCADE,
        obs_property_id     BIGINT NOT NULL REFERENCES obs_properties (id) ON DELETE CASCADE,
        rank                INTEGER NOT NULL,
        PRIMARY KEY (multi_datastream_id, obs_property_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS observations (
        id                    BIGSERIAL PRIMARY KEY,
        phenomenon_time_start TIMESTAMPTZ NOT NULL,
        phenomenon_time_end   TIMESTAMPTZ NOT NULL,
        result_time           TIMESTAMPTZ,
        valid_time_start      TIMESTAMPTZ,
        valid_time_end        TIMESTAMPTZ,
        result_type           INTEGER NOT NULL,
        result_string         TEXT,
        result_number         DOUBLE PRECISION,
        result_boolean        BOOLEAN,
        result_json           JSONB,
        result_quality        JSONB,
        parameters            JSONB,
        datastream_id         BIGINT REFERENCES datastreams (id) ON DELETE CASCADE,
        multi_datastream_id   BIGINT REFERENCES multi_datastreams (id) ON DELETE CASCADE,
        feature_id            BIGINT NOT NULL REFERENCES features (id) ON DELETE CASCADE,
        CHECK ((datastream_id IS NULL) <> (multi_datastream_id IS NULL))
    )
    "#,
];

/// Foreign-key and recency lookups the mutation engine runs on every write.
const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_hist_locations_thing_time ON hist_locations (thing_id, time)",
    "CREATE INDEX IF NOT EXISTS idx_datastreams_thing ON datastreams (thing_id)",
    "CREATE INDEX IF NOT EXISTS idx_multi_datastreams_thing ON multi_datastreams (thing_id)",
    "CREATE INDEX IF NOT EXISTS idx_observations_datastream ON observations (datastream_id)",
    "CREATE INDEX IF NOT EXISTS idx_observations_multi_datastream ON observations (multi_datastream_id)",
    "CREATE INDEX IF NOT EXISTS idx_observations_feature ON observations (feature_id)",
    "CREATE INDEX IF NOT EXISTS idx_locations_geom ON locations USING GIST (geom)",
    "CREATE INDEX IF NOT EXISTS idx_features_geom ON features USING GIST (geom)",
];

/// Create or update the database schema (idempotent).
///
/// Safe to call on every startup; no-op if objects already exist.
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Concurrent `IF NOT EXISTS` DDL can still collide on the catalog.
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext('sensorthings_schema'))")
        .execute(&mut *tx)
        .await?;

    sqlx::query("CREATE EXTENSION IF NOT EXISTS postgis")
        .execute(&mut *tx)
        .await?;

    for ddl in TABLES.iter().chain(INDEXES) {
        sqlx::query(ddl).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    tracing::info!(tables = TABLES.len(), "schema ready");
    Ok(())
}

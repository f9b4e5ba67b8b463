//! Transactional facade over the compiler and the mutation engine.
//!
//! Every call runs in its own transaction inside a span tagged with a fresh
//! transaction id. Success commits; any error drops the transaction, which
//! rolls back everything the call wrote, cascades included.

use sqlx::{PgPool, Postgres};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::bind_all;
use crate::config::Config;
use crate::error::{StaError, StaResult};
use crate::geometry::GeometryCodec;
use crate::id_policy::IdPolicy;
use crate::model::{Entity, EntityChange, EntityType};
use crate::mutation::MutationEngine;
use crate::query::{CompiledQuery, PathCompiler, QueryOptions, ResourcePath};

// ---

#[derive(Debug, Clone)]
pub struct SensorThingsStore {
    pool: PgPool,
    engine: MutationEngine,
    compiler: PathCompiler,
    read_only: bool,
}

impl SensorThingsStore {
    // ---
    pub fn new(pool: PgPool, engine: MutationEngine, compiler: PathCompiler, read_only: bool) -> Self {
        Self {
            pool,
            engine,
            compiler,
            read_only,
        }
    }

    pub fn from_config(pool: PgPool, config: &Config) -> Self {
        // ---
        let compiler = PathCompiler::new(config.default_top, config.max_top);
        let engine = MutationEngine::new(
            IdPolicy::new(config.id_generation_mode),
            GeometryCodec::default(),
            compiler,
        );
        Self::new(pool, engine, compiler, config.read_only)
    }

    fn writable(&self) -> StaResult<()> {
        if self.read_only {
            return Err(StaError::ReadOnly);
        }
        Ok(())
    }

    /// Create an entity with everything nested in it.
    pub async fn insert(&self, entity: Entity) -> StaResult<EntityChange> {
        // ---
        self.writable()?;
        let entity_type = entity.entity_type();
        let span = info_span!("tx", tx_id = %Uuid::new_v4(), op = "insert", %entity_type);

        async {
            let mut tx = self.pool.begin().await?;
            let id = self.engine.insert(&mut *tx, entity).await?;
            tx.commit().await?;
            info!(id, "committed");
            Ok::<_, StaError>(EntityChange::created(entity_type, id))
        }
        .instrument(span)
        .await
        .inspect_err(log_rollback)
    }

    /// Partial update of one entity.
    pub async fn update(
        &self,
        entity_type: EntityType,
        id: i64,
        entity: Entity,
    ) -> StaResult<EntityChange> {
        // ---
        self.writable()?;
        let span = info_span!("tx", tx_id = %Uuid::new_v4(), op = "update", %entity_type, id);

        async {
            let mut tx = self.pool.begin().await?;
            let change = self.engine.update(&mut *tx, entity_type, id, entity).await?;
            tx.commit().await?;
            info!(fields = ?change.fields(), "committed");
            Ok::<_, StaError>(change)
        }
        .instrument(span)
        .await
        .inspect_err(log_rollback)
    }

    pub async fn exists_by_id(&self, entity_type: EntityType, id: i64) -> StaResult<bool> {
        // ---
        let mut conn = self.pool.acquire().await?;
        self.engine.exists(&mut *conn, entity_type, id).await
    }

    /// Compile a read path; execution and hydration belong to the caller.
    pub fn compile_query(
        &self,
        path: &ResourcePath,
        options: Option<&QueryOptions>,
    ) -> StaResult<CompiledQuery> {
        self.compiler.compile(path, options)
    }

    /// Number of distinct rows a compiled query addresses, ignoring paging.
    pub async fn count(&self, query: &CompiledQuery) -> StaResult<i64> {
        // ---
        let rendered = query.render_count();
        let count: i64 = bind_all!(sqlx::query_scalar::<Postgres, i64>(&rendered.sql), &rendered.binds)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Recompute a Datastream's or MultiDatastream's time ranges.
    pub async fn refresh_time_ranges(&self, entity_type: EntityType, id: i64) -> StaResult<()> {
        // ---
        self.writable()?;
        let span = info_span!("tx", tx_id = %Uuid::new_v4(), op = "refresh_time_ranges", %entity_type, id);

        async {
            let mut tx = self.pool.begin().await?;
            self.engine.refresh_time_ranges(&mut *tx, entity_type, id).await?;
            tx.commit().await?;
            Ok::<_, StaError>(())
        }
        .instrument(span)
        .await
        .inspect_err(log_rollback)
    }
}

fn log_rollback(err: &StaError) {
    if err.is_client_error() {
        warn!(error = %err, "rolled back");
    } else {
        error!(error = %err, "rolled back");
    }
}

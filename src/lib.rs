//! Storage core of a SensorThings data service.
//!
//! Two halves share one entity model: the `query` module compiles resource
//! paths into SQL over the relational layout, and the `mutation` module
//! inserts and updates entities while keeping the entity graph consistent.
//! `store` wraps both in per-call transactions; `routes` exposes a thin
//! HTTP shell over the store.

pub mod config;
pub mod error;
pub mod geometry;
pub mod id_policy;
pub mod model;
pub mod mutation;
pub mod query;
pub mod routes;
pub mod schema;
pub mod store;

pub use config::Config;
pub use error::{StaError, StaResult};
pub use store::SensorThingsStore;

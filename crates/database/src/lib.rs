//! # Price History Store
//!
//! The PostgreSQL adapter holding instruments, their daily price history, the
//! latest quote per instrument and the persisted ranking cache.
//!
//! ## Architectural Principles
//!
//! - **Adapter:** Encapsulates all SQL. The rest of the workspace only sees
//!   `core-types` values.
//! - **Asynchronous & Pooled:** All operations are asynchronous and share a
//!   `PgPool`.
//! - **Idempotent Writes:** Price points are de-duplicated by
//!   (instrument, date) with `ON CONFLICT DO NOTHING`.
//!
//! ## Public API
//!
//! - `connect` / `connect_with`: establish the connection pool.
//! - `run_migrations`: apply the embedded schema.
//! - `DbRepository`: the data access methods.
//! - `DbError`: the errors returned from this crate.

// Declare the modules that constitute this crate.
pub mod connection;
pub mod error;
pub mod repository;

// Re-export the key components to create a clean, public-facing API.
pub use connection::{connect, connect_with, run_migrations};
pub use error::DbError;
pub use repository::{DbRepository, StoredRanking};

//! Catalog metadata types and the introspection seam.
//!
//! The engine never scans `pg_catalog` directly; it consumes a
//! [`CatalogClient`] so the same operations run against a live database or
//! an in-memory fake in tests.

mod client;
mod types;

pub use client::CatalogClient;
pub use types::{ColumnDef, FkAction, ForeignKeyDef, IndexDef};

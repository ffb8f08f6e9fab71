//! Object storage for authority material.
//!
//! Buckets hold the active authority record, the immutable history and the
//! trust-store bundle. SQLite backs production; [`MemoryStore`] backs tests.

mod memory;
mod models;
mod schema;
mod sqlite;
mod traits;

pub use memory::{MemoryStore, StoreOp};
pub use models::*;
pub use sqlite::SqliteStorage;
pub use traits::*;

use diesel_migrations::{EmbeddedMigrations, embed_migrations};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

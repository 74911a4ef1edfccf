//! SQLite registry for the Turku API server.
//!
//! Provides persistence for registration auths, storage units, machines,
//! sources, backup logs and filter sets.

mod db;
mod models;
mod queries;
mod queries_sources;
mod validate;


pub use db::TurkuDatabase;
pub use models::*;
pub use queries::RecordCounts;
pub use turku_core::db::DatabaseError;
pub use validate::{ValidationError, decode_list, encode_list};

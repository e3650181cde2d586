//! Schema-enforced in-process relational store.
//!
//! A [`Database`] holds named tables whose rows must conform to a compiled
//! field schema, including reference fields that must name existing rows.
//! The whole database is persisted as a single JSON snapshot.

pub mod config;
pub mod error;
pub mod ids;
pub mod persistence;
pub mod query;
pub mod record;
pub mod schema;
pub mod store;
pub mod validation;

pub use config::{DbConfig, DbSettings};
pub use error::{Result, SchemaDbError};
pub use ids::{IdSource, IdStrategy};
pub use persistence::SaveHandle;
pub use query::Predicate;
pub use record::Record;
pub use schema::{FieldType, RawSchema, ScalarKind};
pub use store::Database;

//! protobit turns class prototypes, maps of attribute names to type assertions, into validated
//! entities persisted to SQL tables, YAML flat files or round-robin tables.
//!
//! A class is declared either through [`Class::builder`] or with the `#[prototype]` attribute,
//! which generates typed accessors around an [`Entity`] and registers the class so that
//! [`Store::create_registered_tables`] can derive its schema.

extern crate self as protobit;

pub mod assertion;
pub mod cache;
pub mod class;
pub mod config;
pub mod entity;
pub mod error;
pub mod logger;
pub mod retry;
pub mod round_robin;
pub mod schema;
pub mod storage;
pub mod value;

pub use assertion::{Allowed, Asserted, Assertion, AssertionBuilder, Kind, RefOption, Reference, Rule, Unique};
pub use cache::{CacheService, MemoryCache, NoCache};
pub use chrono;
pub use class::{
    registered_classes, Class, ClassBuilder, ClassInfo, Features, Introspectable, LinkSlot, Persistable, RowPolicy,
    Validatable,
};
pub use config::Config;
pub use entity::Entity;
pub use error::{AppError, ErrorKind};
pub use inventory;
pub use log;
pub use macros::prototype;
pub use once_cell;
pub use schema::{Dialect, Drift, ReconcileMode};
pub use std::sync::Arc;
pub use std::time::Duration;
pub use storage::flatfile::{FileLock, FlatFileStore};
pub use storage::history::{FileHistory, RcsCommand, Revision, RevisionControl};
pub use storage::session::{Connector, Session, SqliteConnector};
pub use storage::Store;
pub use value::{FromValue, Value};

//! remora-core: entity mapping engine for a remote ALM service.
//!
//! Callers manipulate test runs, work items, users and the rest of the
//! service's entities as local objects; every read and write is translated
//! through static field-mapping metadata into calls against the
//! [`service::RemoteService`] boundary. The crate's load-bearing parts are
//! the marshal engine ([`marshal`]), the per-project custom-field schema
//! cache ([`custom`]), the test-run reconciliation and status engine
//! ([`entity::test_run`]), and the scoped transaction wrapper
//! ([`transaction`]).

pub mod client;
pub mod custom;
pub mod descriptor;
pub mod entity;
pub mod enums;
pub mod error;
pub mod marshal;
pub mod memory;
pub mod service;
pub mod transaction;

pub use client::Client;
pub use custom::{CustomFieldCache, CustomFieldKind, SchemaSource};
pub use descriptor::{EntityDescriptor, EntityKind, FieldMapping, MappingTable};
pub use error::Error;
pub use service::{Channel, RemoteError, RemoteService};
pub use transaction::{with_transaction, Transaction};

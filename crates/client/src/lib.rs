//! remora-client: session configuration and schema-document transport.
//!
//! remora-core is transport-free; this crate supplies the pieces that talk
//! to real infrastructure: [`ClientConfig`] (TOML file or environment) and
//! [`HttpSchemaSource`], the authenticated HTTP fetch of the per-project
//! custom-field schema document. The RPC transport itself is supplied by
//! the embedding application as a `remora_core::RemoteService`
//! implementation.

pub mod config;
pub mod schema;

pub use config::{ClientConfig, ConfigError};
pub use schema::HttpSchemaSource;

//! remora-wire: Shared wire representation for the remote ALM service.
//!
//! Provides the typed value model ([`WireValue`], [`WireStruct`]) that every
//! remora crate exchanges with a `RemoteService` implementation, plus the
//! [`ObjectUri`] handle type used for lookup-by-reference. remora-core maps
//! these structs to and from domain entities; transport implementations map
//! them to and from the service's own RPC payloads.

pub mod uri;
pub mod value;

pub use uri::ObjectUri;
pub use value::{WireStruct, WireValue};

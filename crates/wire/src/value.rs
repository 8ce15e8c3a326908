//! Typed values exchanged with the remote service.
//!
//! The service's RPC schema is struct-shaped: every entity is a named struct
//! of fields, arrays travel inside a single-field wrapper struct, and
//! timestamps travel as RFC 3339 strings. [`WireValue`] covers the superset
//! of value shapes the service exchanges; consumers that need a narrower
//! type go through the `as_*` accessors and treat a mismatch as absent.

use crate::uri::ObjectUri;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One field value inside a remote struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireValue {
    /// An explicit nil sent by the service — distinct from an absent field.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Uri(ObjectUri),
    Struct(WireStruct),
    Array(Vec<WireValue>),
}

impl WireValue {
    pub fn is_null(&self) -> bool {
        matches!(self, WireValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            WireValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            WireValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            WireValue::Float(n) => Some(*n),
            WireValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// URI handles, accepting the string form the service sometimes uses.
    pub fn as_uri(&self) -> Option<ObjectUri> {
        match self {
            WireValue::Uri(u) => Some(u.clone()),
            WireValue::Str(s) => Some(ObjectUri::new(s.clone())),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&WireStruct> {
        match self {
            WireValue::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[WireValue]> {
        match self {
            WireValue::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for WireValue {
    fn from(v: bool) -> Self {
        WireValue::Bool(v)
    }
}

impl From<i64> for WireValue {
    fn from(v: i64) -> Self {
        WireValue::Int(v)
    }
}

impl From<f64> for WireValue {
    fn from(v: f64) -> Self {
        WireValue::Float(v)
    }
}

impl From<&str> for WireValue {
    fn from(v: &str) -> Self {
        WireValue::Str(v.to_string())
    }
}

impl From<String> for WireValue {
    fn from(v: String) -> Self {
        WireValue::Str(v)
    }
}

impl From<ObjectUri> for WireValue {
    fn from(v: ObjectUri) -> Self {
        WireValue::Uri(v)
    }
}

impl From<WireStruct> for WireValue {
    fn from(v: WireStruct) -> Self {
        WireValue::Struct(v)
    }
}

/// A remote struct: the service-side representation of one entity.
///
/// `unresolvable` is the service's own marker for a handle whose identity is
/// known but whose data does not exist — lookups must check it rather than
/// infer non-existence from empty fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireStruct {
    /// Remote struct identifier, e.g. `"TestRun"`.
    pub type_id: String,
    #[serde(default)]
    pub unresolvable: bool,
    #[serde(default)]
    pub fields: BTreeMap<String, WireValue>,
}

impl WireStruct {
    /// A resolvable struct with no fields set.
    pub fn new(type_id: impl Into<String>) -> Self {
        WireStruct {
            type_id: type_id.into(),
            unresolvable: false,
            fields: BTreeMap::new(),
        }
    }

    /// The service's not-found marker for the given struct type.
    pub fn unresolved(type_id: impl Into<String>) -> Self {
        WireStruct {
            type_id: type_id.into(),
            unresolvable: true,
            fields: BTreeMap::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&WireValue> {
        self.fields.get(name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<WireValue>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn remove_field(&mut self, name: &str) -> Option<WireValue> {
        self.fields.remove(name)
    }

    /// Builder-style `set_field`, for assembling fixtures and payloads.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<WireValue>) -> Self {
        self.set_field(name, value);
        self
    }

    /// Wrap an ordered element sequence in the service's collection shape:
    /// a struct named `ArrayOf<element>` with the elements under a single
    /// field named after the element type.
    pub fn wrap_array(element: &str, items: Vec<WireValue>) -> WireStruct {
        let mut wrapper = WireStruct::new(format!("ArrayOf{element}"));
        wrapper.set_field(element, WireValue::Array(items));
        wrapper
    }

    /// Unwrap a collection wrapper produced by [`WireStruct::wrap_array`].
    /// Returns `None` when this struct is not a wrapper for `element`.
    pub fn unwrap_array(&self, element: &str) -> Option<&[WireValue]> {
        self.field(element).and_then(WireValue::as_array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_field_differs_from_null() {
        let mut s = WireStruct::new("TestRun");
        assert!(!s.has_field("query"));
        s.set_field("query", WireValue::Null);
        assert!(s.has_field("query"));
        assert!(s.field("query").unwrap().is_null());
    }

    #[test]
    fn array_wrapper_round_trips_empty() {
        let wrapper = WireStruct::wrap_array("TestRecord", vec![]);
        assert_eq!(wrapper.type_id, "ArrayOfTestRecord");
        let items = wrapper.unwrap_array("TestRecord").unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn array_wrapper_preserves_order() {
        let items = vec![
            WireValue::from(WireStruct::new("TestRecord").with_field("id", "a")),
            WireValue::from(WireStruct::new("TestRecord").with_field("id", "b")),
        ];
        let wrapper = WireStruct::wrap_array("TestRecord", items);
        let unwrapped = wrapper.unwrap_array("TestRecord").unwrap();
        let ids: Vec<_> = unwrapped
            .iter()
            .map(|v| v.as_struct().unwrap().field("id").unwrap().as_str().unwrap())
            .collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn struct_serde_round_trip() {
        let s = WireStruct::new("User")
            .with_field("id", "jdoe")
            .with_field("name", "J. Doe");
        let json = serde_json::to_string(&s).unwrap();
        let back: WireStruct = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn uri_accessor_accepts_string_form() {
        let v = WireValue::from("remote:objects:/default/P${WorkItem}C-1");
        assert_eq!(v.as_uri().unwrap().item_id(), "C-1");
    }
}

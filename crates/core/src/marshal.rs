//! The marshal/unmarshal engine.
//!
//! [`EntityState`] is the per-instance core every entity wrapper embeds: the
//! remote representation, an own-object cache of lazily resolved references,
//! and the dirty-set of staged custom-field writes. All reads and writes go
//! through a [`MappingTable`], so an entity wrapper is nothing more than
//! typed accessors over its descriptor.
//!
//! Entity instances are single-owner: the resolution cache uses interior
//! mutability without a lock, which keeps the whole state `!Sync`.

use crate::descriptor::{EntityDescriptor, FieldMapping, MappingEntry, MappingTable};
use crate::enums::EnumResolver;
use crate::error::Error;
use crate::service::RemoteService;
use remora_wire::{ObjectUri, WireStruct, WireValue};
use std::cell::RefCell;
use std::collections::BTreeMap;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Remote field holding the generic custom-field collection.
pub const CUSTOM_FIELDS_FIELD: &str = "customFields";
/// Element type of the custom-field collection wrapper.
pub const CUSTOM_ELEMENT: &str = "Custom";

/// Fetch an entity by natural identifier, turning the service's
/// unresolvable marker into [`Error::NotFound`].
pub(crate) fn lookup_by_id(
    service: &dyn RemoteService,
    descriptor: &'static EntityDescriptor,
    scope: Option<&str>,
    id: &str,
) -> Result<WireStruct, Error> {
    let body = service
        .lookup_by_id(descriptor.channel, descriptor.type_id, scope, id)
        .map_err(|e| Error::remote("lookupById", e))?;
    if body.unresolvable {
        return Err(Error::NotFound {
            kind: descriptor.type_id,
            id: id.to_string(),
        });
    }
    Ok(body)
}

/// Fetch an entity by URI handle, with the same not-found contract.
pub(crate) fn lookup_by_uri(
    service: &dyn RemoteService,
    descriptor: &'static EntityDescriptor,
    uri: &ObjectUri,
) -> Result<WireStruct, Error> {
    let body = service
        .lookup_by_uri(descriptor.channel, uri)
        .map_err(|e| Error::remote("lookupByUri", e))?;
    if body.unresolvable {
        return Err(Error::NotFound {
            kind: descriptor.type_id,
            id: uri.to_string(),
        });
    }
    Ok(body)
}

/// Per-instance marshaling state.
#[derive(Debug, Clone)]
pub struct EntityState {
    body: WireStruct,
    /// Lazily resolved `Reference` fields, for this object's lifetime only.
    resolved: RefCell<BTreeMap<String, WireStruct>>,
    /// Custom-field writes staged until the next `update`.
    dirty_custom: BTreeMap<String, WireValue>,
}

impl EntityState {
    /// Blank state for building a new payload of the given type.
    pub fn blank(descriptor: &EntityDescriptor) -> EntityState {
        EntityState::adopt(WireStruct::new(descriptor.type_id))
    }

    /// Adopt a representation returned by the service.
    pub fn adopt(body: WireStruct) -> EntityState {
        EntityState {
            body,
            resolved: RefCell::new(BTreeMap::new()),
            dirty_custom: BTreeMap::new(),
        }
    }

    pub fn body(&self) -> &WireStruct {
        &self.body
    }

    pub fn into_body(self) -> WireStruct {
        self.body
    }

    /// The object's own URI handle, present once it has been persisted.
    pub fn uri(&self) -> Option<ObjectUri> {
        self.body.field("uri").and_then(WireValue::as_uri)
    }

    /// The URI handle, or [`Error::Unpopulated`] for an entity that was
    /// never fetched from the service.
    pub fn require_uri(&self, kind: &'static str) -> Result<ObjectUri, Error> {
        self.uri().ok_or(Error::Unpopulated { kind })
    }

    // ── Scalar and enum reads ───────────────────────────────────────────

    /// Direct structural lookup of a statically mapped field.
    pub fn value<'a>(&'a self, table: &MappingTable, name: &str) -> Option<&'a WireValue> {
        match table.get(name)? {
            MappingEntry::Static(mapping) => self.body.field(mapping.remote()),
            MappingEntry::Custom(_) => None,
        }
    }

    pub fn str_field(&self, table: &MappingTable, name: &str) -> Option<String> {
        self.value(table, name)?.as_str().map(str::to_string)
    }

    pub fn bool_field(&self, table: &MappingTable, name: &str) -> Option<bool> {
        self.value(table, name)?.as_bool()
    }

    pub fn i64_field(&self, table: &MappingTable, name: &str) -> Option<i64> {
        self.value(table, name)?.as_i64()
    }

    pub fn f64_field(&self, table: &MappingTable, name: &str) -> Option<f64> {
        self.value(table, name)?.as_f64()
    }

    pub fn uri_field(&self, table: &MappingTable, name: &str) -> Option<ObjectUri> {
        self.value(table, name)?.as_uri()
    }

    /// Timestamps travel as RFC 3339 strings on the wire.
    pub fn timestamp_field(&self, table: &MappingTable, name: &str) -> Option<OffsetDateTime> {
        let raw = self.str_field(table, name)?;
        OffsetDateTime::parse(&raw, &Rfc3339).ok()
    }

    // ── Scalar and enum writes ──────────────────────────────────────────

    pub fn set_value(
        &mut self,
        table: &MappingTable,
        name: &str,
        value: WireValue,
    ) -> Result<(), Error> {
        let mapping = self.static_mapping(table, name)?;
        self.body.set_field(mapping.remote(), value);
        Ok(())
    }

    /// `None` writes an explicit nil, which is how the service clears a
    /// timestamp field.
    pub fn set_timestamp(
        &mut self,
        table: &MappingTable,
        name: &str,
        when: Option<OffsetDateTime>,
    ) -> Result<(), Error> {
        let value = match when {
            Some(when) => WireValue::Str(
                when.format(&Rfc3339)
                    .unwrap_or_else(|_| when.to_string()),
            ),
            None => WireValue::Null,
        };
        self.set_value(table, name, value)
    }

    /// Validate against the mapping's catalog, then store.
    pub fn set_enum_value(
        &mut self,
        resolver: &EnumResolver<'_>,
        table: &MappingTable,
        name: &str,
        value: &str,
    ) -> Result<(), Error> {
        let mapping = self.static_mapping(table, name)?;
        let FieldMapping::Enum {
            remote,
            catalog,
            project_scoped,
        } = mapping
        else {
            return Err(Error::UnknownField {
                name: name.to_string(),
            });
        };
        let scope = if *project_scoped {
            table.project_id()
        } else {
            None
        };
        resolver.validate(catalog, scope, name, value)?;
        self.body.set_field(*remote, value);
        Ok(())
    }

    // ── Nested entities and references ──────────────────────────────────

    /// Read a nested or referenced struct. A `Nested` field is cloned out
    /// of the body; a `Reference` field is resolved by URI on first access
    /// and the materialized struct reused for this object's lifetime.
    pub fn nested_struct(
        &self,
        service: &dyn RemoteService,
        table: &MappingTable,
        name: &str,
    ) -> Result<Option<WireStruct>, Error> {
        let mapping = self.static_mapping(table, name)?;
        match mapping {
            FieldMapping::Nested { remote, .. } => Ok(self
                .body
                .field(remote)
                .and_then(WireValue::as_struct)
                .cloned()),
            FieldMapping::Reference { remote, kind } => {
                if let Some(cached) = self.resolved.borrow().get(name) {
                    return Ok(Some(cached.clone()));
                }
                let Some(uri) = self.body.field(remote).and_then(WireValue::as_uri) else {
                    return Ok(None);
                };
                let fetched = lookup_by_uri(service, kind.descriptor(), &uri)?;
                self.resolved
                    .borrow_mut()
                    .insert(name.to_string(), fetched.clone());
                Ok(Some(fetched))
            }
            _ => Err(Error::UnknownField {
                name: name.to_string(),
            }),
        }
    }

    /// Read a `Nested` field without touching the service. Reference fields
    /// are not resolved here; use [`EntityState::nested_struct`] for those.
    pub fn nested_local(&self, table: &MappingTable, name: &str) -> Option<WireStruct> {
        let MappingEntry::Static(FieldMapping::Nested { remote, .. }) = table.get(name)? else {
            return None;
        };
        self.body.field(remote).and_then(WireValue::as_struct).cloned()
    }

    pub fn set_nested(
        &mut self,
        table: &MappingTable,
        name: &str,
        value: Option<WireStruct>,
    ) -> Result<(), Error> {
        let mapping = self.static_mapping(table, name)?;
        let remote = mapping.remote();
        match value {
            Some(body) => self.body.set_field(remote, body),
            None => self.body.set_field(remote, WireValue::Null),
        }
        Ok(())
    }

    /// Point a `Reference` field at a new handle, dropping any previously
    /// resolved value for it.
    pub fn set_reference(
        &mut self,
        table: &MappingTable,
        name: &str,
        uri: ObjectUri,
    ) -> Result<(), Error> {
        let mapping = self.static_mapping(table, name)?;
        self.body.set_field(mapping.remote(), uri);
        self.resolved.borrow_mut().remove(name);
        Ok(())
    }

    // ── Arrays ──────────────────────────────────────────────────────────

    /// Unwrap an array field into its ordered elements. `None` means the
    /// field is absent; `Some(vec![])` means present and empty — the two
    /// survive a round trip distinctly.
    pub fn array_structs(&self, table: &MappingTable, name: &str) -> Option<Vec<WireStruct>> {
        let MappingEntry::Static(FieldMapping::Array { remote, element, .. }) = table.get(name)?
        else {
            return None;
        };
        let wrapper = self.body.field(remote)?.as_struct()?;
        let items = wrapper.unwrap_array(element)?;
        Some(
            items
                .iter()
                .filter_map(|item| item.as_struct().cloned())
                .collect(),
        )
    }

    /// Re-wrap an ordered element sequence into the collection shape.
    pub fn set_array(
        &mut self,
        table: &MappingTable,
        name: &str,
        items: Vec<WireStruct>,
    ) -> Result<(), Error> {
        let mapping = self.static_mapping(table, name)?;
        let FieldMapping::Array {
            remote, element, ..
        } = mapping
        else {
            return Err(Error::UnknownField {
                name: name.to_string(),
            });
        };
        let wrapped = WireStruct::wrap_array(
            element,
            items.into_iter().map(WireValue::from).collect(),
        );
        self.body.set_field(*remote, wrapped);
        Ok(())
    }

    // ── Custom fields ───────────────────────────────────────────────────

    /// Current value of a custom field: the staged write when one exists,
    /// otherwise the stored key/value collection entry.
    pub fn custom_value(&self, name: &str) -> Option<WireValue> {
        if let Some(staged) = self.dirty_custom.get(name) {
            return Some(staged.clone());
        }
        let wrapper = self.body.field(CUSTOM_FIELDS_FIELD)?.as_struct()?;
        wrapper.unwrap_array(CUSTOM_ELEMENT)?.iter().find_map(|item| {
            let entry = item.as_struct()?;
            if entry.field("key")?.as_str()? == name {
                entry.field("value").cloned()
            } else {
                None
            }
        })
    }

    /// Stage a custom-field write; nothing is sent until the next `update`.
    pub fn stage_custom(&mut self, name: impl Into<String>, value: WireValue) {
        self.dirty_custom.insert(name.into(), value);
    }

    pub fn has_staged_custom(&self) -> bool {
        !self.dirty_custom.is_empty()
    }

    /// Flush every staged write into the key/value collection on the body
    /// and clear the dirty-set. Existing keys are updated in place; new
    /// keys are appended in name order.
    pub fn flush_custom_fields(&mut self) {
        let staged = std::mem::take(&mut self.dirty_custom);
        if staged.is_empty() {
            return;
        }
        let mut items: Vec<WireValue> = self
            .body
            .field(CUSTOM_FIELDS_FIELD)
            .and_then(WireValue::as_struct)
            .and_then(|wrapper| wrapper.unwrap_array(CUSTOM_ELEMENT))
            .map(<[WireValue]>::to_vec)
            .unwrap_or_default();
        for (key, value) in staged {
            let existing = items.iter_mut().find_map(|item| match item {
                WireValue::Struct(entry)
                    if entry.field("key").and_then(WireValue::as_str) == Some(key.as_str()) =>
                {
                    Some(entry)
                }
                _ => None,
            });
            match existing {
                Some(entry) => entry.set_field("value", value),
                None => items.push(custom_entry(&key, value)),
            }
        }
        self.body
            .set_field(CUSTOM_FIELDS_FIELD, WireStruct::wrap_array(CUSTOM_ELEMENT, items));
    }

    fn static_mapping<'t>(
        &self,
        table: &'t MappingTable,
        name: &str,
    ) -> Result<&'t FieldMapping, Error> {
        match table.get(name) {
            Some(MappingEntry::Static(mapping)) => Ok(mapping),
            _ => Err(Error::UnknownField {
                name: name.to_string(),
            }),
        }
    }
}

fn custom_entry(key: &str, value: WireValue) -> WireValue {
    WireValue::Struct(
        WireStruct::new(CUSTOM_ELEMENT)
            .with_field("key", key)
            .with_field("value", value),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::EntityKind;
    use crate::service::Channel;

    static SPECIMEN: EntityDescriptor = EntityDescriptor {
        type_id: "Specimen",
        channel: Channel::TestManagement,
        id_field: Some("specimen_id"),
        fields: &[
            ("specimen_id", FieldMapping::Scalar { remote: "id" }),
            ("label", FieldMapping::Scalar { remote: "label" }),
            ("created", FieldMapping::Scalar { remote: "created" }),
            (
                "severity",
                FieldMapping::Enum {
                    remote: "severity",
                    catalog: "severity",
                    project_scoped: false,
                },
            ),
            (
                "comment",
                FieldMapping::Nested {
                    remote: "comment",
                    kind: EntityKind::Text,
                },
            ),
            (
                "notes",
                FieldMapping::Array {
                    remote: "notes",
                    element: "Text",
                    kind: EntityKind::Text,
                },
            ),
            (
                "owner",
                FieldMapping::Reference {
                    remote: "ownerURI",
                    kind: EntityKind::User,
                },
            ),
        ],
    };

    fn table() -> MappingTable {
        MappingTable::of(&SPECIMEN)
    }

    #[test]
    fn scalar_round_trip() {
        let mut state = EntityState::blank(&SPECIMEN);
        state.set_value(&table(), "label", "smoke".into()).unwrap();
        assert_eq!(state.str_field(&table(), "label").as_deref(), Some("smoke"));
        assert_eq!(state.body().field("label"), Some(&WireValue::from("smoke")));
    }

    #[test]
    fn timestamp_round_trip() {
        let mut state = EntityState::blank(&SPECIMEN);
        let when = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        state.set_timestamp(&table(), "created", Some(when)).unwrap();
        assert_eq!(state.timestamp_field(&table(), "created"), Some(when));
        state.set_timestamp(&table(), "created", None).unwrap();
        assert!(state.body().field("created").unwrap().is_null());
        assert_eq!(state.timestamp_field(&table(), "created"), None);
    }

    #[test]
    fn enum_round_trip_validates_against_catalog() {
        let service = crate::memory::InMemoryService::new();
        service.set_enum("severity", &["low", "high"]);
        let resolver = EnumResolver::new(&service);
        let mut state = EntityState::blank(&SPECIMEN);
        state
            .set_enum_value(&resolver, &table(), "severity", "high")
            .unwrap();
        assert_eq!(state.str_field(&table(), "severity").as_deref(), Some("high"));

        let err = state
            .set_enum_value(&resolver, &table(), "severity", "medium")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFieldValue { .. }));
        // the rejected value must not have been stored
        assert_eq!(state.str_field(&table(), "severity").as_deref(), Some("high"));
    }

    #[test]
    fn nested_round_trip() {
        let mut state = EntityState::blank(&SPECIMEN);
        let text = WireStruct::new("Text")
            .with_field("type", "text/plain")
            .with_field("content", "looks good");
        state.set_nested(&table(), "comment", Some(text.clone())).unwrap();
        let service = crate::memory::InMemoryService::new();
        let read = state
            .nested_struct(&service, &table(), "comment")
            .unwrap()
            .unwrap();
        assert_eq!(read, text);
    }

    #[test]
    fn reference_resolves_once_per_object() {
        let service = crate::memory::InMemoryService::new();
        let owner_uri = service.insert_object(
            None,
            "jdoe",
            WireStruct::new("User").with_field("id", "jdoe"),
        );
        let mut state = EntityState::blank(&SPECIMEN);
        state.set_reference(&table(), "owner", owner_uri).unwrap();

        for _ in 0..3 {
            let resolved = state
                .nested_struct(&service, &table(), "owner")
                .unwrap()
                .unwrap();
            assert_eq!(resolved.field("id").unwrap().as_str(), Some("jdoe"));
        }
        // materialized on first access, reused for this object's lifetime
        let lookups = service
            .calls()
            .iter()
            .filter(|call| *call == "lookupByUri")
            .count();
        assert_eq!(lookups, 1);
    }

    #[test]
    fn dangling_reference_reports_not_found() {
        let service = crate::memory::InMemoryService::new();
        let mut state = EntityState::blank(&SPECIMEN);
        state
            .set_reference(
                &table(),
                "owner",
                remora_wire::ObjectUri::new("remote:objects:/default/-${User}ghost"),
            )
            .unwrap();
        let err = state.nested_struct(&service, &table(), "owner").unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn array_round_trip_preserves_empty_vs_absent() {
        let mut state = EntityState::blank(&SPECIMEN);
        assert_eq!(state.array_structs(&table(), "notes"), None);
        state.set_array(&table(), "notes", vec![]).unwrap();
        assert_eq!(state.array_structs(&table(), "notes"), Some(vec![]));
        let items = vec![
            WireStruct::new("Text").with_field("content", "first"),
            WireStruct::new("Text").with_field("content", "second"),
        ];
        state.set_array(&table(), "notes", items.clone()).unwrap();
        assert_eq!(state.array_structs(&table(), "notes"), Some(items));
    }

    #[test]
    fn custom_writes_stage_until_flush() {
        let mut state = EntityState::blank(&SPECIMEN);
        state.stage_custom("risk", "low".into());
        assert!(state.has_staged_custom());
        // staged value wins over the (absent) stored collection
        assert_eq!(state.custom_value("risk"), Some(WireValue::from("low")));
        assert!(state.body().field(CUSTOM_FIELDS_FIELD).is_none());

        state.flush_custom_fields();
        assert!(!state.has_staged_custom());
        assert_eq!(state.custom_value("risk"), Some(WireValue::from("low")));

        // flushing an update rewrites the existing entry instead of
        // appending a second one
        state.stage_custom("risk", "high".into());
        state.flush_custom_fields();
        let wrapper = state
            .body()
            .field(CUSTOM_FIELDS_FIELD)
            .and_then(WireValue::as_struct)
            .unwrap();
        assert_eq!(wrapper.unwrap_array(CUSTOM_ELEMENT).unwrap().len(), 1);
        assert_eq!(state.custom_value("risk"), Some(WireValue::from("high")));
    }

    #[test]
    fn unknown_attribute_is_an_error_on_write() {
        let mut state = EntityState::blank(&SPECIMEN);
        let err = state.set_value(&table(), "bogus", WireValue::Null).unwrap_err();
        assert!(matches!(err, Error::UnknownField { .. }));
    }
}

//! Static field-mapping metadata.
//!
//! Every entity type declares one [`EntityDescriptor`]: the remote struct
//! identifier, the channel it is reached through, its natural identifying
//! attribute, and a table mapping each local attribute name to a
//! [`FieldMapping`]. The marshal engine is entirely driven by these tables;
//! entity wrappers add nothing but typed accessors on top.
//!
//! [`EntityKind`] is the closed registry of known entity types. It replaces
//! runtime type-name scanning for `@`-qualified custom-field markers: the
//! marker resolves through [`EntityKind::from_catalog_marker`] or not at all.

use crate::custom::CustomFieldKind;
use crate::entity;
use crate::service::Channel;
use std::collections::BTreeMap;

/// One attribute's mapping rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldMapping {
    /// Local attribute ↔ remote field, no transformation.
    Scalar { remote: &'static str },

    /// The remote field embeds a full nested struct; conversion recurses
    /// through the nested type's descriptor.
    Nested {
        remote: &'static str,
        kind: EntityKind,
    },

    /// The remote field carries only a URI handle; the referenced entity is
    /// resolved lazily on first read and cached for the object's lifetime.
    Reference {
        remote: &'static str,
        kind: EntityKind,
    },

    /// The remote field holds the service's collection wrapper: a struct
    /// named `ArrayOf<element>` with the elements under a single field.
    /// Insertion order is preserved; uniqueness is not enforced.
    Array {
        remote: &'static str,
        element: &'static str,
        kind: EntityKind,
    },

    /// The remote field is a restricted string validated against a named
    /// enumeration catalog. `project_scoped` catalogs need the project id
    /// to select the right catalog variant.
    Enum {
        remote: &'static str,
        catalog: &'static str,
        project_scoped: bool,
    },
}

impl FieldMapping {
    /// The remote field name this mapping reads and writes.
    pub fn remote(&self) -> &'static str {
        match self {
            FieldMapping::Scalar { remote }
            | FieldMapping::Nested { remote, .. }
            | FieldMapping::Reference { remote, .. }
            | FieldMapping::Array { remote, .. }
            | FieldMapping::Enum { remote, .. } => remote,
        }
    }
}

/// Static metadata for one entity type.
pub struct EntityDescriptor {
    /// Remote struct identifier, e.g. `"TestRun"`.
    pub type_id: &'static str,
    /// Which service channel this entity type is reached through.
    pub channel: Channel,
    /// The local attribute designated as the natural identifier, used for
    /// construction-by-identifier and search matching.
    pub id_field: Option<&'static str>,
    /// Local attribute name → mapping rule.
    pub fields: &'static [(&'static str, FieldMapping)],
}

impl EntityDescriptor {
    pub fn mapping(&self, name: &str) -> Option<&FieldMapping> {
        self.fields
            .iter()
            .find(|(local, _)| *local == name)
            .map(|(_, mapping)| mapping)
    }
}

/// The closed registry of entity types known to the mapping layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Text,
    User,
    Project,
    WorkItem,
    Document,
    RunAttachment,
    TestStepResult,
    TestRecord,
    TestRun,
}

impl EntityKind {
    /// Every registered kind, in declaration order.
    pub const ALL: [EntityKind; 9] = [
        EntityKind::Text,
        EntityKind::User,
        EntityKind::Project,
        EntityKind::WorkItem,
        EntityKind::Document,
        EntityKind::RunAttachment,
        EntityKind::TestStepResult,
        EntityKind::TestRecord,
        EntityKind::TestRun,
    ];

    pub fn descriptor(self) -> &'static EntityDescriptor {
        match self {
            EntityKind::Text => &entity::text::DESCRIPTOR,
            EntityKind::User => &entity::user::DESCRIPTOR,
            EntityKind::Project => &entity::project::DESCRIPTOR,
            EntityKind::WorkItem => &entity::work_item::DESCRIPTOR,
            EntityKind::Document => &entity::document::DESCRIPTOR,
            EntityKind::RunAttachment => &entity::attachment::DESCRIPTOR,
            EntityKind::TestStepResult => &entity::step_result::DESCRIPTOR,
            EntityKind::TestRecord => &entity::test_record::DESCRIPTOR,
            EntityKind::TestRun => &entity::test_run::DESCRIPTOR,
        }
    }

    pub fn name(self) -> &'static str {
        self.descriptor().type_id
    }

    /// Whether construction-by-identifier for this kind accepts a project
    /// scope. Entity-backed custom-field catalogs record this so value
    /// validation threads the project id through the lookup.
    pub fn project_scoped(self) -> bool {
        matches!(
            self,
            EntityKind::User | EntityKind::WorkItem | EntityKind::Document | EntityKind::TestRun
        )
    }

    /// Resolve an `@`-qualified custom-field catalog marker to a registered
    /// kind, matching the type name case-insensitively.
    pub fn from_catalog_marker(marker: &str) -> Option<EntityKind> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(marker))
    }
}

/// One entry in a built [`MappingTable`]: either a statically declared
/// mapping or a custom field discovered from the project's schema document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingEntry {
    Static(FieldMapping),
    Custom(CustomFieldKind),
}

/// The mapping table an entity instance actually reads through.
///
/// For most entity types this is just a view of the static descriptor. For
/// test runs, the per-project custom-field entries are merged in once at
/// construction time, after which custom fields behave exactly like
/// statically declared attributes.
#[derive(Debug, Clone)]
pub struct MappingTable {
    entries: BTreeMap<String, MappingEntry>,
    project_id: Option<String>,
}

impl MappingTable {
    pub fn of(descriptor: &'static EntityDescriptor) -> MappingTable {
        let entries = descriptor
            .fields
            .iter()
            .map(|(local, mapping)| ((*local).to_string(), MappingEntry::Static(mapping.clone())))
            .collect();
        MappingTable {
            entries,
            project_id: None,
        }
    }

    /// Merge the resolved custom-field entries for `project_id` into the
    /// table. Statically declared attributes win on a name collision.
    pub fn with_custom_fields(
        mut self,
        project_id: &str,
        fields: &BTreeMap<String, CustomFieldKind>,
    ) -> MappingTable {
        for (name, kind) in fields {
            self.entries
                .entry(name.clone())
                .or_insert_with(|| MappingEntry::Custom(kind.clone()));
        }
        self.project_id = Some(project_id.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&MappingEntry> {
        self.entries.get(name)
    }

    /// The custom-field kind for `name`, when `name` is a custom entry.
    pub fn custom_kind(&self, name: &str) -> Option<&CustomFieldKind> {
        match self.entries.get(name) {
            Some(MappingEntry::Custom(kind)) => Some(kind),
            _ => None,
        }
    }

    /// The project the custom entries were resolved for, when any were.
    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    /// Resolve a local attribute name to its remote field name, as needed
    /// for search sorting and field limiting. Custom fields map to their
    /// own name on the wire.
    pub fn remote_name<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        match self.entries.get(name)? {
            MappingEntry::Static(mapping) => Some(mapping.remote()),
            MappingEntry::Custom(_) => Some(name),
        }
    }
}

//! Per-project custom-field schema resolution.
//!
//! The service does not expose a test run's custom fields through its RPC
//! schema; they only exist as a generic key/value collection on the wire.
//! The authoritative declaration lives in a per-project schema document
//! stored under the project's storage root. This module fetches that
//! document (through [`SchemaSource`]), classifies each declared field into
//! one of four kinds, and caches the result per project for the process
//! lifetime — the cache is never invalidated, trading staleness detection
//! for one remote fetch per project.

pub mod schema;

use crate::descriptor::EntityKind;
use crate::error::Error;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Path of the custom-field schema document, relative to a project's
/// storage root.
pub const CUSTOM_FIELDS_PATH: &str = "testing/configuration/testrun-custom-fields.xml";

/// The resolved kind of one custom field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomFieldKind {
    /// A base scalar type (string, boolean, …); values pass through
    /// unvalidated.
    Scalar,
    /// The service's rich-text block type; values are wrapped in a Text
    /// struct on the wire.
    Text,
    /// A plain named enumeration catalog; values validate against it.
    Enum { catalog: String },
    /// An enumeration backed by a registered entity type (`@`-qualified
    /// marker); values validate by looking the entity up by id, with the
    /// project id threaded through when the kind accepts one.
    EntityEnum {
        kind: EntityKind,
        project_scoped: bool,
    },
}

/// The declared type names an entity marker the registry does not know.
#[derive(Debug, thiserror::Error)]
#[error("unknown entity marker '@{0}' in declared field type")]
pub struct UnknownMarker(pub String);

/// Classify a declared custom-field type string.
///
/// The rule, in order: the exact text-block type is [`CustomFieldKind::Text`];
/// a type with no catalog qualifier is [`CustomFieldKind::Scalar`]; an
/// `@`-prefixed qualifier resolves through the entity registry; any other
/// qualifier is a plain named catalog. A trailing bracketed multiplicity
/// segment is stripped and ignored — multi-valued custom fields are
/// unsupported until the service's behavior for them is confirmed.
pub fn classify(declared: &str) -> Result<CustomFieldKind, UnknownMarker> {
    if declared == "text" {
        return Ok(CustomFieldKind::Text);
    }
    let base = declared.split('[').next().unwrap_or(declared);
    let mut parts = base.splitn(2, ':');
    let _base_type = parts.next();
    match parts.next() {
        None => Ok(CustomFieldKind::Scalar),
        Some(qualifier) => match qualifier.strip_prefix('@') {
            Some(marker) => match EntityKind::from_catalog_marker(marker) {
                Some(kind) => Ok(CustomFieldKind::EntityEnum {
                    kind,
                    project_scoped: kind.project_scoped(),
                }),
                None => Err(UnknownMarker(marker.to_string())),
            },
            None => Ok(CustomFieldKind::Enum {
                catalog: qualifier.to_string(),
            }),
        },
    }
}

/// Fetches the raw custom-field schema document for a project.
///
/// Kept as a trait so the core stays transport-free; remora-client provides
/// the authenticated HTTP implementation and tests provide in-memory ones.
pub trait SchemaSource: Send + Sync {
    /// Fetch the document at [`CUSTOM_FIELDS_PATH`] under `storage_root`.
    fn fetch(&self, storage_root: &str) -> Result<String, SchemaFetchError>;
}

/// A failure fetching the schema document.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SchemaFetchError(pub String);

/// Process-wide cache of resolved custom-field schemas, keyed by project.
///
/// Populate-once: the mutex is held across the fetch-and-parse, so a
/// concurrent first access for the same project resolves exactly once.
/// Entries are never invalidated within the process lifetime.
#[derive(Default)]
pub struct CustomFieldCache {
    inner: Mutex<BTreeMap<String, Arc<BTreeMap<String, CustomFieldKind>>>>,
}

impl CustomFieldCache {
    pub fn new() -> CustomFieldCache {
        CustomFieldCache::default()
    }

    /// The resolved field map for `project_id`, fetching and parsing the
    /// schema document via `fetch` on first access.
    pub fn resolve_with(
        &self,
        project_id: &str,
        fetch: impl FnOnce() -> Result<String, Error>,
    ) -> Result<Arc<BTreeMap<String, CustomFieldKind>>, Error> {
        let mut cache = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = cache.get(project_id) {
            return Ok(entry.clone());
        }
        let doc = fetch()?;
        let declared = schema::parse_fields(&doc)
            .map_err(|e| Error::schema(project_id, e.to_string()))?;
        let mut resolved = BTreeMap::new();
        for (name, declared_type) in declared {
            let kind = classify(&declared_type).map_err(|e| Error::schema(project_id, e.to_string()))?;
            resolved.insert(name, kind);
        }
        tracing::debug!(
            project = project_id,
            fields = resolved.len(),
            "populated custom field cache"
        );
        let entry = Arc::new(resolved);
        cache.insert(project_id.to_string(), entry.clone());
        Ok(entry)
    }

    /// Whether an entry for `project_id` has already been populated.
    pub fn contains(&self, project_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(project_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_base_type() {
        assert_eq!(classify("string").unwrap(), CustomFieldKind::Scalar);
        assert_eq!(classify("boolean").unwrap(), CustomFieldKind::Scalar);
    }

    #[test]
    fn classify_text_type() {
        assert_eq!(classify("text").unwrap(), CustomFieldKind::Text);
    }

    #[test]
    fn classify_named_catalog() {
        assert_eq!(
            classify("enum:severity").unwrap(),
            CustomFieldKind::Enum {
                catalog: "severity".to_string()
            }
        );
    }

    #[test]
    fn classify_entity_backed_catalog() {
        assert_eq!(
            classify("enum:@user").unwrap(),
            CustomFieldKind::EntityEnum {
                kind: EntityKind::User,
                project_scoped: true
            }
        );
    }

    #[test]
    fn classify_strips_multiplicity_suffix() {
        assert_eq!(
            classify("enum:arch[]").unwrap(),
            CustomFieldKind::Enum {
                catalog: "arch".to_string()
            }
        );
    }

    #[test]
    fn classify_rejects_unknown_marker() {
        let err = classify("enum:@gadget").unwrap_err();
        assert_eq!(err.0, "gadget");
    }

    #[test]
    fn cache_fetches_once_per_project() {
        let cache = CustomFieldCache::new();
        let mut fetches = 0;
        for _ in 0..3 {
            let entry = cache
                .resolve_with("PROJ", || {
                    fetches += 1;
                    Ok(r#"<fields><field id="risk" type="enum:severity"/></fields>"#.to_string())
                })
                .unwrap();
            assert_eq!(entry.len(), 1);
        }
        assert_eq!(fetches, 1);
        assert!(cache.contains("PROJ"));
        assert!(!cache.contains("OTHER"));
    }

    #[test]
    fn cache_keeps_projects_isolated() {
        let cache = CustomFieldCache::new();
        let a = cache
            .resolve_with("A", || {
                Ok(r#"<fields><field id="only_a" type="string"/></fields>"#.to_string())
            })
            .unwrap();
        let b = cache
            .resolve_with("B", || {
                Ok(r#"<fields><field id="only_b" type="text"/></fields>"#.to_string())
            })
            .unwrap();
        assert!(a.contains_key("only_a") && !a.contains_key("only_b"));
        assert!(b.contains_key("only_b") && !b.contains_key("only_a"));
    }

    #[test]
    fn fetch_failure_is_not_cached() {
        let cache = CustomFieldCache::new();
        let err = cache.resolve_with("P", || Err(Error::schema("P", "boom")));
        assert!(err.is_err());
        assert!(!cache.contains("P"));
        let entry = cache
            .resolve_with("P", || {
                Ok(r#"<fields><field id="f" type="string"/></fields>"#.to_string())
            })
            .unwrap();
        assert_eq!(entry.len(), 1);
    }
}

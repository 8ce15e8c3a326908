//! The shared handle entities operate through.
//!
//! A [`Client`] bundles the remote service, the schema-document source and
//! the process-wide custom-field cache. It is cheap to clone; entity
//! instances each hold one. The cache lives here so its lifetime is
//! explicit: it is created with the client and dropped with it, never
//! global.

use crate::custom::{CustomFieldCache, CustomFieldKind, SchemaSource};
use crate::entity::project::Project;
use crate::error::Error;
use crate::service::RemoteService;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("default_project", &self.inner.default_project)
            .finish_non_exhaustive()
    }
}

struct ClientInner {
    service: Arc<dyn RemoteService>,
    schema: Arc<dyn SchemaSource>,
    custom_fields: CustomFieldCache,
    default_project: Option<String>,
}

impl Client {
    pub fn new(service: Arc<dyn RemoteService>, schema: Arc<dyn SchemaSource>) -> Client {
        Client {
            inner: Arc::new(ClientInner {
                service,
                schema,
                custom_fields: CustomFieldCache::new(),
                default_project: None,
            }),
        }
    }

    /// Like [`Client::new`], with a default project used when an operation
    /// needs a project scope and none can be derived.
    pub fn with_default_project(
        service: Arc<dyn RemoteService>,
        schema: Arc<dyn SchemaSource>,
        project_id: impl Into<String>,
    ) -> Client {
        Client {
            inner: Arc::new(ClientInner {
                service,
                schema,
                custom_fields: CustomFieldCache::new(),
                default_project: Some(project_id.into()),
            }),
        }
    }

    pub fn service(&self) -> &dyn RemoteService {
        self.inner.service.as_ref()
    }

    pub fn default_project(&self) -> Option<&str> {
        self.inner.default_project.as_deref()
    }

    /// The resolved custom-field map for a project. First access per
    /// project fetches the schema document from under the project's storage
    /// root; later accesses hit the cache.
    pub fn custom_fields_for(
        &self,
        project_id: &str,
    ) -> Result<Arc<BTreeMap<String, CustomFieldKind>>, Error> {
        self.inner.custom_fields.resolve_with(project_id, || {
            let project = Project::by_id(self, project_id)?;
            let root = project.storage_root()?;
            self.inner
                .schema
                .fetch(&root)
                .map_err(|e| Error::schema(project_id, e.0))
        })
    }

    /// Cache introspection, for diagnostics and tests.
    pub fn custom_field_cache(&self) -> &CustomFieldCache {
        &self.inner.custom_fields
    }
}

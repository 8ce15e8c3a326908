use crate::client::Client;
use crate::descriptor::{EntityDescriptor, EntityKind, FieldMapping, MappingTable};
use crate::error::Error;
use crate::marshal::{self, EntityState};
use crate::service::Channel;
use remora_wire::{ObjectUri, WireStruct};

/// Trailing segment of a project's `location` field: the project
/// descriptor stored at the storage root.
const PROJECT_DESCRIPTOR_SUFFIX: &str = ".project/project.xml";

pub static DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    type_id: "Project",
    channel: Channel::Tracker,
    id_field: Some("project_id"),
    fields: &[
        ("project_id", FieldMapping::Scalar { remote: "id" }),
        ("name", FieldMapping::Scalar { remote: "name" }),
        ("location", FieldMapping::Scalar { remote: "location" }),
        (
            "description",
            FieldMapping::Nested {
                remote: "description",
                kind: EntityKind::Text,
            },
        ),
    ],
};

#[derive(Debug, Clone)]
pub struct Project {
    table: MappingTable,
    state: EntityState,
}

impl Project {
    pub fn by_id(client: &Client, project_id: &str) -> Result<Project, Error> {
        let body = marshal::lookup_by_id(client.service(), &DESCRIPTOR, None, project_id)?;
        Ok(Project::adopt(body))
    }

    pub fn by_uri(client: &Client, uri: &ObjectUri) -> Result<Project, Error> {
        let body = marshal::lookup_by_uri(client.service(), &DESCRIPTOR, uri)?;
        Ok(Project::adopt(body))
    }

    pub(crate) fn adopt(body: WireStruct) -> Project {
        Project {
            table: MappingTable::of(&DESCRIPTOR),
            state: EntityState::adopt(body),
        }
    }

    pub fn uri(&self) -> Option<ObjectUri> {
        self.state.uri()
    }

    pub fn project_id(&self) -> Option<String> {
        self.state.str_field(&self.table, "project_id")
    }

    pub fn name(&self) -> Option<String> {
        self.state.str_field(&self.table, "name")
    }

    /// The raw repository location, e.g.
    /// `default:/Starter/.project/project.xml`.
    pub fn location(&self) -> Option<String> {
        self.state.str_field(&self.table, "location")
    }

    /// The repository path the project's configuration lives under, derived
    /// from `location` by stripping the repository prefix and the project
    /// descriptor. The custom-field schema document is fetched relative to
    /// this root.
    pub fn storage_root(&self) -> Result<String, Error> {
        let Some(location) = self.location() else {
            return Err(Error::schema(
                self.project_id().unwrap_or_default(),
                "project has no storage location",
            ));
        };
        let path = location.strip_prefix("default:").unwrap_or(&location);
        let path = path.strip_suffix(PROJECT_DESCRIPTOR_SUFFIX).unwrap_or(path);
        Ok(path.trim_end_matches('/').to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_root_strips_prefix_and_descriptor() {
        let body = WireStruct::new("Project")
            .with_field("id", "STARTER")
            .with_field("location", "default:/Starter/.project/project.xml");
        let project = Project::adopt(body);
        assert_eq!(project.storage_root().unwrap(), "/Starter");
    }

    #[test]
    fn storage_root_requires_location() {
        let project = Project::adopt(WireStruct::new("Project").with_field("id", "P"));
        assert!(matches!(
            project.storage_root(),
            Err(Error::Schema { .. })
        ));
    }
}

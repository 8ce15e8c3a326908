use crate::client::Client;
use crate::descriptor::{EntityDescriptor, EntityKind, FieldMapping, MappingTable};
use crate::error::Error;
use crate::marshal::{self, EntityState};
use crate::service::Channel;
use remora_wire::{ObjectUri, WireStruct};

/// The work-item type the reconciliation engine must never synthesize a
/// pending record for.
pub const HEADING_TYPE: &str = "heading";

pub static DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    type_id: "WorkItem",
    channel: Channel::Tracker,
    id_field: Some("work_item_id"),
    fields: &[
        ("work_item_id", FieldMapping::Scalar { remote: "id" }),
        ("title", FieldMapping::Scalar { remote: "title" }),
        (
            "item_type",
            FieldMapping::Enum {
                remote: "type",
                catalog: "workitem-type",
                project_scoped: false,
            },
        ),
        (
            "project",
            FieldMapping::Reference {
                remote: "projectURI",
                kind: EntityKind::Project,
            },
        ),
    ],
};

/// A tracked item: test case, defect, requirement or heading.
#[derive(Debug, Clone)]
pub struct WorkItem {
    client: Client,
    table: MappingTable,
    state: EntityState,
}

impl WorkItem {
    pub fn by_id(client: &Client, project_id: &str, work_item_id: &str) -> Result<WorkItem, Error> {
        let body =
            marshal::lookup_by_id(client.service(), &DESCRIPTOR, Some(project_id), work_item_id)?;
        Ok(WorkItem::adopt(client, body))
    }

    pub fn by_uri(client: &Client, uri: &ObjectUri) -> Result<WorkItem, Error> {
        let body = marshal::lookup_by_uri(client.service(), &DESCRIPTOR, uri)?;
        Ok(WorkItem::adopt(client, body))
    }

    pub(crate) fn adopt(client: &Client, body: WireStruct) -> WorkItem {
        WorkItem {
            client: client.clone(),
            table: MappingTable::of(&DESCRIPTOR),
            state: EntityState::adopt(body),
        }
    }

    /// Run a work-item query. `fields` names local attributes to populate
    /// on the results; they are translated to remote field names before the
    /// call, and an unknown name is an error rather than a silent miss.
    pub fn query(client: &Client, query: &str, fields: &[&str]) -> Result<Vec<WorkItem>, Error> {
        let table = MappingTable::of(&DESCRIPTOR);
        let remote_fields = fields
            .iter()
            .map(|field| {
                table
                    .remote_name(field)
                    .map(str::to_string)
                    .ok_or_else(|| Error::UnknownField {
                        name: (*field).to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let results = client
            .service()
            .query_work_items(query, &remote_fields)
            .map_err(|e| Error::remote("queryWorkItems", e))?;
        Ok(results
            .into_iter()
            .map(|body| WorkItem::adopt(client, body))
            .collect())
    }

    pub fn uri(&self) -> Option<ObjectUri> {
        self.state.uri()
    }

    pub(crate) fn require_uri(&self) -> Result<ObjectUri, Error> {
        self.state.require_uri(DESCRIPTOR.type_id)
    }

    pub fn work_item_id(&self) -> Option<String> {
        self.state.str_field(&self.table, "work_item_id")
    }

    pub fn title(&self) -> Option<String> {
        self.state.str_field(&self.table, "title")
    }

    pub fn item_type(&self) -> Option<String> {
        self.state.str_field(&self.table, "item_type")
    }

    /// Headings structure documents; they are not executable test cases.
    pub fn is_heading(&self) -> bool {
        self.item_type().as_deref() == Some(HEADING_TYPE)
    }

    pub fn project(&self) -> Result<Option<super::Project>, Error> {
        let nested = self
            .state
            .nested_struct(self.client.service(), &self.table, "project")?;
        Ok(nested.map(super::Project::adopt))
    }
}

use crate::client::Client;
use crate::descriptor::{EntityDescriptor, FieldMapping, MappingTable};
use crate::error::Error;
use crate::marshal::{self, EntityState};
use crate::service::Channel;
use remora_wire::{ObjectUri, WireStruct};

use super::WorkItem;

pub static DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    type_id: "Document",
    channel: Channel::Tracker,
    id_field: Some("document_id"),
    fields: &[
        ("document_id", FieldMapping::Scalar { remote: "id" }),
        ("title", FieldMapping::Scalar { remote: "title" }),
    ],
};

/// A live document whose work items can back a dynamic test run.
#[derive(Debug, Clone)]
pub struct Document {
    client: Client,
    table: MappingTable,
    state: EntityState,
}

impl Document {
    pub fn by_id(client: &Client, project_id: &str, document_id: &str) -> Result<Document, Error> {
        let body =
            marshal::lookup_by_id(client.service(), &DESCRIPTOR, Some(project_id), document_id)?;
        Ok(Document::adopt(client, body))
    }

    pub fn by_uri(client: &Client, uri: &ObjectUri) -> Result<Document, Error> {
        let body = marshal::lookup_by_uri(client.service(), &DESCRIPTOR, uri)?;
        Ok(Document::adopt(client, body))
    }

    pub(crate) fn adopt(client: &Client, body: WireStruct) -> Document {
        Document {
            client: client.clone(),
            table: MappingTable::of(&DESCRIPTOR),
            state: EntityState::adopt(body),
        }
    }

    pub fn uri(&self) -> Option<ObjectUri> {
        self.state.uri()
    }

    pub fn document_id(&self) -> Option<String> {
        self.state.str_field(&self.table, "document_id")
    }

    pub fn title(&self) -> Option<String> {
        self.state.str_field(&self.table, "title")
    }

    /// The work items this document contains; `deep` walks nested items
    /// recursively.
    pub fn work_items(&self, deep: bool) -> Result<Vec<WorkItem>, Error> {
        let uri = self.state.require_uri(DESCRIPTOR.type_id)?;
        let results = self
            .client
            .service()
            .document_work_items(&uri, deep)
            .map_err(|e| Error::remote("getDocumentWorkItems", e))?;
        Ok(results
            .into_iter()
            .map(|body| WorkItem::adopt(&self.client, body))
            .collect())
    }

    pub(crate) fn body(&self) -> &WireStruct {
        self.state.body()
    }
}

use crate::descriptor::{EntityDescriptor, FieldMapping, MappingTable};
use crate::marshal::EntityState;
use crate::service::Channel;
use remora_wire::WireStruct;
use time::OffsetDateTime;

pub static DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    type_id: "TestRunAttachment",
    channel: Channel::TestManagement,
    id_field: None,
    fields: &[
        ("file_name", FieldMapping::Scalar { remote: "fileName" }),
        ("title", FieldMapping::Scalar { remote: "title" }),
        ("updated", FieldMapping::Scalar { remote: "updated" }),
    ],
};

/// Metadata of an attachment on a run, record or step. The byte payload is
/// never held here — uploads and downloads pass through the service
/// boundary directly.
#[derive(Debug, Clone)]
pub struct RunAttachment {
    table: MappingTable,
    state: EntityState,
}

impl RunAttachment {
    pub fn from_struct(body: WireStruct) -> RunAttachment {
        RunAttachment {
            table: MappingTable::of(&DESCRIPTOR),
            state: EntityState::adopt(body),
        }
    }

    pub fn file_name(&self) -> Option<String> {
        self.state.str_field(&self.table, "file_name")
    }

    pub fn title(&self) -> Option<String> {
        self.state.str_field(&self.table, "title")
    }

    pub fn updated(&self) -> Option<OffsetDateTime> {
        self.state.timestamp_field(&self.table, "updated")
    }
}

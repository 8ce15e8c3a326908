use crate::descriptor::{EntityDescriptor, EntityKind, FieldMapping, MappingTable};
use crate::marshal::EntityState;
use crate::service::Channel;
use remora_wire::WireStruct;

use super::{RunAttachment, Text};

pub static DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    type_id: "TestStepResult",
    channel: Channel::TestManagement,
    id_field: None,
    fields: &[
        (
            "result",
            FieldMapping::Enum {
                remote: "result",
                catalog: "result",
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
            "attachments",
            FieldMapping::Array {
                remote: "attachments",
                element: "TestRunAttachment",
                kind: EntityKind::RunAttachment,
            },
        ),
    ],
};

/// The outcome of one step within an executed test record.
#[derive(Debug, Clone)]
pub struct TestStepResult {
    table: MappingTable,
    state: EntityState,
}

impl TestStepResult {
    pub fn from_struct(body: WireStruct) -> TestStepResult {
        TestStepResult {
            table: MappingTable::of(&DESCRIPTOR),
            state: EntityState::adopt(body),
        }
    }

    pub fn result(&self) -> Option<String> {
        self.state.str_field(&self.table, "result")
    }

    pub fn comment(&self) -> Option<Text> {
        self.state
            .nested_local(&self.table, "comment")
            .map(Text::from_struct)
    }

    pub fn attachments(&self) -> Vec<RunAttachment> {
        self.state
            .array_structs(&self.table, "attachments")
            .unwrap_or_default()
            .into_iter()
            .map(RunAttachment::from_struct)
            .collect()
    }
}

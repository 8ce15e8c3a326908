//! One test case's execution record within a run.

use crate::client::Client;
use crate::descriptor::{EntityDescriptor, EntityKind, FieldMapping, MappingTable};
use crate::enums::EnumResolver;
use crate::error::Error;
use crate::marshal::EntityState;
use crate::service::Channel;
use remora_wire::{ObjectUri, WireStruct, WireValue};
use time::OffsetDateTime;

use super::{RunAttachment, TestStepResult, Text, TextContent, User, WorkItem};

pub static DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    type_id: "TestRecord",
    channel: Channel::TestManagement,
    id_field: None,
    fields: &[
        (
            "test_case",
            FieldMapping::Reference {
                remote: "testCaseURI",
                kind: EntityKind::WorkItem,
            },
        ),
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
        ("executed", FieldMapping::Scalar { remote: "executed" }),
        (
            "executed_by",
            FieldMapping::Reference {
                remote: "executedByURI",
                kind: EntityKind::User,
            },
        ),
        ("duration", FieldMapping::Scalar { remote: "duration" }),
        (
            "defect",
            FieldMapping::Reference {
                remote: "defectURI",
                kind: EntityKind::WorkItem,
            },
        ),
        (
            "step_results",
            FieldMapping::Array {
                remote: "testStepResults",
                element: "TestStepResult",
                kind: EntityKind::TestStepResult,
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

/// An execution record: which case, with what outcome, by whom.
///
/// A record with no `executed` timestamp is pending — declared in the run
/// but not run yet. Pending records are either reported by the service
/// (static selection) or synthesized by the reconciliation engine (dynamic
/// selection).
#[derive(Debug, Clone)]
pub struct TestRecord {
    client: Client,
    table: MappingTable,
    state: EntityState,
}

impl TestRecord {
    /// A blank record for assembling a payload.
    pub fn new(client: &Client) -> TestRecord {
        TestRecord {
            client: client.clone(),
            table: MappingTable::of(&DESCRIPTOR),
            state: EntityState::blank(&DESCRIPTOR),
        }
    }

    /// A pending record pointing at an already-fetched case.
    pub fn for_case(client: &Client, case: &WorkItem) -> Result<TestRecord, Error> {
        let mut record = TestRecord::new(client);
        record.set_test_case(case)?;
        Ok(record)
    }

    /// A pending record for a case known only by id; looks the case up.
    pub fn pending(client: &Client, project_id: &str, test_case_id: &str) -> Result<TestRecord, Error> {
        let case = WorkItem::by_id(client, project_id, test_case_id)?;
        TestRecord::for_case(client, &case)
    }

    pub(crate) fn adopt(client: &Client, body: WireStruct) -> TestRecord {
        TestRecord {
            client: client.clone(),
            table: MappingTable::of(&DESCRIPTOR),
            state: EntityState::adopt(body),
        }
    }

    // ── Reads ───────────────────────────────────────────────────────────

    pub fn test_case_uri(&self) -> Option<ObjectUri> {
        self.state.uri_field(&self.table, "test_case")
    }

    /// The case's identifier, taken from the handle's item-id segment.
    pub fn test_case_id(&self) -> Option<String> {
        self.test_case_uri().map(|uri| uri.item_id().to_string())
    }

    pub fn test_case(&self) -> Result<Option<WorkItem>, Error> {
        let nested = self
            .state
            .nested_struct(self.client.service(), &self.table, "test_case")?;
        Ok(nested.map(|body| WorkItem::adopt(&self.client, body)))
    }

    pub fn result(&self) -> Option<String> {
        self.state.str_field(&self.table, "result")
    }

    pub fn executed(&self) -> Option<OffsetDateTime> {
        self.state.timestamp_field(&self.table, "executed")
    }

    /// Whether this record has been executed at all — the service marks
    /// execution by stamping the `executed` timestamp.
    pub fn is_executed(&self) -> bool {
        self.state
            .value(&self.table, "executed")
            .is_some_and(|v| !v.is_null())
    }

    pub fn executed_by(&self) -> Result<Option<User>, Error> {
        let nested = self
            .state
            .nested_struct(self.client.service(), &self.table, "executed_by")?;
        Ok(nested.map(User::adopt))
    }

    pub fn duration(&self) -> Option<f64> {
        self.state.f64_field(&self.table, "duration")
    }

    pub fn comment(&self) -> Option<Text> {
        self.state
            .nested_local(&self.table, "comment")
            .map(Text::from_struct)
    }

    pub fn defect(&self) -> Result<Option<WorkItem>, Error> {
        let nested = self
            .state
            .nested_struct(self.client.service(), &self.table, "defect")?;
        Ok(nested.map(|body| WorkItem::adopt(&self.client, body)))
    }

    pub fn step_results(&self) -> Vec<TestStepResult> {
        self.state
            .array_structs(&self.table, "step_results")
            .unwrap_or_default()
            .into_iter()
            .map(TestStepResult::from_struct)
            .collect()
    }

    pub fn attachments(&self) -> Vec<RunAttachment> {
        self.state
            .array_structs(&self.table, "attachments")
            .unwrap_or_default()
            .into_iter()
            .map(RunAttachment::from_struct)
            .collect()
    }

    // ── Writes ──────────────────────────────────────────────────────────

    pub fn set_test_case(&mut self, case: &WorkItem) -> Result<(), Error> {
        let uri = case.require_uri()?;
        self.state.set_reference(&self.table, "test_case", uri)
    }

    /// Validated against the `result` catalog before being stored.
    pub fn set_result(&mut self, result: &str) -> Result<(), Error> {
        let resolver = EnumResolver::new(self.client.service());
        self.state
            .set_enum_value(&resolver, &self.table, "result", result)
    }

    pub fn set_comment(&mut self, content: Option<TextContent>) -> Result<(), Error> {
        self.state
            .set_nested(&self.table, "comment", content.map(TextContent::into_wire))
    }

    pub fn set_executed(&mut self, when: OffsetDateTime) -> Result<(), Error> {
        self.state.set_timestamp(&self.table, "executed", Some(when))
    }

    pub fn set_executed_by(&mut self, user: &User) -> Result<(), Error> {
        let uri = user.require_uri()?;
        self.state.set_reference(&self.table, "executed_by", uri)
    }

    pub fn set_duration(&mut self, seconds: f64) -> Result<(), Error> {
        self.state
            .set_value(&self.table, "duration", WireValue::Float(seconds))
    }

    pub fn set_defect(&mut self, defect: &WorkItem) -> Result<(), Error> {
        let uri = defect.require_uri()?;
        self.state.set_reference(&self.table, "defect", uri)
    }

    pub(crate) fn body(&self) -> &WireStruct {
        self.state.body()
    }

    pub fn into_wire(self) -> WireStruct {
        self.state.into_body()
    }
}

//! Test runs: record reconciliation, derived status, and the run's full
//! mutation surface.
//!
//! A run declares its candidate test cases through a selection mode. For
//! static and manual selection the service reports the full declared record
//! list; for dynamic selection it reports executed records only, and the
//! reconciliation engine synthesizes pending records for the rest of the
//! candidate set. Status is derived, never set directly by callers: every
//! record mutation reloads a fresh snapshot, recomputes, and writes the
//! status back only when it changed — so uncommitted local edits on the
//! caller's instance are never clobbered.

use crate::client::Client;
use crate::custom::CustomFieldKind;
use crate::descriptor::{EntityDescriptor, EntityKind, FieldMapping, MappingEntry, MappingTable};
use crate::enums::EnumResolver;
use crate::error::Error;
use crate::marshal::{self, EntityState};
use crate::service::Channel;
use crate::transaction::with_transaction;
use remora_wire::{ObjectUri, WireStruct, WireValue};
use std::collections::BTreeSet;
use std::fmt;
use time::OffsetDateTime;

use super::{Document, RunAttachment, TestRecord, Text, TextContent, User, WorkItem};

pub static DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    type_id: "TestRun",
    channel: Channel::TestManagement,
    id_field: Some("test_run_id"),
    fields: &[
        ("test_run_id", FieldMapping::Scalar { remote: "id" }),
        ("created", FieldMapping::Scalar { remote: "created" }),
        ("updated", FieldMapping::Scalar { remote: "updated" }),
        ("finished_on", FieldMapping::Scalar { remote: "finishedOn" }),
        ("group_id", FieldMapping::Scalar { remote: "groupId" }),
        ("location", FieldMapping::Scalar { remote: "location" }),
        ("query", FieldMapping::Scalar { remote: "query" }),
        ("is_template", FieldMapping::Scalar { remote: "isTemplate" }),
        (
            "keep_in_history",
            FieldMapping::Scalar {
                remote: "keepInHistory",
            },
        ),
        (
            "author",
            FieldMapping::Reference {
                remote: "authorURI",
                kind: EntityKind::User,
            },
        ),
        (
            "project",
            FieldMapping::Reference {
                remote: "projectURI",
                kind: EntityKind::Project,
            },
        ),
        (
            "template",
            FieldMapping::Reference {
                remote: "templateURI",
                kind: EntityKind::TestRun,
            },
        ),
        (
            "summary_defect",
            FieldMapping::Reference {
                remote: "summaryDefectURI",
                kind: EntityKind::WorkItem,
            },
        ),
        (
            "document",
            FieldMapping::Nested {
                remote: "document",
                kind: EntityKind::Document,
            },
        ),
        (
            "records",
            FieldMapping::Array {
                remote: "records",
                element: "TestRecord",
                kind: EntityKind::TestRecord,
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
        (
            "select_test_cases_by",
            FieldMapping::Enum {
                remote: "selectTestCasesBy",
                catalog: "testrun-selectTestCasesBy",
                project_scoped: false,
            },
        ),
        (
            "status",
            FieldMapping::Enum {
                remote: "status",
                catalog: "testrun-status",
                project_scoped: false,
            },
        ),
        (
            "run_type",
            FieldMapping::Enum {
                remote: "type",
                catalog: "testrun-type",
                project_scoped: false,
            },
        ),
    ],
};

/// How a run's candidate test-case set is declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    /// A fixed list; the service reports the full declared record set.
    StaticList,
    /// A hand-picked list; reported like a static list.
    ManualList,
    /// The work items of a live document, resolved at read time.
    DynamicDocument,
    /// The work items matching a stored query, resolved at read time.
    DynamicQuery,
}

impl SelectionMode {
    pub fn wire_value(self) -> &'static str {
        match self {
            SelectionMode::StaticList => "staticList",
            SelectionMode::ManualList => "manualList",
            SelectionMode::DynamicDocument => "dynamicDocument",
            SelectionMode::DynamicQuery => "dynamicQuery",
        }
    }

    pub fn from_wire(raw: &str) -> Option<SelectionMode> {
        match raw {
            "staticList" => Some(SelectionMode::StaticList),
            "manualList" => Some(SelectionMode::ManualList),
            "dynamicDocument" => Some(SelectionMode::DynamicDocument),
            "dynamicQuery" => Some(SelectionMode::DynamicQuery),
            _ => None,
        }
    }
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_value())
    }
}

/// The run's derived execution status. There are exactly three states; the
/// engine owns every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    NotRun,
    InProgress,
    Finished,
}

impl RunStatus {
    pub fn wire_value(self) -> &'static str {
        match self {
            RunStatus::NotRun => "notrun",
            RunStatus::InProgress => "inprogress",
            RunStatus::Finished => "finished",
        }
    }

    pub fn from_wire(raw: &str) -> Option<RunStatus> {
        match raw {
            "notrun" => Some(RunStatus::NotRun),
            "inprogress" => Some(RunStatus::InProgress),
            "finished" => Some(RunStatus::Finished),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_value())
    }
}

/// A record handed to an add/update operation: either a domain-level
/// [`TestRecord`] or a pre-built wire struct. Two explicit constructors —
/// the variant is never inferred from the value's shape.
#[derive(Debug, Clone)]
pub enum RecordInput {
    Record(TestRecord),
    Wire(WireStruct),
}

impl RecordInput {
    fn into_wire(self) -> WireStruct {
        match self {
            RecordInput::Record(record) => record.into_wire(),
            RecordInput::Wire(body) => body,
        }
    }
}

impl From<TestRecord> for RecordInput {
    fn from(record: TestRecord) -> Self {
        RecordInput::Record(record)
    }
}

impl From<WireStruct> for RecordInput {
    fn from(body: WireStruct) -> Self {
        RecordInput::Wire(body)
    }
}

/// Options for [`TestRun::create_template`].
#[derive(Debug, Clone, Default)]
pub struct TemplateOptions {
    /// Template to base this template on; the service's empty template when
    /// unset.
    pub parent_template: Option<String>,
    /// Explicit selection mode; when unset it is inferred from `document`
    /// or `query`.
    pub select_test_cases_by: Option<SelectionMode>,
    /// Backing query, for dynamic-query templates.
    pub query: Option<String>,
    /// Backing document id, for dynamic-document templates.
    pub document: Option<String>,
}

/// Options for [`TestRun::search`].
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Local attribute names to populate on the results; empty means all.
    pub fields: Vec<String>,
    /// Local attribute name to sort by.
    pub sort: String,
    /// Maximum number of results; negative means no limit.
    pub limit: i32,
    /// Search run templates instead of runs.
    pub templates: bool,
}

impl Default for SearchOptions {
    fn default() -> SearchOptions {
        SearchOptions {
            fields: Vec::new(),
            sort: "test_run_id".to_string(),
            limit: -1,
            templates: false,
        }
    }
}

/// A test run, identified by project id plus run id.
#[derive(Debug, Clone)]
pub struct TestRun {
    client: Client,
    table: MappingTable,
    state: EntityState,
    project_id: Option<String>,
}

impl TestRun {
    // ── Construction ────────────────────────────────────────────────────

    pub fn by_id(client: &Client, project_id: &str, test_run_id: &str) -> Result<TestRun, Error> {
        let body =
            marshal::lookup_by_id(client.service(), &DESCRIPTOR, Some(project_id), test_run_id)?;
        TestRun::adopt_scoped(client, body, Some(project_id.to_string()))
    }

    pub fn by_uri(client: &Client, uri: &ObjectUri) -> Result<TestRun, Error> {
        let body = marshal::lookup_by_uri(client.service(), &DESCRIPTOR, uri)?;
        TestRun::adopt_scoped(client, body, None)
    }

    /// Adopt a representation already fetched from the service, e.g. a
    /// search result.
    pub fn from_wire(client: &Client, body: WireStruct) -> Result<TestRun, Error> {
        TestRun::adopt_scoped(client, body, None)
    }

    /// Create a run from a template and return it populated.
    pub fn create(
        client: &Client,
        project_id: &str,
        test_run_id: &str,
        template: &str,
    ) -> Result<TestRun, Error> {
        let uri = client
            .service()
            .create_test_run(project_id, test_run_id, template)
            .map_err(|e| Error::remote("createTestRun", e))?;
        TestRun::by_uri(client, &uri)
    }

    /// Create a run template: create, configure its selection, commit — one
    /// transaction, then a fresh fetch of the finished template.
    pub fn create_template(
        client: &Client,
        project_id: &str,
        template_id: &str,
        options: TemplateOptions,
    ) -> Result<TestRun, Error> {
        with_transaction(client.service(), || {
            let parent = options.parent_template.as_deref().unwrap_or("Empty");
            let mut run = TestRun::create(client, project_id, template_id, parent)?;
            run.set_is_template(true)?;
            if let Some(mode) = options.select_test_cases_by {
                run.set_selection_mode(mode)?;
            } else if options.document.is_some() {
                run.set_selection_mode(SelectionMode::DynamicDocument)?;
            } else if options.query.is_some() {
                run.set_selection_mode(SelectionMode::DynamicQuery)?;
            }
            if let Some(query) = &options.query {
                run.set_query(query)?;
            } else if let Some(document_id) = &options.document {
                let document = Document::by_id(client, project_id, document_id)?;
                run.set_document(&document)?;
            }
            run.update()
        })?;
        TestRun::by_id(client, project_id, template_id)
    }

    /// Search runs or run templates. Sort and field names are local
    /// attribute names, translated through the mapping table before the
    /// call.
    pub fn search(
        client: &Client,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<TestRun>, Error> {
        let table = MappingTable::of(&DESCRIPTOR);
        let sort = table
            .remote_name(&options.sort)
            .ok_or_else(|| Error::UnknownField {
                name: options.sort.clone(),
            })?
            .to_string();
        let fields = options
            .fields
            .iter()
            .map(|field| {
                table
                    .remote_name(field)
                    .map(str::to_string)
                    .ok_or_else(|| Error::UnknownField { name: field.clone() })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let results = client
            .service()
            .search_test_runs(query, &sort, &fields, options.limit, options.templates)
            .map_err(|e| Error::remote("searchTestRuns", e))?;
        results
            .into_iter()
            .map(|body| TestRun::from_wire(client, body))
            .collect()
    }

    fn adopt_scoped(
        client: &Client,
        body: WireStruct,
        project_id: Option<String>,
    ) -> Result<TestRun, Error> {
        let project_id = project_id
            .or_else(|| {
                body.field("projectURI")
                    .and_then(WireValue::as_uri)
                    .map(|uri| uri.item_id().to_string())
            })
            .or_else(|| client.default_project().map(str::to_string));
        let mut table = MappingTable::of(&DESCRIPTOR);
        if let Some(project) = &project_id {
            let custom = client.custom_fields_for(project)?;
            table = table.with_custom_fields(project, &custom);
        }
        Ok(TestRun {
            client: client.clone(),
            table,
            state: EntityState::adopt(body),
            project_id,
        })
    }

    // ── Plain reads ─────────────────────────────────────────────────────

    pub fn uri(&self) -> Option<ObjectUri> {
        self.state.uri()
    }

    pub fn test_run_id(&self) -> Option<String> {
        self.state.str_field(&self.table, "test_run_id")
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    pub fn query(&self) -> Option<String> {
        self.state.str_field(&self.table, "query")
    }

    pub fn group_id(&self) -> Option<String> {
        self.state.str_field(&self.table, "group_id")
    }

    pub fn location(&self) -> Option<String> {
        self.state.str_field(&self.table, "location")
    }

    pub fn is_template(&self) -> bool {
        self.state.bool_field(&self.table, "is_template").unwrap_or(false)
    }

    pub fn keep_in_history(&self) -> bool {
        self.state
            .bool_field(&self.table, "keep_in_history")
            .unwrap_or(false)
    }

    pub fn created(&self) -> Option<OffsetDateTime> {
        self.state.timestamp_field(&self.table, "created")
    }

    pub fn updated(&self) -> Option<OffsetDateTime> {
        self.state.timestamp_field(&self.table, "updated")
    }

    pub fn finished_on(&self) -> Option<OffsetDateTime> {
        self.state.timestamp_field(&self.table, "finished_on")
    }

    pub fn status(&self) -> Option<RunStatus> {
        self.state
            .str_field(&self.table, "status")
            .and_then(|raw| RunStatus::from_wire(&raw))
    }

    pub fn run_type(&self) -> Option<String> {
        self.state.str_field(&self.table, "run_type")
    }

    pub fn selection_mode(&self) -> Result<SelectionMode, Error> {
        let raw = self
            .state
            .str_field(&self.table, "select_test_cases_by")
            .ok_or_else(|| Error::invalid_value("select_test_cases_by", ""))?;
        SelectionMode::from_wire(&raw)
            .ok_or_else(|| Error::invalid_value("select_test_cases_by", raw))
    }

    pub fn author(&self) -> Result<Option<User>, Error> {
        let nested = self
            .state
            .nested_struct(self.client.service(), &self.table, "author")?;
        Ok(nested.map(User::adopt))
    }

    pub fn document(&self) -> Result<Option<Document>, Error> {
        let nested = self
            .state
            .nested_struct(self.client.service(), &self.table, "document")?;
        Ok(nested.map(|body| Document::adopt(&self.client, body)))
    }

    pub fn summary_defect(&self) -> Result<Option<WorkItem>, Error> {
        let nested = self
            .state
            .nested_struct(self.client.service(), &self.table, "summary_defect")?;
        Ok(nested.map(|body| WorkItem::adopt(&self.client, body)))
    }

    /// Attachment metadata carried on this representation. For the current
    /// service-side list, see [`TestRun::fetch_attachments`].
    pub fn attachments(&self) -> Vec<RunAttachment> {
        self.state
            .array_structs(&self.table, "attachments")
            .unwrap_or_default()
            .into_iter()
            .map(RunAttachment::from_struct)
            .collect()
    }

    /// The record list exactly as the service reported it: the full
    /// declared set for static/manual selection, executed records only for
    /// dynamic selection.
    pub fn raw_records(&self) -> Vec<TestRecord> {
        self.state
            .array_structs(&self.table, "records")
            .unwrap_or_default()
            .into_iter()
            .map(|body| TestRecord::adopt(&self.client, body))
            .collect()
    }

    // ── Reconciliation ──────────────────────────────────────────────────

    /// The run's effective record set: executed records first, in service
    /// order, then a synthesized pending record for every candidate case
    /// that has not been executed and is not a heading. Static and manual
    /// selection return the service's list unmodified.
    pub fn effective_records(&self) -> Result<Vec<TestRecord>, Error> {
        self.state.require_uri(DESCRIPTOR.type_id)?;
        let executed = self.raw_records();
        let candidates = match self.selection_mode()? {
            SelectionMode::StaticList | SelectionMode::ManualList => return Ok(executed),
            SelectionMode::DynamicDocument => {
                let document = self
                    .document()?
                    .ok_or_else(|| Error::invalid_value("document", ""))?;
                document.work_items(true)?
            }
            SelectionMode::DynamicQuery => {
                let query = self
                    .query()
                    .ok_or_else(|| Error::invalid_value("query", ""))?;
                let project = self
                    .project_id()
                    .ok_or_else(|| Error::invalid_value("project", ""))?;
                WorkItem::query(
                    &self.client,
                    &format!("{query} AND project.id:{project}"),
                    &[],
                )?
            }
        };
        let executed_ids: BTreeSet<String> = executed
            .iter()
            .filter_map(TestRecord::test_case_id)
            .collect();
        let mut records = executed;
        for case in &candidates {
            let Some(case_id) = case.work_item_id() else {
                continue;
            };
            if executed_ids.contains(&case_id) || case.is_heading() {
                continue;
            }
            records.push(TestRecord::for_case(&self.client, case)?);
        }
        Ok(records)
    }

    /// The position of `test_case_id` among *executed* records only — the
    /// index space used by record and step attachment operations. Distinct
    /// from the full-list index used internally by
    /// [`TestRun::update_test_record`]; the two must never be conflated.
    pub fn executed_record_index(&self, test_case_id: &str) -> Result<usize, Error> {
        let mut index = 0usize;
        for record in self.raw_records() {
            let matches = record.test_case_id().as_deref() == Some(test_case_id);
            if record.is_executed() {
                if matches {
                    return Ok(index);
                }
                index += 1;
            } else if matches {
                return Err(Error::RecordNotFound {
                    test_case_id: test_case_id.to_string(),
                });
            }
        }
        Err(Error::RecordNotFound {
            test_case_id: test_case_id.to_string(),
        })
    }

    // ── Plain writes ────────────────────────────────────────────────────

    pub fn set_query(&mut self, query: &str) -> Result<(), Error> {
        self.state.set_value(&self.table, "query", query.into())
    }

    pub fn set_group_id(&mut self, group_id: &str) -> Result<(), Error> {
        self.state.set_value(&self.table, "group_id", group_id.into())
    }

    pub fn set_is_template(&mut self, is_template: bool) -> Result<(), Error> {
        self.state
            .set_value(&self.table, "is_template", is_template.into())
    }

    pub fn set_keep_in_history(&mut self, keep: bool) -> Result<(), Error> {
        self.state
            .set_value(&self.table, "keep_in_history", keep.into())
    }

    pub fn set_selection_mode(&mut self, mode: SelectionMode) -> Result<(), Error> {
        self.state
            .set_value(&self.table, "select_test_cases_by", mode.wire_value().into())
    }

    pub fn set_status(&mut self, status: RunStatus) -> Result<(), Error> {
        self.state
            .set_value(&self.table, "status", status.wire_value().into())
    }

    pub fn set_finished_on(&mut self, when: Option<OffsetDateTime>) -> Result<(), Error> {
        self.state.set_timestamp(&self.table, "finished_on", when)
    }

    pub fn set_document(&mut self, document: &Document) -> Result<(), Error> {
        self.state
            .set_nested(&self.table, "document", Some(document.body().clone()))
    }

    pub fn set_author(&mut self, author: &User) -> Result<(), Error> {
        let uri = author.require_uri()?;
        self.state.set_reference(&self.table, "author", uri)
    }

    /// Validated against the run-type catalog.
    pub fn set_run_type(&mut self, run_type: &str) -> Result<(), Error> {
        let resolver = EnumResolver::new(self.client.service());
        self.state
            .set_enum_value(&resolver, &self.table, "run_type", run_type)
    }

    // ── Custom fields ───────────────────────────────────────────────────

    /// Current value of a custom field: a staged write when one is pending,
    /// otherwise the stored key/value collection entry.
    pub fn custom_field(&self, name: &str) -> Result<Option<WireValue>, Error> {
        self.state.require_uri(DESCRIPTOR.type_id)?;
        match self.table.get(name) {
            Some(MappingEntry::Custom(_)) => Ok(self.state.custom_value(name)),
            _ => Err(Error::UnknownField {
                name: name.to_string(),
            }),
        }
    }

    /// Stage a custom-field write. The value is validated against the
    /// field's resolved kind now; nothing reaches the service until the
    /// next [`TestRun::update`], because the remote schema only accepts
    /// custom fields through the generic key/value collection.
    pub fn set_custom_field(&mut self, name: &str, value: WireValue) -> Result<(), Error> {
        self.state.require_uri(DESCRIPTOR.type_id)?;
        let kind = self
            .table
            .custom_kind(name)
            .cloned()
            .ok_or_else(|| Error::UnknownField {
                name: name.to_string(),
            })?;
        let staged = self.validate_custom(name, &kind, value)?;
        self.state.stage_custom(name, staged);
        Ok(())
    }

    fn validate_custom(
        &self,
        name: &str,
        kind: &CustomFieldKind,
        value: WireValue,
    ) -> Result<WireValue, Error> {
        match kind {
            // base types pass through; the service publishes no schema to
            // validate them against
            CustomFieldKind::Scalar => Ok(value),
            CustomFieldKind::Text => match value {
                WireValue::Str(content) => Ok(WireValue::Struct(Text::plain(&content).into_wire())),
                WireValue::Struct(body) => Ok(WireValue::Struct(body)),
                other => Err(Error::invalid_value(name, format!("{other:?}"))),
            },
            CustomFieldKind::Enum { catalog } => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| Error::invalid_value(name, format!("{value:?}")))?
                    .to_string();
                EnumResolver::new(self.client.service()).validate(catalog, None, name, &raw)?;
                Ok(value)
            }
            CustomFieldKind::EntityEnum {
                kind,
                project_scoped,
            } => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| Error::invalid_value(name, format!("{value:?}")))?
                    .to_string();
                let scope = if *project_scoped {
                    self.project_id()
                } else {
                    None
                };
                let descriptor = kind.descriptor();
                let fetched = self
                    .client
                    .service()
                    .lookup_by_id(descriptor.channel, descriptor.type_id, scope, &raw)
                    .map_err(|e| Error::remote("lookupById", e))?;
                if fetched.unresolvable {
                    return Err(Error::invalid_value(name, raw));
                }
                Ok(WireValue::Str(raw))
            }
        }
    }

    // ── Commit ──────────────────────────────────────────────────────────

    /// Write the run back: flush every staged custom-field write into the
    /// key/value collection, clear the dirty-set, then issue the single
    /// remote update. A remote failure after the flush surfaces with the
    /// dirty-set already cleared; it is not retried.
    pub fn update(&mut self) -> Result<(), Error> {
        self.state.require_uri(DESCRIPTOR.type_id)?;
        self.state.flush_custom_fields();
        self.client
            .service()
            .update_test_run(self.state.body())
            .map_err(|e| Error::remote("updateTestRun", e))
    }

    // ── Records ─────────────────────────────────────────────────────────

    /// Add an execution record built from result fields. Looks up the case,
    /// executing user and optional defect, validates the result value, and
    /// recomputes run status afterwards.
    #[allow(clippy::too_many_arguments)]
    pub fn add_test_record_by_fields(
        &self,
        test_case_id: &str,
        result: &str,
        comment: Option<TextContent>,
        executed_by: &str,
        executed: OffsetDateTime,
        duration: f64,
        defect_work_item_id: Option<&str>,
    ) -> Result<(), Error> {
        let uri = self.state.require_uri(DESCRIPTOR.type_id)?;
        with_transaction(self.client.service(), || {
            self.ensure_record_absent(test_case_id)?;
            let project = self
                .project_id()
                .ok_or_else(|| Error::invalid_value("project", ""))?;
            let case = WorkItem::by_id(&self.client, project, test_case_id)?;
            let executor = User::by_id(&self.client, executed_by)?;
            let mut record = TestRecord::for_case(&self.client, &case)?;
            record.set_result(result)?;
            record.set_executed(executed)?;
            record.set_executed_by(&executor)?;
            record.set_duration(duration)?;
            if comment.is_some() {
                record.set_comment(comment)?;
            }
            if let Some(defect_id) = defect_work_item_id {
                let defect = WorkItem::by_id(&self.client, project, defect_id)?;
                record.set_defect(&defect)?;
            }
            self.client
                .service()
                .add_test_record(&uri, record.body())
                .map_err(|e| Error::remote("addTestRecord", e))?;
            self.reconcile_status()
        })
    }

    /// Add an execution record from a [`RecordInput`]. Guards against the
    /// case already being executed (checked on a fresh snapshot) before the
    /// add call is issued.
    pub fn add_test_record(&self, record: impl Into<RecordInput>) -> Result<(), Error> {
        let uri = self.state.require_uri(DESCRIPTOR.type_id)?;
        let body = record.into().into_wire();
        with_transaction(self.client.service(), || {
            let case_id = body
                .field("testCaseURI")
                .and_then(WireValue::as_uri)
                .map(|case| case.item_id().to_string())
                .ok_or_else(|| Error::invalid_value("test_case", ""))?;
            self.ensure_record_absent(&case_id)?;
            self.client
                .service()
                .add_test_record(&uri, &body)
                .map_err(|e| Error::remote("addTestRecord", e))?;
            self.reconcile_status()
        })
    }

    /// Update the record of an already-executed case from result fields.
    #[allow(clippy::too_many_arguments)]
    pub fn update_test_record_by_fields(
        &self,
        test_case_id: &str,
        result: &str,
        comment: Option<TextContent>,
        executed_by: &str,
        executed: OffsetDateTime,
        duration: f64,
        defect_work_item_id: Option<&str>,
    ) -> Result<(), Error> {
        let project = self
            .project_id()
            .ok_or_else(|| Error::invalid_value("project", ""))?;
        let mut record = TestRecord::pending(&self.client, project, test_case_id)?;
        record.set_result(result)?;
        record.set_executed(executed)?;
        let executor = User::by_id(&self.client, executed_by)?;
        record.set_executed_by(&executor)?;
        if duration >= 0.0 {
            record.set_duration(duration)?;
        }
        if comment.is_some() {
            record.set_comment(comment)?;
        }
        if let Some(defect_id) = defect_work_item_id {
            let defect = WorkItem::by_id(&self.client, project, defect_id)?;
            record.set_defect(&defect)?;
        }
        self.update_test_record(test_case_id, record)
    }

    /// Replace the record for `test_case_id`, addressed by its position in
    /// the full declared record list — not the executed-only index. Falls
    /// back to an add when the case is not declared yet.
    pub fn update_test_record(
        &self,
        test_case_id: &str,
        record: impl Into<RecordInput>,
    ) -> Result<(), Error> {
        let uri = self.state.require_uri(DESCRIPTOR.type_id)?;
        let body = record.into().into_wire();
        with_transaction(self.client.service(), || {
            let position = self
                .raw_records()
                .iter()
                .position(|existing| existing.test_case_id().as_deref() == Some(test_case_id));
            match position {
                None => {
                    self.ensure_record_absent(test_case_id)?;
                    self.client
                        .service()
                        .add_test_record(&uri, &body)
                        .map_err(|e| Error::remote("addTestRecord", e))?;
                }
                Some(index) => {
                    self.client
                        .service()
                        .update_test_record_at_index(&uri, index, &body)
                        .map_err(|e| Error::remote("updateTestRecordAtIndex", e))?;
                }
            }
            self.reconcile_status()
        })
    }

    // ── Status engine ───────────────────────────────────────────────────

    /// Reload a fresh snapshot, derive its status from the effective record
    /// set, and write the status (and finished-on stamp) back only when it
    /// differs from what the snapshot carries. Working on a fresh snapshot
    /// keeps uncommitted edits on this instance out of the status write.
    fn reconcile_status(&self) -> Result<(), Error> {
        let uri = self.state.require_uri(DESCRIPTOR.type_id)?;
        let mut fresh = TestRun::by_uri(&self.client, &uri)?;
        let records = fresh.effective_records()?;
        let with_result = records
            .iter()
            .filter(|record| record.result().is_some())
            .count();
        let derived = if with_result == 0 {
            RunStatus::NotRun
        } else if with_result == records.len() {
            RunStatus::Finished
        } else {
            RunStatus::InProgress
        };
        match derived {
            RunStatus::Finished => fresh.set_finished_on(Some(OffsetDateTime::now_utc()))?,
            _ => fresh.set_finished_on(None)?,
        }
        if fresh.status() != Some(derived) {
            tracing::debug!(run = %uri, to = %derived, "test run status transition");
            fresh.set_status(derived)?;
            fresh.update()?;
        }
        Ok(())
    }

    /// Fail with [`Error::DuplicateRecord`] when a fresh snapshot already
    /// carries an *executed* record for the case — another actor may have
    /// executed it since this instance was fetched, at the cost of one
    /// extra round trip per add. A declared-but-pending record is not a
    /// duplicate; executing it is exactly what an add does.
    fn ensure_record_absent(&self, test_case_id: &str) -> Result<(), Error> {
        let uri = self.state.require_uri(DESCRIPTOR.type_id)?;
        let fresh = TestRun::by_uri(&self.client, &uri)?;
        let exists = fresh.raw_records().iter().any(|record| {
            record.is_executed() && record.test_case_id().as_deref() == Some(test_case_id)
        });
        if exists {
            return Err(Error::DuplicateRecord {
                test_case_id: test_case_id.to_string(),
            });
        }
        Ok(())
    }

    // ── Attachments ─────────────────────────────────────────────────────

    pub fn add_attachment(&self, filename: &str, title: &str, data: &[u8]) -> Result<(), Error> {
        let uri = self.state.require_uri(DESCRIPTOR.type_id)?;
        self.client
            .service()
            .add_run_attachment(&uri, filename, title, data)
            .map_err(|e| Error::remote("addAttachmentToTestRun", e))
    }

    /// Overwrite the attachment stored under `filename`.
    pub fn update_attachment(&self, filename: &str, title: &str, data: &[u8]) -> Result<(), Error> {
        let uri = self.state.require_uri(DESCRIPTOR.type_id)?;
        self.client
            .service()
            .update_run_attachment(&uri, filename, title, data)
            .map_err(|e| Error::remote("updateTestRunAttachment", e))
    }

    pub fn delete_attachment(&self, filename: &str) -> Result<(), Error> {
        let uri = self.state.require_uri(DESCRIPTOR.type_id)?;
        self.client
            .service()
            .delete_run_attachment(&uri, filename)
            .map_err(|e| Error::remote("deleteTestRunAttachment", e))
    }

    pub fn attachment(&self, filename: &str) -> Result<RunAttachment, Error> {
        let uri = self.state.require_uri(DESCRIPTOR.type_id)?;
        let body = self
            .client
            .service()
            .get_run_attachment(&uri, filename)
            .map_err(|e| Error::remote("getTestRunAttachment", e))?;
        if body.unresolvable {
            return Err(Error::NotFound {
                kind: "TestRunAttachment",
                id: filename.to_string(),
            });
        }
        Ok(RunAttachment::from_struct(body))
    }

    /// The service-side attachment list for this run.
    pub fn fetch_attachments(&self) -> Result<Vec<RunAttachment>, Error> {
        let uri = self.state.require_uri(DESCRIPTOR.type_id)?;
        let bodies = self
            .client
            .service()
            .list_run_attachments(&uri)
            .map_err(|e| Error::remote("getTestRunAttachments", e))?;
        Ok(bodies.into_iter().map(RunAttachment::from_struct).collect())
    }

    /// Attach to the record of an executed case. The index sent to the
    /// service is the executed-only index.
    pub fn add_attachment_to_record(
        &self,
        test_case_id: &str,
        filename: &str,
        title: &str,
        data: &[u8],
    ) -> Result<(), Error> {
        let uri = self.state.require_uri(DESCRIPTOR.type_id)?;
        let index = self.executed_record_index(test_case_id)?;
        self.verify_record_count(index)?;
        self.client
            .service()
            .add_record_attachment(&uri, index, filename, title, data)
            .map_err(|e| Error::remote("addAttachmentToTestRecord", e))
    }

    pub fn delete_attachment_from_record(
        &self,
        test_case_id: &str,
        filename: &str,
    ) -> Result<(), Error> {
        let uri = self.state.require_uri(DESCRIPTOR.type_id)?;
        let index = self.executed_record_index(test_case_id)?;
        self.verify_record_count(index)?;
        self.client
            .service()
            .delete_record_attachment(&uri, index, filename)
            .map_err(|e| Error::remote("deleteAttachmentFromTestRecord", e))
    }

    pub fn add_attachment_to_step(
        &self,
        test_case_id: &str,
        step_index: usize,
        filename: &str,
        title: &str,
        data: &[u8],
    ) -> Result<(), Error> {
        let uri = self.state.require_uri(DESCRIPTOR.type_id)?;
        let index = self.executed_record_index(test_case_id)?;
        self.verify_step_count(index, step_index)?;
        self.client
            .service()
            .add_step_attachment(&uri, index, step_index, filename, title, data)
            .map_err(|e| Error::remote("addAttachmentToTestStep", e))
    }

    pub fn delete_attachment_from_step(
        &self,
        test_case_id: &str,
        step_index: usize,
        filename: &str,
    ) -> Result<(), Error> {
        let uri = self.state.require_uri(DESCRIPTOR.type_id)?;
        let index = self.executed_record_index(test_case_id)?;
        self.verify_step_count(index, step_index)?;
        self.client
            .service()
            .delete_step_attachment(&uri, index, step_index, filename)
            .map_err(|e| Error::remote("deleteAttachmentFromTestStep", e))
    }

    fn verify_record_count(&self, record_index: usize) -> Result<(), Error> {
        let count = self.effective_records()?.len();
        if record_index >= count {
            return Err(Error::IndexOutOfRange {
                index: record_index,
                count,
                what: "test records",
            });
        }
        Ok(())
    }

    fn verify_step_count(&self, record_index: usize, step_index: usize) -> Result<(), Error> {
        self.verify_record_count(record_index)?;
        let records = self.effective_records()?;
        let steps = records[record_index].step_results().len();
        if step_index >= steps {
            return Err(Error::IndexOutOfRange {
                index: step_index,
                count: steps,
                what: "test steps",
            });
        }
        Ok(())
    }

    // ── Wiki content ────────────────────────────────────────────────────

    pub fn wiki_content(&self) -> Result<Text, Error> {
        let uri = self.state.require_uri(DESCRIPTOR.type_id)?;
        let body = self
            .client
            .service()
            .wiki_content(&uri)
            .map_err(|e| Error::remote("getWikiContentForTestRun", e))?;
        Ok(Text::from_struct(body))
    }

    /// `None` clears the content.
    pub fn update_wiki_content(&self, content: Option<TextContent>) -> Result<(), Error> {
        let uri = self.state.require_uri(DESCRIPTOR.type_id)?;
        let body = content.map(TextContent::into_wire);
        self.client
            .service()
            .update_wiki_content(&uri, body.as_ref())
            .map_err(|e| Error::remote("updateWikiContentForTestRun", e))
    }

    // ── Summary defects ─────────────────────────────────────────────────

    /// Create the run's summary-defect work item, optionally from a defect
    /// template, and return it populated.
    pub fn create_summary_defect(
        &self,
        defect_template_id: Option<&str>,
    ) -> Result<WorkItem, Error> {
        let uri = self.state.require_uri(DESCRIPTOR.type_id)?;
        let template_uri = self.defect_template_uri(defect_template_id)?;
        let defect_uri = self
            .client
            .service()
            .create_summary_defect(&uri, template_uri.as_ref())
            .map_err(|e| Error::remote("createSummaryDefect", e))?;
        WorkItem::by_uri(&self.client, &defect_uri)
    }

    /// Create or update the summary defect with aggregate result counts.
    pub fn update_summary_defect(
        &self,
        source: &str,
        total_failures: i32,
        total_errors: i32,
        total_tests: i32,
        defect_template_id: Option<&str>,
    ) -> Result<WorkItem, Error> {
        let uri = self.state.require_uri(DESCRIPTOR.type_id)?;
        let template_uri = self.defect_template_uri(defect_template_id)?;
        let defect_uri = self
            .client
            .service()
            .update_summary_defect(
                &uri,
                source,
                total_failures,
                total_errors,
                total_tests,
                template_uri.as_ref(),
            )
            .map_err(|e| Error::remote("updateSummaryDefect", e))?;
        WorkItem::by_uri(&self.client, &defect_uri)
    }

    fn defect_template_uri(
        &self,
        defect_template_id: Option<&str>,
    ) -> Result<Option<ObjectUri>, Error> {
        match defect_template_id {
            None => Ok(None),
            Some(template_id) => {
                let project = self
                    .project_id()
                    .ok_or_else(|| Error::invalid_value("project", ""))?;
                let template = WorkItem::by_id(&self.client, project, template_id)?;
                Ok(Some(template.require_uri()?))
            }
        }
    }
}

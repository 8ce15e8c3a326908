//! An in-memory [`RemoteService`] backend.
//!
//! Backs the crate's own tests and gives downstream users a service to
//! exercise entity code against without a live server. Behavior follows the
//! trait contracts: unresolvable markers for missing lookups, the two
//! record-index spaces, and balanced transaction accounting. Every call is
//! appended to a log so tests can assert which RPCs were (or were not)
//! issued.

use crate::service::{Channel, RemoteError, RemoteService};
use remora_wire::{ObjectUri, WireStruct, WireValue};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

#[derive(Default)]
struct State {
    /// uri string → body
    objects: BTreeMap<String, WireStruct>,
    /// (type_id, scope or "", id) → uri string
    ids: BTreeMap<(String, String, String), String>,
    enums: BTreeMap<String, Vec<String>>,
    /// work-item query string → uris
    queries: BTreeMap<String, Vec<String>>,
    /// document uri → work-item uris
    document_items: BTreeMap<String, Vec<String>>,
    /// (query, templates) → run uris
    searches: BTreeMap<(String, bool), Vec<String>>,
    /// run uri → wiki content
    wiki: BTreeMap<String, WireStruct>,
    calls: Vec<String>,
    open_transactions: u32,
    defect_counter: u32,
}

#[derive(Default)]
pub struct InMemoryService {
    state: Mutex<State>,
}

impl InMemoryService {
    pub fn new() -> InMemoryService {
        InMemoryService::default()
    }

    /// The canonical handle format used for registered objects.
    pub fn uri_for(scope: Option<&str>, type_id: &str, id: &str) -> ObjectUri {
        ObjectUri::new(format!(
            "remote:objects:/default/{}${{{}}}{}",
            scope.unwrap_or("-"),
            type_id,
            id
        ))
    }

    /// Register an object under its natural identifier; the handle is
    /// derived from the body's type and stamped into the `uri` field.
    pub fn insert_object(&self, scope: Option<&str>, id: &str, mut body: WireStruct) -> ObjectUri {
        let uri = InMemoryService::uri_for(scope, &body.type_id, id);
        body.set_field("uri", uri.clone());
        let mut state = self.lock();
        state.ids.insert(
            (
                body.type_id.clone(),
                scope.unwrap_or("").to_string(),
                id.to_string(),
            ),
            uri.to_string(),
        );
        state.objects.insert(uri.to_string(), body);
        uri
    }

    pub fn set_enum(&self, enum_id: &str, options: &[&str]) {
        self.lock().enums.insert(
            enum_id.to_string(),
            options.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn set_query_result(&self, query: &str, uris: &[ObjectUri]) {
        self.lock().queries.insert(
            query.to_string(),
            uris.iter().map(ObjectUri::to_string).collect(),
        );
    }

    pub fn set_document_items(&self, document: &ObjectUri, items: &[ObjectUri]) {
        self.lock().document_items.insert(
            document.to_string(),
            items.iter().map(ObjectUri::to_string).collect(),
        );
    }

    pub fn set_search_result(&self, query: &str, templates: bool, uris: &[ObjectUri]) {
        self.lock().searches.insert(
            (query.to_string(), templates),
            uris.iter().map(ObjectUri::to_string).collect(),
        );
    }

    /// A copy of the current body for `uri`, when one is registered.
    pub fn object(&self, uri: &ObjectUri) -> Option<WireStruct> {
        self.lock().objects.get(uri.as_str()).cloned()
    }

    /// The log of every RPC issued so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log(&self, call: &str) {
        self.lock().calls.push(call.to_string());
    }

    fn resolve_objects(&self, uris: &[String]) -> Vec<WireStruct> {
        let state = self.lock();
        uris.iter()
            .filter_map(|uri| state.objects.get(uri).cloned())
            .collect()
    }

    fn with_run<T>(
        &self,
        run: &ObjectUri,
        f: impl FnOnce(&mut WireStruct) -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        let mut state = self.lock();
        let body = state
            .objects
            .get_mut(run.as_str())
            .ok_or_else(|| RemoteError::Fault(format!("no such test run: {run}")))?;
        f(body)
    }
}

/// The struct-type marker embedded in a typed handle, for unresolvable
/// placeholders.
fn type_from_uri(uri: &ObjectUri) -> String {
    let raw = uri.as_str();
    match (raw.find("${"), raw.find('}')) {
        (Some(start), Some(end)) if end > start + 2 => raw[start + 2..end].to_string(),
        _ => "Object".to_string(),
    }
}

fn wrapper_items(body: &WireStruct, field: &str, element: &str) -> Vec<WireValue> {
    body.field(field)
        .and_then(WireValue::as_struct)
        .and_then(|w| w.unwrap_array(element))
        .map(<[WireValue]>::to_vec)
        .unwrap_or_default()
}

fn store_wrapper(body: &mut WireStruct, field: &str, element: &str, items: Vec<WireValue>) {
    body.set_field(field, WireStruct::wrap_array(element, items));
}

fn is_executed(record: &WireValue) -> bool {
    record
        .as_struct()
        .and_then(|s| s.field("executed"))
        .is_some_and(|v| !v.is_null())
}

/// Mutate the `index`-th *executed* record of a run body.
fn with_executed_record(
    body: &mut WireStruct,
    index: usize,
    f: impl FnOnce(&mut WireStruct),
) -> Result<(), RemoteError> {
    let mut records = wrapper_items(body, "records", "TestRecord");
    let mut executed_seen = 0usize;
    let mut target = None;
    for (position, item) in records.iter().enumerate() {
        if !is_executed(item) {
            continue;
        }
        if executed_seen == index {
            target = Some(position);
            break;
        }
        executed_seen += 1;
    }
    let Some(position) = target else {
        return Err(RemoteError::Fault(format!(
            "executed record index {index} out of range"
        )));
    };
    if let WireValue::Struct(record) = &mut records[position] {
        f(record);
    }
    store_wrapper(body, "records", "TestRecord", records);
    Ok(())
}

impl RemoteService for InMemoryService {
    fn lookup_by_id(
        &self,
        _channel: Channel,
        type_id: &str,
        scope: Option<&str>,
        id: &str,
    ) -> Result<WireStruct, RemoteError> {
        self.log("lookupById");
        let state = self.lock();
        let keyed = (
            type_id.to_string(),
            scope.unwrap_or("").to_string(),
            id.to_string(),
        );
        let unscoped = (type_id.to_string(), String::new(), id.to_string());
        let uri = state.ids.get(&keyed).or_else(|| state.ids.get(&unscoped));
        match uri.and_then(|uri| state.objects.get(uri)) {
            Some(body) => Ok(body.clone()),
            None => Ok(WireStruct::unresolved(type_id)),
        }
    }

    fn lookup_by_uri(&self, _channel: Channel, uri: &ObjectUri) -> Result<WireStruct, RemoteError> {
        self.log("lookupByUri");
        match self.lock().objects.get(uri.as_str()) {
            Some(body) => Ok(body.clone()),
            None => Ok(WireStruct::unresolved(type_from_uri(uri))),
        }
    }

    fn enum_options(&self, enum_id: &str, _scope: Option<&str>) -> Result<Vec<String>, RemoteError> {
        self.log("enumOptions");
        self.lock()
            .enums
            .get(enum_id)
            .cloned()
            .ok_or_else(|| RemoteError::Fault(format!("unknown enum id '{enum_id}'")))
    }

    fn create_test_run(
        &self,
        project_id: &str,
        test_run_id: &str,
        template: &str,
    ) -> Result<ObjectUri, RemoteError> {
        self.log("createTestRun");
        let template_body = {
            let state = self.lock();
            let key = (
                "TestRun".to_string(),
                project_id.to_string(),
                template.to_string(),
            );
            state
                .ids
                .get(&key)
                .and_then(|uri| state.objects.get(uri))
                .cloned()
        };
        let mut body = match template_body {
            Some(mut body) => {
                // A run created from a template inherits its configuration
                // but starts with no records or attachments of its own.
                body.remove_field("records");
                body.remove_field("attachments");
                body.remove_field("isTemplate");
                body
            }
            None => WireStruct::new("TestRun"),
        };
        body.set_field("id", test_run_id);
        body.set_field(
            "projectURI",
            InMemoryService::uri_for(None, "Project", project_id),
        );
        Ok(self.insert_object(Some(project_id), test_run_id, body))
    }

    fn update_test_run(&self, body: &WireStruct) -> Result<(), RemoteError> {
        self.log("updateTestRun");
        let uri = body
            .field("uri")
            .and_then(WireValue::as_uri)
            .ok_or_else(|| RemoteError::Fault("test run body carries no uri".to_string()))?;
        let mut state = self.lock();
        match state.objects.get_mut(uri.as_str()) {
            Some(stored) => {
                *stored = body.clone();
                Ok(())
            }
            None => Err(RemoteError::Fault(format!("no such test run: {uri}"))),
        }
    }

    fn search_test_runs(
        &self,
        query: &str,
        _sort: &str,
        fields: &[String],
        limit: i32,
        templates: bool,
    ) -> Result<Vec<WireStruct>, RemoteError> {
        let call = match (templates, fields.is_empty()) {
            (false, true) => "searchTestRunsLimited",
            (false, false) => "searchTestRunsWithFieldsLimited",
            (true, true) => "searchTestRunTemplatesLimited",
            (true, false) => "searchTestRunTemplatesWithFieldsLimited",
        };
        self.log(call);
        let uris = self
            .lock()
            .searches
            .get(&(query.to_string(), templates))
            .cloned()
            .unwrap_or_default();
        let mut results = self.resolve_objects(&uris);
        if limit >= 0 {
            results.truncate(limit as usize);
        }
        Ok(results)
    }

    fn add_test_record(&self, run: &ObjectUri, record: &WireStruct) -> Result<(), RemoteError> {
        self.log("addTestRecord");
        let case_id = record
            .field("testCaseURI")
            .and_then(WireValue::as_uri)
            .map(|uri| uri.item_id().to_string());
        self.with_run(run, |body| {
            let mut records = wrapper_items(body, "records", "TestRecord");
            // A statically declared run carries a pending slot per case;
            // executing the case fills that slot instead of appending.
            let pending_slot = records.iter().position(|item| {
                case_id.is_some()
                    && !is_executed(item)
                    && item
                        .as_struct()
                        .and_then(|s| s.field("testCaseURI"))
                        .and_then(WireValue::as_uri)
                        .map(|uri| uri.item_id().to_string())
                        == case_id
            });
            match pending_slot {
                Some(index) => records[index] = WireValue::Struct(record.clone()),
                None => records.push(WireValue::Struct(record.clone())),
            }
            store_wrapper(body, "records", "TestRecord", records);
            Ok(())
        })
    }

    fn update_test_record_at_index(
        &self,
        run: &ObjectUri,
        index: usize,
        record: &WireStruct,
    ) -> Result<(), RemoteError> {
        self.log("updateTestRecordAtIndex");
        self.with_run(run, |body| {
            let mut records = wrapper_items(body, "records", "TestRecord");
            if index >= records.len() {
                return Err(RemoteError::Fault(format!(
                    "record index {index} out of range"
                )));
            }
            records[index] = WireValue::Struct(record.clone());
            store_wrapper(body, "records", "TestRecord", records);
            Ok(())
        })
    }

    fn add_run_attachment(
        &self,
        run: &ObjectUri,
        filename: &str,
        title: &str,
        _data: &[u8],
    ) -> Result<(), RemoteError> {
        self.log("addAttachmentToTestRun");
        self.with_run(run, |body| {
            let mut items = wrapper_items(body, "attachments", "TestRunAttachment");
            items.push(WireValue::Struct(
                WireStruct::new("TestRunAttachment")
                    .with_field("fileName", filename)
                    .with_field("title", title),
            ));
            store_wrapper(body, "attachments", "TestRunAttachment", items);
            Ok(())
        })
    }

    fn update_run_attachment(
        &self,
        run: &ObjectUri,
        filename: &str,
        title: &str,
        _data: &[u8],
    ) -> Result<(), RemoteError> {
        self.log("updateTestRunAttachment");
        self.with_run(run, |body| {
            let mut items = wrapper_items(body, "attachments", "TestRunAttachment");
            let entry = items.iter_mut().find_map(|item| match item {
                WireValue::Struct(a)
                    if a.field("fileName").and_then(WireValue::as_str) == Some(filename) =>
                {
                    Some(a)
                }
                _ => None,
            });
            match entry {
                Some(attachment) => {
                    attachment.set_field("title", title);
                    store_wrapper(body, "attachments", "TestRunAttachment", items);
                    Ok(())
                }
                None => Err(RemoteError::Fault(format!("no such attachment: {filename}"))),
            }
        })
    }

    fn delete_run_attachment(&self, run: &ObjectUri, filename: &str) -> Result<(), RemoteError> {
        self.log("deleteTestRunAttachment");
        self.with_run(run, |body| {
            let mut items = wrapper_items(body, "attachments", "TestRunAttachment");
            let before = items.len();
            items.retain(|item| {
                item.as_struct()
                    .and_then(|a| a.field("fileName"))
                    .and_then(WireValue::as_str)
                    != Some(filename)
            });
            if items.len() == before {
                return Err(RemoteError::Fault(format!("no such attachment: {filename}")));
            }
            store_wrapper(body, "attachments", "TestRunAttachment", items);
            Ok(())
        })
    }

    fn get_run_attachment(
        &self,
        run: &ObjectUri,
        filename: &str,
    ) -> Result<WireStruct, RemoteError> {
        self.log("getTestRunAttachment");
        self.with_run(run, |body| {
            let found = wrapper_items(body, "attachments", "TestRunAttachment")
                .into_iter()
                .find_map(|item| match item {
                    WireValue::Struct(a)
                        if a.field("fileName").and_then(WireValue::as_str) == Some(filename) =>
                    {
                        Some(a)
                    }
                    _ => None,
                });
            Ok(found.unwrap_or_else(|| WireStruct::unresolved("TestRunAttachment")))
        })
    }

    fn list_run_attachments(&self, run: &ObjectUri) -> Result<Vec<WireStruct>, RemoteError> {
        self.log("getTestRunAttachments");
        self.with_run(run, |body| {
            Ok(wrapper_items(body, "attachments", "TestRunAttachment")
                .into_iter()
                .filter_map(|item| item.as_struct().cloned())
                .collect())
        })
    }

    fn add_record_attachment(
        &self,
        run: &ObjectUri,
        record_index: usize,
        filename: &str,
        title: &str,
        _data: &[u8],
    ) -> Result<(), RemoteError> {
        self.log("addAttachmentToTestRecord");
        self.with_run(run, |body| {
            with_executed_record(body, record_index, |record| {
                let mut items = wrapper_items(record, "attachments", "TestRunAttachment");
                items.push(WireValue::Struct(
                    WireStruct::new("TestRunAttachment")
                        .with_field("fileName", filename)
                        .with_field("title", title),
                ));
                store_wrapper(record, "attachments", "TestRunAttachment", items);
            })
        })
    }

    fn delete_record_attachment(
        &self,
        run: &ObjectUri,
        record_index: usize,
        filename: &str,
    ) -> Result<(), RemoteError> {
        self.log("deleteAttachmentFromTestRecord");
        self.with_run(run, |body| {
            with_executed_record(body, record_index, |record| {
                let mut items = wrapper_items(record, "attachments", "TestRunAttachment");
                items.retain(|item| {
                    item.as_struct()
                        .and_then(|a| a.field("fileName"))
                        .and_then(WireValue::as_str)
                        != Some(filename)
                });
                store_wrapper(record, "attachments", "TestRunAttachment", items);
            })
        })
    }

    fn add_step_attachment(
        &self,
        run: &ObjectUri,
        record_index: usize,
        step_index: usize,
        filename: &str,
        title: &str,
        _data: &[u8],
    ) -> Result<(), RemoteError> {
        self.log("addAttachmentToTestStep");
        self.with_run(run, |body| {
            let mut result = Ok(());
            with_executed_record(body, record_index, |record| {
                let mut steps = wrapper_items(record, "testStepResults", "TestStepResult");
                match steps.get_mut(step_index) {
                    Some(WireValue::Struct(step)) => {
                        let mut items = wrapper_items(step, "attachments", "TestRunAttachment");
                        items.push(WireValue::Struct(
                            WireStruct::new("TestRunAttachment")
                                .with_field("fileName", filename)
                                .with_field("title", title),
                        ));
                        store_wrapper(step, "attachments", "TestRunAttachment", items);
                        store_wrapper(record, "testStepResults", "TestStepResult", steps);
                    }
                    _ => {
                        result = Err(RemoteError::Fault(format!(
                            "step index {step_index} out of range"
                        )));
                    }
                }
            })?;
            result
        })
    }

    fn delete_step_attachment(
        &self,
        run: &ObjectUri,
        record_index: usize,
        step_index: usize,
        filename: &str,
    ) -> Result<(), RemoteError> {
        self.log("deleteAttachmentFromTestStep");
        self.with_run(run, |body| {
            let mut result = Ok(());
            with_executed_record(body, record_index, |record| {
                let mut steps = wrapper_items(record, "testStepResults", "TestStepResult");
                match steps.get_mut(step_index) {
                    Some(WireValue::Struct(step)) => {
                        let mut items = wrapper_items(step, "attachments", "TestRunAttachment");
                        items.retain(|item| {
                            item.as_struct()
                                .and_then(|a| a.field("fileName"))
                                .and_then(WireValue::as_str)
                                != Some(filename)
                        });
                        store_wrapper(step, "attachments", "TestRunAttachment", items);
                        store_wrapper(record, "testStepResults", "TestStepResult", steps);
                    }
                    _ => {
                        result = Err(RemoteError::Fault(format!(
                            "step index {step_index} out of range"
                        )));
                    }
                }
            })?;
            result
        })
    }

    fn wiki_content(&self, run: &ObjectUri) -> Result<WireStruct, RemoteError> {
        self.log("getWikiContentForTestRun");
        Ok(self
            .lock()
            .wiki
            .get(run.as_str())
            .cloned()
            .unwrap_or_else(|| WireStruct::new("Text").with_field("type", "text/html")))
    }

    fn update_wiki_content(
        &self,
        run: &ObjectUri,
        content: Option<&WireStruct>,
    ) -> Result<(), RemoteError> {
        self.log("updateWikiContentForTestRun");
        let mut state = self.lock();
        match content {
            Some(content) => {
                state.wiki.insert(run.to_string(), content.clone());
            }
            None => {
                state.wiki.remove(run.as_str());
            }
        }
        Ok(())
    }

    fn create_summary_defect(
        &self,
        run: &ObjectUri,
        _template: Option<&ObjectUri>,
    ) -> Result<ObjectUri, RemoteError> {
        self.log("createSummaryDefect");
        let project = self
            .object(run)
            .and_then(|body| body.field("projectURI").and_then(WireValue::as_uri))
            .map(|uri| uri.item_id().to_string())
            .ok_or_else(|| RemoteError::Fault(format!("no such test run: {run}")))?;
        let defect_id = {
            let mut state = self.lock();
            state.defect_counter += 1;
            format!("defect-{}", state.defect_counter)
        };
        let defect = WireStruct::new("WorkItem")
            .with_field("id", defect_id.as_str())
            .with_field("title", "Summary defect");
        let defect_uri = self.insert_object(Some(&project), &defect_id, defect);
        self.with_run(run, |body| {
            body.set_field("summaryDefectURI", defect_uri.clone());
            Ok(())
        })?;
        Ok(defect_uri)
    }

    fn update_summary_defect(
        &self,
        run: &ObjectUri,
        source: &str,
        _total_failures: i32,
        _total_errors: i32,
        _total_tests: i32,
        template: Option<&ObjectUri>,
    ) -> Result<ObjectUri, RemoteError> {
        self.log("updateSummaryDefect");
        let existing = self
            .object(run)
            .ok_or_else(|| RemoteError::Fault(format!("no such test run: {run}")))?
            .field("summaryDefectURI")
            .and_then(WireValue::as_uri);
        match existing {
            Some(uri) => {
                let mut state = self.lock();
                if let Some(defect) = state.objects.get_mut(uri.as_str()) {
                    defect.set_field("title", source);
                }
                Ok(uri)
            }
            None => self.create_summary_defect(run, template),
        }
    }

    fn query_work_items(
        &self,
        query: &str,
        _fields: &[String],
    ) -> Result<Vec<WireStruct>, RemoteError> {
        self.log("queryWorkItems");
        let uris = self.lock().queries.get(query).cloned().unwrap_or_default();
        Ok(self.resolve_objects(&uris))
    }

    fn document_work_items(
        &self,
        document: &ObjectUri,
        _deep: bool,
    ) -> Result<Vec<WireStruct>, RemoteError> {
        self.log("getDocumentWorkItems");
        let uris = self
            .lock()
            .document_items
            .get(document.as_str())
            .cloned()
            .unwrap_or_default();
        Ok(self.resolve_objects(&uris))
    }

    fn begin_transaction(&self) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.open_transactions += 1;
        state.calls.push("beginTransaction".to_string());
        Ok(())
    }

    fn end_transaction(&self, commit: bool) -> Result<(), RemoteError> {
        let mut state = self.lock();
        if state.open_transactions == 0 {
            return Err(RemoteError::Fault(
                "end_transaction without begin_transaction".to_string(),
            ));
        }
        state.open_transactions -= 1;
        state.calls.push(
            if commit {
                "commitTransaction"
            } else {
                "rollbackTransaction"
            }
            .to_string(),
        );
        Ok(())
    }
}

/// An in-memory [`crate::SchemaSource`].
///
/// Serves registered documents by storage root and counts fetches so tests
/// can assert populate-once cache behavior. Unregistered roots get an empty
/// document rather than an error, which keeps fixtures for tests that do
/// not care about custom fields small.
#[derive(Default)]
pub struct InMemorySchemaSource {
    docs: Mutex<BTreeMap<String, String>>,
    fetches: Mutex<u32>,
}

impl InMemorySchemaSource {
    pub fn new() -> InMemorySchemaSource {
        InMemorySchemaSource::default()
    }

    pub fn insert(&self, storage_root: &str, doc: &str) {
        self.docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(storage_root.to_string(), doc.to_string());
    }

    pub fn fetch_count(&self) -> u32 {
        *self.fetches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl crate::custom::SchemaSource for InMemorySchemaSource {
    fn fetch(&self, storage_root: &str) -> Result<String, crate::custom::SchemaFetchError> {
        *self.fetches.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(self
            .docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(storage_root)
            .cloned()
            .unwrap_or_else(|| "<testrun-custom-fields/>".to_string()))
    }
}

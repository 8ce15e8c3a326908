//! Run-level operations against the in-memory service: attachments on the
//! run, record and step index handling, wiki content, summary defects,
//! template creation and search.

use std::sync::Arc;

use remora_core::entity::{SearchOptions, SelectionMode, TemplateOptions, TestRun};
use remora_core::memory::{InMemoryService, InMemorySchemaSource};
use remora_core::{Client, Error};
use remora_wire::{WireStruct, WireValue};

const PROJECT: &str = "STARTER";

fn client_fixture() -> (Arc<InMemoryService>, Client) {
    let service = Arc::new(InMemoryService::new());
    service.set_enum("result", &["passed", "failed", "blocked"]);
    service.insert_object(
        None,
        PROJECT,
        WireStruct::new("Project")
            .with_field("id", PROJECT)
            .with_field("location", "default:/Starter/.project/project.xml"),
    );
    let client = Client::new(service.clone(), Arc::new(InMemorySchemaSource::new()));
    (service, client)
}

fn record(case_id: &str, result: Option<&str>, steps: usize) -> WireValue {
    let mut body = WireStruct::new("TestRecord").with_field(
        "testCaseURI",
        InMemoryService::uri_for(Some(PROJECT), "WorkItem", case_id),
    );
    if let Some(result) = result {
        body.set_field("result", result);
        body.set_field("executed", "2026-08-01T10:00:00Z");
    }
    if steps > 0 {
        let items = (0..steps)
            .map(|_| WireValue::Struct(WireStruct::new("TestStepResult").with_field("result", "passed")))
            .collect();
        body.set_field("testStepResults", WireStruct::wrap_array("TestStepResult", items));
    }
    body.into()
}

#[test]
fn run_attachments_round_trip() {
    let (service, client) = client_fixture();
    let body = WireStruct::new("TestRun")
        .with_field("id", "smoke")
        .with_field(
            "projectURI",
            InMemoryService::uri_for(None, "Project", PROJECT),
        )
        .with_field("selectTestCasesBy", "staticList");
    service.insert_object(Some(PROJECT), "smoke", body);
    let run = TestRun::by_id(&client, PROJECT, "smoke").unwrap();

    run.add_attachment("log.txt", "Console log", b"all green").unwrap();
    run.add_attachment("shot.png", "Screenshot", &[0xff, 0xd8]).unwrap();

    let listed = run.fetch_attachments().unwrap();
    let names: Vec<_> = listed.iter().filter_map(|a| a.file_name()).collect();
    assert_eq!(names, ["log.txt", "shot.png"]);

    let fetched = run.attachment("log.txt").unwrap();
    assert_eq!(fetched.title().as_deref(), Some("Console log"));

    run.update_attachment("log.txt", "Full console log", b"longer").unwrap();
    let fetched = run.attachment("log.txt").unwrap();
    assert_eq!(fetched.title().as_deref(), Some("Full console log"));

    run.delete_attachment("shot.png").unwrap();
    let err = run.attachment("shot.png").unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[test]
fn record_attachment_uses_executed_only_index() {
    let (service, client) = client_fixture();
    let body = WireStruct::new("TestRun")
        .with_field("id", "mixed")
        .with_field(
            "projectURI",
            InMemoryService::uri_for(None, "Project", PROJECT),
        )
        .with_field("selectTestCasesBy", "staticList")
        .with_field(
            "records",
            WireStruct::wrap_array(
                "TestRecord",
                vec![
                    record("CASE-A", None, 0),
                    record("CASE-B", Some("passed"), 2),
                ],
            ),
        );
    let uri = service.insert_object(Some(PROJECT), "mixed", body);
    let run = TestRun::by_id(&client, PROJECT, "mixed").unwrap();

    // CASE-B sits at full-list position 1 but is executed record 0; the
    // attachment must land on it, not on pending CASE-A
    run.add_attachment_to_record("CASE-B", "trace.log", "Trace", b"...").unwrap();

    let stored = service.object(&uri).unwrap();
    let records = stored
        .field("records")
        .and_then(WireValue::as_struct)
        .and_then(|w| w.unwrap_array("TestRecord"))
        .unwrap()
        .to_vec();
    let case_a = records[0].as_struct().unwrap();
    assert!(case_a.field("attachments").is_none());
    let case_b = records[1].as_struct().unwrap();
    let attachments = case_b
        .field("attachments")
        .and_then(WireValue::as_struct)
        .and_then(|w| w.unwrap_array("TestRunAttachment"))
        .unwrap();
    assert_eq!(attachments.len(), 1);

    // a pending case has no executed record to attach to
    let err = run
        .add_attachment_to_record("CASE-A", "trace.log", "Trace", b"...")
        .unwrap_err();
    assert!(matches!(err, Error::RecordNotFound { .. }));
}

#[test]
fn step_attachment_checks_step_bounds() {
    let (service, client) = client_fixture();
    let body = WireStruct::new("TestRun")
        .with_field("id", "steps")
        .with_field(
            "projectURI",
            InMemoryService::uri_for(None, "Project", PROJECT),
        )
        .with_field("selectTestCasesBy", "staticList")
        .with_field(
            "records",
            WireStruct::wrap_array("TestRecord", vec![record("CASE-A", Some("failed"), 2)]),
        );
    service.insert_object(Some(PROJECT), "steps", body);
    let run = TestRun::by_id(&client, PROJECT, "steps").unwrap();

    run.add_attachment_to_step("CASE-A", 1, "step.log", "Step log", b"...").unwrap();

    let err = run
        .add_attachment_to_step("CASE-A", 2, "step.log", "Step log", b"...")
        .unwrap_err();
    match err {
        Error::IndexOutOfRange { index, count, .. } => {
            assert_eq!(index, 2);
            assert_eq!(count, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn wiki_content_round_trip() {
    let (service, client) = client_fixture();
    let body = WireStruct::new("TestRun")
        .with_field("id", "wiki")
        .with_field(
            "projectURI",
            InMemoryService::uri_for(None, "Project", PROJECT),
        )
        .with_field("selectTestCasesBy", "staticList");
    service.insert_object(Some(PROJECT), "wiki", body);
    let run = TestRun::by_id(&client, PROJECT, "wiki").unwrap();

    run.update_wiki_content(Some("= Results =".into())).unwrap();
    let content = run.wiki_content().unwrap();
    assert_eq!(content.content().as_deref(), Some("= Results ="));

    run.update_wiki_content(None).unwrap();
    let cleared = run.wiki_content().unwrap();
    assert_eq!(cleared.content(), None);
}

#[test]
fn summary_defect_is_created_then_updated_in_place() {
    let (service, client) = client_fixture();
    let body = WireStruct::new("TestRun")
        .with_field("id", "defects")
        .with_field(
            "projectURI",
            InMemoryService::uri_for(None, "Project", PROJECT),
        )
        .with_field("selectTestCasesBy", "staticList");
    service.insert_object(Some(PROJECT), "defects", body);
    let run = TestRun::by_id(&client, PROJECT, "defects").unwrap();

    let created = run.create_summary_defect(None).unwrap();
    let first_id = created.work_item_id().unwrap();

    let updated = run
        .update_summary_defect("nightly pipeline", 2, 0, 14, None)
        .unwrap();
    assert_eq!(updated.work_item_id().unwrap(), first_id);
    assert_eq!(updated.title().as_deref(), Some("nightly pipeline"));
}

#[test]
fn create_template_configures_and_commits_in_one_transaction() {
    let (service, client) = client_fixture();

    let template = TestRun::create_template(
        &client,
        PROJECT,
        "regression-template",
        TemplateOptions {
            query: Some("type:testcase".to_string()),
            ..TemplateOptions::default()
        },
    )
    .unwrap();

    assert!(template.is_template());
    assert_eq!(template.selection_mode().unwrap(), SelectionMode::DynamicQuery);
    assert_eq!(template.query().as_deref(), Some("type:testcase"));

    let calls = service.calls();
    let begin = calls.iter().position(|c| c == "beginTransaction").unwrap();
    let commit = calls.iter().position(|c| c == "commitTransaction").unwrap();
    let update = calls.iter().position(|c| c == "updateTestRun").unwrap();
    assert!(begin < update && update < commit);
    assert!(!calls.contains(&"rollbackTransaction".to_string()));
}

#[test]
fn runs_created_from_a_template_inherit_its_configuration() {
    let (_service, client) = client_fixture();
    TestRun::create_template(
        &client,
        PROJECT,
        "regression-template",
        TemplateOptions {
            query: Some("type:testcase".to_string()),
            ..TemplateOptions::default()
        },
    )
    .unwrap();

    let run = TestRun::create(&client, PROJECT, "regression-7", "regression-template").unwrap();
    assert!(!run.is_template());
    assert_eq!(run.test_run_id().as_deref(), Some("regression-7"));
    assert_eq!(run.selection_mode().unwrap(), SelectionMode::DynamicQuery);
    assert_eq!(run.query().as_deref(), Some("type:testcase"));
}

#[test]
fn search_translates_sort_field_and_rejects_unknown_names() {
    let (service, client) = client_fixture();
    let body = WireStruct::new("TestRun")
        .with_field("id", "smoke-1")
        .with_field(
            "projectURI",
            InMemoryService::uri_for(None, "Project", PROJECT),
        )
        .with_field("selectTestCasesBy", "staticList");
    let uri = service.insert_object(Some(PROJECT), "smoke-1", body);
    service.set_search_result("project.id:STARTER", false, &[uri]);

    let results = TestRun::search(&client, "project.id:STARTER", SearchOptions::default()).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].test_run_id().as_deref(), Some("smoke-1"));
    assert!(service.calls().contains(&"searchTestRunsLimited".to_string()));

    let err = TestRun::search(
        &client,
        "project.id:STARTER",
        SearchOptions {
            sort: "no_such_attribute".to_string(),
            ..SearchOptions::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::UnknownField { .. }));
}

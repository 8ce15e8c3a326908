//! Custom-field resolution integration tests.
//!
//! The schema document is fetched once per project, classified, and merged
//! into the run's mapping table at construction — after which custom fields
//! read and write like statically declared attributes, with writes staged
//! until the next update.

use std::sync::Arc;

use remora_core::entity::TestRun;
use remora_core::memory::{InMemoryService, InMemorySchemaSource};
use remora_core::{Client, CustomFieldKind, EntityKind, Error};
use remora_wire::{WireStruct, WireValue};

fn project(service: &InMemoryService, project_id: &str, root: &str) {
    service.insert_object(
        None,
        project_id,
        WireStruct::new("Project")
            .with_field("id", project_id)
            .with_field("location", format!("default:{root}/.project/project.xml")),
    );
}

fn run(service: &InMemoryService, project_id: &str, run_id: &str) {
    let body = WireStruct::new("TestRun")
        .with_field("id", run_id)
        .with_field(
            "projectURI",
            InMemoryService::uri_for(None, "Project", project_id),
        )
        .with_field("selectTestCasesBy", "staticList")
        .with_field("status", "notrun");
    service.insert_object(Some(project_id), run_id, body);
}

fn fixture(docs: &[(&str, &str)]) -> (Arc<InMemoryService>, Arc<InMemorySchemaSource>, Client) {
    let service = Arc::new(InMemoryService::new());
    let schema = Arc::new(InMemorySchemaSource::new());
    for (root, doc) in docs {
        schema.insert(root, doc);
    }
    let client = Client::new(service.clone(), schema.clone());
    (service, schema, client)
}

#[test]
fn entity_backed_field_resolves_to_registered_kind() {
    let (service, _schema, client) = fixture(&[(
        "/Starter",
        r#"<testrun-custom-fields>
  <field id="risk" type="enum:@user"/>
</testrun-custom-fields>"#,
    )]);
    project(&service, "STARTER", "/Starter");

    let fields = client.custom_fields_for("STARTER").unwrap();
    assert_eq!(
        fields.get("risk"),
        Some(&CustomFieldKind::EntityEnum {
            kind: EntityKind::User,
            project_scoped: true
        })
    );
}

#[test]
fn catalog_field_validates_values_on_set() {
    let (service, _schema, client) = fixture(&[(
        "/Starter",
        r#"<fields><field id="severity" type="enum:severity"/></fields>"#,
    )]);
    project(&service, "STARTER", "/Starter");
    run(&service, "STARTER", "smoke");
    service.set_enum("severity", &["low", "medium", "high"]);

    let mut test_run = TestRun::by_id(&client, "STARTER", "smoke").unwrap();
    test_run
        .set_custom_field("severity", WireValue::from("high"))
        .unwrap();
    assert_eq!(
        test_run.custom_field("severity").unwrap(),
        Some(WireValue::from("high"))
    );

    let err = test_run
        .set_custom_field("severity", WireValue::from("High"))
        .unwrap_err();
    match err {
        Error::InvalidFieldValue { field, value } => {
            assert_eq!(field, "severity");
            assert_eq!(value, "High");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn entity_backed_field_validates_by_lookup() {
    let (service, _schema, client) = fixture(&[(
        "/Starter",
        r#"<fields><field id="approver" type="enum:@user"/></fields>"#,
    )]);
    project(&service, "STARTER", "/Starter");
    run(&service, "STARTER", "smoke");
    service.insert_object(
        None,
        "jdoe",
        WireStruct::new("User").with_field("id", "jdoe"),
    );

    let mut test_run = TestRun::by_id(&client, "STARTER", "smoke").unwrap();
    test_run
        .set_custom_field("approver", WireValue::from("jdoe"))
        .unwrap();

    let err = test_run
        .set_custom_field("approver", WireValue::from("nobody"))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidFieldValue { .. }));
}

#[test]
fn text_field_values_are_wrapped() {
    let (service, _schema, client) = fixture(&[(
        "/Starter",
        r#"<fields><field id="notes" type="text"/></fields>"#,
    )]);
    project(&service, "STARTER", "/Starter");
    run(&service, "STARTER", "smoke");

    let mut test_run = TestRun::by_id(&client, "STARTER", "smoke").unwrap();
    test_run
        .set_custom_field("notes", WireValue::from("ran on rack 4"))
        .unwrap();
    let stored = test_run.custom_field("notes").unwrap().unwrap();
    let text = stored.as_struct().unwrap();
    assert_eq!(text.field("content").unwrap().as_str(), Some("ran on rack 4"));
    assert_eq!(text.field("type").unwrap().as_str(), Some("text/plain"));
}

#[test]
fn custom_writes_stage_until_update() {
    let (service, _schema, client) = fixture(&[(
        "/Starter",
        r#"<fields><field id="build" type="string"/></fields>"#,
    )]);
    project(&service, "STARTER", "/Starter");
    run(&service, "STARTER", "smoke");

    let mut test_run = TestRun::by_id(&client, "STARTER", "smoke").unwrap();
    service.clear_calls();
    test_run
        .set_custom_field("build", WireValue::from("nightly-1382"))
        .unwrap();
    assert!(!service.calls().contains(&"updateTestRun".to_string()));

    test_run.update().unwrap();
    assert!(service.calls().contains(&"updateTestRun".to_string()));
    let stored = service.object(&test_run.uri().unwrap()).unwrap();
    let entries = stored
        .field("customFields")
        .and_then(WireValue::as_struct)
        .and_then(|w| w.unwrap_array("Custom"))
        .unwrap()
        .to_vec();
    assert_eq!(entries.len(), 1);
    let entry = entries[0].as_struct().unwrap();
    assert_eq!(entry.field("key").unwrap().as_str(), Some("build"));
    assert_eq!(entry.field("value").unwrap().as_str(), Some("nightly-1382"));
}

#[test]
fn unknown_custom_field_is_rejected() {
    let (service, _schema, client) = fixture(&[("/Starter", "<fields/>")]);
    project(&service, "STARTER", "/Starter");
    run(&service, "STARTER", "smoke");

    let mut test_run = TestRun::by_id(&client, "STARTER", "smoke").unwrap();
    let err = test_run
        .set_custom_field("nope", WireValue::from("x"))
        .unwrap_err();
    assert!(matches!(err, Error::UnknownField { .. }));
    // statically declared attributes are not reachable through the custom
    // field accessor either
    assert!(matches!(
        test_run.custom_field("query"),
        Err(Error::UnknownField { .. })
    ));
}

#[test]
fn schemas_are_cached_once_per_project_and_isolated() {
    let (service, schema, client) = fixture(&[
        ("/Alpha", r#"<fields><field id="only_alpha" type="string"/></fields>"#),
        ("/Beta", r#"<fields><field id="only_beta" type="text"/></fields>"#),
    ]);
    project(&service, "ALPHA", "/Alpha");
    project(&service, "BETA", "/Beta");
    for _ in 0..3 {
        run(&service, "ALPHA", "a-run");
        let _ = TestRun::by_id(&client, "ALPHA", "a-run").unwrap();
    }
    run(&service, "BETA", "b-run");
    let _ = TestRun::by_id(&client, "BETA", "b-run").unwrap();

    // one fetch per project, regardless of how many runs were built
    assert_eq!(schema.fetch_count(), 2);

    let alpha = client.custom_fields_for("ALPHA").unwrap();
    let beta = client.custom_fields_for("BETA").unwrap();
    assert!(alpha.contains_key("only_alpha") && !alpha.contains_key("only_beta"));
    assert!(beta.contains_key("only_beta") && !beta.contains_key("only_alpha"));
    assert_eq!(schema.fetch_count(), 2);
}

#[test]
fn malformed_schema_document_is_a_schema_error() {
    let (service, _schema, client) = fixture(&[("/Starter", "<fields><field id='broken'")]);
    project(&service, "STARTER", "/Starter");
    run(&service, "STARTER", "smoke");

    let err = TestRun::by_id(&client, "STARTER", "smoke").unwrap_err();
    assert!(matches!(err, Error::Schema { .. }));
}

use serde_json::json;
use std::fs;
use strata_context::{Error, InMemoryLoader, StructureDefinitionLoader};

fn write_json(dir: &std::path::Path, name: &str, value: serde_json::Value) {
    fs::write(dir.join(name), serde_json::to_string_pretty(&value).unwrap()).unwrap();
}

fn definition(id: &str, base: Option<&str>) -> serde_json::Value {
    let mut value = json!({
        "resourceType": "StructureDefinition",
        "id": id,
        "url": format!("http://example.org/StructureDefinition/{}", id),
        "name": id,
        "status": "active",
        "kind": "resource",
        "abstract": false,
        "type": "Patient"
    });
    if let Some(base) = base {
        value["baseDefinition"] = json!(base);
    }
    value
}

#[tokio::test]
async fn loads_definitions_and_bundles_and_skips_other_resources() {
    let dir = tempfile::tempdir().unwrap();
    write_json(dir.path(), "a.json", definition("A", None));
    write_json(
        dir.path(),
        "bundle.json",
        json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [
                { "resource": definition("B", Some("http://example.org/StructureDefinition/A")) },
                { "resource": { "resourceType": "ValueSet", "url": "http://example.org/vs" } }
            ]
        }),
    );
    write_json(
        dir.path(),
        "patient.json",
        json!({ "resourceType": "Patient", "id": "p1" }),
    );
    fs::write(dir.path().join("notes.txt"), "not json").unwrap();

    let loader = InMemoryLoader::new();
    let count = loader.load_directory(dir.path()).await.unwrap();
    assert_eq!(count, 2);

    let b = loader
        .load_structure_definition("http://example.org/StructureDefinition/B")
        .await
        .unwrap();
    assert_eq!(b.name, "B");

    let chain = loader
        .resolve_inheritance_chain("http://example.org/StructureDefinition/B")
        .await
        .unwrap();
    assert_eq!(chain.len(), 2);
}

#[tokio::test]
async fn malformed_json_reports_the_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

    let loader = InMemoryLoader::new();
    match loader.load_directory(dir.path()).await {
        Err(Error::Loader(message)) => assert!(message.contains("broken.json")),
        other => panic!("expected loader error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn missing_directory_is_an_io_error() {
    let loader = InMemoryLoader::new();
    let result = loader.load_directory("/definitely/not/here").await;
    assert!(matches!(result, Err(Error::IoError(_))));
}

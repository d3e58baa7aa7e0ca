use std::sync::Arc;

use dpp_runtime::{
    error::DppError,
    rules::{JsonPath, MappingEntry, Rule, RuleRegistry, RuleResolver, SourceMapping, SharedRule},
};
use serde_json::{Value, json};

fn resolver() -> RuleResolver {
    RuleResolver::new(Arc::new(RuleRegistry::with_builtin_rules()))
}

fn envelope(boxes: Vec<Value>) -> Value {
    let lines: Vec<Value> = boxes
        .into_iter()
        .map(|bbox| json!({ "content": "x", "content_bbox": bbox }))
        .collect();
    json!({
        "document_data": { "raw_data": { "other_data": lines } },
        "context_data": {}
    })
}

fn bbox_mapping() -> SourceMapping {
    SourceMapping::from_yaml(
        "mappings:\n  - enabled: true\n    json_path: $.document_data.raw_data.other_data[*]\n    json_key: content_bbox\n    rule: CUS_001\n",
    )
    .unwrap()
}

#[test]
fn corners_become_origin_and_size_for_every_match() {
    let cases = [
        (json!([10, 20, 50, 80]), json!([10, 20, 40, 60])),
        (json!([0, 0, 0, 0]), json!([0, 0, 0, 0])),
        (json!([1.5, 2.25, 4.0, 8.5]), json!([1.5, 2.25, 2.5, 6.25])),
        (json!([-5, -5, 5, 5]), json!([-5, -5, 10, 10])),
    ];
    let mut doc = envelope(cases.iter().map(|(input, _)| input.clone()).collect());

    let summary = resolver().apply(&mut doc, &bbox_mapping()).unwrap();

    assert_eq!(summary.entries_matched, 1);
    assert_eq!(summary.fragments_updated, cases.len());
    for (idx, (input, expected)) in cases.iter().enumerate() {
        let out = &doc["document_data"]["raw_data"]["other_data"][idx]["content_bbox"];
        assert_eq!(out, expected, "input {input}");
        let width = out[2].as_f64().unwrap();
        let x2 = input[2].as_f64().unwrap();
        let x1 = input[0].as_f64().unwrap();
        assert_eq!(out[0], input[0]);
        assert_eq!(width, x2 - x1);
    }
}

#[test]
fn unregistered_rule_is_a_configuration_error() {
    let registry = RuleRegistry::with_builtin_rules();
    assert!(matches!(
        registry.resolve("CUS_999"),
        Err(DppError::Configuration(msg)) if msg.contains("CUS_999")
    ));

    let mapping = SourceMapping::new(vec![MappingEntry::for_rule(
        JsonPath::parse("$.document_data.raw_data.other_data[*]").unwrap(),
        Some("content_bbox"),
        "CUS_999",
    )]);
    assert!(matches!(
        mapping.validate(&registry),
        Err(DppError::Configuration(_))
    ));

    let mut doc = envelope(vec![json!([1, 2, 3, 4])]);
    let err = resolver().apply(&mut doc, &mapping).unwrap_err();
    assert!(matches!(err, DppError::Configuration(_)));
}

#[test]
fn short_bbox_is_a_validation_error_with_its_path() {
    let mut doc = envelope(vec![json!([1, 2, 3, 4]), json!([1, 2, 3])]);
    let err = resolver().apply(&mut doc, &bbox_mapping()).unwrap_err();
    match err {
        DppError::Validation { field_path, .. } => {
            assert_eq!(field_path, "/document_data/raw_data/other_data/1/content_bbox");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unmatched_path_and_missing_key_are_noops() {
    let mapping = SourceMapping::from_yaml(
        r#"
mappings:
  - enabled: true
    json_path: $.document_data.raw_data.table_data[*]
    json_key: table_bbox
    rule: CUS_001
  - enabled: true
    json_path: $.document_data.raw_data.other_data[*]
    json_key: not_there
    rule: CUS_001
"#,
    )
    .unwrap();
    let mut doc = json!({
        "document_data": { "raw_data": { "other_data": [{ "content": "x", "content_bbox": null }] } },
        "context_data": {}
    });
    let before = doc.clone();

    let summary = resolver().apply(&mut doc, &mapping).unwrap();

    assert_eq!(summary.entries_matched, 1);
    assert_eq!(summary.fragments_updated, 0);
    assert_eq!(doc, before);
}

#[test]
fn rename_runs_before_value_operations() {
    let mapping = SourceMapping::from_yaml(
        r#"
mappings:
  - enabled: true
    json_path: $.document_data.lines[*]
    json_key: box
    replace_with_key: bbox
    replace_value_with_rule_name: CUS_001
"#,
    )
    .unwrap();
    let mut doc = json!({ "document_data": { "lines": [{ "box": [2, 2, 4, 6] }] } });

    resolver().apply(&mut doc, &mapping).unwrap();

    assert_eq!(doc["document_data"]["lines"][0], json!({ "bbox": [2, 2, 2, 4] }));
}

#[test]
fn disabled_entries_and_context_paths() {
    let mapping = SourceMapping::from_yaml(
        r#"
mappings:
  - enabled: false
    json_path: $..content_bbox
    rule: CUS_001
  - enabled: true
    json_path: $.context_data.reviewer
    rule: CUS_003
"#,
    )
    .unwrap();
    let mut doc = json!({
        "document_data": { "raw_data": { "other_data": [{ "content_bbox": [0, 0, 1, 1] }] } },
        "context_data": { "reviewer": "  ada  " }
    });

    resolver().apply(&mut doc, &mapping).unwrap();

    assert_eq!(doc["context_data"]["reviewer"], "ada");
    assert_eq!(
        doc["document_data"]["raw_data"]["other_data"][0]["content_bbox"],
        json!([0, 0, 1, 1])
    );
}

struct Uppercase;

impl Rule for Uppercase {
    fn id(&self) -> &str {
        "UPPER"
    }

    fn do_process(&self, input: &Value) -> Result<Value, dpp_runtime::error::RuleError> {
        Ok(Value::String(input.as_str().unwrap_or_default().to_uppercase()))
    }
}

fn uppercase() -> SharedRule {
    Arc::new(Uppercase)
}

#[test]
fn custom_rules_register_once() {
    let mut registry = RuleRegistry::with_builtin_rules();
    registry.register("UPPER", uppercase).unwrap();
    assert!(matches!(
        registry.register("UPPER", uppercase),
        Err(DppError::Configuration(_))
    ));
    assert_eq!(registry.ids(), vec!["CUS_001", "CUS_002", "CUS_003", "UPPER"]);

    let resolver = RuleResolver::new(Arc::new(registry));
    let mapping =
        SourceMapping::from_yaml("mappings:\n  - enabled: true\n    json_path: $.document_data.title\n    rule: UPPER\n")
            .unwrap();
    let mut doc = json!({ "document_data": { "title": "invoice" } });
    resolver.apply(&mut doc, &mapping).unwrap();
    assert_eq!(doc["document_data"]["title"], "INVOICE");
}

#[test]
fn malformed_mapping_is_rejected_at_load() {
    let err = SourceMapping::from_yaml("mappings:\n  - enabled: true\n    json_path: document_data\n    rule: CUS_001\n")
        .unwrap_err();
    assert!(matches!(err, DppError::Configuration(_)));
}

#[test]
fn entries_without_enabled_flag_are_skipped() {
    let mapping = SourceMapping::from_yaml(
        "mappings:\n  - json_path: $.document_data.title\n    rule: CUS_003\n",
    )
    .unwrap();
    assert!(mapping.is_noop());

    let mut doc = json!({ "document_data": { "title": "  kept  " } });
    let summary = resolver().apply(&mut doc, &mapping).unwrap();

    assert_eq!(summary.entries_matched, 0);
    assert_eq!(doc["document_data"]["title"], "  kept  ");
}

#[test]
fn reported_field_path_escapes_the_key() {
    let mapping = SourceMapping::from_yaml(
        r#"
mappings:
  - enabled: true
    json_path: $.document_data.lines[*]
    json_key: "box/page~1"
    rule: CUS_001
"#,
    )
    .unwrap();
    let mut doc = json!({ "document_data": { "lines": [{ "box/page~1": [1, 2, 3] }] } });

    let err = resolver().apply(&mut doc, &mapping).unwrap_err();

    match err {
        DppError::Validation { field_path, .. } => {
            assert_eq!(field_path, "/document_data/lines/0/box~1page~01");
            assert!(doc.pointer(&field_path).is_some());
        }
        other => panic!("unexpected error: {other}"),
    }
}

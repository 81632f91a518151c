use sto_config::load_layered_yaml_from_strings;

#[test]
fn key_order_does_not_change_hash() {
    let a = r#"
sale:
  treasury: t
  minimum_investment: 5
tiers:
  - price: "1"
    capacity: 10
"#;
    let b = r#"
tiers:
  - capacity: 10
    price: "1"
sale:
  minimum_investment: 5
  treasury: t
"#;
    let la = load_layered_yaml_from_strings(&[a]).unwrap();
    let lb = load_layered_yaml_from_strings(&[b]).unwrap();
    assert_eq!(la.canonical_json, lb.canonical_json);
    assert_eq!(la.config_hash, lb.config_hash);
    assert_eq!(la.config_hash.len(), 64);
}

#[test]
fn override_layer_changes_hash() {
    let base = "sale:\n  minimum_investment: 5\n";
    let over = "sale:\n  minimum_investment: 6\n";
    let one = load_layered_yaml_from_strings(&[base]).unwrap();
    let two = load_layered_yaml_from_strings(&[base, over]).unwrap();
    assert_ne!(one.config_hash, two.config_hash);
    assert_eq!(
        two.config_json.pointer("/sale/minimum_investment"),
        Some(&serde_json::json!(6))
    );
}

#[test]
fn files_load_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("base.yaml");
    let local = dir.path().join("local.yaml");
    std::fs::write(&base, "sale:\n  treasury: a\n  settlement_destination: x\n").unwrap();
    std::fs::write(&local, "sale:\n  treasury: b\n").unwrap();

    let loaded = sto_config::load_layered_yaml(&[&base, &local]).unwrap();
    assert_eq!(
        loaded.canonical_json,
        r#"{"sale":{"settlement_destination":"x","treasury":"b"}}"#
    );
}

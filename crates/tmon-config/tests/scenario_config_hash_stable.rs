//! Config hash stability.
//!
//! GREEN when:
//! - Loading the same layers twice gives the same hash.
//! - Reordering keys within YAML does not change the hash.
//! - Changing a value changes the hash.
//! - Files load the same as strings.

use std::io::Write;
use tmon_config::{load_layered_yaml, load_layered_yaml_from_strings, PolicyConfig};

const BASE_YAML: &str = r#"
monitor:
  max_retained_rows_per_node: 500000
  parallel_rules: true
output:
  violations_only: true
  hash_chain: true
policies:
  anomaly:
    window_secs: 86400
    threshold_factor: 9.0
"#;

const BASE_YAML_REORDERED: &str = r#"
policies:
  anomaly:
    threshold_factor: 9.0
    window_secs: 86400
output:
  hash_chain: true
  violations_only: true
monitor:
  parallel_rules: true
  max_retained_rows_per_node: 500000
"#;

const OVERLAY_YAML: &str = r#"
policies:
  finalization:
    deadline_secs: 300
"#;

#[test]
fn same_input_same_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
    assert_eq!(a.config_hash.len(), 64);
}

#[test]
fn key_order_does_not_matter() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
}

#[test]
fn different_values_different_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_ne!(a.config_hash, b.config_hash);

    let policies = PolicyConfig::from_json(&b.config_json).unwrap();
    assert_eq!(policies.finalization_deadline_secs, 300);
    assert_eq!(policies.anomaly_window_secs, 86_400);
}

#[test]
fn files_and_strings_agree() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("base.yaml");
    let overlay = dir.path().join("overlay.yaml");
    std::fs::File::create(&base)
        .unwrap()
        .write_all(BASE_YAML.as_bytes())
        .unwrap();
    std::fs::File::create(&overlay)
        .unwrap()
        .write_all(OVERLAY_YAML.as_bytes())
        .unwrap();

    let from_files = load_layered_yaml(&[&base, &overlay]).unwrap();
    let from_strings = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_eq!(from_files.config_hash, from_strings.config_hash);

    let missing = dir.path().join("missing.yaml");
    assert!(load_layered_yaml(&[&missing]).is_err());
}

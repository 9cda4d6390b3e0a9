use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn hsm_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("hsm");
    path
}

const TAXONOMY: &str = r#"{
  "version": "test-v1",
  "nodes": [
    {"code": "85", "description": "Electrical machinery and equipment"},
    {"code": "8517", "description": "Telephone sets, including smartphones", "parent_code": "85"},
    {"code": "8517.13", "description": "Smartphones", "parent_code": "8517"},
    {"code": "52", "description": "Cotton"},
    {"code": "5208", "description": "Woven fabrics of cotton", "parent_code": "52"},
    {"code": "10", "description": "Cereals"},
    {"code": "1006", "description": "Rice", "parent_code": "10"}
  ]
}"#;

const ISIC_MAP: &str = r#"{
  "2630": ["8517130000", "8517620000"],
  "1311": ["5208"]
}"#;

fn setup_test_env() -> (TempDir, PathBuf) {
    setup_with_taxonomy(TAXONOMY, "records")
}

fn setup_with_taxonomy(taxonomy: &str, format: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    fs::write(data_dir.join("taxonomy.json"), taxonomy).unwrap();
    fs::write(data_dir.join("isic_map.json"), ISIC_MAP).unwrap();

    let config_content = format!(
        r#"[taxonomy]
path = "{root}/data/taxonomy.json"
format = "{format}"
isic_map_path = "{root}/data/isic_map.json"

[matching]
top_k_default = 5
max_top_k = 20

[embedding]
provider = "hashing"
dims = 128

[server]
bind = "127.0.0.1:7341"
"#,
        root = root.display(),
        format = format,
    );

    let config_path = config_dir.join("hsm.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_hsm(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = hsm_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run hsm binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// Lines of the form `N. [score] code  description`.
fn result_lines(stdout: &str) -> Vec<&str> {
    stdout
        .lines()
        .filter(|l| l.split_once(". [").is_some_and(|(n, _)| n.parse::<usize>().is_ok()))
        .collect()
}

#[test]
fn test_check_reports_taxonomy() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_hsm(&config_path, &["check"]);
    assert!(success, "check failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("taxonomy ok"));
    assert!(stdout.contains("nodes:     7"));
    assert!(stdout.contains("roots:     3"));
    assert!(stdout.contains("max level: 2"));
    assert!(stdout.contains("version:   test-v1"));
    assert!(stdout.contains("isic map ok: 2 codes"));
}

#[test]
fn test_check_rejects_cycle() {
    let (_tmp, config_path) = setup_with_taxonomy(
        r#"[
            {"code": "A", "description": "first", "parent_code": "B"},
            {"code": "B", "description": "second", "parent_code": "A"}
        ]"#,
        "records",
    );

    let (stdout, stderr, success) = run_hsm(&config_path, &["check"]);
    assert!(!success, "check should fail on a cycle: stdout={}", stdout);
    assert!(stderr.to_lowercase().contains("cycle"), "stderr={}", stderr);
}

#[test]
fn test_check_rejects_duplicate_code() {
    let (_tmp, config_path) = setup_with_taxonomy(
        r#"[
            {"code": "52", "description": "Cotton"},
            {"code": "52", "description": "Cotton again"}
        ]"#,
        "records",
    );

    let (_, stderr, success) = run_hsm(&config_path, &["check"]);
    assert!(!success);
    assert!(stderr.contains("52"), "stderr={}", stderr);
}

#[test]
fn test_check_hs_flat_format() {
    let (_tmp, config_path) = setup_with_taxonomy(
        r#"[
            {"code": "85", "description": "Electrical machinery"},
            {"code": "8517", "description": "Telephone sets"},
            {"code": "8517.13", "description": "Smartphones"}
        ]"#,
        "hs-flat",
    );

    let (stdout, stderr, success) = run_hsm(&config_path, &["check"]);
    assert!(success, "check failed: stderr={}", stderr);
    assert!(stdout.contains("nodes:     3"));
    assert!(stdout.contains("roots:     1"));
    assert!(stdout.contains("max level: 2"));
}

#[test]
fn test_classify_ranks_smartphones() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_hsm(&config_path, &["classify", "smartphones"]);
    assert!(success, "classify failed: stdout={}, stderr={}", stdout, stderr);

    let lines = result_lines(&stdout);
    assert!(!lines.is_empty(), "no results: {}", stdout);
    assert!(lines.len() <= 5);
    assert!(lines[0].starts_with("1. ["));
    assert!(lines[0].contains("8517"), "top result: {}", lines[0]);

    // Without a hint the reported code is the top candidate.
    let top = lines[0].split_whitespace().nth(2).unwrap();
    assert!(stdout.contains(&format!("final: {}\n", top)), "{}", stdout);
}

#[test]
fn test_classify_json_output() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) =
        run_hsm(&config_path, &["classify", "Smartphones!", "--json"]);
    assert!(success, "classify --json failed: stderr={}", stderr);

    let body: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(body["query"], "Smartphones!");
    assert_eq!(body["normalized"], "smartphones");
    assert_eq!(body["taxonomy_version"], "test-v1");
    assert_eq!(body["generation"], 0);

    let candidates = body["candidates"].as_array().unwrap();
    assert!(!candidates.is_empty());
    for (i, c) in candidates.iter().enumerate() {
        assert_eq!(c["rank"], i + 1);
        let score = c["score"].as_f64().unwrap();
        assert!((0.5..=1.0).contains(&score), "score out of range: {}", score);
        assert!(c.get("explain").is_none());
    }
}

#[test]
fn test_classify_explain() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) =
        run_hsm(&config_path, &["classify", "smartphones", "--explain"]);
    assert!(success, "classify --explain failed: stderr={}", stderr);
    assert!(stdout.contains("raw: "));
    assert!(stdout.contains("boost: "));
    assert!(stdout.contains("level: "));
}

#[test]
fn test_classify_with_isic_hint() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_hsm(
        &config_path,
        &["classify", "smartphones", "--isic", "2630", "--top-k", "1"],
    );
    assert!(success, "classify --isic failed: stderr={}", stderr);
    assert_eq!(result_lines(&stdout).len(), 1);
    assert!(stdout.contains("isic: chapter yes  heading yes"), "{}", stdout);
    assert!(stdout.contains("final: 8517"), "{}", stdout);
}

#[test]
fn test_classify_unknown_isic_is_ignored() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) =
        run_hsm(&config_path, &["classify", "smartphones", "--isic", "9999"]);
    assert!(success);
    assert!(!result_lines(&stdout).is_empty());
    assert!(stdout.contains("(no ISIC mapping for 9999)"));
}

#[test]
fn test_classify_top_k_limits_results() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_hsm(&config_path, &["classify", "cotton", "--top-k", "2"]);
    assert!(success);
    let lines = result_lines(&stdout);
    assert!(!lines.is_empty() && lines.len() <= 2, "{}", stdout);
    assert!(lines[0].contains("52"));
}

#[test]
fn test_classify_empty_input_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_hsm(&config_path, &["classify", "  ?! "]);
    assert!(!success, "empty input should fail");
    assert!(stderr.contains("input is empty"), "stderr={}", stderr);
}

#[test]
fn test_classify_zero_top_k_rejected() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_hsm(&config_path, &["classify", "rice", "--top-k", "0"]);
    assert!(!success, "top_k 0 should be rejected");
    assert!(stderr.contains("top_k must be a positive integer"), "stderr={}", stderr);

    let (_, _, success) = run_hsm(&config_path, &["classify", "rice", "--top-k", "-2"]);
    assert!(!success, "negative top_k should be rejected");
}

#[test]
fn test_node_shows_ancestors_and_children() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_hsm(&config_path, &["node", "8517"]);
    assert!(success, "node failed: stderr={}", stderr);
    assert!(stdout.contains("--- Node ---"));
    assert!(stdout.contains("--- Ancestors (1) ---"));
    assert!(stdout.contains("--- Children (1) ---"));
    assert!(stdout.contains("85  Electrical machinery and equipment"));
    assert!(stdout.contains("8517.13  Smartphones"));
}

#[test]
fn test_node_not_found() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_hsm(&config_path, &["node", "9999"]);
    assert!(!success, "unknown node should fail");
    assert!(stderr.contains("node not found: 9999"));
}

#[test]
fn test_isic_lookup() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_hsm(&config_path, &["isic", "2630"]);
    assert!(success, "isic failed: stderr={}", stderr);
    assert!(stdout.contains("isic:  2630"));
    assert!(stdout.contains("hs02:  85"));
    assert!(stdout.contains("hs04:  8517"));
    assert!(stdout.contains("total: 2 codes"));

    let (_, stderr, success) = run_hsm(&config_path, &["isic", "0000"]);
    assert!(!success);
    assert!(stderr.contains("ISIC code not found"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, _, success) = run_hsm(&tmp.path().join("absent.toml"), &["check"]);
    assert!(!success);
}

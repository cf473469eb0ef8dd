use std::io::Write;

use graphk_core::config::{AppConfig, InFlightPolicy};
use graphk_core::error::GraphkError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[runtime]
max_depth = 8
parallel_frontier = true
max_loop_iterations = 50
in_flight = "finish"

[log]
filter = "graphk=debug"
"#;

    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(toml_content.as_bytes()).unwrap();

    let config = AppConfig::load(tmp.path()).unwrap();

    assert_eq!(config.runtime.max_depth, 8);
    assert!(config.runtime.parallel_frontier);
    assert_eq!(config.runtime.max_loop_iterations, 50);
    assert_eq!(config.runtime.in_flight, InFlightPolicy::Finish);
    assert_eq!(config.log.filter, "graphk=debug");

    let run = config.runtime.to_run_config();
    assert_eq!(run.max_depth, 8);
    assert!(run.parallel_frontier);
}

#[test]
fn test_load_expands_env_vars() {
    std::env::set_var("GRAPHK_TEST_MAX_DEPTH", "5");
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(b"[runtime]\nmax_depth = ${GRAPHK_TEST_MAX_DEPTH}\n")
        .unwrap();

    let config = AppConfig::load(tmp.path()).unwrap();
    assert_eq!(config.runtime.max_depth, 5);
    std::env::remove_var("GRAPHK_TEST_MAX_DEPTH");
}

#[test]
fn test_missing_file_is_config_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let err = AppConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, GraphkError::ConfigNotFound(_)));
}

#[test]
fn test_invalid_toml_is_config_error() {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(b"[runtime]\nin_flight = \"sometimes\"\n").unwrap();

    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, GraphkError::Config(_)));
}

#[test]
fn test_config_round_trips_through_toml() {
    let config = AppConfig::default();
    let rendered = toml::to_string_pretty(&config).unwrap();
    let parsed: AppConfig = toml::from_str(&rendered).unwrap();
    assert_eq!(parsed.runtime.max_depth, config.runtime.max_depth);
    assert_eq!(parsed.log.filter, config.log.filter);
}

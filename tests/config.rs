use assert_matches::assert_matches;

use ampliflow::config::ConfigLoader;
use ampliflow::domain::PoolingMode;
use ampliflow::error::AmpliflowError;

#[test]
fn resolve_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ampliflow.json");
    std::fs::write(
        &path,
        r#"{
            "truncation_length": { "forward": 240, "reverse": 160 },
            "max_expected_errors": 2.0,
            "pooling_mode": "pseudo",
            "concurrency": 8
        }"#,
    )
    .unwrap();

    let config = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap();
    assert_eq!(config.truncation_forward, 240);
    assert_eq!(config.truncation_reverse, 160);
    assert_eq!(config.pooling_mode, PoolingMode::Pseudo);
    assert_eq!(config.concurrency, 8);
    // Documented defaults fill the rest.
    assert_eq!(config.min_length, 50);
    assert_eq!(config.timeout_secs, 600);
}

#[test]
fn invalid_json_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ampliflow.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap_err();
    assert_matches!(err, AmpliflowError::ConfigParse(_));
}

#[test]
fn explicit_missing_path_is_a_read_error() {
    let err = ConfigLoader::resolve(Some("/nonexistent/ampliflow.json")).unwrap_err();
    assert_matches!(err, AmpliflowError::ConfigRead(_));
}

#[test]
fn out_of_domain_values_fail_before_any_work() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ampliflow.json");
    std::fs::write(&path, r#"{ "timeout_secs": 0 }"#).unwrap();

    let err = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap_err();
    assert_matches!(err, AmpliflowError::InvalidParameter(_));
}

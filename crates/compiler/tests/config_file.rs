//! Project-file configuration loading.

use std::io::Write;

#[test]
fn jz_toml_round_trips_through_a_real_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[build]").unwrap();
    writeln!(file, "gc = true").unwrap();
    let config = jzc::CompilerConfig::from_file(file.path()).unwrap();
    assert!(config.gc);
}

#[test]
fn a_missing_config_file_reports_its_path() {
    let err = jzc::CompilerConfig::from_file(std::path::Path::new("/nonexistent/jz.toml")).unwrap_err();
    assert!(err.contains("/nonexistent/jz.toml"));
}

#[test]
fn an_invalid_config_file_is_a_parse_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "build = \"not a table\"").unwrap();
    assert!(jzc::CompilerConfig::from_file(file.path()).is_err());
}

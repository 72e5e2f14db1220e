use std::fs;
use std::path::PathBuf;
use stpl::config::{get_config, parse_config, read_config, Config};
use stpl::error::Error;
use tempfile::TempDir;
use test_log::test;

#[test]
fn test_defaults_without_config_file() {
    let dir = TempDir::new().unwrap();
    let config = get_config(dir.path()).unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.directories, vec![PathBuf::from(".")]);
}

#[test]
fn test_yaml_config() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("stpl.yml"),
        "directories:\n  - views\n  - /abs/shared\nbuffer_size: 128\n",
    )
    .unwrap();
    let config = get_config(dir.path()).unwrap();
    assert_eq!(
        config.directories,
        vec![dir.path().join("views"), PathBuf::from("/abs/shared")]
    );
    assert_eq!(config.buffer_size, 128);
    assert_eq!(config.extensions, vec![".tpl", ".stpl"]);
}

#[test]
fn test_json_config_preferred() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("stpl.json"), r#"{"extensions": [".html"]}"#).unwrap();
    fs::write(dir.path().join("stpl.yml"), "extensions: ['.txt']\n").unwrap();
    let config = get_config(dir.path()).unwrap();
    assert_eq!(config.extensions, vec![".html"]);
    assert_eq!(config.directories, vec![dir.path().join(".")]);
}

#[test]
fn test_read_config_explicit_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("custom.yaml");
    fs::write(&path, "directories: [templates]\n").unwrap();
    let config = read_config(&path).unwrap();
    assert_eq!(config.directories, vec![dir.path().join("templates")]);
}

#[test]
fn test_read_config_missing_file() {
    let dir = TempDir::new().unwrap();
    let err = read_config(dir.path().join("nope.yml")).unwrap_err();
    assert!(matches!(err, Error::IoError(_)));
}

#[test]
fn test_invalid_config() {
    assert!(matches!(
        parse_config("buffer_size: [1, 2]"),
        Err(Error::ConfigError(_))
    ));
}

//! Configuration resolution and loading tests
//!
//! Tests that manipulate SONIC_CONFIG are marked with #[serial]
//! so they never race on the process environment.

use serial_test::serial;
use sonic_common::config::{resolve_config_path, ConfigSource, CONFIG_ENV_VAR};
use sonic_common::{ChannelLayout, Error, ServiceConfig};
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
#[serial]
fn test_env_var_used_when_no_cli_arg() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/sonic-env.toml");

    let source = resolve_config_path(None);
    assert_eq!(source, ConfigSource::Explicit(PathBuf::from("/tmp/sonic-env.toml")));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_cli_arg_overrides_env_var() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/sonic-env.toml");

    let cli = PathBuf::from("/tmp/sonic-cli.toml");
    let source = resolve_config_path(Some(&cli));
    assert_eq!(source, ConfigSource::Explicit(cli));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    env::remove_var(CONFIG_ENV_VAR);
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("absent.toml");

    let result = ServiceConfig::load(Some(&missing));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_load_explicit_file() {
    env::remove_var(CONFIG_ENV_VAR);
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("sonic-infer.toml");
    std::fs::write(
        &path,
        r#"
        [server]
        bind = "0.0.0.0:9000"

        [audio]
        channels = "stereo"

        [features]
        n_mels = 64
        chunk_seconds = 10.0

        [decoder]
        ffmpeg_path = "/usr/local/bin/ffmpeg"

        [model]
        path = "/srv/models/classifier.json"
        "#,
    )
    .unwrap();

    let config = ServiceConfig::load(Some(&path)).unwrap();
    config.validate().unwrap();

    assert_eq!(config.server.bind.port(), 9000);
    assert_eq!(config.audio.channels, ChannelLayout::Stereo);
    assert_eq!(config.features.output_shape(16000), [64, 1001]);
    assert_eq!(
        config.decoder.ffmpeg_path,
        Some(PathBuf::from("/usr/local/bin/ffmpeg"))
    );
    assert_eq!(config.model.path, PathBuf::from("/srv/models/classifier.json"));
}

#[test]
fn test_malformed_toml_reports_config_error() {
    let result = ServiceConfig::from_toml_str("[features\nn_mels = 3");
    assert!(matches!(result, Err(Error::Config(_))));
}

//! Tests for configuration resolution and graceful degradation
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate SIGNPLAY_CONFIG are marked with #[serial].

use serial_test::serial;
use signplay_common::config::{resolve_config_path, ConfigSource, TomlConfig, CONFIG_ENV_VAR};
use signplay_common::Error;
use std::env;
use std::io::Write;
use std::path::PathBuf;

#[test]
#[serial]
fn test_cli_argument_wins_over_environment() {
    env::set_var(CONFIG_ENV_VAR, "/from/env.toml");
    let cli = PathBuf::from("/from/cli.toml");

    let source = resolve_config_path(Some(&cli), CONFIG_ENV_VAR);
    assert_eq!(source, ConfigSource::Explicit(cli));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_environment_used_without_cli_argument() {
    env::set_var(CONFIG_ENV_VAR, "/from/env.toml");

    let source = resolve_config_path(None, CONFIG_ENV_VAR);
    assert_eq!(source, ConfigSource::Explicit(PathBuf::from("/from/env.toml")));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_default_location_without_overrides() {
    env::remove_var(CONFIG_ENV_VAR);

    match resolve_config_path(None, CONFIG_ENV_VAR) {
        ConfigSource::Default(path) => {
            assert!(path.ends_with("signplay/config.toml"));
        }
        ConfigSource::None => {}
        other => panic!("Expected default location, got {:?}", other),
    }
}

#[test]
#[serial]
fn test_explicit_missing_file_is_an_error() {
    env::remove_var(CONFIG_ENV_VAR);
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");

    let result = TomlConfig::load_resolved(Some(&missing));
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[test]
#[serial]
fn test_load_explicit_file() {
    env::remove_var(CONFIG_ENV_VAR);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
video_root = "/tmp/clips"

[logging]
level = "debug"

[machine]
parallel_mode = true
parallel_batch_size = 4

[machine.bigrams]
Good = "Night"
"#
    )
    .unwrap();

    let (config, path) = TomlConfig::load_resolved(Some(file.path())).unwrap();
    assert_eq!(path.as_deref(), Some(file.path()));
    assert_eq!(config.logging.level, "debug");
    assert!(config.machine.parallel_mode);
    assert_eq!(config.machine.parallel_batch_size, 4);
    // An explicit table replaces the built-in one
    assert_eq!(config.machine.bigrams.len(), 1);
    assert_eq!(config.machine.bigrams["Good"], "Night");
}

#[test]
fn test_common_pairs_from_toml() {
    let config = TomlConfig::from_toml_str(
        r#"
[queue]
common_pairs = [["See", "You"], ["Good", "Night"]]
"#,
    )
    .unwrap();

    assert_eq!(
        config.queue.common_pairs,
        vec![
            ("See".to_string(), "You".to_string()),
            ("Good".to_string(), "Night".to_string()),
        ]
    );
}

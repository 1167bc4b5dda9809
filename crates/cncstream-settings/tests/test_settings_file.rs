//! Loading settings files from disk

use cncstream_communication::firmware::DialectKind;
use cncstream_settings::{SettingsError, StreamSettings};
use std::io::Write;
use std::time::Duration;

fn write_file(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_toml_file() {
    let file = write_file(
        ".toml",
        r#"
dialect = "grbl"
buffer_capacity = 128
status_poll_interval_ms = 250
safe_position_command = "G90;G53G0Z0"
"#,
    );

    let settings = StreamSettings::load_from_file(file.path()).unwrap();
    assert_eq!(settings.buffer_capacity, 128);

    let config = settings.stream_config();
    assert_eq!(config.status_poll_interval, Duration::from_millis(250));
    assert_eq!(config.safe_position_command, "G90;G53G0Z0");
}

#[test]
fn test_load_json_file() {
    let file = write_file(
        ".json",
        r#"{ "dialect": "marlin", "units": "imperial", "connection": { "baud_rate": 250000 } }"#,
    );

    let settings = StreamSettings::load_from_file(file.path()).unwrap();
    assert_eq!(settings.dialect, DialectKind::Marlin);
    assert_eq!(settings.connection.baud_rate, 250000);
    assert_eq!(settings.stream_config().dialect, DialectKind::Marlin);
}

#[test]
fn test_unsupported_extension() {
    let file = write_file(".yaml", "dialect: grbl\n");
    let err = StreamSettings::load_from_file(file.path()).unwrap_err();
    assert!(matches!(err, SettingsError::UnsupportedFormat(ref ext) if ext == "yaml"));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = StreamSettings::load_from_file(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, SettingsError::IoError(_)));
}

#[test]
fn test_invalid_values_are_rejected_on_load() {
    let file = write_file(".toml", "link_poll_interval_ms = 0\n");
    let err = StreamSettings::load_from_file(file.path()).unwrap_err();
    assert!(matches!(err, SettingsError::InvalidSetting { ref key, .. } if key == "link_poll_interval_ms"));
}

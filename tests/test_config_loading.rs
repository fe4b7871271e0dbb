//! Configuration loading and validation tests
//!
//! Tests focus on what a loaded file produces: connection options, topic
//! filters and the last will, plus the errors for broken files.

use mqtt_rx::config::{ConfigError, ServiceConfig};
use mqtt_rx::protocol::{ConnectionType, QoSLevel, TopicFilter};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[connection]
uri = "tcp://broker:1883"
clean_session = true

[[subscriptions]]
topic = "a/b"
qos = 1
"#,
    );

    let config = ServiceConfig::load_from_file(temp_file.path()).unwrap();
    let options = config.connection_options().unwrap();

    assert_eq!(options.uri.as_str(), "tcp://broker:1883");
    assert_eq!(options.connection_type, ConnectionType::Tcp);
    assert!(options.clean_session);
    assert_eq!(
        config.topic_filters().unwrap(),
        vec![TopicFilter::new("a/b", QoSLevel::AtLeastOnce)]
    );
}

#[test]
fn test_certificates_are_read_in_order() {
    let first = write_config("FIRST CERTIFICATE");
    let second = write_config("SECOND CERTIFICATE");

    let temp_file = write_config(&format!(
        r#"
[connection]
uri = "mqtts://broker:8883"
certificate_paths = [{:?}, {:?}]
ignore_certificate_chain_errors = true
"#,
        first.path().display().to_string(),
        second.path().display().to_string(),
    ));

    let options = ServiceConfig::load_from_file(temp_file.path())
        .unwrap()
        .connection_options()
        .unwrap();

    assert_eq!(options.certificates.len(), 2);
    assert!(options.certificates[0].starts_with(b"FIRST"));
    assert!(options.certificates[1].starts_with(b"SECOND"));
    assert!(options.ignore_certificate_chain_errors);
}

#[test]
fn test_timeouts_and_will_from_file() {
    let temp_file = write_config(
        r#"
[connection]
uri = "ws://broker:8080/mqtt"
connection_type = "websocket"
communication_timeout_secs = 15
keep_alive_secs = 20

[will]
topic = "clients/gone"
payload = "bye"
qos = 1
"#,
    );

    let config = ServiceConfig::load_from_file(temp_file.path()).unwrap();
    let options = config.connection_options().unwrap();

    assert_eq!(options.connection_type, ConnectionType::WebSocket);
    assert_eq!(options.communication_timeout, Duration::from_secs(15));
    assert_eq!(options.keep_alive_period, Duration::from_secs(20));

    let will = config.will_message().unwrap().unwrap();
    assert_eq!(will.topic, "clients/gone");
    assert_eq!(will.qos, QoSLevel::AtLeastOnce);
    assert!(!will.retain);
}

#[test]
fn test_missing_file_is_read_error() {
    let result = ServiceConfig::load_from_file(Path::new("/nonexistent/mqtt-rx.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let temp_file = write_config("[connection\nuri = ");
    let result = ServiceConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_missing_connection_section_is_parse_error() {
    let temp_file = write_config(
        r#"
[[subscriptions]]
topic = "a/b"
"#,
    );
    let result = ServiceConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_invalid_will_qos_is_rejected() {
    let temp_file = write_config(
        r#"
[connection]
uri = "tcp://broker:1883"

[will]
topic = "clients/gone"
qos = 5
"#,
    );
    let result = ServiceConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidQoS { qos: 5, .. })));
}

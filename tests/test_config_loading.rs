//! Configuration loading and validation tests
//!
//! Loads real files from disk and checks what the rest of the link sees:
//! parsed addresses, controller settings, and error kinds for bad input.

use broker_link::config::{ConfigError, LinkConfig};
use broker_link::controller::{LinkDownPolicy, Stage};
use broker_link::transport::BrokerAddress;
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
[device]
name = "pump-station-7"

[broker]
servers = ["mqtt://tb.example.com:1883", "mqtt://10.0.0.5"]
token = "A1_TEST_TOKEN"
"#,
    );

    let config = LinkConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.device.name, "pump-station-7");
    assert_eq!(
        config.addresses().unwrap(),
        vec![
            BrokerAddress::new("tb.example.com", 1883),
            BrokerAddress::new("10.0.0.5", 1883),
        ]
    );
    let servers = config.servers().unwrap();
    assert_eq!(servers.len(), 2);
    assert_eq!(servers.token(), "A1_TEST_TOKEN");
}

#[test]
fn test_defaults_match_standard_ladder() {
    let temp_file = write_config(
        r#"
[device]
name = "gw"

[broker]
servers = ["mqtt://tb.example.com"]
token = "t"
"#,
    );

    let config = LinkConfig::load_from_file(temp_file.path()).unwrap();
    let settings = config.controller_settings().unwrap();

    assert_eq!(settings.ladder.thresholds(), [6, 11, 23]);
    assert_eq!(
        settings.ladder.periods(),
        [
            Duration::from_secs(5),
            Duration::from_secs(60),
            Duration::from_secs(300)
        ]
    );
    assert_eq!(settings.ladder.stage_for(6).stage, Stage::Second);
    assert_eq!(settings.max_cycles, 3);
    assert_eq!(settings.link_down_policy, LinkDownPolicy::Preserve);
    assert_eq!(settings.telemetry_interval, Duration::from_secs(60));
}

#[test]
fn test_custom_sections_flow_into_settings() {
    let temp_file = write_config(
        r#"
[device]
name = "gw"

[broker]
servers = ["mqtt://tb.example.com:8883"]
token = "t"
connect_timeout_ms = 2000

[backoff]
thresholds = [2, 4, 8]
periods_ms = [2000, 10000, 30000]

[escalation]
max_cycles = 1
link_down_policy = "reset"

[publish]
telemetry_interval_secs = 5
"#,
    );

    let config = LinkConfig::load_from_file(temp_file.path()).unwrap();
    let settings = config.controller_settings().unwrap();

    assert_eq!(settings.ladder.thresholds(), [2, 4, 8]);
    assert_eq!(settings.max_cycles, 1);
    assert_eq!(settings.link_down_policy, LinkDownPolicy::Reset);
    assert_eq!(settings.telemetry_interval, Duration::from_secs(5));
    assert_eq!(config.addresses().unwrap()[0].port(), 8883);
    assert_eq!(config.mqtt_settings().connect_timeout, Duration::from_secs(2));
}

#[test]
fn test_missing_file_reports_read_error() {
    let result = LinkConfig::load_from_file(Path::new("/nonexistent/broker-link.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_reports_parse_error() {
    let temp_file = write_config("[device\nname = ");
    let result = LinkConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_missing_broker_section_is_rejected() {
    let temp_file = write_config(
        r#"
[device]
name = "gw"
"#,
    );
    let result = LinkConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_empty_server_list_is_rejected() {
    let temp_file = write_config(
        r#"
[device]
name = "gw"

[broker]
servers = []
token = "t"
"#,
    );
    let result = LinkConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::Servers(_))));
}

#[test]
fn test_empty_device_name_is_rejected() {
    let temp_file = write_config(
        r#"
[device]
name = "  "

[broker]
servers = ["mqtt://tb.example.com"]
token = "t"
"#,
    );
    let err = LinkConfig::load_from_file(temp_file.path()).unwrap_err();
    assert!(err.to_string().contains("device.name"));
}

#[test]
fn test_unknown_link_down_policy_is_rejected() {
    let temp_file = write_config(
        r#"
[device]
name = "gw"

[broker]
servers = ["mqtt://tb.example.com"]
token = "t"

[escalation]
link_down_policy = "forget"
"#,
    );
    let result = LinkConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_token_env_resolved_at_servers_time() {
    let temp_file = write_config(
        r#"
[device]
name = "gw"

[broker]
servers = ["mqtt://tb.example.com"]
token_env = "BROKER_LINK_IT_TOKEN_UNSET"
"#,
    );

    // Loading succeeds; the missing variable only matters once servers are built
    let config = LinkConfig::load_from_file(temp_file.path()).unwrap();
    assert!(matches!(
        config.servers(),
        Err(ConfigError::EnvVarNotFound(_))
    ));
}

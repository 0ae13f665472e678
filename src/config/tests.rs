use std::env;
use std::fs;

use serial_test::serial;
use tempfile::TempDir;

use super::{Settings, load_config, load_config_from};
use crate::broker::{BrokerPolicy, EmptyTopicPolicy, IdentityPolicy};

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 6380);
    assert_eq!(settings.server.ws_port, None);
    assert_eq!(settings.broker.max_connections, 1000);
    assert_eq!(settings.broker.max_queue_len, 1024);
    assert_eq!(settings.broker.max_malformed_frames, 8);
    assert_eq!(settings.broker.max_frame_len, 64 * 1024);
    assert_eq!(settings.broker.identity_policy, IdentityPolicy::Reject);
    assert_eq!(settings.broker.empty_topic_policy, EmptyTopicPolicy::Accept);
    assert_eq!(settings.log.level, "info");
}

#[test]
fn test_default_settings_match_default_policy() {
    let settings = Settings::default();
    assert_eq!(BrokerPolicy::from(&settings.broker), BrokerPolicy::default());
}

#[test]
fn test_listener_addresses() {
    let mut settings = Settings::default();
    assert_eq!(settings.server.tcp_addr(), "127.0.0.1:6380");
    assert_eq!(settings.server.ws_addr(), None);

    settings.server.ws_port = Some(6381);
    assert_eq!(settings.server.ws_addr().as_deref(), Some("127.0.0.1:6381"));
}

#[test]
#[serial]
fn test_missing_file_yields_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let path = tmp.path().join("absent");

    let cfg = load_config_from(path.to_str().unwrap()).expect("load_config_from failed");
    assert_eq!(cfg, Settings::default());
}

#[test]
#[serial]
fn test_load_config_from_file_overrides_defaults() {
    // load_config looks for config/default.* relative to the working directory
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    let toml = r#"
        [server]
        host = "0.0.0.0"
        ws_port = 9001

        [broker]
        max_connections = 10
        identity_policy = "takeover"
        empty_topic_policy = "reject"

        [log]
        level = "debug"
    "#;
    fs::write("config/default.toml", toml).expect("write config file");

    let cfg = load_config();
    env::set_current_dir(orig).expect("restore cwd");
    let cfg = cfg.expect("load_config failed");

    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 6380);
    assert_eq!(cfg.server.ws_port, Some(9001));
    assert_eq!(cfg.broker.max_connections, 10);
    assert_eq!(cfg.broker.max_queue_len, 1024);
    assert_eq!(cfg.broker.identity_policy, IdentityPolicy::Takeover);
    assert_eq!(cfg.broker.empty_topic_policy, EmptyTopicPolicy::Reject);
    assert_eq!(cfg.log.level, "debug");
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let tmp = TempDir::new().expect("create tempdir");
    let path = tmp.path().join("ssmp.toml");
    fs::write(&path, "[server]\nport = 7000\n\n[broker]\nmax_queue_len = 5\n")
        .expect("write config file");

    let cfg = temp_env::with_vars(
        [
            ("SSMP_SERVER__PORT", Some("7100")),
            ("SSMP_BROKER__MAX_MALFORMED_FRAMES", Some("2")),
            ("SSMP_BROKER__IDENTITY_POLICY", Some("takeover")),
        ],
        || load_config_from(path.to_str().unwrap()),
    )
    .expect("load_config_from failed");

    assert_eq!(cfg.server.port, 7100);
    assert_eq!(cfg.broker.max_queue_len, 5);
    assert_eq!(cfg.broker.max_malformed_frames, 2);
    assert_eq!(cfg.broker.identity_policy, IdentityPolicy::Takeover);
}

#[test]
#[serial]
fn test_invalid_policy_is_an_error() {
    let result = temp_env::with_var("SSMP_BROKER__EMPTY_TOPIC_POLICY", Some("sometimes"), || {
        load_config_from("does/not/exist")
    });
    assert!(result.is_err());
}

use std::{
    collections::HashMap,
    env, fs,
    time::{SystemTime, UNIX_EPOCH},
};

use super::*;

fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn file_values_override_defaults() {
    let mut settings = Settings::default();
    apply_file(
        &mut settings,
        r#"
gateway_url = "https://bridge.example:8443"
account = "0x00000000000000000000000000000000000000AA"
network_id = 5
"#,
    )
    .expect("file settings");

    assert_eq!(settings.gateway_url, "https://bridge.example:8443");
    assert_eq!(settings.network_id, 5);
    assert_eq!(settings.sync_timeout_secs, 30);
    assert_eq!(
        settings.account().expect("account").as_str(),
        "0x00000000000000000000000000000000000000aa"
    );
}

#[test]
fn unknown_file_keys_are_rejected() {
    let mut settings = Settings::default();
    assert!(apply_file(&mut settings, "gateway = \"http://x\"").is_err());
}

#[test]
fn app_prefixed_env_wins_over_short_names() {
    let mut settings = Settings::default();
    apply_env(
        &mut settings,
        env_of(&[
            ("VOTING_GATEWAY_URL", "http://short:1"),
            ("APP__GATEWAY_URL", "http://prefixed:2"),
            ("VOTING_ACCOUNT", "0x0000000000000000000000000000000000000001"),
            ("APP__NETWORK_ID", "31337"),
        ]),
    )
    .expect("env settings");

    assert_eq!(settings.gateway_url, "http://prefixed:2");
    assert_eq!(settings.network_id, 31337);
    assert!(settings.account().is_ok());
}

#[test]
fn malformed_numeric_env_is_an_error() {
    let mut settings = Settings::default();
    let err = apply_env(&mut settings, env_of(&[("APP__NETWORK_ID", "mainnet")]))
        .expect_err("not a number");
    assert!(err.to_string().contains("APP__NETWORK_ID"));
}

#[test]
fn validation_checks_url_scheme_and_account() {
    let mut settings = Settings::default();
    assert!(settings.validate().is_ok());
    assert!(settings.account().is_err());

    settings.gateway_url = "ws://127.0.0.1:8545".into();
    assert!(settings.validate().is_err());

    settings.gateway_url = "not a url".into();
    assert!(settings.validate().is_err());

    settings = Settings {
        account: Some("0x1234".into()),
        ..Settings::default()
    };
    assert!(settings.account().is_err());
}

#[test]
fn missing_config_file_is_not_an_error() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = env::temp_dir().join(format!("voting_cli_missing_{suffix}.toml"));
    assert!(!path.exists());

    load_settings(&path).expect("missing file is not an error");
}

#[test]
fn config_file_on_disk_is_loaded() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = env::temp_dir().join(format!("voting_cli_config_{suffix}.toml"));
    fs::write(&path, "sync_timeout_secs = 7\n").expect("write config");

    let settings = load_settings(&path).expect("load settings");
    assert_eq!(settings.sync_timeout_secs, 7);

    fs::remove_file(path).expect("cleanup");
}

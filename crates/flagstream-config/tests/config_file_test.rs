#![allow(clippy::unwrap_used)]
// Config file loading and saving against real files in a temp directory.

use std::time::Duration;

use pretty_assertions::assert_eq;
use secrecy::ExposeSecret;

use flagstream_config::{
    Config, ConfigError, Profile, load_config_from, profile_to_streaming_config, save_config_to,
};

const SAMPLE: &str = r#"
default_profile = "staging"

[defaults]
timeout = 20
idle_timeout = 90

[profiles.staging]
sdk_key = "staging-key-1234"
streaming_url = "https://streaming.staging.example.com/sse"
connection_delay_secs = 5
refresh_margin_secs = 120

[profiles.prod]
sdk_key = "prod-key-5678"
timeout = 10
"#;

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config_from(&dir.path().join("absent.toml")).unwrap();

    assert_eq!(config.default_profile.as_deref(), Some("default"));
    assert_eq!(config.defaults.timeout, 15);
    assert!(config.profiles.is_empty());
}

#[test]
fn loads_profiles_and_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, SAMPLE).unwrap();

    let config = load_config_from(&path).unwrap();
    assert_eq!(config.profiles.len(), 2);

    let (name, staging) = config.profile(None).unwrap();
    assert_eq!(name, "staging");

    let streaming = profile_to_streaming_config(staging, name, &config.defaults).unwrap();
    assert_eq!(streaming.sdk_key.expose_secret(), "staging-key-1234");
    assert_eq!(
        streaming.streaming_url.as_str(),
        "https://streaming.staging.example.com/sse"
    );
    assert_eq!(streaming.http_timeout, Duration::from_secs(20));
    assert_eq!(streaming.idle_timeout, Duration::from_secs(90));
    assert_eq!(streaming.default_connection_delay, Duration::from_secs(5));
    assert_eq!(streaming.refresh_safety_margin, Duration::from_secs(120));

    let (_, prod) = config.profile(Some("prod")).unwrap();
    let streaming = profile_to_streaming_config(prod, "prod", &config.defaults).unwrap();
    assert_eq!(streaming.http_timeout, Duration::from_secs(10));
}

#[test]
fn unknown_profile_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, SAMPLE).unwrap();

    let config = load_config_from(&path).unwrap();
    assert!(matches!(
        config.profile(Some("qa")),
        Err(ConfigError::UnknownProfile(ref name)) if name == "qa"
    ));
}

#[test]
fn malformed_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[profiles.broken\nsdk_key = ").unwrap();

    assert!(matches!(load_config_from(&path), Err(ConfigError::Figment(_))));
}

#[test]
fn save_then_load_preserves_profiles() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = Config::default();
    config.profiles.insert(
        "default".into(),
        Profile {
            sdk_key_env: Some("MY_SDK_KEY".into()),
            disconnection_grace_secs: Some(30),
            ..Profile::default()
        },
    );
    save_config_to(&config, &path).unwrap();

    let loaded = load_config_from(&path).unwrap();
    let (name, profile) = loaded.profile(None).unwrap();
    assert_eq!(name, "default");
    assert_eq!(profile.sdk_key_env.as_deref(), Some("MY_SDK_KEY"));
    assert_eq!(profile.disconnection_grace_secs, Some(30));
}

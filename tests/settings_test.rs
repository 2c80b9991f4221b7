// Settings files, environment overrides and workspace resolution.
use aml_interface::Settings;
use aml_interface::app::ConfigError;
use aml_interface::domain::LogLevel;
use serial_test::serial;
use std::env;
use tempfile::TempDir;

const FULL: &str = r#"
[logging]
loglevel_own = "DEBUG"
own_packages = ["__main__", "training"]
ai_instrumentation_key = "InstrumentationKey=00000000-0000-0000-0000-000000000000"

[logging.basic_config]
level = "INFO"
format = "%(levelname)s:%(name)s:%(message)s"

[workspace]
subscriptionId = "sub-1"
resourceGroup = "rg-1"
workspaceName = "ws-1"

[client]
job_poll_interval_secs = 5
"#;

fn clear_env() {
    for name in [
        "AML_MANAGEMENT_ENDPOINT",
        "AML_API_VERSION",
        "AML_REQUEST_TIMEOUT_SECS",
        "AML_JOB_POLL_INTERVAL_SECS",
        "AZURE_AUTHORITY_HOST",
        "AZURE_TENANT_ID",
        "AML_CONFIG_PATH",
    ] {
        unsafe { env::remove_var(name) };
    }
}

#[test]
#[serial]
fn test_full_settings_file() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("aml.toml");
    std::fs::write(&file, FULL).unwrap();

    let settings = Settings::from_file(&file).unwrap();

    let logging = settings.logging.as_ref().unwrap();
    assert_eq!(logging.loglevel_own, LogLevel::Debug);
    assert_eq!(logging.packages(Some("extra")), vec!["__main__", "training", "extra"]);
    assert_eq!(logging.basic_config.level, LogLevel::Info);
    assert_eq!(settings.client.job_poll_interval_secs, 5);
    assert_eq!(settings.client.api_version, "2023-10-01");
    assert_eq!(settings.resolve_workspace().unwrap().workspace_name, "ws-1");
}

#[test]
#[serial]
fn test_env_overrides_file_values() {
    clear_env();
    unsafe {
        env::set_var("AML_JOB_POLL_INTERVAL_SECS", "30");
        env::set_var("AZURE_TENANT_ID", "contoso");
    }

    let settings = Settings::from_toml_str(FULL).unwrap();
    clear_env();

    assert_eq!(settings.client.job_poll_interval_secs, 30);
    assert_eq!(settings.auth.tenant_id.as_deref(), Some("contoso"));
}

#[test]
#[serial]
fn test_invalid_env_value_is_rejected() {
    clear_env();
    unsafe { env::set_var("AML_REQUEST_TIMEOUT_SECS", "soon") };

    let result = Settings::from_env();
    clear_env();

    assert!(matches!(result, Err(ConfigError::EnvError(_))));
}

#[test]
#[serial]
fn test_zero_poll_interval_is_rejected() {
    clear_env();
    let result = Settings::from_toml_str("[client]\njob_poll_interval_secs = 0\n");
    assert!(matches!(
        result,
        Err(ConfigError::InvalidValue { key, .. }) if key == "client.job_poll_interval_secs"
    ));
}

#[test]
#[serial]
fn test_workspace_from_config_path() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.json");
    std::fs::write(
        &config,
        r#"{"subscription_id": "s", "resource_group": "r", "workspace_name": "w"}"#,
    )
    .unwrap();
    unsafe { env::set_var("AML_CONFIG_PATH", &config) };

    let settings = Settings::from_env().unwrap();
    clear_env();

    let workspace = settings.resolve_workspace().unwrap();
    assert_eq!(workspace.resource_group, "r");
    assert!(settings.logging.is_none());
}

#[test]
#[serial]
fn test_logging_section_requires_all_keys() {
    clear_env();
    let result = Settings::from_toml_str(
        r#"
        [logging]
        loglevel_own = "INFO"
        own_packages = []
        basic_config = {}
        "#,
    );
    assert!(matches!(result, Err(ConfigError::MissingKey(key)) if key == "ai_instrumentation_key"));
}

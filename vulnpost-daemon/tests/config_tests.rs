//! Configuration loading tests through the daemon's build path.

use vulnpost_core::config::VulnpostConfig;
use vulnpost_daemon::orchestrator::Orchestrator;

fn write_config(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("vulnpost.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[tokio::test]
async fn build_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
[api]
token = "glpat-test"

[target]
kind = "project"
reference = "12345"
"#,
    );

    let orchestrator = Orchestrator::build(&path).await.unwrap();
    assert_eq!(orchestrator.config().target.reference, "12345");
    assert_eq!(orchestrator.config().api.base_url, "https://gitlab.com");
}

#[tokio::test]
async fn build_fails_for_missing_config_file() {
    let err = Orchestrator::build(std::path::Path::new("/nonexistent/vulnpost.toml"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("failed to load config"));
}

#[tokio::test]
async fn build_fails_for_config_without_token() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
[target]
kind = "project"
reference = "12345"
"#,
    );

    let err = Orchestrator::build(&path).await.unwrap_err();
    assert!(err.to_string().contains("api.token"));
}

#[tokio::test]
async fn build_fails_for_invalid_target_kind() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
[api]
token = "glpat-test"

[target]
kind = "repository"
reference = "12345"
"#,
    );

    let err = Orchestrator::build(&path).await.unwrap_err();
    assert!(err.to_string().contains("target.kind"));
}

#[tokio::test]
async fn load_clamps_non_positive_intervals() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
[api]
token = "glpat-test"

[target]
kind = "project"
reference = "12345"

[collector]
poll_interval_secs = 0
export_timeout_secs = 0
"#,
    );

    let config = VulnpostConfig::load(&path).await.unwrap();
    assert_eq!(config.collector.poll_interval_secs, 60);
    assert_eq!(config.collector.export_timeout_secs, 900);
}

#[tokio::test]
async fn state_file_path_reaches_collector_config() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    let path = write_config(
        &dir,
        &format!(
            r#"
[api]
token = "glpat-test"

[target]
kind = "group"
reference = "security-team"

[collector]
state_file = "{}"
"#,
            state_path.display()
        ),
    );

    let orchestrator = Orchestrator::build(&path).await.unwrap();
    assert_eq!(
        orchestrator.config().collector.state_file,
        state_path.display().to_string()
    );
}

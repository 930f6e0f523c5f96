use std::path::PathBuf;
use std::process::Output;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn profile_body() -> Value {
    json!({"id": "u-1", "app": {"nickname": {"value": "ferris"}}})
}

fn token_path(dir: &TempDir) -> PathBuf {
    dir.path().join("save").join("token.json")
}

fn write_token(dir: &TempDir, access: &str) {
    let path = token_path(dir);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, json!({"accessToken": access}).to_string()).unwrap();
}

fn read_token(dir: &TempDir) -> Value {
    serde_json::from_str(&std::fs::read_to_string(token_path(dir)).unwrap()).unwrap()
}

async fn mount_platforms(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/login/all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"name": "google", "authorizationUri": "https://auth.example/google"},
            {"name": "github", "authorizationUri": "https://auth.example/github"}
        ])))
        .expect(1)
        .mount(server)
        .await;
}

/// Login status is pending `pending` times, then yields `token`.
async fn mount_login_status(server: &MockServer, pending: u64, token: &str) {
    if pending > 0 {
        Mock::given(path("/login/external"))
            .respond_with(ResponseTemplate::new(404))
            .up_to_n_times(pending)
            .mount(server)
            .await;
    }
    Mock::given(path("/login/external"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"accessToken": token, "refreshToken": "rt"})),
        )
        .mount(server)
        .await;
}

async fn mount_profile(server: &MockServer, token: &str, response: ResponseTemplate) {
    Mock::given(path("/api/profile/me"))
        .and(header("authorization", format!("Bearer {token}").as_str()))
        .respond_with(response)
        .mount(server)
        .await;
}

async fn run_authboot(server: &MockServer, dir: &TempDir, extra: &[&str]) -> Output {
    let mut args = vec![
        "--server-url".to_string(),
        server.uri(),
        "--token-file".to_string(),
        token_path(dir).display().to_string(),
        "--poll-interval-ms".to_string(),
        "20".to_string(),
        "--no-browser".to_string(),
    ];
    args.extend(extra.iter().map(|s| s.to_string()));
    let cwd = dir.path().to_path_buf();

    tokio::task::spawn_blocking(move || {
        Command::cargo_bin("authboot")
            .unwrap()
            .current_dir(cwd)
            .env_remove("AUTHBOOT_LOG")
            .env_remove("AUTHBOOT_CONFIG")
            .args(args)
            .output()
            .unwrap()
    })
    .await
    .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[tokio::test(flavor = "multi_thread")]
async fn fresh_login_polls_persists_and_prints_profile() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_platforms(&server).await;
    mount_login_status(&server, 2, "fresh").await;
    mount_profile(&server, "fresh", ResponseTemplate::new(200).set_body_json(profile_body())).await;

    let output = run_authboot(&server, &dir, &[]).await;

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "u-1 ferris\n");
    assert!(stderr(&output).contains("https://auth.example/google"));
    assert!(predicate::str::contains("Login platforms: google, github").eval(&stderr(&output)));
    assert_eq!(read_token(&dir)["accessToken"], "fresh");
    assert_eq!(read_token(&dir)["refreshToken"], "rt");

    let requests = server.received_requests().await.unwrap();
    let polls = requests
        .iter()
        .filter(|r| r.url.path() == "/login/external")
        .count();
    assert_eq!(polls, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn cached_token_skips_external_login() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    write_token(&dir, "cached");
    Mock::given(path("/login/all"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    mount_profile(&server, "cached", ResponseTemplate::new(200).set_body_json(profile_body())).await;

    let output = run_authboot(&server, &dir, &[]).await;

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "u-1 ferris\n");
    assert_eq!(read_token(&dir)["accessToken"], "cached");
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_cached_token_falls_back_to_browser_login() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    write_token(&dir, "expired");
    mount_profile(&server, "expired", ResponseTemplate::new(401)).await;
    mount_platforms(&server).await;
    mount_login_status(&server, 0, "fresh").await;
    mount_profile(&server, "fresh", ResponseTemplate::new(200).set_body_json(profile_body())).await;

    let output = run_authboot(&server, &dir, &[]).await;

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "u-1 ferris\n");
    assert_eq!(read_token(&dir)["accessToken"], "fresh");
}

#[tokio::test(flavor = "multi_thread")]
async fn json_flag_prints_profile_summary() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    write_token(&dir, "cached");
    mount_profile(&server, "cached", ResponseTemplate::new(200).set_body_json(profile_body())).await;

    let output = run_authboot(&server, &dir, &["--json"]).await;

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let printed: Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(printed, json!({"id": "u-1", "nickname": "ferris"}));
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_profile_exits_with_error() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    write_token(&dir, "cached");
    mount_profile(
        &server,
        "cached",
        ResponseTemplate::new(200).set_body_json(json!({"id": "u-1", "app": {}})),
    )
    .await;

    let output = run_authboot(&server, &dir, &[]).await;

    assert!(!output.status.success());
    assert!(predicate::str::contains("unexpected profile payload").eval(&stderr(&output)));
}

#[tokio::test(flavor = "multi_thread")]
async fn poll_limit_exits_with_error() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_platforms(&server).await;
    Mock::given(path("/login/external"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;

    let output = run_authboot(&server, &dir, &["--max-attempts", "2"]).await;

    assert!(!output.status.success());
    assert!(stderr(&output).contains("did not complete after 2 polls"));
    assert!(!token_path(&dir).exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn logout_removes_cached_token() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    write_token(&dir, "cached");

    let output = run_authboot(&server, &dir, &["--logout"]).await;

    assert!(output.status.success());
    assert!(!token_path(&dir).exists());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_poll_settings_in_config_are_rejected() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("authboot.json");
    std::fs::write(&config, r#"{"max_attempts": 0}"#).unwrap();

    let output = run_authboot(&server, &dir, &["--config", config.to_str().unwrap()]).await;

    assert!(!output.status.success());
    assert!(stderr(&output).contains("max_attempts must be at least 1"));
    assert!(server.received_requests().await.unwrap().is_empty());
}

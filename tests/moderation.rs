//! Integration tests for the moderation endpoints: filtering behavior,
//! term administration, and blocklist hot reload.

mod common;

use common::{FakeRenderer, TestServer};
use serde_json::Value;
use std::sync::Arc;

async fn server() -> TestServer {
    TestServer::spawn(Arc::new(FakeRenderer::new(0))).await
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

async fn add_term(server: &TestServer, term: &str) {
    let resp = client()
        .post(server.url("/api/mod/add"))
        .bearer_auth(server.key("mod"))
        .json(&serde_json::json!({ "term": term }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

async fn filter(server: &TestServer, text: &str, mode: Option<&str>) -> Value {
    let mut url = format!("{}?text={}", server.url("/api/mod/test"), urlencode(text));
    if let Some(mode) = mode {
        url.push_str(&format!("&mode={mode}"));
    }
    let resp = client()
        .get(url)
        .bearer_auth(server.key("mod"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

fn urlencode(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{b:02X}"),
        })
        .collect()
}

#[tokio::test]
async fn test_urls_become_spoken_placeholder() {
    let server = server().await;
    let body = filter(&server, "check https://example.com/page out", None).await;
    assert_eq!(body["filtered"], "check [link] out");
    assert_eq!(body["urls"], 1);
}

#[tokio::test]
async fn test_leetspeak_variant_is_masked() {
    let server = server().await;
    add_term(&server, "badword").await;

    let body = filter(&server, "you b4dw0rd", None).await;
    assert_eq!(body["filtered"], "you b*****d");
    assert_eq!(body["terms"], 1);
}

#[tokio::test]
async fn test_wide_separators_do_not_match() {
    let server = server().await;
    add_term(&server, "badword").await;

    // Three or more separator characters break the match.
    let body = filter(&server, "bad   word", None).await;
    assert_eq!(body["terms"], 0);

    // Up to two still match.
    let body = filter(&server, "bad  word", None).await;
    assert_eq!(body["terms"], 1);
}

#[tokio::test]
async fn test_drop_mode_removes_and_collapses() {
    let server = server().await;
    add_term(&server, "badword").await;

    let body = filter(&server, "you badword friend", Some("drop")).await;
    assert_eq!(body["filtered"], "you friend");
    assert_eq!(body["terms"], 1);
}

#[tokio::test]
async fn test_emoji_are_stripped_and_counted() {
    let server = server().await;
    let body = filter(&server, "hi \u{1F600} there \u{1F680}", None).await;
    assert_eq!(body["filtered"], "hi there");
    assert_eq!(body["emojis"], 2);
}

#[tokio::test]
async fn test_term_admin_round_trip() {
    let server = server().await;
    add_term(&server, "evil").await;

    let resp = client()
        .get(server.url("/api/mod/list"))
        .bearer_auth(server.key("mod"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["terms"], serde_json::json!(["evil"]));

    let resp = client()
        .post(server.url("/api/mod/remove"))
        .bearer_auth(server.key("mod"))
        .json(&serde_json::json!({ "term": "evil" }))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["removed"], true);

    let body = filter(&server, "evil plan", None).await;
    assert_eq!(body["terms"], 0);
}

#[tokio::test]
async fn test_external_blocklist_edit_hot_reloads() {
    let server = server().await;
    add_term(&server, "first").await;

    // Edit the file behind the daemon's back and bump its mtime.
    let path = server.blocklist_path();
    std::fs::write(&path, "first\nsecond\n").unwrap();
    let later = std::time::SystemTime::now() + std::time::Duration::from_secs(2);
    filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(later)).unwrap();

    let body = filter(&server, "the second coming", None).await;
    assert_eq!(body["terms"], 1);
}

#[tokio::test]
async fn test_moderation_endpoints_require_mod_role() {
    let server = server().await;

    let resp = client()
        .get(server.url("/api/mod/list"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // The tts key is not enough; mod operations need the mod role.
    let resp = client()
        .get(server.url("/api/mod/list"))
        .bearer_auth(server.key("tts"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // Mod grants tts through the role tree, so a mod key can synthesize.
    let resp = client()
        .get(format!(
            "{}?text=hello&key={}",
            server.url("/api/tts"),
            server.key("mod")
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

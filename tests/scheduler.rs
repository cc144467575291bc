//! Integration tests for render scheduling, the audio cache, and the
//! speech queue.

mod common;

use common::{FakeRenderer, TestServer};
use crierd::error::Error;
use crierd::synth::SpeakRequest;
use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

fn request(text: &str) -> SpeakRequest {
    SpeakRequest {
        text: text.to_string(),
        format: Some("wav".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_concurrent_renders_bounded_by_permit_pool() {
    let fake = Arc::new(FakeRenderer::new(100));
    let server = TestServer::spawn(fake.clone()).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let state = server.state.clone();
        handles.push(tokio::spawn(async move {
            state.engine.speak(request(&format!("message {i}"))).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().expect("speak succeeds");
    }

    // Default permit pool is 2: more than that never ran at once, and the
    // load was real enough to need both permits.
    let max_seen = fake.max_seen.load(Ordering::SeqCst);
    assert!(max_seen <= 2, "saw {max_seen} concurrent renders");
    assert_eq!(max_seen, 2);
}

#[tokio::test]
async fn test_repeat_request_is_served_from_cache() {
    let fake = Arc::new(FakeRenderer::new(0));
    let server = TestServer::spawn(fake).await;

    let first = server.state.engine.speak(request("hello there")).await.unwrap();
    assert!(!first.meta.cached);

    let second = server.state.engine.speak(request("hello there")).await.unwrap();
    assert!(second.meta.cached);
    assert_eq!(first.audio, second.audio);
    assert_eq!(second.meta.render_ms, 0);
}

#[tokio::test]
async fn test_parameter_change_misses_cache() {
    let fake = Arc::new(FakeRenderer::new(0));
    let server = TestServer::spawn(fake).await;

    server.state.engine.speak(request("same text")).await.unwrap();
    let mut slower = request("same text");
    slower.params.length_scale = Some(1.4);
    let outcome = server.state.engine.speak(slower).await.unwrap();
    assert!(!outcome.meta.cached);
}

#[tokio::test]
async fn test_empty_text_rejected_before_render() {
    let fake = Arc::new(FakeRenderer::new(0));
    let server = TestServer::spawn(fake).await;

    let err = server.state.engine.speak(request("   ")).await.unwrap_err();
    assert!(matches!(err, Error::EmptyText));

    // Emoji-only input empties out during moderation.
    let err = server
        .state
        .engine
        .speak(request("\u{1F600}\u{1F680}"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EmptyText));
}

#[tokio::test]
async fn test_blocked_terms_dropped_from_spoken_text() {
    let fake = Arc::new(FakeRenderer::new(0));
    let server = TestServer::spawn_with(fake, |c| {
        let path = c.moderation.blocklist_path.clone().unwrap();
        std::fs::write(path, "badword\n").unwrap();
    })
    .await;

    let outcome = server
        .state
        .engine
        .speak(request("you badword friend"))
        .await
        .unwrap();
    assert_eq!(outcome.meta.flags.terms, 1);

    // The fake renderer echoes its input after the 44 header bytes: the
    // term is removed from the spoken text, not masked.
    let spoken = String::from_utf8_lossy(&outcome.audio[44..]).to_string();
    assert!(spoken.starts_with("you friend"), "spoke {spoken:?}");
    assert!(!spoken.contains('*'));
}

/// Entries in the system temp dir created by this daemon.
fn daemon_temp_entries() -> HashSet<PathBuf> {
    std::fs::read_dir(std::env::temp_dir())
        .unwrap()
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("crierd-"))
        })
        .collect()
}

// Both phases share the temp-dir scan, so they run in one test rather
// than racing each other's transient files.
#[tokio::test]
async fn test_render_pipeline_leaves_no_temp_files() {
    // Failure path: the batch concat dies because ffmpeg is absent.
    let fake = Arc::new(FakeRenderer::new(0));
    let server = TestServer::spawn_with(fake, |c| {
        c.synth.ffmpeg_bin = "/nonexistent/ffmpeg-binary".to_string();
    })
    .await;

    let before = daemon_temp_entries();
    let err = server
        .state
        .engine
        .speak_batch(request("part one [SFX: missing] part two"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RendererUnavailable(_)));
    let leaked: Vec<_> = daemon_temp_entries().difference(&before).cloned().collect();
    assert!(leaked.is_empty(), "temp files left after failed batch: {leaked:?}");

    // Success path: normalization soft-fails and the wav passes through.
    let fake = Arc::new(FakeRenderer::new(0));
    let server = TestServer::spawn_with(fake, |c| {
        c.synth.ffmpeg_bin = "/nonexistent/ffmpeg-binary".to_string();
        c.synth.normalize = true;
    })
    .await;

    let before = daemon_temp_entries();
    let outcome = server
        .state
        .engine
        .speak(request("hello cleanup"))
        .await
        .unwrap();
    assert!(!outcome.audio.is_empty());
    let leaked: Vec<_> = daemon_temp_entries().difference(&before).cloned().collect();
    assert!(leaked.is_empty(), "temp files left after fallback: {leaked:?}");
}

#[tokio::test]
async fn test_unknown_voice_falls_back_with_flag() {
    let fake = Arc::new(FakeRenderer::new(0));
    let server = TestServer::spawn(fake).await;

    let mut req = request("hello");
    req.voice = Some("does-not-exist".to_string());
    let outcome = server.state.engine.speak(req).await.unwrap();
    assert!(outcome.meta.voice_fallback);
    assert_eq!(outcome.meta.voice, "en_US-test-medium");
}

#[tokio::test]
async fn test_queue_fifo_over_http() {
    let server = TestServer::spawn(Arc::new(FakeRenderer::new(0))).await;

    for text in ["first", "second"] {
        let resp = client()
            .post(server.url("/api/push"))
            .bearer_auth(server.key("push"))
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    let resp = client()
        .get(server.url("/api/peek"))
        .bearer_auth(server.key("pull"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["item"]["text"], "first");
    assert_eq!(body["depth"], 2);

    let resp = client()
        .get(server.url("/api/pull"))
        .bearer_auth(server.key("pull"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["item"]["text"], "first");

    let resp = client()
        .get(server.url("/api/pull"))
        .bearer_auth(server.key("pull"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["item"]["text"], "second");

    let resp = client()
        .get(server.url("/api/pull"))
        .bearer_auth(server.key("pull"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert!(body["item"].is_null());
}

#[tokio::test]
async fn test_queue_delete_needs_mod_role() {
    let server = TestServer::spawn(Arc::new(FakeRenderer::new(0))).await;

    let resp = client()
        .post(server.url("/api/push"))
        .bearer_auth(server.key("push"))
        .json(&serde_json::json!({ "text": "to be removed" }))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    let id = body["id"].as_str().unwrap().to_string();

    // The push key cannot delete.
    let resp = client()
        .delete(server.url(&format!("/api/queue/{id}")))
        .bearer_auth(server.key("push"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client()
        .delete(server.url(&format!("/api/queue/{id}")))
        .bearer_auth(server.key("mod"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(server.state.queue.len(), 0);

    // Deleting again is a 404.
    let resp = client()
        .delete(server.url(&format!("/api/queue/{id}")))
        .bearer_auth(server.key("mod"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_tts_response_carries_metadata_headers() {
    let server = TestServer::spawn(Arc::new(FakeRenderer::new(0))).await;

    let resp = client()
        .get(format!(
            "{}?text=hello%20world&key={}",
            server.url("/api/tts"),
            server.key("tts")
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "audio/wav");
    assert_eq!(resp.headers()["x-cache"], "miss");
    assert_eq!(resp.headers()["x-voice"], "en_US-test-medium");
    assert_eq!(resp.headers()["x-request-id"].len(), 8);

    let resp = client()
        .get(format!(
            "{}?text=hello%20world&key={}",
            server.url("/api/tts"),
            server.key("tts")
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["x-cache"], "hit");
}

//! Shared test harness: spawns a full daemon on an ephemeral port with a
//! fake renderer, a temp voices/sounds tree, and an in-memory database.

// Not every test binary uses every helper.
#![allow(dead_code)]

use crierd::auth::identity::IdentityProvider;
use crierd::auth::roles::RoleTree;
use crierd::auth::{CapabilityResolver, SessionCodec, TokenSigner};
use crierd::config::Config;
use crierd::db::Database;
use crierd::error::Result;
use crierd::http::{self, AppState};
use crierd::moderation::Moderator;
use crierd::queue::SpeechQueue;
use crierd::secrets::Secrets;
use crierd::sfx::SfxLibrary;
use crierd::synth::SynthEngine;
use crierd::synth::renderer::{RenderParams, Renderer};
use crierd::synth::voices::{VoiceCatalog, VoiceInfo};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Renderer stand-in that fabricates WAV-sized output and tracks how many
/// renders ran at once.
pub struct FakeRenderer {
    active: AtomicUsize,
    pub max_seen: AtomicUsize,
    pub delay_ms: u64,
}

impl FakeRenderer {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            active: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
            delay_ms,
        }
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn render(
        &self,
        _voice: &VoiceInfo,
        text: &str,
        _params: &RenderParams,
    ) -> Result<Vec<u8>> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(tokio::time::Duration::from_millis(self.delay_ms)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        // 44 header bytes plus fake samples derived from the text.
        let mut wav = vec![0u8; 44];
        wav.extend(text.as_bytes());
        wav.extend_from_slice(b"samples");
        Ok(wav)
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<AppState>,
    pub secrets: Secrets,
    _tmp: TempDir,
}

impl TestServer {
    /// Spawn a daemon with auth enabled and the given fake renderer.
    pub async fn spawn(renderer: Arc<dyn Renderer>) -> TestServer {
        Self::spawn_with(renderer, |_| {}).await
    }

    /// Spawn with a config tweak hook applied before startup.
    pub async fn spawn_with(
        renderer: Arc<dyn Renderer>,
        tweak: impl FnOnce(&mut Config),
    ) -> TestServer {
        let tmp = tempfile::tempdir().expect("tempdir");
        let voices_dir = tmp.path().join("voices");
        let sounds_dir = tmp.path().join("sounds");
        std::fs::create_dir_all(&voices_dir).unwrap();
        std::fs::create_dir_all(&sounds_dir).unwrap();
        write_fake_voice(&voices_dir, "en_US-test-medium");

        let mut config = Config::default();
        config.server.listen = "127.0.0.1:0".parse().unwrap();
        config.database.path = ":memory:".to_string();
        config.auth.enabled = true;
        config.auth.secrets_file = tmp.path().join("secrets.toml").display().to_string();
        config.synth.voices_dir = voices_dir.display().to_string();
        config.synth.default_format = "wav".to_string();
        config.sfx.sounds_dir = sounds_dir.display().to_string();
        config.moderation.enabled = true;
        config.moderation.blocklist_path =
            Some(tmp.path().join("blocklist.txt").display().to_string());
        tweak(&mut config);

        let secrets = Secrets::ensure(&config.auth.secrets_file).expect("secrets");
        let db = Database::new(&config.database.path).await.expect("db");
        let tree = RoleTree::standard().expect("role tree");
        let resolver = CapabilityResolver::new(
            tree,
            secrets.static_keys(),
            TokenSigner::new(secrets.token_secret.as_bytes()),
            db.clone(),
            config.auth.enabled,
        );
        let session = SessionCodec::new(&secrets.session_secret);
        let signer = TokenSigner::new(secrets.token_secret.as_bytes());

        let catalog = Arc::new(VoiceCatalog::new(&config));
        let moderator = Arc::new(Moderator::new(&config.moderation).expect("moderator"));
        let sfx = Arc::new(SfxLibrary::new(&config.sfx.sounds_dir));
        let engine =
            SynthEngine::with_renderer(&config, catalog, moderator, sfx, renderer);

        let providers: HashMap<String, Arc<dyn IdentityProvider>> = HashMap::new();
        let state = Arc::new(AppState {
            config,
            db,
            resolver,
            session,
            signer,
            engine,
            queue: SpeechQueue::new(),
            providers,
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let app = http::router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        TestServer {
            addr,
            state,
            secrets,
            _tmp: tmp,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Static key for a role, from the generated secrets file.
    pub fn key(&self, role: &str) -> String {
        self.secrets.keys[role].clone()
    }

    pub fn sounds_dir(&self) -> std::path::PathBuf {
        self._tmp.path().join("sounds")
    }

    pub fn blocklist_path(&self) -> std::path::PathBuf {
        self._tmp.path().join("blocklist.txt")
    }
}

fn write_fake_voice(dir: &std::path::Path, id: &str) {
    std::fs::write(dir.join(format!("{id}.onnx")), b"model").unwrap();
    std::fs::write(
        dir.join(format!("{id}.onnx.json")),
        r#"{"audio":{"sample_rate":22050},"num_speakers":1,"language":{"code":"en_US"}}"#,
    )
    .unwrap();
}

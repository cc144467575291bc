//! crierd - stream-overlay text-to-speech daemon.

use crierd::auth::identity::{IdentityProvider, TwitchProvider};
use crierd::auth::roles::RoleTree;
use crierd::auth::{CapabilityResolver, SessionCodec, TokenSigner};
use crierd::config::Config;
use crierd::db::Database;
use crierd::http::{self, AppState};
use crierd::moderation::Moderator;
use crierd::queue::SpeechQueue;
use crierd::secrets::Secrets;
use crierd::sfx::SfxLibrary;
use crierd::synth::SynthEngine;
use crierd::synth::voices::VoiceCatalog;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    info!(
        server = %config.server.name,
        listen = %config.server.listen,
        "Starting crierd"
    );

    crierd::metrics::init();

    let secrets = Secrets::ensure(&config.auth.secrets_file)?;
    if !config.auth.enabled {
        warn!("authorization is disabled; every capability check passes");
    }

    let db = Database::new(&config.database.path).await?;
    let tree = RoleTree::standard()?;
    let signer = TokenSigner::new(secrets.token_secret.as_bytes());
    let resolver = CapabilityResolver::new(
        tree,
        secrets.static_keys(),
        TokenSigner::new(secrets.token_secret.as_bytes()),
        db.clone(),
        config.auth.enabled,
    );
    let session = SessionCodec::new(&secrets.session_secret);

    let catalog = Arc::new(VoiceCatalog::new(&config));
    if catalog.list().is_empty() {
        warn!(dir = %config.synth.voices_dir, "no voice models found");
    }
    let moderator = Arc::new(Moderator::new(&config.moderation)?);
    let sfx = Arc::new(SfxLibrary::new(&config.sfx.sounds_dir));
    let engine = SynthEngine::new(&config, catalog, moderator, sfx);

    let mut providers: HashMap<String, Arc<dyn IdentityProvider>> = HashMap::new();
    for (name, provider_cfg) in &config.identity {
        match name.as_str() {
            "twitch" => {
                providers.insert(
                    name.clone(),
                    Arc::new(TwitchProvider::new(provider_cfg.clone())),
                );
            }
            other => warn!(provider = %other, "unknown identity provider, skipping"),
        }
    }

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

    http::serve(state).await
}

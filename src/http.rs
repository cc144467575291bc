//! HTTP API surface.
//!
//! All functionality is exposed under `/api/*`, with `/healthz` for
//! liveness probes and `/metrics` for Prometheus scraping. Handlers stay
//! thin: decode, authorize via the capability resolver, delegate to the
//! engine/queue/registry, encode.

use crate::auth::identity::{IdentityProvider, mapped_role};
use crate::auth::roles::Role;
use crate::auth::session::SessionCodec;
use crate::auth::token::Claims;
use crate::auth::{CapabilityResolver, SessionGrants, TokenSigner};
use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::metrics;
use crate::moderation::CensorMode;
use crate::queue::SpeechQueue;
use crate::synth::renderer::RenderParams;
use crate::synth::{SpeakMeta, SpeakRequest, SynthEngine};
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, ORIGIN, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{delete, get, post};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Everything handlers need, shared behind one `Arc`.
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub resolver: CapabilityResolver,
    pub session: SessionCodec,
    pub signer: TokenSigner,
    pub engine: SynthEngine,
    pub queue: SpeechQueue,
    pub providers: HashMap<String, Arc<dyn IdentityProvider>>,
}

type Shared = Arc<AppState>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            metrics::record_auth_failure(self.error_code());
        }
        let body = json!({
            "error": self.error_code(),
            "detail": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

/// Build the full API router.
pub fn router(state: Shared) -> Router {
    Router::new()
        .route("/api/tts", get(tts_get).post(tts_post))
        .route("/api/tts_batch", post(tts_batch))
        .route("/api/voices", get(list_voices))
        .route("/api/presets", get(list_presets))
        .route("/api/reload", post(reload_all))
        .route("/api/aliases", get(list_aliases).post(set_alias))
        .route("/api/aliases/:alias", delete(delete_alias))
        .route("/api/sounds", get(list_sounds))
        .route("/api/sfx_aliases", get(list_sfx_aliases).post(set_sfx_alias))
        .route("/api/sfx_aliases/:alias", delete(delete_sfx_alias))
        .route("/api/mod/list", get(mod_list))
        .route("/api/mod/add", post(mod_add))
        .route("/api/mod/remove", post(mod_remove))
        .route("/api/mod/reload", post(mod_reload))
        .route("/api/mod/test", get(mod_test))
        .route("/api/push", post(queue_push))
        .route("/api/pull", get(queue_pull))
        .route("/api/peek", get(queue_peek))
        .route("/api/queue/:id", delete(queue_delete))
        .route("/api/panel/login", post(panel_login))
        .route("/api/panel/logout", post(panel_logout))
        .route("/api/panel/status", get(panel_status))
        .route("/api/overlay", get(overlay_resolve))
        .route("/api/overlay/token", post(mint_token))
        .route("/api/overlay/tokens", get(list_tokens))
        .route("/api/overlay/token/:jti", delete(revoke_token))
        .route("/api/overlay/embed", post(create_embed))
        .route("/api/overlay/embed/:id", delete(delete_embed))
        .route("/api/overlay/embeds", get(list_embeds))
        .route("/api/auth/login", get(auth_login))
        .route("/api/auth/callback", get(auth_callback))
        .route("/api/auth/me", get(auth_me))
        .route("/api/auth/mappings", get(list_mappings).post(set_mapping))
        .route("/api/auth/mappings/:provider/:remote_id", delete(delete_mapping))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(state: Shared) -> anyhow::Result<()> {
    let addr = state.config.server.listen;
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// ==========================================================================
// Credential plumbing
// ==========================================================================

fn session_from(state: &AppState, headers: &HeaderMap) -> SessionGrants {
    let Some(cookie_header) = headers.get(COOKIE).and_then(|v| v.to_str().ok()) else {
        return SessionGrants::none();
    };
    let wanted = &state.config.auth.cookie_name;
    for pair in cookie_header.split(';') {
        if let Some((name, value)) = pair.trim().split_once('=') {
            if name == wanted {
                return state.session.decode(value, chrono::Utc::now().timestamp());
            }
        }
    }
    SessionGrants::none()
}

fn bearer_from(headers: &HeaderMap, key_param: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }
    if let Some(value) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(value.trim().to_string());
    }
    key_param.map(str::to_string)
}

async fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    key_param: Option<&str>,
    role: Role,
) -> Result<()> {
    let session = session_from(state, headers);
    let bearer = bearer_from(headers, key_param);
    state.resolver.require(role, &session, bearer.as_deref()).await
}

fn set_cookie_header(state: &AppState, value: &str) -> String {
    format!(
        "{}={value}; Path=/; HttpOnly; SameSite=Lax",
        state.config.auth.cookie_name
    )
}

// ==========================================================================
// Synthesis
// ==========================================================================

#[derive(Debug, Deserialize, Default)]
struct TtsParams {
    text: Option<String>,
    voice: Option<String>,
    format: Option<String>,
    preset: Option<String>,
    speaker: Option<u32>,
    length_scale: Option<f32>,
    noise_scale: Option<f32>,
    noise_w: Option<f32>,
    sentence_silence: Option<f32>,
    normalize: Option<bool>,
    mode: Option<String>,
    key: Option<String>,
}

impl TtsParams {
    fn into_request(self) -> Result<SpeakRequest> {
        let censor_mode = match self.mode.as_deref() {
            None => None,
            Some(m) => Some(
                CensorMode::parse(m)
                    .ok_or_else(|| Error::BadRequest(format!("unknown mode: {m}")))?,
            ),
        };
        Ok(SpeakRequest {
            text: self.text.unwrap_or_default(),
            voice: self.voice,
            format: self.format,
            preset: self.preset,
            params: RenderParams {
                speaker: self.speaker,
                length_scale: self.length_scale,
                noise_scale: self.noise_scale,
                noise_w: self.noise_w,
                sentence_silence: self.sentence_silence,
            },
            censor_mode,
            normalize: self.normalize,
        })
    }
}

fn audio_response(audio: bytes::Bytes, content_type: &'static str, meta: &SpeakMeta) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type)
        .header("x-request-id", &meta.request_id)
        .header("x-voice", &meta.voice)
        .header("x-voice-fallback", meta.voice_fallback.to_string())
        .header("x-cache", if meta.cached { "hit" } else { "miss" })
        .header("x-render-ms", meta.render_ms.to_string())
        .header("x-mod-urls", meta.flags.urls.to_string())
        .header("x-mod-emojis", meta.flags.emojis.to_string())
        .header("x-mod-terms", meta.flags.terms.to_string());
    if let Some(requested) = &meta.requested_voice {
        builder = builder.header("x-voice-requested", requested);
    }
    if let Some(preset) = &meta.preset {
        builder = builder.header("x-preset", preset);
    }
    builder
        .body(axum::body::Body::from(audio))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn tts_get(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<TtsParams>,
) -> Result<Response> {
    authorize(&state, &headers, params.key.as_deref(), Role::Tts).await?;
    let outcome = state.engine.speak(params.into_request()?).await?;
    Ok(audio_response(outcome.audio, outcome.content_type, &outcome.meta))
}

async fn tts_post(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(params): Json<TtsParams>,
) -> Result<Response> {
    authorize(&state, &headers, params.key.as_deref(), Role::Tts).await?;
    let outcome = state.engine.speak(params.into_request()?).await?;
    Ok(audio_response(outcome.audio, outcome.content_type, &outcome.meta))
}

async fn tts_batch(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(params): Json<TtsParams>,
) -> Result<Response> {
    authorize(&state, &headers, params.key.as_deref(), Role::Tts).await?;
    let outcome = state.engine.speak_batch(params.into_request()?).await?;

    let mut response = audio_response(outcome.audio, outcome.content_type, &outcome.meta);
    let skipped: Vec<String> = outcome
        .report
        .unresolved
        .iter()
        .chain(outcome.report.over_cap.iter())
        .cloned()
        .collect();
    if !skipped.is_empty() {
        if let Ok(value) = skipped.join(",").parse() {
            response.headers_mut().insert("x-skipped-sounds", value);
        }
    }
    Ok(response)
}

// ==========================================================================
// Catalog and library
// ==========================================================================

async fn list_voices(State(state): State<Shared>, headers: HeaderMap) -> Result<Response> {
    authorize(&state, &headers, None, Role::Pull).await?;
    let voices: Vec<_> = state
        .engine
        .catalog()
        .list()
        .into_iter()
        .map(|v| {
            json!({
                "id": v.id,
                "sample_rate": v.sample_rate,
                "speakers": v.speakers,
                "language": v.language,
            })
        })
        .collect();
    Ok(Json(json!({ "voices": voices })).into_response())
}

async fn list_presets(State(state): State<Shared>, headers: HeaderMap) -> Result<Response> {
    authorize(&state, &headers, None, Role::Pull).await?;
    let presets: HashMap<&String, _> = state
        .config
        .presets
        .iter()
        .map(|(name, p)| {
            (
                name,
                json!({
                    "length_scale": p.length_scale,
                    "noise_scale": p.noise_scale,
                    "noise_w": p.noise_w,
                    "sentence_silence": p.sentence_silence,
                }),
            )
        })
        .collect();
    Ok(Json(json!({ "presets": presets })).into_response())
}

async fn reload_all(State(state): State<Shared>, headers: HeaderMap) -> Result<Response> {
    authorize(&state, &headers, None, Role::Admin).await?;
    let voices = state.engine.catalog().reload();
    let sounds = state.engine.sfx().reload();
    let terms = match state.engine.moderator().reload_terms() {
        Ok(n) => Some(n),
        Err(Error::ModerationDisabled) => None,
        Err(e) => return Err(e),
    };
    state.engine.clear_cache();
    info!(voices, sounds, "reloaded catalogs");
    Ok(Json(json!({ "voices": voices, "sounds": sounds, "terms": terms })).into_response())
}

#[derive(Deserialize)]
struct AliasBody {
    alias: String,
    target: String,
}

async fn list_aliases(State(state): State<Shared>, headers: HeaderMap) -> Result<Response> {
    authorize(&state, &headers, None, Role::Pull).await?;
    let aliases: HashMap<String, String> = state.engine.catalog().aliases().into_iter().collect();
    Ok(Json(json!({ "aliases": aliases })).into_response())
}

async fn set_alias(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<AliasBody>,
) -> Result<Response> {
    authorize(&state, &headers, None, Role::Admin).await?;
    state.engine.catalog().set_alias(&body.alias, &body.target)?;
    Ok(Json(json!({ "ok": true })).into_response())
}

async fn delete_alias(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(alias): Path<String>,
) -> Result<Response> {
    authorize(&state, &headers, None, Role::Admin).await?;
    if !state.engine.catalog().remove_alias(&alias) {
        return Err(Error::NotFound(format!("alias: {alias}")));
    }
    Ok(Json(json!({ "ok": true })).into_response())
}

async fn list_sounds(State(state): State<Shared>, headers: HeaderMap) -> Result<Response> {
    authorize(&state, &headers, None, Role::Pull).await?;
    Ok(Json(json!({ "sounds": state.engine.sfx().list() })).into_response())
}

async fn list_sfx_aliases(State(state): State<Shared>, headers: HeaderMap) -> Result<Response> {
    authorize(&state, &headers, None, Role::Pull).await?;
    let aliases: HashMap<String, String> = state.engine.sfx().aliases().into_iter().collect();
    Ok(Json(json!({ "aliases": aliases })).into_response())
}

async fn set_sfx_alias(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<AliasBody>,
) -> Result<Response> {
    authorize(&state, &headers, None, Role::Admin).await?;
    state.engine.sfx().set_alias(&body.alias, &body.target)?;
    Ok(Json(json!({ "ok": true })).into_response())
}

async fn delete_sfx_alias(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(alias): Path<String>,
) -> Result<Response> {
    authorize(&state, &headers, None, Role::Admin).await?;
    if !state.engine.sfx().remove_alias(&alias) {
        return Err(Error::NotFound(format!("alias: {alias}")));
    }
    Ok(Json(json!({ "ok": true })).into_response())
}

// ==========================================================================
// Moderation administration
// ==========================================================================

#[derive(Deserialize)]
struct TermBody {
    term: String,
}

async fn mod_list(State(state): State<Shared>, headers: HeaderMap) -> Result<Response> {
    authorize(&state, &headers, None, Role::Mod).await?;
    Ok(Json(json!({ "terms": state.engine.moderator().list_terms()? })).into_response())
}

async fn mod_add(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<TermBody>,
) -> Result<Response> {
    authorize(&state, &headers, None, Role::Mod).await?;
    let added = state.engine.moderator().add_term(&body.term)?;
    Ok(Json(json!({ "added": added })).into_response())
}

async fn mod_remove(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<TermBody>,
) -> Result<Response> {
    authorize(&state, &headers, None, Role::Mod).await?;
    let removed = state.engine.moderator().remove_term(&body.term)?;
    Ok(Json(json!({ "removed": removed })).into_response())
}

async fn mod_reload(State(state): State<Shared>, headers: HeaderMap) -> Result<Response> {
    authorize(&state, &headers, None, Role::Mod).await?;
    let terms = state.engine.moderator().reload_terms()?;
    Ok(Json(json!({ "terms": terms })).into_response())
}

#[derive(Deserialize)]
struct ModTestParams {
    text: String,
    mode: Option<String>,
}

async fn mod_test(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<ModTestParams>,
) -> Result<Response> {
    authorize(&state, &headers, None, Role::Mod).await?;
    let mode = match params.mode.as_deref() {
        None => CensorMode::Mask,
        Some(m) => CensorMode::parse(m)
            .ok_or_else(|| Error::BadRequest(format!("unknown mode: {m}")))?,
    };
    let (filtered, flags) = state.engine.moderator().filter(&params.text, mode);
    Ok(Json(json!({
        "filtered": filtered,
        "urls": flags.urls,
        "emojis": flags.emojis,
        "terms": flags.terms,
    }))
    .into_response())
}

// ==========================================================================
// Speech queue
// ==========================================================================

#[derive(Deserialize)]
struct PushBody {
    text: String,
    voice: Option<String>,
}

async fn queue_push(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<PushBody>,
) -> Result<Response> {
    authorize(&state, &headers, None, Role::Push).await?;
    let item = state.queue.push(body.text, body.voice)?;
    Ok(Json(json!({ "id": item.id, "depth": state.queue.len() })).into_response())
}

async fn queue_pull(State(state): State<Shared>, headers: HeaderMap) -> Result<Response> {
    authorize(&state, &headers, None, Role::Pull).await?;
    match state.queue.pull() {
        Some(item) => Ok(Json(json!({ "item": item })).into_response()),
        None => Ok(Json(json!({ "item": null })).into_response()),
    }
}

async fn queue_peek(State(state): State<Shared>, headers: HeaderMap) -> Result<Response> {
    authorize(&state, &headers, None, Role::Pull).await?;
    Ok(Json(json!({ "item": state.queue.peek(), "depth": state.queue.len() })).into_response())
}

async fn queue_delete(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response> {
    authorize(&state, &headers, None, Role::Mod).await?;
    if !state.queue.delete(&id) {
        return Err(Error::NotFound(format!("queue item: {id}")));
    }
    Ok(Json(json!({ "ok": true })).into_response())
}

// ==========================================================================
// Panel sessions
// ==========================================================================

#[derive(Deserialize)]
struct PanelLoginBody {
    role: String,
    key: String,
}

async fn panel_login(
    State(state): State<Shared>,
    Json(body): Json<PanelLoginBody>,
) -> Result<Response> {
    let role = Role::parse(&body.role)
        .ok_or_else(|| Error::BadRequest(format!("unknown role: {}", body.role)))?;
    if !state.resolver.verify_key(role, &body.key) {
        warn!(role = %role, "panel login rejected");
        return Err(Error::Unauthorized);
    }

    let grants = SessionGrants::of(&[role]);
    let cookie = state.session.encode(grants, chrono::Utc::now().timestamp());
    let expanded: Vec<&str> = state.resolver.expand(grants.0).iter().map(|r| r.name()).collect();
    info!(role = %role, "panel login");
    Ok((
        [(SET_COOKIE, set_cookie_header(&state, &cookie))],
        Json(json!({ "role": role.name(), "grants": expanded })),
    )
        .into_response())
}

async fn panel_logout(State(state): State<Shared>) -> Response {
    (
        [(
            SET_COOKIE,
            format!("{}=; Path=/; HttpOnly; Max-Age=0", state.config.auth.cookie_name),
        )],
        Json(json!({ "ok": true })),
    )
        .into_response()
}

async fn panel_status(State(state): State<Shared>, headers: HeaderMap) -> Result<Response> {
    let session = session_from(&state, &headers);
    let bearer = bearer_from(&headers, None);
    let effective = state.resolver.effective(&session, bearer.as_deref()).await;
    let roles: Vec<&str> = effective.iter().map(|r| r.name()).collect();
    Ok(Json(json!({
        "enabled": state.resolver.enabled(),
        "roles": roles,
    }))
    .into_response())
}

// ==========================================================================
// Capability tokens and overlay embeds
// ==========================================================================

#[derive(Deserialize)]
struct MintTokenBody {
    roles: Vec<String>,
    ttl_secs: i64,
    #[serde(default)]
    note: String,
}

async fn mint_token(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<MintTokenBody>,
) -> Result<Response> {
    authorize(&state, &headers, None, Role::Admin).await?;
    if body.ttl_secs <= 0 {
        return Err(Error::BadRequest("ttl_secs must be positive".to_string()));
    }
    let roles: Vec<Role> = body
        .roles
        .iter()
        .map(|n| Role::parse(n).ok_or_else(|| Error::BadRequest(format!("unknown role: {n}"))))
        .collect::<Result<_>>()?;
    if roles.is_empty() {
        return Err(Error::BadRequest("at least one role required".to_string()));
    }

    let now = chrono::Utc::now().timestamp();
    let jti = Uuid::new_v4().simple().to_string();
    let expires = now + body.ttl_secs;
    state
        .db
        .tokens()
        .insert(&jti, &roles, expires, "admin", now, &body.note)
        .await?;

    let claims = Claims {
        iss: state.config.server.name.clone(),
        iat: now,
        exp: expires,
        jti: jti.clone(),
        roles: roles.iter().map(|r| r.name().to_string()).collect(),
    };
    let token = state.signer.sign(&claims);
    info!(jti = %jti, expires, "minted capability token");
    Ok(Json(json!({ "token": token, "jti": jti, "expires": expires })).into_response())
}

async fn list_tokens(State(state): State<Shared>, headers: HeaderMap) -> Result<Response> {
    authorize(&state, &headers, None, Role::Admin).await?;
    let tokens: Vec<_> = state
        .db
        .tokens()
        .list()
        .await?
        .into_iter()
        .map(|t| {
            json!({
                // Truncated so a listing leak cannot be replayed.
                "jti": truncate_jti(&t.jti),
                "roles": t.roles.iter().map(|r| r.name()).collect::<Vec<_>>(),
                "expires": t.expires,
                "created_at": t.created_at,
                "revoked": t.revoked,
                "note": t.note,
            })
        })
        .collect();
    Ok(Json(json!({ "tokens": tokens })).into_response())
}

async fn revoke_token(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(jti): Path<String>,
) -> Result<Response> {
    authorize(&state, &headers, None, Role::Admin).await?;
    // Exact match first; a truncated id from the listing revokes by prefix.
    let revoked = if state.db.tokens().revoke(&jti).await? {
        true
    } else {
        let prefix = jti.trim_end_matches('.');
        if prefix.is_empty() {
            return Err(Error::NotFound(format!("token: {jti}")));
        }
        state.db.tokens().revoke_prefix(prefix).await?
    };
    if !revoked {
        return Err(Error::NotFound(format!("token: {jti}")));
    }
    info!(jti = %jti, "revoked capability token");
    Ok(Json(json!({ "ok": true })).into_response())
}

#[derive(Deserialize)]
struct EmbedBody {
    jti: String,
    #[serde(default)]
    note: String,
    origin: Option<String>,
}

async fn create_embed(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<EmbedBody>,
) -> Result<Response> {
    authorize(&state, &headers, None, Role::Admin).await?;
    if state.db.tokens().get(&body.jti).await?.is_none() {
        return Err(Error::NotFound(format!("token: {}", body.jti)));
    }
    let embed_id = Uuid::new_v4().simple().to_string()[..12].to_string();
    let now = chrono::Utc::now().timestamp();
    state
        .db
        .embeds()
        .insert(&embed_id, &body.jti, now, &body.note, body.origin.as_deref())
        .await?;
    info!(embed_id = %embed_id, jti = %body.jti, "created overlay embed");
    Ok(Json(json!({
        "embed_id": embed_id,
        "url": format!("/api/overlay?embed={embed_id}"),
    }))
    .into_response())
}

async fn delete_embed(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response> {
    authorize(&state, &headers, None, Role::Admin).await?;
    if !state.db.embeds().delete(&id).await? {
        return Err(Error::NotFound(format!("embed: {id}")));
    }
    Ok(Json(json!({ "ok": true })).into_response())
}

async fn list_embeds(State(state): State<Shared>, headers: HeaderMap) -> Result<Response> {
    authorize(&state, &headers, None, Role::Admin).await?;
    let embeds: Vec<_> = state
        .db
        .embeds()
        .list()
        .await?
        .into_iter()
        .map(|e| {
            json!({
                "embed_id": e.embed_id,
                "jti": truncate_jti(&e.jti),
                "created_at": e.created_at,
                "note": e.note,
                "origin": e.origin,
            })
        })
        .collect();
    Ok(Json(json!({ "embeds": embeds })).into_response())
}

#[derive(Deserialize)]
struct OverlayParams {
    embed: String,
}

/// Resolve an embed id into a fresh capability token for the overlay page.
///
/// Origin binding is exact-match and fail-closed: if the embed records an
/// origin, a request without a matching `Origin` header is rejected.
async fn overlay_resolve(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<OverlayParams>,
) -> Result<Response> {
    let embed = state
        .db
        .embeds()
        .get(&params.embed)
        .await?
        .ok_or_else(|| Error::NotFound(format!("embed: {}", params.embed)))?;

    if let Some(expected) = &embed.origin {
        let presented = headers.get(ORIGIN).and_then(|v| v.to_str().ok());
        if presented != Some(expected.as_str()) {
            warn!(embed_id = %embed.embed_id, "overlay origin mismatch");
            return Err(Error::OriginMismatch);
        }
    }

    let now = chrono::Utc::now().timestamp();
    // Fail closed: an embed whose token vanished from the registry is dead.
    let record = state
        .db
        .tokens()
        .get(&embed.jti)
        .await?
        .ok_or(Error::Unauthorized)?;
    if record.revoked {
        return Err(Error::TokenRevoked);
    }
    if record.expires < now {
        return Err(Error::TokenExpired);
    }

    let claims = Claims {
        iss: state.config.server.name.clone(),
        iat: now,
        exp: record.expires,
        jti: record.jti.clone(),
        roles: record.roles.iter().map(|r| r.name().to_string()).collect(),
    };
    let token = state.signer.sign(&claims);
    Ok(Json(json!({
        "token": token,
        "expires": record.expires,
        "roles": record.roles.iter().map(|r| r.name()).collect::<Vec<_>>(),
    }))
    .into_response())
}

fn truncate_jti(jti: &str) -> String {
    if jti.len() > 6 {
        format!("{}...", &jti[..6])
    } else {
        jti.to_string()
    }
}

// ==========================================================================
// External identity
// ==========================================================================

#[derive(Deserialize)]
struct ProviderParams {
    provider: String,
}

async fn auth_login(
    State(state): State<Shared>,
    Query(params): Query<ProviderParams>,
) -> Result<Response> {
    let provider = state
        .providers
        .get(&params.provider)
        .ok_or_else(|| Error::NotFound(format!("provider: {}", params.provider)))?;
    Ok(Redirect::temporary(&provider.authorize_url()).into_response())
}

#[derive(Deserialize)]
struct CallbackParams {
    provider: String,
    code: String,
}

async fn auth_callback(
    State(state): State<Shared>,
    Query(params): Query<CallbackParams>,
) -> Result<Response> {
    let provider = state
        .providers
        .get(&params.provider)
        .ok_or_else(|| Error::NotFound(format!("provider: {}", params.provider)))?;
    let identity = provider.exchange(&params.code).await?;
    let role = mapped_role(&state.db, provider.name(), &identity).await?;
    info!(
        provider = %provider.name(),
        login = %identity.login,
        role = role.map(|r| r.name()).unwrap_or("none"),
        "identity login"
    );

    let Some(role) = role else {
        // Authenticated but unmapped: no grants, no cookie.
        return Ok(Json(json!({ "login": identity.login, "role": null })).into_response());
    };

    let grants = SessionGrants::of(&[role]);
    let cookie = state.session.encode(grants, chrono::Utc::now().timestamp());
    Ok((
        [(SET_COOKIE, set_cookie_header(&state, &cookie))],
        Json(json!({ "login": identity.login, "role": role.name() })),
    )
        .into_response())
}

async fn auth_me(State(state): State<Shared>, headers: HeaderMap) -> Result<Response> {
    let session = session_from(&state, &headers);
    let roles: Vec<&str> = state
        .resolver
        .expand(session.0)
        .iter()
        .map(|r| r.name())
        .collect();
    Ok(Json(json!({ "roles": roles })).into_response())
}

#[derive(Deserialize)]
struct MappingBody {
    provider: String,
    remote_id: String,
    role: String,
}

async fn list_mappings(State(state): State<Shared>, headers: HeaderMap) -> Result<Response> {
    authorize(&state, &headers, None, Role::Admin).await?;
    let mappings: Vec<_> = state
        .db
        .mappings()
        .list()
        .await?
        .into_iter()
        .map(|(provider, remote_id, role)| {
            json!({ "provider": provider, "remote_id": remote_id, "role": role })
        })
        .collect();
    Ok(Json(json!({ "mappings": mappings })).into_response())
}

async fn set_mapping(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<MappingBody>,
) -> Result<Response> {
    authorize(&state, &headers, None, Role::Admin).await?;
    let role = Role::parse(&body.role)
        .ok_or_else(|| Error::BadMapping(format!("unknown role: {}", body.role)))?;
    if body.remote_id.trim().is_empty() {
        return Err(Error::BadMapping("empty remote id".to_string()));
    }
    state
        .db
        .mappings()
        .set(&body.provider, body.remote_id.trim(), role)
        .await?;
    Ok(Json(json!({ "ok": true })).into_response())
}

async fn delete_mapping(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path((provider, remote_id)): Path<(String, String)>,
) -> Result<Response> {
    authorize(&state, &headers, None, Role::Admin).await?;
    if !state.db.mappings().delete(&provider, &remote_id).await? {
        return Err(Error::NotFound(format!("mapping: {provider}/{remote_id}")));
    }
    Ok(Json(json!({ "ok": true })).into_response())
}

// ==========================================================================
// Health and metrics
// ==========================================================================

async fn healthz(State(state): State<Shared>) -> Response {
    Json(json!({
        "status": "ok",
        "queue_depth": state.queue.len(),
        "cache_entries": state.engine.cache_len(),
    }))
    .into_response()
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}

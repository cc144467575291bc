//! Unified error handling for crierd.
//!
//! One taxonomy covers the whole request pipeline: authorization,
//! moderation, synthesis, and admin input validation. Each variant maps to
//! a static code for metric labeling and to an HTTP status for the API
//! layer. Soft-fail conditions (normalize/transcode tool missing) never
//! appear here: those are swallowed with fallback at the call site.

use crate::db::DbError;
use thiserror::Error;

/// Errors surfaced by the synthesis and authorization pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// No credential source grants the required role.
    #[error("unauthorized")]
    Unauthorized,

    /// A capability token was presented but its own expiry has elapsed.
    /// Still a 401, but distinguishable so clients can prompt a refresh
    /// instead of a re-login.
    #[error("token expired")]
    TokenExpired,

    /// The registry marks the presented token's jti as revoked.
    #[error("token revoked")]
    TokenRevoked,

    /// An origin-bound embed was requested from a different (or absent)
    /// origin.
    #[error("origin mismatch")]
    OriginMismatch,

    /// Moderation was invoked while the engine is disabled.
    #[error("moderation disabled")]
    ModerationDisabled,

    /// The external renderer binary is missing. Fatal for synthesis.
    #[error("renderer unavailable: {0}")]
    RendererUnavailable(String),

    /// The renderer ran but did not produce usable output.
    #[error("renderer failed: {0}")]
    RendererFailed(String),

    /// A render produced an artifact at or below the minimal valid size.
    #[error("empty audio")]
    EmptyAudio,

    /// A batch resolved to zero usable segments after skipping.
    #[error("empty batch")]
    EmptyBatch,

    /// Request text was empty before or after moderation.
    #[error("empty text")]
    EmptyText,

    /// Admin supplied an alias name or target that does not validate.
    #[error("bad alias: {0}")]
    BadAlias(String),

    /// Admin supplied an identity mapping that does not validate.
    #[error("bad mapping: {0}")]
    BadMapping(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::TokenExpired => "token_expired",
            Self::TokenRevoked => "token_revoked",
            Self::OriginMismatch => "origin_mismatch",
            Self::ModerationDisabled => "moderation_disabled",
            Self::RendererUnavailable(_) => "renderer_unavailable",
            Self::RendererFailed(_) => "renderer_failed",
            Self::EmptyAudio => "empty_audio",
            Self::EmptyBatch => "empty_batch",
            Self::EmptyText => "empty_text",
            Self::BadAlias(_) => "bad_alias",
            Self::BadMapping(_) => "bad_mapping",
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Db(_) => "db_error",
            Self::Io(_) => "io_error",
        }
    }

    /// HTTP status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            Self::Unauthorized | Self::TokenExpired | Self::TokenRevoked => 401,
            Self::OriginMismatch => 403,
            Self::NotFound(_) => 404,
            Self::ModerationDisabled
            | Self::EmptyBatch
            | Self::EmptyText
            | Self::BadAlias(_)
            | Self::BadMapping(_)
            | Self::BadRequest(_) => 400,
            Self::RendererUnavailable(_)
            | Self::RendererFailed(_)
            | Self::EmptyAudio
            | Self::Db(_)
            | Self::Io(_) => 500,
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Unauthorized.error_code(), "unauthorized");
        assert_eq!(Error::TokenExpired.error_code(), "token_expired");
        assert_eq!(Error::EmptyAudio.error_code(), "empty_audio");
    }

    #[test]
    fn test_status_mapping() {
        // All three auth failures are 401; only the code distinguishes them.
        assert_eq!(Error::Unauthorized.status(), 401);
        assert_eq!(Error::TokenExpired.status(), 401);
        assert_eq!(Error::TokenRevoked.status(), 401);
        assert_eq!(Error::OriginMismatch.status(), 403);
        assert_eq!(Error::ModerationDisabled.status(), 400);
        assert_eq!(Error::RendererUnavailable("piper".into()).status(), 500);
    }
}

//! Configuration loader
//!
//! Loads the relying-party configuration from environment variables or
//! files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If the result is not a usable configuration, falls back to a file
//! 3. Probes `authrelay.{toml,json}` and `config.{toml,json}` in the
//!    working directory and one level up
//!
//! ## Environment Variables
//! Every `AUTHRELAY_*` variable overrides the corresponding field of the
//! default configuration; unset variables keep their defaults. The
//! variable names mirror the field names (`AUTHRELAY_CLIENT_ID`,
//! `AUTHRELAY_TOKEN_ENDPOINT`, `AUTHRELAY_ENABLE_PKCE`, ...).

use std::path::{Path, PathBuf};

use authrelay_domain::{AuthError, OidcConfig, Result};

/// Load configuration with automatic fallback strategy.
///
/// # Errors
/// Returns `AuthError::Config` when neither the environment nor any probed
/// file yields a valid configuration.
pub fn load() -> Result<OidcConfig> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = %e, "environment configuration unusable, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from `AUTHRELAY_*` environment variables over the
/// defaults.
///
/// # Errors
/// Returns `AuthError::Config` when a numeric variable does not parse or
/// the resulting configuration fails validation.
pub fn load_from_env() -> Result<OidcConfig> {
    let mut config = OidcConfig::default();

    if let Ok(v) = std::env::var("AUTHRELAY_CLIENT_ID") {
        config.client_id = v;
    }
    if let Ok(v) = std::env::var("AUTHRELAY_CLIENT_SECRET") {
        config.client_secret = v;
    }
    if let Ok(v) = std::env::var("AUTHRELAY_SCOPE") {
        config.scope = v;
    }
    if let Ok(v) = std::env::var("AUTHRELAY_AUTHORIZATION_ENDPOINT") {
        config.authorization_endpoint = v;
    }
    if let Ok(v) = std::env::var("AUTHRELAY_TOKEN_ENDPOINT") {
        config.token_endpoint = v;
    }
    if let Ok(v) = std::env::var("AUTHRELAY_USERINFO_ENDPOINT") {
        config.userinfo_endpoint = Some(v).filter(|s| !s.is_empty());
    }
    if let Ok(v) = std::env::var("AUTHRELAY_END_SESSION_ENDPOINT") {
        config.end_session_endpoint = Some(v).filter(|s| !s.is_empty());
    }
    if let Ok(v) = std::env::var("AUTHRELAY_REDIRECT_URI") {
        config.redirect_uri = v;
    }
    if let Ok(v) = std::env::var("AUTHRELAY_LOGIN_URL") {
        config.login_url = v;
    }
    if let Ok(v) = std::env::var("AUTHRELAY_HOME_URL") {
        config.home_url = v;
    }
    if let Ok(v) = std::env::var("AUTHRELAY_ACR_VALUES") {
        config.acr_values = Some(v).filter(|s| !s.is_empty());
    }
    if let Ok(v) = std::env::var("AUTHRELAY_IDENTITY_CLAIM_KEY") {
        config.identity_claim_key = v;
    }
    if let Ok(v) = std::env::var("AUTHRELAY_NICKNAME_CLAIM_KEY") {
        config.nickname_claim_key = v;
    }
    if let Ok(v) = std::env::var("AUTHRELAY_EMAIL_FORMAT") {
        config.email_format = v;
    }
    if let Ok(v) = std::env::var("AUTHRELAY_USERNAME_FORMAT") {
        config.username_format = v;
    }
    if let Ok(v) = std::env::var("AUTHRELAY_DISPLAYNAME_FORMAT") {
        config.displayname_format = v;
    }

    config.state_ttl_seconds = env_u64("AUTHRELAY_STATE_TTL", config.state_ttl_seconds)?;
    config.session_ttl_seconds = env_u64("AUTHRELAY_SESSION_TTL", config.session_ttl_seconds)?;
    config.http_timeout_seconds =
        env_u64("AUTHRELAY_HTTP_TIMEOUT", config.http_timeout_seconds)?;

    config.enable_pkce = env_bool("AUTHRELAY_ENABLE_PKCE", config.enable_pkce);
    config.consume_state_on_use =
        env_bool("AUTHRELAY_CONSUME_STATE_ON_USE", config.consume_state_on_use);
    config.tls_verify = env_bool("AUTHRELAY_TLS_VERIFY", config.tls_verify);
    config.refresh_enabled = env_bool("AUTHRELAY_REFRESH_ENABLED", config.refresh_enabled);
    config.redirect_on_expiry =
        env_bool("AUTHRELAY_REDIRECT_ON_EXPIRY", config.redirect_on_expiry);
    config.link_by_email = env_bool("AUTHRELAY_LINK_BY_EMAIL", config.link_by_email);
    config.create_user_if_missing =
        env_bool("AUTHRELAY_CREATE_USER", config.create_user_if_missing);

    config.validate()?;
    Ok(config)
}

/// Load configuration from a file.
///
/// If `path` is `None`, probes the standard locations. Format is detected
/// by extension (`.toml` or `.json`).
///
/// # Errors
/// Returns `AuthError::Config` when no file is found, the format is
/// invalid, or validation fails.
pub fn load_from_file(path: Option<PathBuf>) -> Result<OidcConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(AuthError::Config(format!("config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            AuthError::Config("no config file found in any standard location".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| AuthError::Config(format!("failed to read config file: {e}")))?;

    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

fn parse_config(contents: &str, path: &Path) -> Result<OidcConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| AuthError::Config(format!("invalid TOML: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| AuthError::Config(format!("invalid JSON: {e}"))),
        other => Err(AuthError::Config(format!("unsupported config format: {other}"))),
    }
}

/// Probe standard locations for a configuration file.
#[must_use]
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        for name in ["authrelay.toml", "authrelay.json", "config.toml", "config.json"] {
            candidates.push(cwd.join(name));
            candidates.push(cwd.join("..").join(name));
        }
    }

    candidates.into_iter().find(|path| path.exists())
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|e| AuthError::Config(format!("invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}

/// Parse boolean from environment variable.
///
/// Accepts `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off`
/// (case-insensitive); unset keeps the default.
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

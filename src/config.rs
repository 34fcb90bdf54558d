//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "CHATGATE_";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order; variables already present
    /// in the process environment win.
    ///
    /// Defaults to `.env.<ENV>` where `ENV` falls back to `development`.
    #[serde(default = "default_env_files")]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Identity token verification
    pub auth: AuthConfig,
    /// Local user directory
    pub users: UsersConfig,
}

fn default_env_files() -> Vec<String> {
    let environment = env::var("ENV").unwrap_or_else(|_| "development".to_string());
    vec![format!(".env.{environment}")]
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Env files are applied first so that variables defined in them take
    /// part in the environment merge. Precedence, lowest first: defaults,
    /// plain `COGNITO_USER_POOL_ID` / `COGNITO_CLIENT_ID`, the YAML file,
    /// `CHATGATE_*` variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut file_layer = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            file_layer = file_layer.merge(Yaml::file(p));
        }

        let env_files: Vec<String> = file_layer
            .extract_inner("env_files")
            .unwrap_or_else(|_| default_env_files());
        load_env_files(&env_files);

        let config: Self = Figment::new()
            .merge(cognito_env())
            .merge(file_layer)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.auth.validate()?;
        if matches!(self.users.backend, UserBackend::Sqlite) && self.users.database_url.is_empty()
        {
            return Err(Error::Config(
                "users.database_url is required for the sqlite backend".to_string(),
            ));
        }
        Ok(())
    }
}

/// Unprefixed Cognito variables as found in existing `.env.<ENV>` files.
fn cognito_env() -> Env {
    Env::raw()
        .only(&["COGNITO_USER_POOL_ID", "COGNITO_CLIENT_ID"])
        .map(|key| {
            if key.as_str().eq_ignore_ascii_case("COGNITO_USER_POOL_ID") {
                "auth.cognito.user_pool_id".into()
            } else {
                "auth.audience".into()
            }
        })
}

/// Load environment files into the process environment.
/// Supports ~ expansion. Files that don't exist are silently skipped.
fn load_env_files(paths: &[String]) {
    for path_str in paths {
        let expanded = if path_str.starts_with('~') {
            if let Some(home) = dirs::home_dir() {
                path_str.replacen('~', &home.display().to_string(), 1)
            } else {
                path_str.clone()
            }
        } else {
            path_str.clone()
        };

        let path = Path::new(&expanded);
        if path.exists() {
            match dotenvy::from_path(path) {
                Ok(()) => {
                    tracing::info!("Loaded env file: {expanded}");
                }
                Err(e) => {
                    tracing::warn!("Failed to load env file {expanded}: {e}");
                }
            }
        } else {
            tracing::debug!("Env file not found (skipped): {expanded}");
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// AWS Cognito user pool coordinates. When set, the issuer is derived from
/// them instead of being given verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognitoConfig {
    /// AWS region of the user pool
    #[serde(default = "default_cognito_region")]
    pub region: String,
    /// User pool identifier, e.g. `ap-northeast-1_AbCdEf123`
    pub user_pool_id: String,
}

fn default_cognito_region() -> String {
    "ap-northeast-1".to_string()
}

impl CognitoConfig {
    /// Issuer URL of the user pool.
    #[must_use]
    pub fn issuer(&self) -> String {
        format!(
            "https://cognito-idp.{}.amazonaws.com/{}",
            self.region, self.user_pool_id
        )
    }
}

/// Identity token verification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Expected `iss` claim. Required unless `cognito` is set.
    pub issuer: Option<String>,
    /// Cognito user pool; derives `issuer` when `issuer` is absent.
    pub cognito: Option<CognitoConfig>,
    /// Expected `aud` claim (the app client id).
    pub audience: String,
    /// JWKS endpoint. Defaults to `<issuer>/.well-known/jwks.json`.
    pub jwks_uri: Option<String>,
    /// Accepted signing algorithms. Asymmetric only.
    pub algorithms: Vec<Algorithm>,
    /// Claim holding the username.
    pub username_claim: String,
    /// Claim used when `username_claim` is absent.
    pub fallback_username_claim: String,
    /// Upper bound on a single JWKS fetch.
    #[serde(with = "humantime_serde")]
    pub jwks_timeout: Duration,
    /// How long a fetched key set is reused. Zero fetches on every request.
    #[serde(with = "humantime_serde")]
    pub jwks_cache_ttl: Duration,
    /// Clock skew tolerated on `exp`. Zero rejects as soon as a token expires.
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: None,
            cognito: None,
            audience: String::new(),
            jwks_uri: None,
            algorithms: vec![Algorithm::RS256],
            username_claim: "cognito:username".to_string(),
            fallback_username_claim: "sub".to_string(),
            jwks_timeout: Duration::from_secs(10),
            jwks_cache_ttl: Duration::ZERO,
            leeway: Duration::ZERO,
        }
    }
}

impl AuthConfig {
    /// Resolve the expected issuer from `issuer` or `cognito`.
    pub fn resolve_issuer(&self) -> Result<String> {
        if let Some(issuer) = self.issuer.as_deref().filter(|s| !s.is_empty()) {
            return Ok(issuer.trim_end_matches('/').to_string());
        }
        self.cognito
            .as_ref()
            .map(CognitoConfig::issuer)
            .ok_or_else(|| {
                Error::Config("auth.issuer or auth.cognito.user_pool_id is required".to_string())
            })
    }

    /// Resolve the JWKS endpoint, falling back to the well-known path under the issuer.
    pub fn resolve_jwks_uri(&self) -> Result<String> {
        match self.jwks_uri.as_deref().filter(|s| !s.is_empty()) {
            Some(uri) => Ok(uri.to_string()),
            None => Ok(default_jwks_uri(&self.resolve_issuer()?)),
        }
    }

    /// Validate the verification settings.
    pub fn validate(&self) -> Result<()> {
        let issuer = self.resolve_issuer()?;
        if !issuer.starts_with("https://") {
            tracing::warn!(issuer = %issuer, "Token issuer is not HTTPS");
        }

        if self.audience.is_empty() {
            return Err(Error::Config("auth.audience is required".to_string()));
        }

        if self.algorithms.is_empty() {
            return Err(Error::Config("auth.algorithms must not be empty".to_string()));
        }
        if let Some(symmetric) = self.algorithms.iter().find(|a| is_symmetric(**a)) {
            return Err(Error::Config(format!(
                "auth.algorithms: symmetric algorithm {symmetric:?} is not allowed"
            )));
        }

        if self.username_claim.is_empty() || self.fallback_username_claim.is_empty() {
            return Err(Error::Config("username claim names must not be empty".to_string()));
        }
        Ok(())
    }
}

fn is_symmetric(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

/// Derive the default JWKS URI from the issuer URL using OIDC discovery conventions.
fn default_jwks_uri(issuer: &str) -> String {
    let base = issuer.trim_end_matches('/');
    format!("{base}/.well-known/jwks.json")
}

/// Which store backs the local user directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserBackend {
    /// Process-local map; lost on restart
    #[default]
    Memory,
    /// SQLite database via `sqlx`
    Sqlite,
}

/// What the gate does when user creation loses a uniqueness race.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Reject the request with 500.
    #[default]
    Fail,
    /// Re-read the user created by the competing request and continue.
    Refetch,
}

/// Local user directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsersConfig {
    /// Storage backend
    pub backend: UserBackend,
    /// Database URL for the sqlite backend
    pub database_url: String,
    /// Conflict handling during provisioning
    pub on_conflict: ConflictPolicy,
}

impl Default for UsersConfig {
    fn default() -> Self {
        Self {
            backend: UserBackend::Memory,
            database_url: "sqlite://chatgate.db?mode=rwc".to_string(),
            on_conflict: ConflictPolicy::Fail,
        }
    }
}

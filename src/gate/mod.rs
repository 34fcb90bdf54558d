//! Bearer-token gate for protected routes.
//!
//! # Pipeline
//!
//! 1. Require an `Authorization` header of the form `Bearer <token>`.
//! 2. Fetch the signing keys from the [`KeyDirectory`].
//! 3. Read `kid` from the unverified token header and select its key.
//!    An unknown `kid` is rejected without attempting verification.
//! 4. Verify signature, `aud`, `iss` and `exp` with the [`TokenVerifier`].
//! 5. Take the username from the primary claim (falling back to the
//!    secondary one) and find or create the [`LocalUser`].
//! 6. Insert the user into the request extensions and run the handler.
//!
//! Any valid token for a new username provisions a local account: the trust
//! boundary is the signature check in step 4.

mod error;
pub mod verify;

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::{AuthConfig, ConflictPolicy};
use crate::jwks::{CachedKeyDirectory, HttpKeyDirectory, KeyDirectory};
use crate::users::{DirectoryError, LocalUser, UserDirectory};
use crate::Result;

pub use error::GateError;
pub use verify::{Claims, JwtVerifier, TokenVerifier, VerifyError};

/// Claim names used to derive the local username.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsernameClaims {
    /// Checked first.
    pub primary: String,
    /// Used when `primary` is absent.
    pub fallback: String,
}

impl Default for UsernameClaims {
    fn default() -> Self {
        Self {
            primary: "cognito:username".to_string(),
            fallback: "sub".to_string(),
        }
    }
}

impl UsernameClaims {
    /// Username from the first non-empty string claim.
    #[must_use]
    pub fn username<'a>(&self, claims: &'a Claims) -> Option<&'a str> {
        [&self.primary, &self.fallback]
            .into_iter()
            .find_map(|name| claims.get(name).and_then(Value::as_str).filter(|s| !s.is_empty()))
    }
}

/// The gate: key directory, verifier and user directory wired together.
pub struct BearerGate {
    keys: Arc<dyn KeyDirectory>,
    verifier: Arc<dyn TokenVerifier>,
    users: Arc<dyn UserDirectory>,
    claims: UsernameClaims,
    on_conflict: ConflictPolicy,
}

impl BearerGate {
    /// Create a gate with default claim names and fatal conflict handling.
    #[must_use]
    pub fn new(
        keys: Arc<dyn KeyDirectory>,
        verifier: Arc<dyn TokenVerifier>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            keys,
            verifier,
            users,
            claims: UsernameClaims::default(),
            on_conflict: ConflictPolicy::Fail,
        }
    }

    /// Build the production gate: HTTP JWKS (cached if `jwks_cache_ttl` is
    /// non-zero) and a `jsonwebtoken` verifier.
    pub fn from_config(
        auth: &AuthConfig,
        on_conflict: ConflictPolicy,
        users: Arc<dyn UserDirectory>,
    ) -> Result<Self> {
        auth.validate()?;
        let issuer = auth.resolve_issuer()?;
        let jwks_uri = auth.resolve_jwks_uri()?;

        let http = HttpKeyDirectory::new(jwks_uri, auth.jwks_timeout)?;
        let keys: Arc<dyn KeyDirectory> = if auth.jwks_cache_ttl.is_zero() {
            Arc::new(http)
        } else {
            Arc::new(CachedKeyDirectory::new(http, auth.jwks_cache_ttl))
        };
        let verifier = JwtVerifier::new(issuer, auth.audience.clone(), auth.algorithms.clone())
            .with_leeway(auth.leeway.as_secs());

        Ok(Self::new(keys, Arc::new(verifier), users)
            .with_username_claims(UsernameClaims {
                primary: auth.username_claim.clone(),
                fallback: auth.fallback_username_claim.clone(),
            })
            .with_conflict_policy(on_conflict))
    }

    /// Override the username claim names.
    #[must_use]
    pub fn with_username_claims(mut self, claims: UsernameClaims) -> Self {
        self.claims = claims;
        self
    }

    /// Override conflict handling during provisioning.
    #[must_use]
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.on_conflict = policy;
        self
    }

    /// Run the pipeline for one `Authorization` header value.
    pub async fn authenticate(
        &self,
        authorization: Option<&HeaderValue>,
    ) -> std::result::Result<LocalUser, GateError> {
        let token = bearer_credential(authorization)?;

        let keys = self.keys.fetch().await.map_err(|e| {
            error!(error = %e, "Signing key fetch failed");
            GateError::KeyDirectoryUnavailable
        })?;

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| GateError::InvalidToken(e.to_string()))?;
        let kid = header.kid.as_deref().ok_or(GateError::UnknownSigningKey)?;

        let key = match keys.get(kid) {
            Some(key) => key.clone(),
            None => {
                let refreshed = self.keys.refresh().await.map_err(|e| {
                    error!(error = %e, "Signing key refresh failed");
                    GateError::KeyDirectoryUnavailable
                })?;
                refreshed
                    .as_deref()
                    .and_then(|set| set.get(kid))
                    .cloned()
                    .ok_or(GateError::UnknownSigningKey)?
            }
        };

        let claims = self
            .verifier
            .verify(token, &header, &key)
            .map_err(|e| match e {
                VerifyError::Expired => GateError::ExpiredToken,
                VerifyError::Invalid(details) => GateError::InvalidToken(details),
            })?;

        let username = self
            .claims
            .username(&claims)
            .ok_or_else(|| {
                GateError::InvalidToken("Token carries no username claim".to_string())
            })?;
        let email = claims.get("email").and_then(Value::as_str).unwrap_or("");

        self.provision(username, email).await
    }

    async fn provision(
        &self,
        username: &str,
        email: &str,
    ) -> std::result::Result<LocalUser, GateError> {
        match self.users.find_or_create(username, email).await {
            Ok((user, created)) => {
                if created {
                    info!(username = %user.username, id = user.id, "Provisioned local user");
                }
                Ok(user)
            }
            Err(DirectoryError::Conflict(_)) if self.on_conflict == ConflictPolicy::Refetch => {
                debug!(username = %username, "Lost provisioning race, re-reading user");
                match self.users.find(username).await {
                    Ok(Some(user)) => Ok(user),
                    Ok(None) => Err(GateError::UserProvisioningConflict),
                    Err(e) => Err(GateError::UserDirectory(e.to_string())),
                }
            }
            Err(DirectoryError::Conflict(_)) => Err(GateError::UserProvisioningConflict),
            Err(e) => Err(GateError::UserDirectory(e.to_string())),
        }
    }
}

/// Extract the credential from `Authorization: <scheme> <credential>`.
///
/// An empty value counts as missing. Otherwise the value must split on
/// whitespace into exactly two parts and the scheme must be `bearer` in any
/// case.
pub fn bearer_credential(
    authorization: Option<&HeaderValue>,
) -> std::result::Result<&str, GateError> {
    let value = authorization
        .filter(|v| !v.as_bytes().is_empty())
        .ok_or(GateError::MissingAuthHeader)?;
    let value = value.to_str().map_err(|_| GateError::MalformedAuthHeader)?;

    let mut parts = value.split_whitespace();
    let (Some(scheme), Some(credential), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(GateError::MalformedAuthHeader);
    };

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(GateError::UnsupportedScheme);
    }
    Ok(credential)
}

/// Authentication middleware
pub async fn bearer_gate(
    State(gate): State<Arc<BearerGate>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    match gate.authenticate(request.headers().get(AUTHORIZATION)).await {
        Ok(user) => {
            debug!(user = %user.username, path = %path, "Authenticated request");
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(rejection) => {
            if rejection.status().is_server_error() {
                error!(path = %path, error = %rejection, "Request rejected");
            } else {
                warn!(path = %path, error = %rejection, "Request rejected");
            }
            rejection.into_response()
        }
    }
}

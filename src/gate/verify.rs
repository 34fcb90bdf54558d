//! Signature and claim verification for identity tokens.

use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation, errors::ErrorKind};
use serde_json::{Map, Value};

/// Decoded token payload.
pub type Claims = Map<String, Value>;

/// Why a token failed verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// `exp` is in the past.
    #[error("Signature has expired")]
    Expired,
    /// Any other failure; the message is returned to the client as `details`.
    #[error("{0}")]
    Invalid(String),
}

impl From<jsonwebtoken::errors::Error> for VerifyError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            _ => Self::Invalid(err.to_string()),
        }
    }
}

/// Checks a token against a key the caller has already selected by `kid`.
pub trait TokenVerifier: Send + Sync + 'static {
    /// Verify `token` (whose unverified header is `header`) with `key` and
    /// return its claims.
    fn verify(&self, token: &str, header: &Header, key: &DecodingKey)
    -> Result<Claims, VerifyError>;
}

/// `jsonwebtoken`-backed verifier pinned to an issuer, an audience and an
/// asymmetric algorithm allow-list.
#[derive(Debug, Clone)]
pub struct JwtVerifier {
    issuer: String,
    audience: String,
    algorithms: Vec<Algorithm>,
    leeway: u64,
}

impl JwtVerifier {
    /// Create a verifier. `algorithms` should already be validated as asymmetric.
    ///
    /// Expiry is exact: a token is rejected as soon as `exp` has passed.
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        algorithms: Vec<Algorithm>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            algorithms,
            leeway: 0,
        }
    }

    /// Tolerate this much clock skew (seconds) on `exp`.
    #[must_use]
    pub fn with_leeway(mut self, leeway: u64) -> Self {
        self.leeway = leeway;
        self
    }

    /// The token's own `alg` must be on the allow-list; the validation is
    /// then built for that single algorithm so key family and `alg` agree.
    fn validation_for(&self, header: &Header) -> Result<Validation, VerifyError> {
        if !self.algorithms.contains(&header.alg) {
            return Err(VerifyError::Invalid(format!(
                "The specified alg value is not allowed: {:?}",
                header.alg
            )));
        }
        let mut v = Validation::new(header.alg);
        v.leeway = self.leeway;
        v.set_audience(&[&self.audience]);
        v.set_issuer(&[&self.issuer]);
        v.set_required_spec_claims(&["exp", "aud", "iss"]);
        Ok(v)
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(
        &self,
        token: &str,
        header: &Header,
        key: &DecodingKey,
    ) -> Result<Claims, VerifyError> {
        let validation = self.validation_for(header)?;
        let data = jsonwebtoken::decode::<Claims>(token, key, &validation)?;
        Ok(data.claims)
    }
}

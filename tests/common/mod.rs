//! Shared fixtures for gate integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::{
    Extension, Json, Router,
    body::Body,
    http::{Request, Response},
    middleware,
    routing::get,
};
use chatgate::gate::{BearerGate, Claims, TokenVerifier, VerifyError, bearer_gate};
use chatgate::jwks::{KeyDirectory, KeyFetchError, KeySet};
use chatgate::users::LocalUser;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use serde_json::{Value, json};
use tower::ServiceExt;

pub const ISSUER: &str = "https://cognito-idp.ap-northeast-1.amazonaws.com/ap-northeast-1_TestPool";
pub const AUDIENCE: &str = "test-client-id";
pub const KID: &str = "key-1";

pub const SIGNING_KEY_PEM: &str = include_str!("../fixtures/signing_key.pem");
pub const FOREIGN_KEY_PEM: &str = include_str!("../fixtures/foreign_key.pem");

/// Modulus of `signing_key.pem` (base64url, exponent 65537).
pub const SIGNING_KEY_N: &str = "4ndChecsQ4M5Yj8Omiootpbwv0Q1wPze5IykeNUSG5UFHISCWHnBIjirZqcVLbXjHM8PFzDY1Qw7P0-N7IH3rbOhru1clW3-tqQPcSnr2xcSta3M5rsB8LxrHtuENk1_jKFFc7KkSIIrxmkSOHOkOwnTvGts0qI1iZ99iI-cOTQGYalOxwixuy4cvkUURcwDfRutwu3gIRlh-2um2QPaf44EY5cUIymGNA0PUh4olFKryKLyjEEcYQaq-JDA_qBZVjcnfWOFhJcm9weXkZo6QLMcSStslcIk4BSsy9NP8A0wrtuZurViX9V1IXS-cuByVLzVKF8_zBiUglSOjko7Zw";
pub const SIGNING_KEY_E: &str = "AQAB";

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Claims a Cognito ID token would carry for `username`.
pub fn claims_for(username: &str) -> Value {
    json!({
        "sub": format!("sub-{username}"),
        "cognito:username": username,
        "email": format!("{username}@example.com"),
        "aud": AUDIENCE,
        "iss": ISSUER,
        "iat": now(),
        "exp": now() + 3600,
    })
}

/// Sign `claims` with RS256 under `kid`.
pub fn sign_with(claims: &Value, kid: &str, pem: &str) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

pub fn sign(claims: &Value) -> String {
    sign_with(claims, KID, SIGNING_KEY_PEM)
}

/// JWKS document publishing `signing_key.pem` under `kid`.
pub fn jwks_json(kid: &str) -> Value {
    json!({
        "keys": [{
            "kid": kid,
            "kty": "RSA",
            "n": SIGNING_KEY_N,
            "e": SIGNING_KEY_E,
            "alg": "RS256",
            "use": "sig"
        }]
    })
}

/// Fixed key set; counts fetches.
pub struct StaticKeys {
    set: Arc<KeySet>,
    pub fetches: AtomicUsize,
}

impl StaticKeys {
    pub fn with_kid(kid: &str) -> Self {
        let mut set = KeySet::default();
        set.insert(
            kid,
            DecodingKey::from_rsa_components(SIGNING_KEY_N, SIGNING_KEY_E).unwrap(),
        );
        Self {
            set: Arc::new(set),
            fetches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl KeyDirectory for StaticKeys {
    async fn fetch(&self) -> Result<Arc<KeySet>, KeyFetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.set))
    }
}

/// Returns a canned result and counts calls.
pub struct ScriptedVerifier {
    result: Result<Claims, VerifyError>,
    pub calls: AtomicUsize,
}

impl ScriptedVerifier {
    pub fn ok(claims: Value) -> Self {
        Self {
            result: Ok(serde_json::from_value(claims).unwrap()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn err(err: VerifyError) -> Self {
        Self {
            result: Err(err),
            calls: AtomicUsize::new(0),
        }
    }
}

impl TokenVerifier for ScriptedVerifier {
    fn verify(
        &self,
        _token: &str,
        _header: &Header,
        _key: &DecodingKey,
    ) -> Result<Claims, VerifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// Router with one protected route that counts its invocations.
pub fn protected_app(gate: Arc<BearerGate>, hits: Arc<AtomicUsize>) -> Router {
    Router::new()
        .route(
            "/protected",
            get(move |Extension(user): Extension<LocalUser>| {
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(json!({ "success": "True", "username": user.username }))
                }
            }),
        )
        .route_layer(middleware::from_fn_with_state(gate, bearer_gate))
}

/// Send `GET uri` with an optional `Authorization` value.
pub async fn get_with_auth(app: Router, uri: &str, authorization: Option<&str>) -> Response<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(value) = authorization {
        builder = builder.header("Authorization", value);
    }
    app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap()
}

/// Extract JSON body
pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

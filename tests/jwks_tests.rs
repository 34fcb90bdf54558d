//! Gate built from configuration against a JWKS endpoint served over HTTP.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use chatgate::config::{AuthConfig, ConflictPolicy};
use chatgate::gate::BearerGate;
use chatgate::jwks::{HttpKeyDirectory, KeyDirectory};
use chatgate::server::create_router;
use chatgate::users::{InMemoryUserDirectory, SqliteUserDirectory, UserDirectory};
use serde_json::json;
use tokio::net::TcpListener;

use common::*;

struct JwksServer {
    url: String,
    hits: Arc<AtomicUsize>,
}

/// Serve `jwks_json(kid)` on an ephemeral port, counting requests.
async fn serve_jwks(kid: &str) -> JwksServer {
    let hits = Arc::new(AtomicUsize::new(0));
    let body = jwks_json(kid);
    let app = Router::new()
        .route(
            "/.well-known/jwks.json",
            get(|State((hits, body)): State<(Arc<AtomicUsize>, serde_json::Value)>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Json(body)
            }),
        )
        .with_state((Arc::clone(&hits), body));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    JwksServer {
        url: format!("http://{addr}/.well-known/jwks.json"),
        hits,
    }
}

fn auth_config(jwks_uri: &str, cache_ttl: Duration) -> AuthConfig {
    AuthConfig {
        issuer: Some(ISSUER.to_string()),
        audience: AUDIENCE.to_string(),
        jwks_uri: Some(jwks_uri.to_string()),
        jwks_cache_ttl: cache_ttl,
        ..AuthConfig::default()
    }
}

#[tokio::test]
async fn http_directory_parses_published_keys() {
    let server = serve_jwks(KID).await;
    let directory = HttpKeyDirectory::new(&server.url, Duration::from_secs(5)).unwrap();

    let keys = directory.fetch().await.unwrap();

    assert_eq!(keys.len(), 1);
    assert!(keys.get(KID).is_some());
    assert_eq!(server.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn non_success_status_is_a_fetch_error() {
    let server = serve_jwks(KID).await;
    let missing = server.url.replace("jwks.json", "missing.json");
    let directory = HttpKeyDirectory::new(missing, Duration::from_secs(5)).unwrap();

    assert!(directory.fetch().await.is_err());
    assert_eq!(server.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn baseline_fetches_keys_on_every_request() {
    let server = serve_jwks(KID).await;
    let users = Arc::new(InMemoryUserDirectory::new());
    let gate = BearerGate::from_config(
        &auth_config(&server.url, Duration::ZERO),
        ConflictPolicy::Fail,
        Arc::clone(&users) as Arc<dyn UserDirectory>,
    )
    .unwrap();
    let app = create_router(Arc::new(gate));
    let auth = format!("Bearer {}", sign(&claims_for("grace")));

    for _ in 0..3 {
        let response = get_with_auth(app.clone(), "/api/me", Some(&auth)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(server.hits.load(Ordering::SeqCst), 3);
    assert_eq!(users.count().await.unwrap(), 1);
}

#[tokio::test]
async fn cached_directory_fetches_once_within_ttl() {
    let server = serve_jwks(KID).await;
    let gate = BearerGate::from_config(
        &auth_config(&server.url, Duration::from_secs(3600)),
        ConflictPolicy::Fail,
        Arc::new(InMemoryUserDirectory::new()),
    )
    .unwrap();
    let app = create_router(Arc::new(gate));
    let auth = format!("Bearer {}", sign(&claims_for("heidi")));

    for _ in 0..3 {
        let response = get_with_auth(app.clone(), "/api/me", Some(&auth)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(server.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cached_directory_refreshes_once_on_unknown_kid() {
    let server = serve_jwks(KID).await;
    let gate = BearerGate::from_config(
        &auth_config(&server.url, Duration::from_secs(3600)),
        ConflictPolicy::Fail,
        Arc::new(InMemoryUserDirectory::new()),
    )
    .unwrap();
    let app = create_router(Arc::new(gate));

    let known = format!("Bearer {}", sign(&claims_for("ivan")));
    let response = get_with_auth(app.clone(), "/api/me", Some(&known)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(server.hits.load(Ordering::SeqCst), 1);

    let unknown = format!(
        "Bearer {}",
        sign_with(&claims_for("ivan"), "not-published", SIGNING_KEY_PEM)
    );
    let response = get_with_auth(app, "/api/me", Some(&unknown)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await, json!({ "error": "Public key not found" }));
    assert_eq!(server.hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn sqlite_directory_behind_the_gate() {
    let server = serve_jwks(KID).await;
    let users = Arc::new(SqliteUserDirectory::connect("sqlite::memory:").await.unwrap());
    let gate = BearerGate::from_config(
        &auth_config(&server.url, Duration::ZERO),
        ConflictPolicy::Fail,
        Arc::clone(&users) as Arc<dyn UserDirectory>,
    )
    .unwrap();
    let app = create_router(Arc::new(gate));
    let auth = format!("Bearer {}", sign(&claims_for("judy")));

    let first = json_body(get_with_auth(app.clone(), "/api/me", Some(&auth)).await).await;
    let second = json_body(get_with_auth(app, "/api/me", Some(&auth)).await).await;

    assert_eq!(first["id"], second["id"]);
    assert_eq!(first["email"], "judy@example.com");
    assert_eq!(users.count().await.unwrap(), 1);
}

#[test]
fn from_config_rejects_symmetric_algorithms() {
    let config = AuthConfig {
        algorithms: vec![jsonwebtoken::Algorithm::HS256],
        ..auth_config("https://idp.example.com/jwks", Duration::ZERO)
    };
    let result = BearerGate::from_config(
        &config,
        ConflictPolicy::Fail,
        Arc::new(InMemoryUserDirectory::new()),
    );
    assert!(result.is_err());
}

//! Signing key directory - fetches the identity provider's JWKS and turns it
//! into verification keys indexed by `kid`.
//!
//! # Fetch policy
//!
//! [`HttpKeyDirectory`] performs one HTTP request per [`KeyDirectory::fetch`]
//! call and caches nothing, so a rotated key is visible on the very next
//! request. Wrapping it in [`CachedKeyDirectory`] reuses a fetched set for a
//! fixed TTL; an unknown `kid` triggers a single forced refresh before the
//! caller gives up, which picks up rotations without refetching on every
//! request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{
    DecodingKey,
    jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm},
};
use parking_lot::RwLock;
use tracing::{debug, warn};

/// Failure to obtain the key set from the identity provider.
#[derive(Debug, thiserror::Error)]
pub enum KeyFetchError {
    /// Network, timeout, non-2xx status or undecodable body.
    #[error("JWKS fetch error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Public verification keys indexed by key id.
#[derive(Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, DecodingKey>,
    algorithms: HashMap<String, Option<KeyAlgorithm>>,
}

impl KeySet {
    /// Convert a JWKS document. Entries without a `kid`, symmetric keys and
    /// keys whose components do not decode are skipped.
    #[must_use]
    pub fn from_jwks(jwks: &JwkSet) -> Self {
        let mut set = Self::default();
        for jwk in &jwks.keys {
            let Some(kid) = jwk.common.key_id.clone() else {
                debug!("Skipping JWK without kid");
                continue;
            };
            match decoding_key(jwk) {
                Some(key) => {
                    set.algorithms.insert(kid.clone(), jwk.common.key_algorithm);
                    set.keys.insert(kid, key);
                }
                None => warn!(kid = %kid, "Skipping unusable JWK"),
            }
        }
        set
    }

    /// Insert a key directly.
    pub fn insert(&mut self, kid: impl Into<String>, key: DecodingKey) {
        let kid = kid.into();
        self.algorithms.insert(kid.clone(), None);
        self.keys.insert(kid, key);
    }

    /// Look up the key for `kid`.
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<&DecodingKey> {
        self.keys.get(kid)
    }

    /// Key ids with the algorithm advertised for each, sorted by id.
    #[must_use]
    pub fn describe(&self) -> Vec<(String, Option<KeyAlgorithm>)> {
        let mut out: Vec<_> = self
            .algorithms
            .iter()
            .map(|(kid, alg)| (kid.clone(), *alg))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Number of usable keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set holds no usable keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl std::fmt::Debug for KeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySet")
            .field("kids", &self.describe())
            .finish()
    }
}

fn decoding_key(jwk: &Jwk) -> Option<DecodingKey> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
        AlgorithmParameters::EllipticCurve(ec) => {
            DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
        }
        AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
    }
}

/// Source of the current signing keys.
#[async_trait]
pub trait KeyDirectory: Send + Sync + 'static {
    /// Return the current key set.
    async fn fetch(&self) -> Result<Arc<KeySet>, KeyFetchError>;

    /// Called after a `kid` was missing from the set returned by
    /// [`fetch`](Self::fetch). Directories that may serve a stale set
    /// re-fetch and return the fresh one; the default returns `None`
    /// because the set just fetched is already current.
    async fn refresh(&self) -> Result<Option<Arc<KeySet>>, KeyFetchError> {
        Ok(None)
    }
}

/// Fetches the JWKS over HTTP on every call.
pub struct HttpKeyDirectory {
    http: reqwest::Client,
    jwks_uri: String,
}

impl HttpKeyDirectory {
    /// Create a directory for `jwks_uri` whose requests give up after `timeout`.
    pub fn new(jwks_uri: impl Into<String>, timeout: Duration) -> Result<Self, KeyFetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            jwks_uri: jwks_uri.into(),
        })
    }

    /// The endpoint this directory reads from.
    #[must_use]
    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }
}

#[async_trait]
impl KeyDirectory for HttpKeyDirectory {
    async fn fetch(&self) -> Result<Arc<KeySet>, KeyFetchError> {
        debug!(jwks_uri = %self.jwks_uri, "Fetching JWKS");
        let jwks: JwkSet = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let set = KeySet::from_jwks(&jwks);
        debug!(keys = set.len(), "JWKS fetched");
        Ok(Arc::new(set))
    }
}

struct CachedKeys {
    keys: Arc<KeySet>,
    fetched_at: Instant,
}

/// Reuses a fetched key set for `ttl`; refreshes once on an unknown `kid`.
pub struct CachedKeyDirectory<D> {
    inner: D,
    ttl: Duration,
    cached: RwLock<Option<CachedKeys>>,
}

impl<D: KeyDirectory> CachedKeyDirectory<D> {
    /// Wrap `inner` with a TTL cache.
    #[must_use]
    pub fn new(inner: D, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cached: RwLock::new(None),
        }
    }

    async fn fetch_and_store(&self) -> Result<Arc<KeySet>, KeyFetchError> {
        let keys = self.inner.fetch().await?;
        *self.cached.write() = Some(CachedKeys {
            keys: Arc::clone(&keys),
            fetched_at: Instant::now(),
        });
        Ok(keys)
    }
}

#[async_trait]
impl<D: KeyDirectory> KeyDirectory for CachedKeyDirectory<D> {
    async fn fetch(&self) -> Result<Arc<KeySet>, KeyFetchError> {
        let fresh = self
            .cached
            .read()
            .as_ref()
            .filter(|c| c.fetched_at.elapsed() < self.ttl)
            .map(|c| Arc::clone(&c.keys));
        match fresh {
            Some(keys) => Ok(keys),
            None => self.fetch_and_store().await,
        }
    }

    async fn refresh(&self) -> Result<Option<Arc<KeySet>>, KeyFetchError> {
        debug!("Key not found in cached JWKS, refreshing");
        self.fetch_and_store().await.map(Some)
    }
}

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use homeboard_core::{Collection, EntityKind, EntityPayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use homeboard_store_file::JsonDocumentStore;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The authoritative server-side store for whole collections, as seen by the
/// gateway. Implementations transmit and receive the collection wire shape
/// (a day-keyed object or a bare array).
pub trait RemoteStore {
    /// Fetch the full wire value of a collection.
    ///
    /// # Errors
    /// Any failure (network, non-success status, undecodable body) is
    /// reported as an error; the gateway treats them all as
    /// remote-unavailable.
    fn fetch(&self, kind: EntityKind) -> Result<Value>;

    /// Replace the full collection; the returned bool is the server's
    /// `success` flag.
    ///
    /// # Errors
    /// Same failure contract as [`RemoteStore::fetch`].
    fn replace(&self, kind: EntityKind, collection: &Value) -> Result<bool>;
}

/// HTTP implementation of [`RemoteStore`] against the homeboard service's
/// `/api/{collection}` endpoints. Unlike the original client this one imposes
/// a request timeout, so a hung server degrades into a cache fallback instead
/// of blocking forever.
pub struct HttpRemote {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpRemote {
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self { agent, base_url: base_url.trim_end_matches('/').to_string() }
    }

    fn endpoint(&self, kind: EntityKind) -> String {
        format!("{}/api/{}", self.base_url, kind.collection_name())
    }
}

impl RemoteStore for HttpRemote {
    fn fetch(&self, kind: EntityKind) -> Result<Value> {
        let url = self.endpoint(kind);
        let response = self
            .agent
            .get(&url)
            .call()
            .with_context(|| format!("remote fetch of {url} failed"))?;
        response
            .into_json()
            .with_context(|| format!("remote fetch of {url} returned an undecodable body"))
    }

    fn replace(&self, kind: EntityKind, collection: &Value) -> Result<bool> {
        let url = self.endpoint(kind);
        let body = serde_json::to_string(collection)
            .with_context(|| format!("failed to serialize {} collection", kind.as_str()))?;
        let response = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_string(&body)
            .with_context(|| format!("remote replace of {url} failed"))?;
        let reply: Value = response
            .into_json()
            .with_context(|| format!("remote replace of {url} returned an undecodable body"))?;
        Ok(reply.get("success").and_then(Value::as_bool).unwrap_or(false))
    }
}

/// Where a loaded collection actually came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LoadSource {
    Remote,
    Cache,
    Empty,
}

/// How durable the last save attempt ended up. The in-memory collection is
/// the session's source of truth either way; this only records how far the
/// mirrors got.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SaveDurability {
    /// Written to the remote store and mirrored to the local cache.
    Remote,
    /// Remote write failed; only the local cache holds the value.
    LocalOnly,
    /// Both remote and cache writes failed.
    MemoryOnly,
}

/// Round-trips collections between the remote store and a local cache with a
/// last-known-good-with-remote-preference policy: the remote wins whenever it
/// is reachable, staleness is accepted on failure, and total absence degrades
/// to an empty collection. Neither `load` nor `save` ever surfaces a hard
/// failure to the caller.
pub struct Gateway {
    remote: Box<dyn RemoteStore>,
    cache: JsonDocumentStore,
}

impl Gateway {
    #[must_use]
    pub fn new(remote: Box<dyn RemoteStore>, cache: JsonDocumentStore) -> Self {
        Self { remote, cache }
    }

    /// Gateway talking HTTP to `base_url` with a file cache under
    /// `cache_dir`.
    ///
    /// # Errors
    /// Returns an error when the cache directory cannot be created.
    pub fn over_http(base_url: &str, cache_dir: &Path) -> Result<Self> {
        let cache = JsonDocumentStore::open(cache_dir)?;
        Ok(Self::new(Box::new(HttpRemote::new(base_url)), cache))
    }

    fn fetch_typed<P: EntityPayload>(&self) -> Result<(Collection<P>, Value)> {
        let wire = self.remote.fetch(P::KIND)?;
        let collection = Collection::from_wire_value(wire.clone())
            .map_err(|err| anyhow!("remote {} payload: {err}", P::KIND.collection_name()))?;
        Ok((collection, wire))
    }

    fn load_cached<P: EntityPayload>(&self) -> Option<Collection<P>> {
        let name = P::KIND.collection_name();
        let value = match self.cache.read(name) {
            Ok(value) => value?,
            Err(err) => {
                tracing::warn!(collection = name, error = %err, "local cache unreadable");
                return None;
            }
        };
        match Collection::from_wire_value(value) {
            Ok(collection) => Some(collection),
            Err(err) => {
                tracing::warn!(collection = name, error = %err, "local cache holds bad data");
                None
            }
        }
    }

    fn mirror_to_cache(&self, kind: EntityKind, wire: &Value) {
        if let Err(err) = self.cache.replace(kind.collection_name(), wire) {
            tracing::warn!(
                collection = kind.collection_name(),
                error = %err,
                "failed to mirror collection to local cache"
            );
        }
    }

    /// Load a collection, preferring the remote store and falling back to the
    /// local cache, then to an empty collection. Never fails.
    pub fn load<P: EntityPayload>(&self) -> (Collection<P>, LoadSource) {
        let name = P::KIND.collection_name();
        match self.fetch_typed::<P>() {
            Ok((collection, wire)) => {
                self.mirror_to_cache(P::KIND, &wire);
                (collection, LoadSource::Remote)
            }
            Err(err) => {
                tracing::warn!(collection = name, error = %err, "remote load failed, using local cache");
                match self.load_cached::<P>() {
                    Some(collection) => (collection, LoadSource::Cache),
                    None => (Collection::new(), LoadSource::Empty),
                }
            }
        }
    }

    /// Persist the full collection: remote replace first, local cache mirror
    /// on success, cache-only on remote failure. Never fails; the returned
    /// durability tells the caller how far the write got.
    pub fn save<P: EntityPayload>(&self, collection: &Collection<P>) -> SaveDurability {
        let name = P::KIND.collection_name();
        let wire = match collection.to_wire_value() {
            Ok(wire) => wire,
            Err(err) => {
                tracing::warn!(collection = name, error = %err, "collection not serializable");
                return SaveDurability::MemoryOnly;
            }
        };

        match self.remote.replace(P::KIND, &wire) {
            Ok(true) => {
                self.mirror_to_cache(P::KIND, &wire);
                SaveDurability::Remote
            }
            Ok(false) => {
                tracing::warn!(collection = name, "remote rejected save, keeping cache copy only");
                self.save_cache_only(P::KIND, &wire)
            }
            Err(err) => {
                tracing::warn!(collection = name, error = %err, "remote save failed, keeping cache copy only");
                self.save_cache_only(P::KIND, &wire)
            }
        }
    }

    fn save_cache_only(&self, kind: EntityKind, wire: &Value) -> SaveDurability {
        match self.cache.replace(kind.collection_name(), wire) {
            Ok(()) => SaveDurability::LocalOnly,
            Err(err) => {
                tracing::warn!(
                    collection = kind.collection_name(),
                    error = %err,
                    "local cache save failed as well"
                );
                SaveDurability::MemoryOnly
            }
        }
    }
}

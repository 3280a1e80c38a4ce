//! Berth API façade for front ends and headless automation.
//!
//! Re-exports the store, fetchers and search, and defines the entity lookup surface used by
//! automation callers: resolve containers by id or name within an endpoint, with an opt-in
//! resolve-from-cache mode when the server is unreachable.

#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use berth_core::{
    BerthError, BerthResult, Container, ContainerRef, EndpointId, ErrorReporter, ExecuteAction, FetchFilters,
    TracingReporter, ViewState,
};
pub use berth_fetch::{DetailFetcher, LogFetcher};
pub use berth_search::{parse_query, ParsedQuery, SearchToken};
pub use berth_store::{ResourceStore, StoreConfig, StoreSnapshot};

/// Container as seen by automation callers, addressed by `"<id>:<name>"` keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerEntity {
    pub id: String,
    pub name: Option<String>,
}

impl ContainerEntity {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self { id: id.into(), name }
    }

    pub fn key(&self) -> String {
        match &self.name {
            Some(name) => format!("{}:{}", self.id, name),
            None => self.id.clone(),
        }
    }
}

impl From<&Container> for ContainerEntity {
    fn from(c: &Container) -> Self {
        Self { id: c.id.clone(), name: c.display_name().map(str::to_string) }
    }
}

impl fmt::Display for ContainerEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name.as_deref().unwrap_or(&self.id))
    }
}

/// Split an entity key into id and optional name.
pub fn expand_key(key: &str) -> (String, Option<String>) {
    match key.split_once(':') {
        Some((id, name)) if !name.is_empty() => (id.to_string(), Some(name.to_string())),
        Some((id, _)) => (id.to_string(), None),
        None => (key.to_string(), None),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupOptions {
    /// Match by container name instead of id (names survive container re-creation).
    pub resolve_by_name: bool,
    /// On network failure, answer from cached data or stubs instead of failing.
    pub resolve_offline: bool,
}

/// Entity lookup surface.
#[async_trait::async_trait]
pub trait ContainerLookup: Send + Sync {
    /// Entities for `keys`, in key order. Keys the server does not know are dropped.
    async fn resolve(&self, endpoint: EndpointId, keys: &[String], opts: LookupOptions) -> BerthResult<Vec<ContainerEntity>>;

    /// Entities whose names or id match `text`, best first. Failures yield an empty list.
    async fn matching(&self, endpoint: EndpointId, text: &str) -> Vec<ContainerEntity>;

    /// Every container of the endpoint.
    async fn suggested(&self, endpoint: EndpointId) -> BerthResult<Vec<ContainerEntity>>;
}

/// In-process implementation over a [`ResourceStore`].
pub struct InProcApi {
    store: Arc<ResourceStore>,
}

impl InProcApi {
    pub fn new(store: Arc<ResourceStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<ResourceStore> {
        &self.store
    }

    pub fn detail_fetcher(&self) -> DetailFetcher {
        DetailFetcher::new(Arc::clone(&self.store))
    }

    pub fn log_fetcher(&self) -> LogFetcher {
        LogFetcher::new(Arc::clone(&self.store))
    }

    /// Filter the store's current containers by a query line with typed prefixes.
    pub fn search(&self, query: &str) -> Vec<Container> {
        let ParsedQuery { text, tokens } = berth_search::parse_query(query);
        self.search_with(&text, &tokens)
    }

    pub fn search_with(&self, text: &str, tokens: &[SearchToken]) -> Vec<Container> {
        let snap = self.store.snapshot();
        let containers = snap.containers.unwrapped_value().map(Vec::as_slice).unwrap_or_default();
        berth_search::filter(containers, text, tokens)
    }

    /// Suggested tokens for the store's current containers, minus `applied`.
    pub fn suggested_tokens(&self, applied: &[SearchToken]) -> Vec<SearchToken> {
        let snap = self.store.snapshot();
        let containers = snap.containers.unwrapped_value().map(Vec::as_slice).unwrap_or_default();
        berth_search::suggested_tokens(containers, applied)
    }

    /// Cached containers of `endpoint`, if the store currently holds that endpoint.
    fn cached(&self, endpoint: EndpointId) -> Vec<Container> {
        let snap = self.store.snapshot();
        if snap.selected_endpoint != Some(endpoint) {
            return Vec::new();
        }
        snap.containers.unwrapped_value().cloned().unwrap_or_default()
    }
}

fn find<'a>(pool: &'a [Container], id: &str, name: Option<&str>, by_name: bool) -> Option<&'a Container> {
    pool.iter().find(|c| c.id == id).or_else(|| {
        if by_name {
            name.and_then(|n| pool.iter().find(|c| c.has_name(n)))
        } else {
            None
        }
    })
}

#[async_trait::async_trait]
impl ContainerLookup for InProcApi {
    async fn resolve(&self, endpoint: EndpointId, keys: &[String], opts: LookupOptions) -> BerthResult<Vec<ContainerEntity>> {
        let t0 = Instant::now();
        let wanted: Vec<(String, Option<String>)> = keys.iter().map(|k| expand_key(k)).collect();
        let names: Vec<String> = wanted.iter().filter_map(|(_, n)| n.clone()).collect();
        let filters = if opts.resolve_by_name && !names.is_empty() {
            FetchFilters::by_name(names)
        } else {
            FetchFilters::by_id(wanted.iter().map(|(id, _)| id.clone()))
        };

        match self.store.fetch_containers(Some(endpoint), &filters).await {
            Ok(listed) => {
                let out: Vec<ContainerEntity> = wanted
                    .iter()
                    .filter_map(|(id, name)| find(&listed, id, name.as_deref(), opts.resolve_by_name))
                    .map(ContainerEntity::from)
                    .collect();
                info!(endpoint, keys = keys.len(), resolved = out.len(), took_ms = %t0.elapsed().as_millis(), "api: resolve ok");
                Ok(out)
            }
            Err(e) if e.is_network() && opts.resolve_offline => {
                let cache = self.cached(endpoint);
                metrics::counter!("api_resolve_offline_total", 1u64);
                warn!(endpoint, error = %e, cached = cache.len(), "api: resolve offline");
                Ok(wanted
                    .into_iter()
                    .map(|(id, name)| match find(&cache, &id, name.as_deref(), opts.resolve_by_name) {
                        Some(c) => ContainerEntity::from(c),
                        None => ContainerEntity::new(id, name),
                    })
                    .collect())
            }
            Err(e) => Err(e),
        }
    }

    async fn matching(&self, endpoint: EndpointId, text: &str) -> Vec<ContainerEntity> {
        let listed = match self.store.fetch_containers(Some(endpoint), &FetchFilters::default()).await {
            Ok(v) => v,
            Err(e) => {
                warn!(endpoint, error = %e, "api: matching failed");
                return Vec::new();
            }
        };
        let narrowed = berth_search::filter(&listed, text, &[]);
        let hits = berth_search::rank(&narrowed, text);
        let out: Vec<ContainerEntity> = hits.iter().map(|h| ContainerEntity::from(&narrowed[h.doc])).collect();
        info!(endpoint, text = %text, matched = out.len(), "api: matching ok");
        out
    }

    async fn suggested(&self, endpoint: EndpointId) -> BerthResult<Vec<ContainerEntity>> {
        let listed = self.store.fetch_containers(Some(endpoint), &FetchFilters::default()).await?;
        Ok(listed.iter().map(ContainerEntity::from).collect())
    }
}

//! In-memory transport over a serde-loadable world, with latency and failure injection.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use berth_core::{
    BerthError, BerthResult, Container, ContainerDetails, ContainerStateDetails, Endpoint, EndpointId,
    ExecuteAction, FetchFilters, LogRequest, LogText, TransportError,
};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Transport;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureWorld {
    #[serde(default)]
    pub endpoints: Vec<FixtureEndpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureEndpoint {
    #[serde(flatten)]
    pub endpoint: Endpoint,
    #[serde(default)]
    pub containers: Vec<FixtureContainer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureContainer {
    #[serde(flatten)]
    pub container: Container,
    #[serde(default)]
    pub details: Option<ContainerDetails>,
    #[serde(default)]
    pub logs: Vec<LogLine>,
}

impl From<Container> for FixtureContainer {
    fn from(container: Container) -> Self {
        Self { container, details: None, logs: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    #[serde(default)]
    pub ts: Option<String>,
    pub line: String,
}

/// Transport operations, used to address injected latency and failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    ListEndpoints,
    ListContainers,
    Inspect,
    Execute,
    Logs,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::ListEndpoints => "list_endpoints",
            Op::ListContainers => "list_containers",
            Op::Inspect => "inspect",
            Op::Execute => "execute",
            Op::Logs => "logs",
        }
    }
}

#[derive(Default)]
struct Inner {
    world: FixtureWorld,
    failures: FxHashMap<Op, VecDeque<BerthError>>,
    delays: FxHashMap<(Op, Option<String>), Duration>,
    calls: FxHashMap<Op, usize>,
}

/// Fixture-backed [`Transport`]. Responses reflect the world as of call start; injected
/// delays are applied afterwards, like a slow server answering an earlier request.
#[derive(Default)]
pub struct FixtureTransport {
    inner: Mutex<Inner>,
}

impl FixtureTransport {
    pub fn new(world: FixtureWorld) -> Self {
        Self { inner: Mutex::new(Inner { world, ..Default::default() }) }
    }

    /// Load a JSON world file.
    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading fixture {}", path))?;
        let world: FixtureWorld = serde_json::from_str(&raw).with_context(|| format!("parsing fixture {}", path))?;
        debug!(path, endpoints = world.endpoints.len(), "fixture loaded");
        Ok(Self::new(world))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn world(&self) -> FixtureWorld {
        self.lock().world.clone()
    }

    pub fn set_endpoints(&self, endpoints: Vec<Endpoint>) {
        let mut inner = self.lock();
        let mut old: FxHashMap<EndpointId, Vec<FixtureContainer>> = inner
            .world
            .endpoints
            .drain(..)
            .map(|e| (e.endpoint.id, e.containers))
            .collect();
        inner.world.endpoints = endpoints
            .into_iter()
            .map(|endpoint| {
                let containers = old.remove(&endpoint.id).unwrap_or_default();
                FixtureEndpoint { endpoint, containers }
            })
            .collect();
    }

    /// Replace the containers of an endpoint, adding the endpoint if needed.
    pub fn set_containers(&self, endpoint_id: EndpointId, containers: Vec<Container>) {
        let mut inner = self.lock();
        let containers: Vec<FixtureContainer> = containers.into_iter().map(FixtureContainer::from).collect();
        match inner.world.endpoints.iter_mut().find(|e| e.endpoint.id == endpoint_id) {
            Some(e) => e.containers = containers,
            None => inner.world.endpoints.push(FixtureEndpoint {
                endpoint: Endpoint::new(endpoint_id, format!("endpoint-{}", endpoint_id)),
                containers,
            }),
        }
    }

    /// Queue a failure returned by the next call of `op`.
    pub fn fail_next(&self, op: Op, error: BerthError) {
        self.lock().failures.entry(op).or_default().push_back(error);
    }

    /// Delay every call of `op`.
    pub fn set_delay(&self, op: Op, delay: Duration) {
        self.lock().delays.insert((op, None), delay);
    }

    /// Delay calls of `op` addressed to `key` (an endpoint id for listings, a container id otherwise).
    pub fn set_delay_for(&self, op: Op, key: impl Into<String>, delay: Duration) {
        self.lock().delays.insert((op, Some(key.into())), delay);
    }

    pub fn clear_delays(&self) {
        self.lock().delays.clear();
    }

    pub fn calls(&self, op: Op) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Record the call, pop a queued failure and compute the delay for `key`.
    fn begin(&self, op: Op, key: Option<&str>) -> (Option<BerthError>, Duration) {
        let mut inner = self.lock();
        *inner.calls.entry(op).or_insert(0) += 1;
        metrics::counter!("fixture_calls_total", 1u64, "op" => op.as_str());
        let failure = inner.failures.get_mut(&op).and_then(VecDeque::pop_front);
        let global = inner.delays.get(&(op, None)).copied().unwrap_or_default();
        let keyed = key
            .and_then(|k| inner.delays.get(&(op, Some(k.to_string()))).copied())
            .unwrap_or_default();
        (failure, global.max(keyed))
    }

    async fn respond<T>(&self, op: Op, key: Option<&str>, answer: impl FnOnce(&mut Inner) -> BerthResult<T>) -> BerthResult<T> {
        let (failure, delay) = self.begin(op, key);
        let result = match failure {
            Some(e) => Err(e),
            None => answer(&mut self.lock()),
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        debug!(op = op.as_str(), key = ?key, ok = result.is_ok(), "fixture: responded");
        result
    }
}

fn not_found(what: String) -> BerthError {
    BerthError::Transport(TransportError::Status { code: 404, message: what })
}

fn find_endpoint(inner: &mut Inner, endpoint_id: EndpointId) -> BerthResult<&mut FixtureEndpoint> {
    inner
        .world
        .endpoints
        .iter_mut()
        .find(|e| e.endpoint.id == endpoint_id)
        .ok_or_else(|| not_found(format!("endpoint {} not found", endpoint_id)))
}

fn find_container<'a>(inner: &'a mut Inner, container_id: &str, endpoint_id: EndpointId) -> BerthResult<&'a mut FixtureContainer> {
    find_endpoint(inner, endpoint_id)?
        .containers
        .iter_mut()
        .find(|c| c.container.id == container_id)
        .ok_or_else(|| not_found(format!("container {} not found", container_id)))
}

fn synthesize_details(c: &Container) -> ContainerDetails {
    ContainerDetails {
        id: c.id.clone(),
        name: c.names.first().cloned(),
        image: c.image.clone(),
        created: None,
        state: ContainerStateDetails {
            status: c.state,
            running: c.state.map(|s| s.is_running()).unwrap_or(false),
            paused: c.state == Some(berth_core::ContainerState::Paused),
            restarting: c.state == Some(berth_core::ContainerState::Restarting),
            ..Default::default()
        },
        mounts: Vec::new(),
        env: Vec::new(),
        labels: c.labels.clone(),
    }
}

#[async_trait::async_trait]
impl Transport for FixtureTransport {
    async fn list_endpoints(&self) -> BerthResult<Vec<Endpoint>> {
        self.respond(Op::ListEndpoints, None, |inner| {
            Ok(inner.world.endpoints.iter().map(|e| e.endpoint.clone()).collect())
        })
        .await
    }

    async fn list_containers(&self, endpoint_id: EndpointId, filters: &FetchFilters) -> BerthResult<Vec<Container>> {
        let key = endpoint_id.to_string();
        self.respond(Op::ListContainers, Some(&key), |inner| {
            let ep = find_endpoint(inner, endpoint_id)?;
            Ok(ep
                .containers
                .iter()
                .map(|c| &c.container)
                .filter(|c| filters.matches(c))
                .cloned()
                .collect())
        })
        .await
    }

    async fn inspect_container(&self, container_id: &str, endpoint_id: EndpointId) -> BerthResult<ContainerDetails> {
        self.respond(Op::Inspect, Some(container_id), |inner| {
            let c = find_container(inner, container_id, endpoint_id)?;
            Ok(c.details.clone().unwrap_or_else(|| synthesize_details(&c.container)))
        })
        .await
    }

    async fn execute(&self, action: ExecuteAction, container_id: &str, endpoint_id: EndpointId) -> BerthResult<()> {
        self.respond(Op::Execute, Some(container_id), |inner| {
            let c = find_container(inner, container_id, endpoint_id)?;
            if !action.is_available_for(c.container.state) {
                let state = c.container.state.map(|s| s.as_str()).unwrap_or("unknown");
                return Err(BerthError::ActionRejected {
                    action,
                    container_id: container_id.to_string(),
                    reason: format!("container is {}", state),
                });
            }
            let next = action.resulting_state();
            c.container.state = Some(next);
            c.container.status = Some(next.as_str().to_string());
            if let Some(d) = c.details.as_mut() {
                d.state.status = Some(next);
                d.state.running = next.is_running();
                d.state.paused = next == berth_core::ContainerState::Paused;
            }
            Ok(())
        })
        .await
    }

    async fn fetch_logs(&self, container_id: &str, endpoint_id: EndpointId, request: LogRequest) -> BerthResult<LogText> {
        self.respond(Op::Logs, Some(container_id), |inner| {
            let c = find_container(inner, container_id, endpoint_id)?;
            let tail = c.logs.len().saturating_sub(request.line_count as usize);
            let text = c.logs[tail..]
                .iter()
                .map(|l| match (&l.ts, request.include_timestamps) {
                    (Some(ts), true) => format!("{} {}", ts, l.line),
                    _ => l.line.clone(),
                })
                .collect::<Vec<_>>()
                .join("\n");
            Ok(LogText(text))
        })
        .await
    }
}

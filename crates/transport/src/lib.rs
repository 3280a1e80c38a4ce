//! Berth transport seam: the typed async calls the synchronization layer consumes.
//!
//! The HTTP client of the orchestration API implements [`Transport`]; this crate only defines the
//! trait and ships an in-memory [`FixtureTransport`] used by tests and the CLI.

#![forbid(unsafe_code)]

use berth_core::{
    BerthResult, Container, ContainerDetails, Endpoint, EndpointId, ExecuteAction, FetchFilters, LogRequest,
    LogText,
};

mod fixture;

pub use fixture::{FixtureContainer, FixtureEndpoint, FixtureTransport, FixtureWorld, LogLine, Op};

/// Typed remote calls. Implementations own timeouts and retries at the wire level.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn list_endpoints(&self) -> BerthResult<Vec<Endpoint>>;

    async fn list_containers(&self, endpoint_id: EndpointId, filters: &FetchFilters) -> BerthResult<Vec<Container>>;

    async fn inspect_container(&self, container_id: &str, endpoint_id: EndpointId) -> BerthResult<ContainerDetails>;

    /// Mutating call. Fails with `ActionRejected` when the server refuses the transition.
    async fn execute(&self, action: ExecuteAction, container_id: &str, endpoint_id: EndpointId) -> BerthResult<()>;

    async fn fetch_logs(&self, container_id: &str, endpoint_id: EndpointId, request: LogRequest) -> BerthResult<LogText>;
}

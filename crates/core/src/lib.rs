//! Berth core types: endpoints, containers, view state and the error taxonomy.

#![forbid(unsafe_code)]

mod error;
mod model;
mod view_state;

pub use error::{BerthError, BerthResult, ErrorReporter, TracingReporter, TransportError};
pub use model::{
    Container, ContainerDetails, ContainerRef, ContainerState, ContainerStateDetails, Endpoint,
    EndpointId, EndpointStatus, ExecuteAction, FetchFilters, LogRequest, LogText, Mount, MountType,
    Port,
};
pub use view_state::ViewState;

pub mod prelude {
    pub use super::{
        BerthError, BerthResult, Container, ContainerDetails, ContainerRef, ContainerState, Endpoint,
        EndpointId, ExecuteAction, FetchFilters, LogRequest, LogText, ViewState,
    };
}

/// Label carrying the compose project a container belongs to.
pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";
/// Label carrying the swarm stack namespace a container belongs to.
pub const STACK_NAMESPACE_LABEL: &str = "com.docker.stack.namespace";

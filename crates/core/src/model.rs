//! Data model mirrored from the orchestration API.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{COMPOSE_PROJECT_LABEL, STACK_NAMESPACE_LABEL};

/// Server-assigned endpoint identifier.
pub type EndpointId = i64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    Up,
    Down,
    #[default]
    #[serde(other)]
    Unknown,
}

/// A managed remote environment (e.g. a Docker host).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    pub id: EndpointId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: EndpointStatus,
    #[serde(default)]
    pub url: Option<String>,
}

impl Endpoint {
    pub fn new(id: EndpointId, name: impl Into<String>) -> Self {
        Self { id, name: Some(name.into()), status: EndpointStatus::Up, url: None }
    }

    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }
}

/// Container lifecycle states. Declaration order is the presentation order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
}

impl ContainerState {
    pub const ALL: [ContainerState; 7] = [
        ContainerState::Created,
        ContainerState::Running,
        ContainerState::Paused,
        ContainerState::Restarting,
        ContainerState::Removing,
        ContainerState::Exited,
        ContainerState::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Paused => "paused",
            ContainerState::Restarting => "restarting",
            ContainerState::Removing => "removing",
            ContainerState::Exited => "exited",
            ContainerState::Dead => "dead",
        }
    }

    /// Whether the container process exists (running, paused or restarting).
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running | ContainerState::Paused | ContainerState::Restarting)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContainerState::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown container state: {s}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Port {
    pub private: u16,
    #[serde(default)]
    pub public: Option<u16>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
}

/// A workload unit as returned by the container listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Container {
    pub id: String,
    #[serde(default)]
    pub names: SmallVec<[String; 2]>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub state: Option<ContainerState>,
    #[serde(default)]
    pub status: Option<String>,
    /// Creation time, unix seconds.
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<Port>,
    /// Locally synthesized record (cache or deep link), not yet confirmed by the server.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_stored: bool,
}

impl Container {
    pub fn new(id: impl Into<String>, name: impl Into<String>, state: Option<ContainerState>) -> Self {
        let mut names = SmallVec::new();
        names.push(format!("/{}", name.into()));
        Self {
            id: id.into(),
            names,
            image: None,
            state,
            status: None,
            created: None,
            labels: BTreeMap::new(),
            ports: Vec::new(),
            is_stored: false,
        }
    }

    /// Stub for a container known only by id (and maybe name).
    pub fn placeholder(id: impl Into<String>, name: Option<&str>) -> Self {
        let mut names = SmallVec::new();
        if let Some(n) = name {
            names.push(n.to_string());
        }
        Self {
            id: id.into(),
            names,
            image: None,
            state: None,
            status: None,
            created: None,
            labels: BTreeMap::new(),
            ports: Vec::new(),
            is_stored: true,
        }
    }

    /// First name without the leading `/` the engine reports.
    pub fn display_name(&self) -> Option<&str> {
        self.names.first().map(|n| n.trim_start_matches('/'))
    }

    pub fn stack(&self) -> Option<&str> {
        stack_from_labels(&self.labels)
    }

    /// Whether `name` equals one of the container names, ignoring the leading `/`.
    pub fn has_name(&self, name: &str) -> bool {
        let name = name.trim_start_matches('/');
        self.names.iter().any(|n| n.trim_start_matches('/') == name)
    }
}

fn stack_from_labels(labels: &BTreeMap<String, String>) -> Option<&str> {
    labels
        .get(COMPOSE_PROJECT_LABEL)
        .or_else(|| labels.get(STACK_NAMESPACE_LABEL))
        .map(String::as_str)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MountType {
    Bind,
    Volume,
    Tmpfs,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mount {
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub kind: Option<MountType>,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ContainerStateDetails {
    #[serde(default)]
    pub status: Option<ContainerState>,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub restarting: bool,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
}

/// Extended inspection payload, fetched on demand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerDetails {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub state: ContainerStateDetails,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ContainerDetails {
    pub fn stack(&self) -> Option<&str> {
        stack_from_labels(&self.labels)
    }
}

/// Remote lifecycle mutations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExecuteAction {
    Start,
    Stop,
    Restart,
    Pause,
    Unpause,
    Kill,
}

impl ExecuteAction {
    pub const ALL: [ExecuteAction; 6] = [
        ExecuteAction::Unpause,
        ExecuteAction::Start,
        ExecuteAction::Restart,
        ExecuteAction::Pause,
        ExecuteAction::Stop,
        ExecuteAction::Kill,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecuteAction::Start => "start",
            ExecuteAction::Stop => "stop",
            ExecuteAction::Restart => "restart",
            ExecuteAction::Pause => "pause",
            ExecuteAction::Unpause => "unpause",
            ExecuteAction::Kill => "kill",
        }
    }

    /// Actions offered for a container in `state`; `None` means the state is unknown.
    pub fn available_for(state: Option<ContainerState>) -> &'static [ExecuteAction] {
        use ExecuteAction::*;
        match state {
            Some(ContainerState::Created) | Some(ContainerState::Running) => &[Pause, Stop, Restart, Kill],
            Some(ContainerState::Paused) => &[Unpause, Stop, Restart, Kill],
            Some(ContainerState::Restarting) => &[Pause, Stop, Kill],
            Some(ContainerState::Removing) => &[Kill],
            Some(ContainerState::Exited) | Some(ContainerState::Dead) => &[Start],
            None => &ExecuteAction::ALL,
        }
    }

    pub fn is_available_for(&self, state: Option<ContainerState>) -> bool {
        Self::available_for(state).contains(self)
    }

    /// State the container ends up in after the action succeeds.
    pub fn resulting_state(&self) -> ContainerState {
        match self {
            ExecuteAction::Start | ExecuteAction::Restart | ExecuteAction::Unpause => ContainerState::Running,
            ExecuteAction::Pause => ContainerState::Paused,
            ExecuteAction::Stop | ExecuteAction::Kill => ContainerState::Exited,
        }
    }
}

impl fmt::Display for ExecuteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecuteAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExecuteAction::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown action: {s}"))
    }
}

/// Server-side listing filters. OR within a list, AND across lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FetchFilters {
    #[serde(default)]
    pub id: Option<Vec<String>>,
    #[serde(default)]
    pub name: Option<Vec<String>>,
}

impl FetchFilters {
    pub fn by_id(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { id: Some(ids.into_iter().map(Into::into).collect()), name: None }
    }

    pub fn by_name(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { id: None, name: Some(names.into_iter().map(Into::into).collect()) }
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.name.is_none()
    }

    pub fn matches(&self, c: &Container) -> bool {
        let id_ok = self.id.as_ref().map(|ids| ids.iter().any(|id| *id == c.id)).unwrap_or(true);
        let name_ok = self.name.as_ref().map(|names| names.iter().any(|n| c.has_name(n))).unwrap_or(true);
        id_ok && name_ok
    }
}

/// Identity a detail or log screen is bound to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ContainerRef {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// `None` means the currently selected endpoint.
    #[serde(default)]
    pub endpoint_id: Option<EndpointId>,
}

impl ContainerRef {
    pub fn new(id: impl Into<String>, endpoint_id: Option<EndpointId>) -> Self {
        Self { id: id.into(), display_name: None, endpoint_id }
    }

    pub fn for_container(c: &Container, endpoint_id: Option<EndpointId>) -> Self {
        Self { id: c.id.clone(), display_name: c.display_name().map(str::to_string), endpoint_id }
    }
}

/// Parameters of a log retrieval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogRequest {
    pub line_count: u32,
    pub include_timestamps: bool,
}

/// Log output as returned by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LogText(pub String);

impl LogText {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.0.lines()
    }

    pub fn line_count(&self) -> usize {
        self.0.lines().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for LogText {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_trims_engine_slash() {
        let c = Container::new("c1", "web", Some(ContainerState::Running));
        assert_eq!(c.display_name(), Some("web"));
        assert!(c.has_name("web"));
        assert!(c.has_name("/web"));
    }

    #[test]
    fn stack_prefers_compose_project() {
        let mut c = Container::new("c1", "web", None);
        c.labels.insert(STACK_NAMESPACE_LABEL.into(), "swarm".into());
        assert_eq!(c.stack(), Some("swarm"));
        c.labels.insert(COMPOSE_PROJECT_LABEL.into(), "compose".into());
        assert_eq!(c.stack(), Some("compose"));
    }

    #[test]
    fn actions_follow_state() {
        assert_eq!(ExecuteAction::available_for(Some(ContainerState::Exited)), &[ExecuteAction::Start]);
        assert!(ExecuteAction::Unpause.is_available_for(Some(ContainerState::Paused)));
        assert!(!ExecuteAction::Unpause.is_available_for(Some(ContainerState::Running)));
        assert_eq!(ExecuteAction::available_for(None).len(), 6);
    }

    #[test]
    fn filters_and_across_kinds() {
        let c = Container::new("c1", "web", None);
        assert!(FetchFilters::default().matches(&c));
        assert!(FetchFilters::by_id(["c2", "c1"]).matches(&c));
        let f = FetchFilters { id: Some(vec!["c1".into()]), name: Some(vec!["db".into()]) };
        assert!(!f.matches(&c));
    }

    #[test]
    fn state_parses_case_insensitively() {
        assert_eq!("Running".parse::<ContainerState>(), Ok(ContainerState::Running));
        assert!("sleeping".parse::<ContainerState>().is_err());
    }

    #[test]
    fn container_deserializes_with_defaults() {
        let c: Container = serde_json::from_value(serde_json::json!({"id": "abc", "names": ["/x"]})).expect("decode");
        assert_eq!(c.display_name(), Some("x"));
        assert_eq!(c.state, None);
        assert!(!c.is_stored);
    }
}

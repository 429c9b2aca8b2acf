//! # Service Data
//!
//! The persistent record of one unit of requested asynchronous work.
//!
//! A record is built in memory without an identifier, gets its id from the
//! persistence layer on first save, and is then tracked through the
//! [`ServiceState`] lifecycle. Dependencies are full records themselves; while a
//! hierarchy is still in memory they live in `dependencies`, once persisted they
//! are referenced by `dependency_ids`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use crate::state_machine::{
    ServiceEvent, ServiceEventType, ServiceState, StateTransitionResult,
};

/// Identifier assigned by the persistence layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(pub i64);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ServiceId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Where the work of a service is carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingLocation {
    #[default]
    Local,
    Cluster,
}

/// Persistent record of a service request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceData {
    /// Assigned exactly once by the persistence layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ServiceId>,
    #[serde(default)]
    pub parent_service_id: Option<ServiceId>,
    #[serde(default)]
    pub root_service_id: Option<ServiceId>,
    /// Name of the processor this service is dispatched to
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub processing_location: Option<ProcessingLocation>,
    #[serde(default)]
    pub state: ServiceState,
    /// Higher runs first; `None` lets the engine pick one
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub owner: Option<String>,
    pub creation_date: DateTime<Utc>,
    #[serde(default)]
    pub modification_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub process_start_time: Option<DateTime<Utc>>,
    /// Working directory requested for this service
    #[serde(default)]
    pub workspace: Option<String>,
    /// Timeout in milliseconds; `None` or a value `<= 0` disables it
    #[serde(default)]
    pub service_timeout: Option<i64>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub error_path: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub events: Vec<ServiceEvent>,
    #[serde(default)]
    pub dependency_ids: Vec<ServiceId>,
    /// In-memory dependency records, populated before a hierarchy save and by
    /// hierarchy lookups
    #[serde(skip)]
    pub dependencies: Vec<ServiceData>,
}

impl ServiceData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            parent_service_id: None,
            root_service_id: None,
            name: name.into(),
            version: None,
            processing_location: None,
            state: ServiceState::Created,
            priority: None,
            owner: None,
            creation_date: Utc::now(),
            modification_date: None,
            process_start_time: None,
            workspace: None,
            service_timeout: None,
            args: Vec::new(),
            parameters: HashMap::new(),
            output_path: None,
            error_path: None,
            result: None,
            events: Vec::new(),
            dependency_ids: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.service_timeout = Some(timeout_ms);
        self
    }

    pub fn with_state(mut self, state: ServiceState) -> Self {
        self.state = state;
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn with_processing_location(mut self, location: ProcessingLocation) -> Self {
        self.processing_location = Some(location);
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    /// Declare a dependency; persisted ones are referenced by id, in-memory
    /// ones are saved together with this record
    pub fn add_service_dependency(&mut self, dependency: ServiceData) {
        match dependency.id {
            Some(id) => {
                if !self.dependency_ids.contains(&id) {
                    self.dependency_ids.push(id);
                }
                self.dependencies.push(dependency);
            }
            None => self.dependencies.push(dependency),
        }
    }

    pub fn with_dependency(mut self, dependency: ServiceData) -> Self {
        self.add_service_dependency(dependency);
        self
    }

    /// Make this record a child of `parent`, inheriting its root
    pub fn update_parent_service(&mut self, parent: &ServiceData) {
        self.parent_service_id = parent.id;
        self.root_service_id = parent.root_service_id.or(parent.id);
    }

    /// Effective priority used for ordering
    pub fn priority(&self) -> i32 {
        self.priority.unwrap_or(0)
    }

    /// Configured timeout, `None` when the service never times out
    pub fn timeout(&self) -> Option<Duration> {
        match self.service_timeout {
            Some(ms) if ms > 0 => Some(Duration::from_millis(ms as u64)),
            _ => None,
        }
    }

    /// Wall-clock time spent since processing started
    pub fn elapsed_since_start(&self) -> Option<Duration> {
        self.process_start_time
            .map(|start| (Utc::now() - start).to_std().unwrap_or(Duration::ZERO))
    }

    /// Whether the deadline derived from `service_timeout` has passed
    pub fn has_timed_out(&self) -> bool {
        match (self.timeout(), self.elapsed_since_start()) {
            (Some(timeout), Some(elapsed)) => elapsed > timeout,
            _ => false,
        }
    }

    pub fn has_completed(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn has_completed_successfully(&self) -> bool {
        self.state == ServiceState::Successful
    }

    pub fn has_completed_unsuccessfully(&self) -> bool {
        self.state.is_failure()
    }

    pub fn has_been_suspended(&self) -> bool {
        self.state == ServiceState::Suspended
    }

    pub fn has_id(&self) -> bool {
        self.id.is_some()
    }

    /// Move to `target` and record the matching event.
    ///
    /// Fails without touching the record when the move is not allowed.
    pub fn transition_to(
        &mut self,
        target: ServiceState,
        details: impl Into<String>,
    ) -> StateTransitionResult<()> {
        let target = self.state.transition_to(target)?;
        if target != self.state {
            self.state = target;
            self.add_event(ServiceEventType::for_state(target), details);
        }
        self.modification_date = Some(Utc::now());
        Ok(())
    }

    pub fn add_event(&mut self, event_type: ServiceEventType, value: impl Into<String>) {
        self.events.push(ServiceEvent::new(event_type, value));
    }

    /// This record followed by all of its transitive dependencies, each once.
    ///
    /// Records without an id are never deduplicated.
    pub fn hierarchy(&self) -> Vec<&ServiceData> {
        let mut seen: HashSet<ServiceId> = HashSet::new();
        let mut ordered = Vec::new();
        let mut stack: Vec<&ServiceData> = vec![self];
        while let Some(current) = stack.pop() {
            if let Some(id) = current.id {
                if !seen.insert(id) {
                    continue;
                }
            }
            ordered.push(current);
            for dependency in current.dependencies.iter().rev() {
                stack.push(dependency);
            }
        }
        ordered
    }

    /// Dependencies in the hierarchy, excluding this record
    pub fn dependency_hierarchy(&self) -> Vec<&ServiceData> {
        let mut all = self.hierarchy();
        all.remove(0);
        match self.id {
            Some(id) => all.into_iter().filter(|sd| sd.id != Some(id)).collect(),
            None => all,
        }
    }

    /// `<name>_<id>` directory name used for per-service paths
    pub fn service_dir_name(&self) -> String {
        match self.id {
            Some(id) => format!("{}_{}", self.name, id),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for ServiceData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{}#{} [{}]", self.name, id, self.state),
            None => write!(f, "{} [{}]", self.name, self.state),
        }
    }
}

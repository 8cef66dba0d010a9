//! Runtime-agnostic container types and the [`ContainerRuntime`] trait.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::RuntimeError;

/// One entry from a container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    /// Container id, the engine handle stored on a job.
    pub id: String,
    /// Container names without the leading `/` Docker adds.
    pub names: Vec<String>,
    /// Raw state string, e.g. `running` or `exited`.
    pub state: Option<String>,
}

/// Everything needed to create and start one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Unique container name.
    pub name: String,
    /// Image reference; pulled first if missing locally.
    pub image: String,
    /// Environment as `(KEY, value)` pairs, in order.
    pub env: Vec<(String, String)>,
    /// Command arguments for the image entrypoint.
    pub cmd: Vec<String>,
    /// Container labels.
    pub labels: HashMap<String, String>,
}

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

/// Result of inspecting a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitStatus {
    /// Lifecycle state as reported by the runtime.
    pub state: UnitState,
    /// Exit code, meaningful once the container has exited.
    pub exit_code: Option<i64>,
    /// The container's health check reports `unhealthy`.
    pub unhealthy: bool,
}

impl UnitStatus {
    /// Healthy status in `state` with no exit code.
    pub fn new(state: UnitState) -> Self {
        Self {
            state,
            exit_code: None,
            unhealthy: false,
        }
    }

    pub fn running() -> Self {
        Self::new(UnitState::Running)
    }

    /// Exited with `code`.
    pub fn exited(code: i64) -> Self {
        Self {
            state: UnitState::Exited,
            exit_code: Some(code),
            unhealthy: false,
        }
    }
}

/// The operations the dispatcher performs on its execution units.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List containers whose name contains `name_filter`.
    ///
    /// With `all` set, stopped containers are included as well.
    async fn list(&self, name_filter: &str, all: bool)
        -> Result<Vec<ContainerSummary>, RuntimeError>;

    /// Create and start a container. Returns the container id.
    async fn launch(&self, spec: &LaunchSpec) -> Result<String, RuntimeError>;

    /// Inspect a container; `Ok(None)` if it does not exist.
    async fn inspect(&self, id: &str) -> Result<Option<UnitStatus>, RuntimeError>;

    /// Stop a container. Stopping an already stopped container succeeds.
    async fn stop(&self, id: &str) -> Result<(), RuntimeError>;

    /// Remove a stopped container.
    async fn remove(&self, id: &str) -> Result<(), RuntimeError>;
}

//! Scripted in-memory [`ContainerRuntime`] for tests.
//!
//! Containers launched through [`FakeRuntime`] report the statuses queued
//! with [`FakeRuntime::script_polls`], one per `inspect`, repeating the last
//! one once the script runs dry.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::RuntimeError;
use crate::runtime::{ContainerRuntime, ContainerSummary, LaunchSpec, UnitState, UnitStatus};

#[derive(Debug, Clone)]
struct FakeContainer {
    id: String,
    name: String,
    status: UnitStatus,
    script: VecDeque<UnitStatus>,
}

#[derive(Debug, Default)]
struct FakeState {
    containers: Vec<FakeContainer>,
    next_script: VecDeque<UnitStatus>,
    launch_error: Option<String>,
    list_error: Option<String>,
    launched: Vec<LaunchSpec>,
    stopped: Vec<String>,
    removed: Vec<String>,
    inspections: usize,
    next_id: u64,
}

/// In-memory container runtime. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an existing container, as if left over from earlier work.
    pub fn add_container(&self, id: &str, name: &str, status: UnitStatus) {
        self.lock().containers.push(FakeContainer {
            id: id.to_string(),
            name: name.to_string(),
            status,
            script: VecDeque::new(),
        });
    }

    /// Statuses the next launched container reports on successive inspects.
    pub fn script_polls(&self, statuses: impl IntoIterator<Item = UnitStatus>) {
        self.lock().next_script = statuses.into_iter().collect();
    }

    /// Make the next `launch` fail with a daemon error.
    pub fn fail_next_launch(&self, message: &str) {
        self.lock().launch_error = Some(message.to_string());
    }

    /// Make the next `list` fail with a daemon error.
    pub fn fail_next_list(&self, message: &str) {
        self.lock().list_error = Some(message.to_string());
    }

    pub fn launched(&self) -> Vec<LaunchSpec> {
        self.lock().launched.clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.lock().stopped.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.lock().removed.clone()
    }

    pub fn inspections(&self) -> usize {
        self.lock().inspections
    }

    /// Ids of containers that currently exist.
    pub fn container_ids(&self) -> Vec<String> {
        self.lock().containers.iter().map(|c| c.id.clone()).collect()
    }
}

fn server_error(message: String) -> RuntimeError {
    RuntimeError::Docker(bollard::errors::Error::DockerResponseServerError {
        status_code: 500,
        message,
    })
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list(
        &self,
        name_filter: &str,
        all: bool,
    ) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let mut state = self.lock();
        if let Some(message) = state.list_error.take() {
            return Err(server_error(message));
        }

        Ok(state
            .containers
            .iter()
            .filter(|c| c.name.contains(name_filter))
            .filter(|c| all || c.status.state == UnitState::Running)
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                names: vec![c.name.clone()],
                state: Some(format!("{:?}", c.status.state).to_lowercase()),
            })
            .collect())
    }

    async fn launch(&self, spec: &LaunchSpec) -> Result<String, RuntimeError> {
        let mut state = self.lock();
        if let Some(message) = state.launch_error.take() {
            return Err(server_error(message));
        }

        state.next_id += 1;
        let id = format!("fake{:04}", state.next_id);
        let script = std::mem::take(&mut state.next_script);
        state.containers.push(FakeContainer {
            id: id.clone(),
            name: spec.name.clone(),
            status: UnitStatus::running(),
            script,
        });
        state.launched.push(spec.clone());
        Ok(id)
    }

    async fn inspect(&self, id: &str) -> Result<Option<UnitStatus>, RuntimeError> {
        let mut state = self.lock();
        state.inspections += 1;

        let Some(container) = state.containers.iter_mut().find(|c| c.id == id) else {
            return Ok(None);
        };
        if let Some(next) = container.script.pop_front() {
            container.status = next;
        }
        Ok(Some(container.status))
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        let Some(container) = state.containers.iter_mut().find(|c| c.id == id) else {
            return Err(RuntimeError::NotFound(id.to_string()));
        };
        if container.status.state == UnitState::Running {
            container.status = UnitStatus::exited(143);
        }
        container.script.clear();
        state.stopped.push(id.to_string());
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        let before = state.containers.len();
        state.containers.retain(|c| c.id != id);
        if state.containers.len() == before {
            return Err(RuntimeError::NotFound(id.to_string()));
        }
        state.removed.push(id.to_string());
        Ok(())
    }
}

//! Lifecycle of a single processing container.
//!
//! [`Runner::launch`] starts one execution unit for a job and hands back a
//! [`RunningUnit`] whose [`id`](RunningUnit::id) is the engine handle the
//! monitor persists straight away. Completion is observed by polling
//! [`RunningUnit::is_successful`], which never blocks.

use std::collections::HashMap;
use std::sync::Arc;

use trackq_core::types::DbId;
use trackq_docker::{ContainerRuntime, ContainerSummary, LaunchSpec, RuntimeError, UnitState, UnitStatus};

/// Label marking containers owned by trackq.
pub const MANAGED_BY_LABEL: &str = "managed_by";
/// Value of [`MANAGED_BY_LABEL`] on runner containers.
pub const MANAGED_BY_VALUE: &str = "trackq";
/// Label carrying the job id a container works for.
pub const JOB_ID_LABEL: &str = "job_id";

/// Static runner settings.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Image the processing container runs.
    pub image: String,
    /// Name prefix shared by every runner container. Listing by this prefix
    /// is how the monitor finds active units.
    pub name_prefix: String,
}

/// Inputs for one processing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Job the run belongs to; part of the container name and labels.
    pub job_id: DbId,
    /// Where the container writes its results.
    pub output: String,
    /// Media URL to process.
    pub input_url: String,
    /// Model reference.
    pub model: String,
    /// Auxiliary tracker configuration reference.
    pub track_config: String,
    /// Processing arguments, passed through untouched.
    pub args: String,
}

/// Outcome of a single completion check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Still running, or in a state that may yet change.
    Pending,
    /// Exited with code 0.
    Success,
    /// Exited non-zero, died, went unhealthy or disappeared.
    Failure,
}

/// The runtime refused to create or start the container.
#[derive(Debug, thiserror::Error)]
#[error("Failed to launch runner for job {job_id}: {source}")]
pub struct LaunchError {
    /// Job whose container failed to start.
    pub job_id: DbId,
    /// Runtime failure behind it.
    #[source]
    pub source: RuntimeError,
}

/// Launches and tracks processing containers.
#[derive(Clone)]
pub struct Runner {
    runtime: Arc<dyn ContainerRuntime>,
    config: RunnerConfig,
}

impl Runner {
    /// Runner launching containers on `runtime`.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: RunnerConfig) -> Self {
        Self { runtime, config }
    }

    /// Settings this runner was built with.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// All runner containers, stopped ones included.
    pub async fn units(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        self.runtime.list(&self.config.name_prefix, true).await
    }

    /// Start a container for `request`.
    ///
    /// Failures are returned as-is; nothing is retried here.
    pub async fn launch(&self, request: &RunRequest) -> Result<RunningUnit, LaunchError> {
        let spec = self.launch_spec(request);

        let id = self
            .runtime
            .launch(&spec)
            .await
            .map_err(|source| LaunchError {
                job_id: request.job_id,
                source,
            })?;

        tracing::info!(
            job_id = request.job_id,
            engine = %id,
            name = %spec.name,
            "Runner launched",
        );

        Ok(RunningUnit {
            id,
            runtime: Arc::clone(&self.runtime),
        })
    }

    /// Handle for a container launched earlier, by its stored id.
    pub fn attach(&self, engine: &str) -> RunningUnit {
        RunningUnit {
            id: engine.to_string(),
            runtime: Arc::clone(&self.runtime),
        }
    }

    /// Stop and remove a container by its stored id.
    ///
    /// Returns `false` if the container no longer exists.
    pub async fn reap(&self, engine: &str) -> Result<bool, RuntimeError> {
        self.attach(engine).cleanup().await
    }

    fn launch_spec(&self, request: &RunRequest) -> LaunchSpec {
        let name = format!(
            "{}-{}-{}",
            self.config.name_prefix,
            request.job_id,
            chrono::Utc::now().timestamp()
        );

        let env = vec![
            ("JOB_ID".to_string(), request.job_id.to_string()),
            ("OUTPUT_S3".to_string(), request.output.clone()),
            ("VIDEO_URL".to_string(), request.input_url.clone()),
            ("MODEL_S3".to_string(), request.model.clone()),
            ("TRACK_S3".to_string(), request.track_config.clone()),
            ("ARGS".to_string(), request.args.clone()),
        ];

        let labels = HashMap::from([
            (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
            (JOB_ID_LABEL.to_string(), request.job_id.to_string()),
        ]);

        LaunchSpec {
            name,
            image: self.config.image.clone(),
            env,
            cmd: request.args.split_whitespace().map(str::to_string).collect(),
            labels,
        }
    }
}

/// A launched container.
#[derive(Clone)]
pub struct RunningUnit {
    id: String,
    runtime: Arc<dyn ContainerRuntime>,
}

impl std::fmt::Debug for RunningUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningUnit").field("id", &self.id).finish()
    }
}

impl RunningUnit {
    /// Container id; stable for the container's lifetime.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Check once whether the container finished, and how.
    pub async fn is_successful(&self) -> Result<Completion, RuntimeError> {
        let status = self.runtime.inspect(&self.id).await?;
        Ok(completion(status))
    }

    /// Stop and remove the container.
    ///
    /// Returns `false` if it was already gone.
    pub async fn cleanup(&self) -> Result<bool, RuntimeError> {
        match self.runtime.stop(&self.id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        }
        match self.runtime.remove(&self.id).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Map an inspected container to a completion state.
///
/// A container that vanished, died, or reports unhealthy has failed; one
/// that exited counts as successful only with exit code 0.
pub fn completion(status: Option<UnitStatus>) -> Completion {
    let Some(status) = status else {
        return Completion::Failure;
    };
    if status.unhealthy {
        return Completion::Failure;
    }

    match status.state {
        UnitState::Created | UnitState::Running | UnitState::Paused | UnitState::Restarting => {
            Completion::Pending
        }
        UnitState::Exited if status.exit_code == Some(0) => Completion::Success,
        UnitState::Exited | UnitState::Dead | UnitState::Removing => Completion::Failure,
        UnitState::Unknown => Completion::Pending,
    }
}

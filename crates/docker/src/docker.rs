//! [`ContainerRuntime`] over the Docker Engine API.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerState, ContainerStateStatusEnum, HealthStatusEnum, HostConfig};
use bollard::Docker;
use futures::TryStreamExt;

use crate::error::RuntimeError;
use crate::runtime::{ContainerRuntime, ContainerSummary, LaunchSpec, UnitState, UnitStatus};

/// Seconds Docker waits after SIGTERM before killing a stopped container.
const STOP_TIMEOUT_SECS: i64 = 10;

/// Docker-backed container runtime.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the local defaults (`DOCKER_HOST` or the unix socket).
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    /// Pull `image` unless it is already present locally.
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(e) if is_status(&e, 404) => {}
            Err(e) => return Err(e.into()),
        }

        tracing::info!(image, "Pulling runner image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        self.docker
            .create_image(Some(options), None, None)
            .try_collect::<Vec<_>>()
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list(
        &self,
        name_filter: &str,
        all: bool,
    ) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name_filter.to_string()]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all,
                filters,
                ..Default::default()
            }))
            .await?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let names = c
                    .names
                    .unwrap_or_default()
                    .into_iter()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .collect();
                Some(ContainerSummary {
                    id,
                    names,
                    state: c.state,
                })
            })
            .collect())
    }

    async fn launch(&self, spec: &LaunchSpec) -> Result<String, RuntimeError> {
        self.ensure_image(&spec.image).await?;

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            env: Some(env),
            labels: Some(spec.labels.clone()),
            host_config: Some(HostConfig {
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await?;

        if let Err(e) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            // Leave no half-launched unit behind to block the slot.
            if let Err(remove_err) = self
                .docker
                .remove_container(
                    &created.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await
            {
                tracing::warn!(
                    container_id = %created.id,
                    error = %remove_err,
                    "Failed to remove container after start failure",
                );
            }
            return Err(e.into());
        }

        tracing::info!(container_id = %created.id, name = %spec.name, "Container started");
        Ok(created.id)
    }

    async fn inspect(&self, id: &str) -> Result<Option<UnitStatus>, RuntimeError> {
        match self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => Ok(Some(
                info.state
                    .as_ref()
                    .map(unit_status)
                    .unwrap_or_else(|| UnitStatus::new(UnitState::Unknown)),
            )),
            Err(e) if is_status(&e, 404) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .stop_container(id, Some(StopContainerOptions { t: STOP_TIMEOUT_SECS }))
            .await
        {
            Ok(()) => Ok(()),
            // 304: already stopped.
            Err(e) if is_status(&e, 304) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(RuntimeError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(RuntimeError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_status(error: &BollardError, code: u16) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError { status_code, .. } if *status_code == code
    )
}

/// Translate Docker's container state into a [`UnitStatus`].
pub(crate) fn unit_status(state: &ContainerState) -> UnitStatus {
    let unit_state = match state.status {
        Some(ContainerStateStatusEnum::CREATED) => UnitState::Created,
        Some(ContainerStateStatusEnum::RUNNING) => UnitState::Running,
        Some(ContainerStateStatusEnum::PAUSED) => UnitState::Paused,
        Some(ContainerStateStatusEnum::RESTARTING) => UnitState::Restarting,
        Some(ContainerStateStatusEnum::REMOVING) => UnitState::Removing,
        Some(ContainerStateStatusEnum::EXITED) => UnitState::Exited,
        Some(ContainerStateStatusEnum::DEAD) => UnitState::Dead,
        _ => UnitState::Unknown,
    };

    let unhealthy = matches!(
        state.health.as_ref().and_then(|h| h.status.as_ref()),
        Some(HealthStatusEnum::UNHEALTHY)
    );

    UnitStatus {
        state: unit_state,
        exit_code: state.exit_code,
        unhealthy,
    }
}

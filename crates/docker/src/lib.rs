//! Container runtime client.
//!
//! The dispatcher only needs five things from a container runtime: list
//! units by name, launch one, inspect it, stop it, and remove it.
//! [`ContainerRuntime`] is that surface; [`DockerRuntime`] implements it
//! against the Docker Engine API via `bollard`.
//!
//! Runtime state is never authoritative. A container recorded in the job
//! store may already be gone, so lookups report absence as a value
//! (`Ok(None)`) or as [`RuntimeError::NotFound`], never as a panic.

pub mod docker;
pub mod error;
pub mod runtime;

#[cfg(any(test, feature = "testing"))]
pub mod fake;

pub use docker::DockerRuntime;
pub use error::RuntimeError;
pub use runtime::{ContainerRuntime, ContainerSummary, LaunchSpec, UnitState, UnitStatus};

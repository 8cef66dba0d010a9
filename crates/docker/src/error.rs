/// Errors from the container runtime layer.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The referenced container does not exist (any more).
    #[error("Container not found: {0}")]
    NotFound(String),

    /// Any other failure reported by the Docker daemon or the transport.
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),
}

impl RuntimeError {
    /// Whether the error only says the container is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

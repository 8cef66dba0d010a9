/// Domain errors shared across crates.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A media URL cannot be turned into an output location.
    #[error("Invalid media URL {url}: {reason}")]
    InvalidMediaUrl { url: String, reason: String },

    /// A status id outside the known set.
    #[error("Unknown status id: {0}")]
    UnknownStatus(i16),
}

use thiserror::Error;

/// Errors surfaced outside a streaming session.
///
/// In-session failures (peer gone, keep-alive expiry) never cross a task
/// boundary as values; they close the owning stream and the closure cascades
/// to the peer tasks. What remains are startup and configuration problems,
/// which are fatal.
#[derive(Error, Debug)]
pub enum FabricError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type FabricResult<T> = Result<T, FabricError>;

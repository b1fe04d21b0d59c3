use crate::session::SessionId;

/// Errors surfaced by the session registry to the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TranscriptionError {
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("Session already exists: {0}")]
    SessionExists(SessionId),

    #[error("Buffer underrun: requested {requested} samples, {available} available")]
    BufferUnderrun { requested: usize, available: usize },
}

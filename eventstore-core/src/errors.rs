use thiserror::Error;

/// Errors surfaced by the stream store adapter, the topic engine, and the
/// subscription multiplexer.
///
/// `Timeout` is deliberately absent: a blocking read timing out resolves to
/// an empty batch inside the adapter (spec §4.A/§7) and never reaches here
/// as an `Err`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("already subscribed: {0}")]
    AlreadySubscribed(String),
    #[error("invalid argument: {0}")]
    Invalid(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl StoreError {
    pub fn to_status(&self) -> tonic::Status {
        use tonic::Code;
        match self {
            StoreError::NotFound(msg) => tonic::Status::new(Code::NotFound, msg.clone()),
            StoreError::BackendUnavailable(msg) => {
                tonic::Status::new(Code::Unavailable, msg.clone())
            }
            StoreError::Conflict(msg) => tonic::Status::new(Code::Aborted, msg.clone()),
            StoreError::AlreadySubscribed(msg) => {
                tonic::Status::new(Code::AlreadyExists, msg.clone())
            }
            StoreError::Invalid(msg) => tonic::Status::new(Code::InvalidArgument, msg.clone()),
            StoreError::Internal(err) => tonic::Status::new(Code::Internal, err.to_string()),
        }
    }
}

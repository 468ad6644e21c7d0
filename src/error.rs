use thiserror::Error;

use crate::adapter::AdapterError;

#[derive(Error, Debug)]
pub enum MtError {
    #[error("Corrupt translation message: {0}")]
    CorruptMessage(#[from] prost::DecodeError),

    #[error("Message file for request {request_id} is missing")]
    MissingMessage { request_id: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid base64 payload: {0}")]
    Armor(#[from] base64::DecodeError),

    #[error("Invalid request id: {0:?}")]
    InvalidRequestId(String),

    #[error("Invalid language code: {0:?}")]
    InvalidLanguage(String),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Job already registered: {0}")]
    DuplicateJob(String),

    #[error("Worker is at capacity ({running} running jobs)")]
    WorkerBusy { running: usize },

    #[error("Failed to spawn isolated execution: {0}")]
    Spawn(String),

    #[error("Invalid adapter spec: {0}")]
    AdapterSpec(#[from] serde_json::Error),

    #[error("Worker {worker} refused request {request_id}")]
    StartRejected { worker: String, request_id: String },

    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    #[error("Malformed worker reply: {0}")]
    RpcReply(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Adapter error: {0}")]
    Adapter(#[from] Box<AdapterError>),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, MtError>;

impl From<AdapterError> for MtError {
    fn from(err: AdapterError) -> Self {
        MtError::Adapter(Box::new(err))
    }
}

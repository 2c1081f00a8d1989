use std::{io, time::Duration};
use thiserror::Error;

/// Ошибки уровня пула: сама задача не выполнилась или её результат потерян
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum SpawnError {
    #[error("task panicked: {0}")]
    Panic(String),
    #[error("result channel closed before the task reported")]
    ChannelClosed,
    #[error("timed out waiting for the task")]
    Timeout,
    #[error("task cancelled")]
    Cancelled,
    #[error("pool is shutting down")]
    ShuttingDown,
}

/// Ошибка одного WorkUnit. Всегда остаётся внутри юнита и попадает в FailureSink
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("failed to acquire {resource}: {source}")]
    ResourceAcquisition {
        resource: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("unit panicked: {0}")]
    Panicked(String),
    #[error("unit cancelled before reaching a terminal state")]
    Cancelled,
    /// Пул уже не принимал задачи, юнит не запускался
    #[error("unit rejected: executor is shutting down")]
    Rejected,
}

impl UnitError {
    pub fn kind(&self) -> &'static str {
        match self {
            UnitError::ResourceAcquisition { .. } => "resource_acquisition",
            UnitError::Read(_) => "read",
            UnitError::Fetch(_) => "fetch",
            UnitError::Panicked(_) => "panic",
            UnitError::Cancelled => "cancelled",
            UnitError::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Error)]
#[error("read failed after {records_committed} records: {source}")]
pub struct ReadError {
    pub records_committed: usize,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("request to {url} timed out")]
    Timeout { url: String },
}

impl FetchError {
    #[inline]
    pub fn is_status(&self) -> bool {
        matches!(self, FetchError::Status { .. })
    }
}

/// CompletionBarrier не закрылся за отведённое время
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{pending} units still pending after {waited:?}")]
pub struct BarrierTimeout {
    pub pending: usize,
    pub waited: Duration,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShutdownError {
    #[error("forced termination: {pending} units still running after grace period {grace:?}")]
    ForcedTermination { pending: usize, grace: Duration },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
    #[error("failed to read config file: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

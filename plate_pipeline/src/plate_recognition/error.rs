use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A worker channel disconnected outside of shutdown. Fatal: the
    /// orchestrator stops all workers and surfaces this to its caller.
    #[error("{worker} channel closed unexpectedly")]
    ChannelClosed { worker: String },

    /// A worker failed to report within its bound. Recoverable: the worker is
    /// restarted and its contribution dropped for the cycle.
    #[error("{worker} did not report within {timeout:?}")]
    WorkerTimeout { worker: String, timeout: Duration },

    #[error("frame source error: {0}")]
    Source(String),

    #[error("worker spawn failed: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("result sink error: {0}")]
    Sink(#[from] std::io::Error),
}

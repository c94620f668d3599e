use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("a primary connector is required")]
    PrimaryConnectorRequired,

    #[error("the worker has already been started")]
    AlreadyStarted,

    #[error("at least one queue with a polling interval is required")]
    QueueSettingsRequired,

    #[error("could not enqueue the job using any connector")]
    AllConnectorsFailed,

    #[error("could not enqueue {} batch entries using any connector", .remaining.len())]
    BatchRemainder { remaining: Vec<String> },

    #[error("shutdown timed out before active jobs drained")]
    ShutdownTimedOut(#[from] tokio::time::error::Elapsed),
}

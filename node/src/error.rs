use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("network error: {0}")]
    Network(#[from] witness_network::NetworkError),

    #[error("election error: {0}")]
    Election(#[from] witness_election::ElectionError),

    #[error("config error: {0}")]
    Config(String),

    #[error("identity key error: {0}")]
    Identity(String),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("logging error: {0}")]
    Logging(String),

    #[error("node already started")]
    AlreadyStarted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("shutdown timeout")]
    ShutdownTimeout,
}

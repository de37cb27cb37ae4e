use thiserror::Error;

#[derive(Error, Debug)]
pub enum HearthError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Probe failure: {0}")]
    Probe(String),

    #[error("Replication failure: {0}")]
    Replication(String),

    #[error("No available backend servers")]
    NoHealthyNodes,

    #[error("All forwarding attempts failed")]
    AllAttemptsFailed,

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HearthError>;

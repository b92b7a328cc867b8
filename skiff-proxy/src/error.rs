use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("read failed: {0}")]
    Read(String),
    #[error("write failed: {0}")]
    Write(String),
    #[error("route refused: {0}")]
    Route(String),
    #[error("no activity within {0:?}")]
    Timeout(Duration),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

use std::net::SocketAddr;
use thiserror::Error;

/// Failures talking to a register-based inverter. Any of these drops the
/// connection; the next tick reconnects.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connect to {address} failed: {source}")]
    Connect {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("connect to {address} timed out")]
    ConnectTimeout { address: SocketAddr },
    #[error("read of register {register} timed out")]
    Timeout { register: u16 },
    #[error("transport error reading register {register}: {message}")]
    Transport { register: u16, message: String },
    #[error("device exception reading register {register}: {code}")]
    Exception { register: u16, code: String },
    #[error("malformed payload for register {register}: expected {expected} words, got {actual}")]
    Malformed {
        register: u16,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway returned an error for {proc_name}: {message}")]
    Rpc { proc_name: String, message: String },
    #[error("malformed gateway response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

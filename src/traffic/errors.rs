use std::io;
use std::net::SocketAddr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrafficError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cannot resolve host '{host}': {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("Host '{0}' resolved to no addresses")]
    HostNotFound(String),

    #[error("Cannot bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Send failed: {0}")]
    Send(#[source] io::Error),

    #[error("Receive failed: {0}")]
    Receive(#[source] io::Error),

    #[error("Payload of {0} bytes exceeds the maximum UDP payload of {1} bytes")]
    PayloadTooLarge(usize, usize),

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    #[error("Buffer of {0} bytes is too small for a probe header")]
    BufferTooSmall(usize),
}

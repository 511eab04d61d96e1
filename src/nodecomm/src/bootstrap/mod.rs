pub mod task;

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::utils::resolve::ResolveError;

pub use task::{connect, coordinator_address, listen, with_server_client};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Coordinator,
    Worker,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Coordinator => f.write_str("coordinator"),
            Role::Worker => f.write_str("worker"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Address resolution failed: {0}")]
    Resolve(#[from] ResolveError),
    #[error("Job node list is empty")]
    EmptyNodeList,
    #[error("No usable address for coordinator node {0}")]
    NoCoordinatorAddress(String),
    #[error("Failed to create {role} socket: {source}")]
    Socket {
        role: Role,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to bind {role} socket to {addr}: {source}")]
    Bind {
        role: Role,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to listen on coordinator socket: {0}")]
    Listen(#[source] std::io::Error),
    #[error(
        "Failed to connect to coordinator at {addr} within {timeout:?} after {attempts} attempts: {source}"
    )]
    ConnectTimeout {
        addr: SocketAddr,
        timeout: Duration,
        attempts: u64,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to spawn {role} thread: {source}")]
    Spawn {
        role: Role,
        #[source]
        source: std::io::Error,
    },
}

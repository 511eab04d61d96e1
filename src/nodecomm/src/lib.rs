//! Star-topology bootstrap for batch-scheduled jobs.
//!
//! Every process of the job runs a worker role that connects to the
//! coordinator (rank 0), which additionally runs a coordinator role that
//! accepts those connections. Connections carry length-prefixed messages.

pub mod bootstrap;
pub mod config;
pub mod environment;
pub mod slurm;
pub mod transport;
pub mod utils;

pub use bootstrap::{with_server_client, BootstrapError};
pub use config::BootstrapConfig;
pub use environment::{JobEnvironment, SlurmEnvironment, StaticEnvironment};
pub use transport::{Client, Server};

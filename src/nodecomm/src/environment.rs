use std::env;
use std::process::Command;

use crate::slurm::Slurm;

pub const DEFAULT_LISTEN_PORT: u16 = 25565;
pub const LISTEN_PORT_ENV: &str = "HPC_MANAGEMENT_PORT";

/// Where a process learns its place in the job.
pub trait JobEnvironment {
    fn rank(&self) -> usize;
    /// Hostnames of every node in the job, coordinator first.
    fn node_list(&self) -> Vec<String>;
    fn expected_worker_count(&self) -> usize;
    fn listen_port(&self) -> u16;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticEnvironment {
    pub rank: usize,
    pub nodes: Vec<String>,
    pub expected_workers: usize,
    pub port: u16,
}

impl StaticEnvironment {
    pub fn new(rank: usize, nodes: Vec<String>, port: u16) -> Self {
        let expected_workers = nodes.len();
        StaticEnvironment {
            rank,
            nodes,
            expected_workers,
            port,
        }
    }

    /// Rank 0 of a single-node job on this host.
    pub fn local(port: u16) -> Self {
        Self::new(0, vec!["localhost".to_string()], port)
    }

    pub fn with_expected_workers(mut self, expected_workers: usize) -> Self {
        self.expected_workers = expected_workers;
        self
    }
}

impl JobEnvironment for StaticEnvironment {
    fn rank(&self) -> usize {
        self.rank
    }

    fn node_list(&self) -> Vec<String> {
        self.nodes.clone()
    }

    fn expected_worker_count(&self) -> usize {
        self.expected_workers
    }

    fn listen_port(&self) -> u16 {
        self.port
    }
}

/// Job layout taken from the Slurm step environment and
/// `scontrol show hostnames`.
#[derive(Debug, Clone)]
pub struct SlurmEnvironment {
    inner: StaticEnvironment,
}

impl SlurmEnvironment {
    /// Outside of a Slurm step, or when the node list cannot be obtained,
    /// this falls back to a single-node job on `localhost`.
    pub fn detect() -> Self {
        let slurm = Slurm::from_env();
        let port = env::var(LISTEN_PORT_ENV)
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_LISTEN_PORT);
        Self::from_parts(&slurm, scontrol_hostnames(), port)
    }

    pub fn from_parts(slurm: &Slurm, hostnames: Option<Vec<String>>, port: u16) -> Self {
        let rank = slurm.proc_id().and_then(|r| usize::try_from(r).ok());
        let inner = match (rank, hostnames) {
            (Some(rank), Some(nodes)) if !nodes.is_empty() => {
                let expected = slurm
                    .ntasks()
                    .and_then(|n| usize::try_from(n).ok())
                    .unwrap_or(nodes.len());
                StaticEnvironment::new(rank, nodes, port).with_expected_workers(expected)
            }
            (None, _) => {
                log::warn!("SLURM_PROCID not set, running as single local node");
                StaticEnvironment::local(port)
            }
            (Some(_), _) => {
                log::warn!("Could not obtain Slurm node list, running as single local node");
                StaticEnvironment::local(port)
            }
        };
        SlurmEnvironment { inner }
    }
}

impl JobEnvironment for SlurmEnvironment {
    fn rank(&self) -> usize {
        self.inner.rank()
    }

    fn node_list(&self) -> Vec<String> {
        self.inner.node_list()
    }

    fn expected_worker_count(&self) -> usize {
        self.inner.expected_worker_count()
    }

    fn listen_port(&self) -> u16 {
        self.inner.listen_port()
    }
}

fn scontrol_hostnames() -> Option<Vec<String>> {
    let output = match Command::new("scontrol").args(["show", "hostnames"]).output() {
        Ok(output) => output,
        Err(e) => {
            log::debug!("Failed to run scontrol: {}", e);
            return None;
        }
    };
    if !output.status.success() {
        log::debug!("scontrol exited with {}", output.status);
        return None;
    }
    Some(parse_hostnames(&String::from_utf8_lossy(&output.stdout)))
}

pub fn parse_hostnames(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

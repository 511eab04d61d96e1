use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use socket2::{Domain, Protocol, Socket, Type};

use super::{BootstrapError, Role};
use crate::config::BootstrapConfig;
use crate::environment::JobEnvironment;
use crate::transport::{Client, Server};
use crate::utils::resolve::{resolve, Family, ResolvedAddress};
use crate::utils::semaphore::{Semaphore, SignalOnDrop};

fn new_socket(
    family: Family,
    role: Role,
    config: &BootstrapConfig,
) -> Result<Socket, BootstrapError> {
    let domain = match family {
        Family::IPv4 => Domain::IPV4,
        Family::IPv6 => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|source| BootstrapError::Socket { role, source })?;
    // IPV6_V6ONLY defaults differ between systems
    if family == Family::IPv6 {
        if let Err(e) = socket.set_only_v6(!config.dual_stack) {
            log::warn!(
                "Failed to set IPV6_V6ONLY={} on {} socket: {}",
                !config.dual_stack,
                role,
                e
            );
        }
    }
    Ok(socket)
}

fn wildcard(family: Family, port: u16) -> SocketAddr {
    match family {
        Family::IPv4 => SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
        Family::IPv6 => SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
    }
}

/// Resolves every node and picks the first candidate of the first node.
/// Later candidates and later nodes are never used as a fallback.
pub fn coordinator_address(
    nodes: &[String],
    port: u16,
) -> Result<ResolvedAddress, BootstrapError> {
    let first = nodes.first().ok_or(BootstrapError::EmptyNodeList)?;
    let mut coordinator = None;
    for (idx, node) in nodes.iter().enumerate() {
        let candidates = resolve(node, port)?;
        log::debug!(
            "Node {} ({}) resolved to {:?}",
            idx,
            node,
            candidates.iter().map(|c| c.ip_string.as_str()).collect::<Vec<_>>()
        );
        if idx == 0 {
            coordinator = candidates.into_iter().next();
        }
    }
    coordinator.ok_or_else(|| BootstrapError::NoCoordinatorAddress(first.clone()))
}

/// Opens the coordinator's listening socket on the wildcard address of
/// the coordinator's family.
pub fn listen(
    coordinator: &ResolvedAddress,
    port: u16,
    expected_workers: usize,
    config: &BootstrapConfig,
) -> Result<Server, BootstrapError> {
    let role = Role::Coordinator;
    let family = coordinator.family();
    let socket = new_socket(family, role, config)?;
    if config.reuse_address {
        socket
            .set_reuse_address(true)
            .map_err(|source| BootstrapError::Socket { role, source })?;
    }
    let local_addr = wildcard(family, port);
    socket
        .bind(&local_addr.into())
        .map_err(|source| BootstrapError::Bind {
            role,
            addr: local_addr,
            source,
        })?;
    let backlog = i32::try_from(expected_workers).unwrap_or(i32::MAX);
    socket.listen(backlog).map_err(BootstrapError::Listen)?;
    log::info!(
        "Coordinator listening on {} for {} workers",
        local_addr,
        expected_workers
    );
    Ok(Server::new(socket.into(), expected_workers, config.tcp_nodelay))
}

/// Connects a worker to the coordinator, retrying every
/// `connect_retry_interval` until `connect_timeout` has passed since the
/// first attempt.
pub fn connect(
    coordinator: &ResolvedAddress,
    config: &BootstrapConfig,
) -> Result<Client, BootstrapError> {
    let role = Role::Worker;
    let family = coordinator.family();
    let socket = new_socket(family, role, config)?;
    let local_addr = wildcard(family, 0);
    socket
        .bind(&local_addr.into())
        .map_err(|source| BootstrapError::Bind {
            role,
            addr: local_addr,
            source,
        })?;

    let target = coordinator.sock_addr();
    let interval = config.connect_retry_interval();
    let timeout = config.connect_timeout();
    let start = Instant::now();
    let mut attempts = 0u64;
    loop {
        attempts += 1;
        match socket.connect(&target) {
            Ok(()) => break,
            // an interrupted attempt may complete in the background
            Err(ref e) if e.raw_os_error() == Some(libc::EISCONN) => break,
            Err(e) => {
                log::trace!(
                    "Connect attempt {} to {} failed: {}",
                    attempts,
                    coordinator.addr,
                    e
                );
                let elapsed = start.elapsed();
                if elapsed >= timeout {
                    return Err(BootstrapError::ConnectTimeout {
                        addr: coordinator.addr,
                        timeout,
                        attempts,
                        source: e,
                    });
                }
                thread::sleep(interval.min(timeout - elapsed));
            }
        }
    }
    log::info!(
        "Worker connected to coordinator {} after {} attempts",
        coordinator.addr,
        attempts
    );

    let stream: TcpStream = socket.into();
    if config.tcp_nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            log::warn!("Failed to set TCP_NODELAY on worker connection: {}", e);
        }
    }
    Ok(Client::from_stream(stream))
}

fn spawn_role<F>(role: Role, f: F) -> Result<(Role, JoinHandle<()>), BootstrapError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(format!("nodecomm-{}", role))
        .spawn(f)
        .map(|handle| (role, handle))
        .map_err(|source| BootstrapError::Spawn { role, source })
}

// Joins finished role threads and returns the roles that panicked.
fn join_roles(handles: Vec<(Role, JoinHandle<()>)>) -> Vec<Role> {
    let mut panicked = Vec::new();
    for (role, handle) in handles {
        if handle.join().is_err() {
            log::error!("The {} role panicked", role);
            panicked.push(role);
        }
    }
    panicked
}

fn fatal(err: &BootstrapError) -> ! {
    if log::log_enabled!(log::Level::Error) {
        log::error!("Bootstrap failed: {}", err);
    } else {
        eprintln!("Bootstrap failed: {}", err);
    }
    std::process::exit(1)
}

fn run<E, S, W>(
    env: &E,
    config: &BootstrapConfig,
    server_fn: S,
    worker_fn: W,
) -> Result<(), BootstrapError>
where
    E: JobEnvironment + ?Sized,
    S: FnOnce(Server) + Send + 'static,
    W: FnOnce(Client) + Send + 'static,
{
    let rank = env.rank();
    let port = env.listen_port();
    let expected_workers = env.expected_worker_count();
    let coordinator = coordinator_address(&env.node_list(), port)?;
    let is_coordinator = rank == 0;
    let num_roles = if is_coordinator { 2 } else { 1 };
    log::debug!(
        "Rank {} starting {} roles, coordinator at {}",
        rank,
        num_roles,
        coordinator.addr
    );

    let completion = Arc::new(Semaphore::new());
    let mut handles = Vec::with_capacity(num_roles);
    if is_coordinator {
        let done = SignalOnDrop(Arc::clone(&completion));
        let coordinator = coordinator.clone();
        let config = config.clone();
        handles.push(spawn_role(Role::Coordinator, move || {
            let _done = done;
            let server = listen(&coordinator, port, expected_workers, &config)
                .unwrap_or_else(|e| fatal(&e));
            server_fn(server);
            log::debug!("Coordinator role finished");
        })?);
    }

    let done = SignalOnDrop(Arc::clone(&completion));
    let config = config.clone();
    handles.push(spawn_role(Role::Worker, move || {
        let _done = done;
        let client = connect(&coordinator, &config).unwrap_or_else(|e| fatal(&e));
        worker_fn(client);
        log::debug!("Worker role finished");
    })?);

    for _ in 0..num_roles {
        completion.wait();
    }
    // every role has signalled, so these joins do not block for long
    join_roles(handles);
    Ok(())
}

/// Establishes the job's star topology and runs the local roles.
///
/// Rank 0 runs `server_fn` with the listening [`Server`] and `worker_fn`
/// with a [`Client`] connected to itself; every other rank only runs
/// `worker_fn`. Each role gets its own thread. The call returns once all
/// local roles have returned; a role that panicked is logged at `error`.
///
/// Failing to resolve the nodes or to set up a socket, and exhausting the
/// connect timeout, terminate the process: a rank that cannot join the
/// topology has no way to continue.
pub fn with_server_client<E, S, W>(
    env: &E,
    config: &BootstrapConfig,
    server_fn: S,
    worker_fn: W,
)
where
    E: JobEnvironment + ?Sized,
    S: FnOnce(Server) + Send + 'static,
    W: FnOnce(Client) + Send + 'static,
{
    if let Err(e) = run(env, config, server_fn, worker_fn) {
        fatal(&e);
    }
}

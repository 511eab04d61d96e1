use std::io::Write;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Timelike;
use env_logger::fmt::Color;
use structopt::StructOpt;

use nodecomm::environment::JobEnvironment;
use nodecomm::{with_server_client, BootstrapConfig, Client, Server, SlurmEnvironment};

#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "nodecomm echo benchmark")]
struct Opts {
    /// Round trips per worker
    #[structopt(short, long, default_value = "100000")]
    iterations: usize,
    /// Message size in bytes
    #[structopt(short, long, default_value = "1024")]
    size: usize,
    /// Bootstrap config path
    #[structopt(short, long)]
    config: Option<PathBuf>,
}

struct EchoStats {
    peer: String,
    messages: usize,
    bytes: usize,
    elapsed: Duration,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let time = chrono::Local::now();
            let style = buf
                .style()
                .set_color(Color::Black)
                .set_intense(true)
                .clone();
            let time = format!(
                "{:02}:{:02}:{:02}.{:03}",
                time.hour() % 24,
                time.minute(),
                time.second(),
                time.timestamp_subsec_millis()
            );
            writeln!(
                buf,
                "{}{} {} {}{} {}",
                style.value("["),
                time,
                buf.default_styled_level(record.level()),
                record.module_path().unwrap_or(""),
                style.value("]"),
                record.args()
            )
        })
        .init();
}

fn echo(mut client: Client) -> EchoStats {
    let peer = client
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let start = Instant::now();
    let mut messages = 0;
    let mut bytes = 0;
    loop {
        let message = client.receive();
        if message.is_empty() {
            break;
        }
        if !client.send(&message) {
            log::warn!("Echo to {} failed, dropping worker", peer);
            break;
        }
        messages += 1;
        bytes += message.len();
    }
    client.close();
    EchoStats {
        peer,
        messages,
        bytes,
        elapsed: start.elapsed(),
    }
}

fn serve(server: Server) {
    let clients = server.accept_all();
    log::info!(
        "[Server] {} of {} workers connected",
        clients.len(),
        server.expected_workers()
    );
    let (tx, rx) = crossbeam::channel::unbounded();
    let handles: Vec<_> = clients
        .into_iter()
        .map(|client| {
            let tx = tx.clone();
            thread::spawn(move || {
                let _ = tx.send(echo(client));
            })
        })
        .collect();
    drop(tx);

    for stats in rx.iter() {
        log::info!(
            "[Server] Worker {} done: {} messages, {} bytes in {:?}",
            stats.peer,
            stats.messages,
            stats.bytes,
            stats.elapsed
        );
    }
    for handle in handles {
        if handle.join().is_err() {
            log::error!("[Server] Echo thread panicked");
        }
    }
    server.close();
    log::info!("[Server] Done!");
}

fn work(mut client: Client, iterations: usize, size: usize) {
    let buffer: Vec<u8> = (0..size).map(|_| rand::random()).collect();
    let report_every = (iterations / 10).max(1);
    let mut mismatches = 0;
    let mut completed = 0;
    let start = Instant::now();
    for iteration in 1..=iterations {
        if !client.send(&buffer) {
            log::error!("[Worker] Send failed at iteration {}", iteration);
            break;
        }
        let reply = client.receive();
        if reply.is_empty() {
            log::error!("[Worker] Coordinator closed the connection at iteration {}", iteration);
            break;
        }
        if reply != buffer {
            mismatches += 1;
        }
        completed = iteration;
        if iteration % report_every == 0 {
            log::info!("[Worker] {} round trips", iteration);
        }
    }
    let elapsed = start.elapsed();
    client.close();

    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    log::info!(
        "[Worker] Done! {} round trips in {:?} ({:.0} rt/s, {:.2} MB/s each way), {} mismatches",
        completed,
        elapsed,
        completed as f64 / secs,
        (completed * size) as f64 / secs / 1e6,
        mismatches
    );
}

fn main() -> Result<()> {
    init_logger();
    let opts = Opts::from_args();
    anyhow::ensure!(opts.size > 0, "empty messages cannot be told apart from a closed connection");
    let config = match &opts.config {
        Some(path) => BootstrapConfig::from_path(path)?,
        None => BootstrapConfig::default(),
    };

    let env = SlurmEnvironment::detect();
    log::info!(
        "Rank {} of {} nodes, coordinator {} port {}",
        env.rank(),
        env.node_list().len(),
        env.node_list().first().map(String::as_str).unwrap_or("?"),
        env.listen_port()
    );

    let (iterations, size) = (opts.iterations, opts.size);
    with_server_client(&env, &config, serve, move |client| {
        work(client, iterations, size)
    });
    Ok(())
}

//! Netfork Server Binary
//!
//! Demo server di atas UDP:
//! - Menjawab setiap `TestMessage` dengan `ServerInfoMessage`
//! - Log connect/disconnect per peer
//! - Stats periodik ke stdout
//!
//! Usage:
//!   cargo run --release --bin netfork_server [OPTIONS]

use std::cell::Cell;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use netfork::network::{DEFAULT_MAX_CLIENTS, DEFAULT_PORT};
use netfork::{
    Context, Delivery, Server, ServerConfig, ServerInfoMessage, SessionEvent, TestMessage,
    UdpTransport,
};

const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Command line options
struct Options {
    port: u16,
    max_clients: usize,
    timeout_ms: u64,
    verbose: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_clients: DEFAULT_MAX_CLIENTS,
            timeout_ms: 5000,
            verbose: false,
        }
    }
}

fn parse_args() -> Options {
    let args: Vec<String> = std::env::args().collect();
    let mut options = Options::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    options.port = args[i + 1].parse().unwrap_or(DEFAULT_PORT);
                    i += 1;
                }
            }
            "--max-clients" | "-m" => {
                if i + 1 < args.len() {
                    options.max_clients = args[i + 1].parse().unwrap_or(DEFAULT_MAX_CLIENTS);
                    i += 1;
                }
            }
            "--timeout-ms" | "-t" => {
                if i + 1 < args.len() {
                    options.timeout_ms = args[i + 1].parse().unwrap_or(5000);
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                options.verbose = true;
            }
            "--help" | "-h" => {
                println!("Netfork Server - typed UDP sessions demo\n");
                println!("Usage: netfork_server [OPTIONS]\n");
                println!("Options:");
                println!("  -p, --port <PORT>         UDP port (default: {DEFAULT_PORT})");
                println!("  -m, --max-clients <N>     Max peers (default: {DEFAULT_MAX_CLIENTS})");
                println!("  -t, --timeout-ms <MS>     Peer idle timeout (default: 5000)");
                println!("  -v, --verbose             Debug logging");
                println!("  -h, --help                Show this help");
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    options
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run_server(options: Options) -> netfork::Result<()> {
    println!("🚀 NETFORK SERVER");
    println!("=================\n");

    let config = ServerConfig::default()
        .with_port(options.port)
        .with_max_clients(options.max_clients)
        .with_timeout(Duration::from_millis(options.timeout_ms));

    let mut server = Server::new(UdpTransport::new(), config);
    server.start()?;

    let test_messages = Rc::new(Cell::new(0u64));
    if let Some(registry) = server.registry_mut() {
        let test_messages = test_messages.clone();
        registry.register(move |ctx: &mut Context<'_>, msg: TestMessage| {
            test_messages.set(test_messages.get() + 1);
            info!(peer = ctx.peer(), birthday_year = msg.birthday_year, "test message");
            ctx.reply(&ServerInfoMessage::current(), Delivery::Reliable)?;
            Ok(())
        })?;
    }

    println!("🔌 Listening on udp/{}", options.port);
    println!("👥 Max clients: {}", options.max_clients);
    println!("\n📡 Waiting for connections...\n");

    let start_time = Instant::now();
    let mut last_stats_print = Instant::now();

    loop {
        // === PHASE 1: Service transport ===
        let processed = match server.update() {
            Ok(n) => n,
            Err(e @ netfork::SessionError::Handler { .. }) => {
                error!(error = %e, "handler failed");
                1
            }
            Err(e) => return Err(e),
        };

        // === PHASE 2: Session events ===
        for event in server.drain_events() {
            match event {
                SessionEvent::PeerConnected(id) => println!("✅ [{id}] Connected"),
                SessionEvent::PeerDisconnected { id, reason } => {
                    println!("👋 [{id}] Disconnected: {reason}")
                }
                SessionEvent::Stopped(reason) => {
                    println!("🛑 Server stopped: {reason}");
                    return Ok(());
                }
                _ => {}
            }
        }

        // === PHASE 3: Stats ===
        if last_stats_print.elapsed() >= STATS_INTERVAL {
            println!(
                "\n📊 Server Stats (uptime: {:.1}s)",
                start_time.elapsed().as_secs_f64()
            );
            println!("   Connections:   {}", server.connections().len());
            println!("   Test messages: {}", test_messages.get());
            last_stats_print = Instant::now();
        }

        if processed == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }
}

fn main() {
    let options = parse_args();
    init_tracing(options.verbose);

    if let Err(e) = run_server(options) {
        eprintln!("❌ Server error: {e}");
        std::process::exit(1);
    }
}

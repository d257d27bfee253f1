//! Netfork Client Binary
//!
//! Connect ke server, kirim satu `TestMessage`, cetak `ServerInfoMessage`
//! balasan, lalu stop.
//!
//! Usage:
//!   cargo run --release --bin netfork_client [OPTIONS]

use std::cell::RefCell;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use tracing_subscriber::EnvFilter;

use netfork::network::{DEFAULT_HOST, DEFAULT_PORT};
use netfork::{
    Client, ClientConfig, Context, Delivery, ServerInfoMessage, SessionEvent, StoppedReason,
    TestMessage, UdpTransport,
};

/// Command line options
struct Options {
    host: String,
    port: u16,
    year: i32,
    timeout_ms: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            year: 1990,
            timeout_ms: 5000,
        }
    }
}

fn parse_args() -> Options {
    let args: Vec<String> = std::env::args().collect();
    let mut options = Options::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--host" | "-H" => {
                if i + 1 < args.len() {
                    options.host = args[i + 1].clone();
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    options.port = args[i + 1].parse().unwrap_or(DEFAULT_PORT);
                    i += 1;
                }
            }
            "--year" | "-y" => {
                if i + 1 < args.len() {
                    options.year = args[i + 1].parse().unwrap_or(1990);
                    i += 1;
                }
            }
            "--timeout-ms" | "-t" => {
                if i + 1 < args.len() {
                    options.timeout_ms = args[i + 1].parse().unwrap_or(5000);
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Netfork Client - typed UDP sessions demo\n");
                println!("Usage: netfork_client [OPTIONS]\n");
                println!("Options:");
                println!("  -H, --host <HOST>      Server host (default: {DEFAULT_HOST})");
                println!("  -p, --port <PORT>      Server port (default: {DEFAULT_PORT})");
                println!("  -y, --year <YEAR>      Birthday year to send (default: 1990)");
                println!("  -t, --timeout-ms <MS>  Connect/idle timeout (default: 5000)");
                println!("  -h, --help             Show this help");
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    options
}

fn run_client(options: Options) -> netfork::Result<StoppedReason> {
    println!("🛰️  NETFORK CLIENT");
    println!("==================\n");

    let config = ClientConfig::default()
        .with_host(options.host.clone())
        .with_port(options.port)
        .with_timeout(Duration::from_millis(options.timeout_ms));

    let mut client = Client::new(UdpTransport::new(), config);
    client.start()?;
    println!("🔌 Connecting to {}:{}...", options.host, options.port);

    let reply: Rc<RefCell<Option<ServerInfoMessage>>> = Rc::new(RefCell::new(None));
    if let Some(registry) = client.registry_mut() {
        let reply = reply.clone();
        registry.register(move |_: &mut Context<'_>, msg: ServerInfoMessage| {
            *reply.borrow_mut() = Some(msg);
            Ok(())
        })?;
    }

    let mut sent_at = None;

    loop {
        let processed = client.update()?;

        for event in client.drain_events() {
            match event {
                SessionEvent::Connected => println!("✅ Connected"),
                SessionEvent::Stopped(reason) => return Ok(reason),
                _ => {}
            }
        }

        if client.is_connected() && sent_at.is_none() {
            client.send(
                &TestMessage {
                    birthday_year: options.year,
                },
                Delivery::Reliable,
            )?;
            println!("📤 TestMessage {{ birthday_year: {} }}", options.year);
            sent_at = Some(Instant::now());
        }

        let received = reply.borrow_mut().take();
        if let Some(info) = received {
            let rtt = sent_at.map(|t| t.elapsed()).unwrap_or_default();
            println!("📥 ServerInfoMessage ({:.2} ms)", rtt.as_secs_f64() * 1000.0);
            println!("   Engine version: {}", info.engine_version);
            println!("   Current date:   {}", info.current_date);
            client.stop()?;
        }

        if processed == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run_client(parse_args()) {
        Ok(StoppedReason::LocalStopped) => println!("\n👋 Done"),
        Ok(reason) => {
            eprintln!("❌ Session ended: {reason}");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("❌ Client error: {e}");
            std::process::exit(1);
        }
    }
}

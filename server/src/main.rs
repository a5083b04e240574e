use clap::Parser;
use log::{debug, info};
use server::network::Server;
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Milliseconds to sleep between ticks
    #[arg(short, long, default_value = "300")]
    tick_ms: u64,

    /// Maximum number of concurrent clients
    #[arg(short, long, default_value = "64")]
    max_clients: usize,

    /// Payload broadcast to every client each tick (a newline is appended)
    #[arg(long, default_value = "Hello from server!")]
    message: String,

    /// Send every received message back to its sender instead of broadcasting
    #[arg(short, long)]
    echo: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut server = Server::new(args.max_clients)?;
    let addr = server.start(args.port)?;
    info!("Running server on {}", addr);
    if args.echo {
        info!("Echo mode: replies go back to the sender");
    }

    let greeting = format!("{}\n", args.message);
    let tick = Duration::from_millis(args.tick_ms);

    loop {
        let messages = server.read_all_tagged();

        if !messages.is_empty() {
            info!("Read ({}) messages", messages.len());
            for (id, message) in &messages {
                info!("↘ ({}) {}", id, String::from_utf8_lossy(message).trim_end());
            }
        }

        if args.echo {
            for (id, message) in &messages {
                server.send_to(*id, message);
            }
        } else {
            let delivered = server.send_to_all(greeting.as_bytes());
            if delivered > 0 {
                debug!("↗ [{}] {}", delivered, args.message);
            }
        }

        thread::sleep(tick);
    }
}

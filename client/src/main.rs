use clap::Parser;
use client::network::Client;
use log::{debug, error, info};
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    host: String,

    /// Message sent to the server every tick (a newline is appended)
    message: String,

    /// Server port
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Milliseconds to sleep between ticks
    #[arg(short, long, default_value = "100")]
    tick_ms: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Connecting to: {}:{}", args.host, args.port);
    let mut client = Client::connect(&args.host, args.port)?;
    client.start()?;

    let message = format!("{}\n", args.message);
    let tick = Duration::from_millis(args.tick_ms);

    loop {
        if client.has_messages() {
            while client.has_messages() {
                let inbound = client.pop_message()?;
                info!("↘ {}", String::from_utf8_lossy(&inbound).trim_end());
            }
        } else {
            debug!("no messages");
        }

        debug!("↗ {}", args.message);
        if let Err(e) = client.send(message.as_bytes()) {
            error!("Error sending to server: {}", e);
            return Err(e.into());
        }

        thread::sleep(tick);
    }
}

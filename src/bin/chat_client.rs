// Reference chat client.
//
// Sends each stdin line to the relay under the given name and prints every frame received as
// "<counter>:<length>:<payload>". A corrupted frame or a lost connection ends the process.

use clap::Parser;
use fanout_relay::config::LogConfig;
use fanout_relay::logging::init_logging;
use fanout_relay::ChatClient;
use std::io::{self, BufRead};
use std::thread;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "chat_client", version, about = "Line-chat client for fanout-relay")]
struct Args {
    /// Relay address, e.g. 127.0.0.1:52000
    addr: String,

    /// Name prefixed to every line sent
    name: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&LogConfig::default())?;

    let mut client = ChatClient::connect(args.addr.as_str(), args.name)?;
    let reader = client.reader()?;
    info!(addr = %args.addr, name = client.name(), "connected");

    thread::Builder::new()
        .name("receiver".to_string())
        .spawn(move || {
            for (counter, frame) in reader.enumerate() {
                match frame {
                    Ok(frame) => {
                        info!("{}:{}:{}", counter, frame.payload.len(), frame.text());
                    }
                    Err(err) => {
                        error!(error = %err, "receive failed");
                        std::process::exit(1);
                    }
                }
            }
            error!("relay closed the connection");
            std::process::exit(1);
        })?;

    for line in io::stdin().lock().lines() {
        let line = line?;
        let text = line.trim_end_matches('\r');
        let sent = client.send_line(text)?;
        if sent < text.len() {
            warn!(sent, length = text.len(), "line truncated");
        }
    }
    client.finish()?;
    Ok(())
}

//! Connect to a command server and print everything it sends.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=debug cargo run --example streaming --features tracing -- ws://localhost:8080 live
//! ```

use std::time::Duration;

use cmdsocket::{Client, ClientEvent};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let server = args
        .next()
        .unwrap_or_else(|| "ws://127.0.0.1:8080".to_owned());
    let protocol = args.next().unwrap_or_else(|| "live".to_owned());

    let client = Client::new(&server, &protocol)?;
    let mut messages = client.messages();
    let mut events = client.events();

    info!(%server, %protocol, "connecting");
    client.connect();

    loop {
        tokio::select! {
            message = messages.recv() => {
                match message {
                    Ok(message) => info!(cmd = %message.cmd, body = ?message.body),
                    Err(e) => {
                        warn!(error = %e, "message channel lagged or closed");
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(ClientEvent::Error(error)) => warn!(%error, "client error"),
                    Ok(ClientEvent::Closed) => {
                        info!(dropped = client.dropped_frames(), "connection closed");
                        break;
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
            () = tokio::time::sleep(Duration::from_secs(60)) => {
                info!(state = ?client.state(), "still waiting for frames");
            }
        }
    }

    client.close();

    Ok(())
}

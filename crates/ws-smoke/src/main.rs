//! Connects to a dashboard snapshot socket and prints what arrives.
//!
//! Usage: `awg-ws-smoke [ws-url] [snapshots]`

use std::process::ExitCode;

use futures_util::{SinkExt, StreamExt};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

const DEFAULT_URL: &str = "ws://127.0.0.1:8080/ws/state";

#[tokio::main]
async fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let raw = args.next().unwrap_or_else(|| DEFAULT_URL.to_string());
    let wanted: usize = args.next().and_then(|n| n.parse().ok()).unwrap_or(1);

    let url = match Url::parse(&raw) {
        Ok(url) if matches!(url.scheme(), "ws" | "wss") => url,
        Ok(url) => {
            eprintln!("Not a websocket URL: {}", url);
            return ExitCode::from(1);
        }
        Err(e) => {
            eprintln!("Invalid URL {}: {}", raw, e);
            return ExitCode::from(1);
        }
    };

    eprintln!("Connecting to {}", url);
    let (ws_stream, _) = match connect_async(url.as_str()).await {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("WS connect failed: {}", e);
            return ExitCode::from(2);
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let mut seen = 0;
    while seen < wanted {
        // The server pushes a snapshot right away, later ones only on change.
        match timeout(Duration::from_secs(5), read.next()).await {
            Ok(Some(Ok(Message::Text(t)))) => {
                seen += 1;
                print_snapshot(seen, &t);
            }
            Ok(Some(Ok(other))) => {
                println!("WS non-text message: {:?}", other);
            }
            Ok(Some(Err(e))) => {
                eprintln!("WS receive error: {}", e);
                return ExitCode::from(2);
            }
            Ok(None) => {
                eprintln!("WS closed by server");
                return ExitCode::from(3);
            }
            Err(_) => {
                eprintln!("Timeout waiting for snapshot {}", seen + 1);
                return ExitCode::from(4);
            }
        }
    }

    let _ = write.send(Message::Close(None)).await;
    ExitCode::SUCCESS
}

fn print_snapshot(n: usize, text: &str) {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(val) => {
            let message = val.pointer("/status/message").and_then(|m| m.as_str()).unwrap_or("?");
            println!("#{} [{}] {}", n, message, val);
        }
        Err(_) => println!("#{} (not JSON) {}", n, text),
    }
}

//! Stdin console for the simulated backend.
//!
//! Each line is one of:
//!
//! - `set <bank>:<pin> <0|1|high|low>` – drive a simulated line level, e.g.
//!   `set gpio:27 1` to flip `viessmann-control` on;
//! - `<topic> <payload>` – publish `payload` on `topic`, e.g.
//!   `gpio/write/viessmann-onoff disabled`.

use std::sync::Arc;

use gpiobridge_hal::SimHandle;
use gpiobridge_middleware::BusTransport;
use gpiobridge_types::{Bank, LineId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    SetLevel { line: LineId, level: bool },
    Publish { topic: String, payload: String },
}

/// Parse one console line.  Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    if head == "set" {
        let (line_id, level) = rest
            .split_once(char::is_whitespace)
            .ok_or_else(|| "usage: set <bank>:<pin> <0|1>".to_string())?;
        let line = line_id.parse::<LineId>().map_err(|e| e.to_string())?;
        let level = match level.trim() {
            "1" | "high" | "on" => true,
            "0" | "low" | "off" => false,
            other => return Err(format!("invalid level '{other}'")),
        };
        return Ok(Some(ConsoleCommand::SetLevel { line, level }));
    }

    Ok(Some(ConsoleCommand::Publish {
        topic: head.to_string(),
        payload: rest.to_string(),
    }))
}

/// Read stdin until EOF, applying each command.
pub async fn run(bus: Arc<dyn BusTransport>, gpio: SimHandle, expander: SimHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "console read failed");
                break;
            }
        };
        match parse_line(&line) {
            Ok(Some(ConsoleCommand::SetLevel { line, level })) => {
                let handle = match line.bank {
                    Bank::Gpio => &gpio,
                    Bank::Expander => &expander,
                };
                handle.set_level(line.pin, level);
                info!(%line, level, "simulated line level set");
            }
            Ok(Some(ConsoleCommand::Publish { topic, payload })) => {
                if let Err(e) = bus.publish(&topic, payload.as_bytes(), false) {
                    warn!(%topic, error = %e, "console publish failed");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(input = %line, error = %e, "ignoring console line"),
        }
    }
    info!("console closed");
}

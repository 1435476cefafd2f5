//! Terminal key capture for cancel and restart.
//!
//! Keys arrive as stdin lines: `q` or `c` cancels, `r` restarts.
//! Handlers are swapped per attempt; the reader itself lives as long as
//! the display.
//!
//! Stdin is read on a detached OS thread. A blocking read cannot be
//! interrupted, and the runtime must not wait on it at shutdown.

use std::io::BufRead;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::CancelHandlers;
use crate::models::outcome::CancelMode;

/// Slot holding the handlers of the current attempt.
pub type HandlerSlot = Arc<Mutex<Option<CancelHandlers>>>;

/// Map one input line to a trigger.
#[must_use]
pub fn parse_key(line: &str) -> Option<CancelMode> {
    match line.trim().to_ascii_lowercase().as_str() {
        "q" | "c" | "quit" | "cancel" => Some(CancelMode::Cancel),
        "r" | "restart" => Some(CancelMode::Restart),
        _ => None,
    }
}

/// Spawn the stdin reader; lines are dispatched to whatever handlers are
/// in `slot` when they arrive.
///
/// Aborting the returned task stops dispatch; the reader thread exits on
/// its next line or at EOF, and never holds up process exit.
#[must_use]
pub fn spawn_key_reader(slot: HandlerSlot) -> JoinHandle<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let reader = thread::Builder::new()
        .name("handoff-keys".into())
        .spawn(move || forward_lines(std::io::stdin().lock(), &tx));
    if let Err(err) = reader {
        warn!(%err, "failed to start key reader; key capture disabled");
    }

    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let Some(mode) = parse_key(&line) else {
                continue;
            };
            let handlers = slot.lock().unwrap_or_else(PoisonError::into_inner).clone();
            match handlers {
                Some(handlers) => {
                    info!(mode = mode.as_str(), "key trigger");
                    handlers.fire(mode);
                }
                None => debug!(mode = mode.as_str(), "key ignored; no attempt active"),
            }
        }
        debug!("key capture stopped");
    })
}

fn forward_lines(input: impl BufRead, tx: &mpsc::UnboundedSender<String>) {
    for line in input.lines() {
        match line {
            Ok(line) => {
                if tx.send(line).is_err() {
                    return;
                }
            }
            Err(err) => {
                debug!(%err, "stdin read failed; key capture stopped");
                return;
            }
        }
    }
    debug!("stdin closed; key capture stopped");
}

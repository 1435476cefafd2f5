//! OS interrupt wiring: SIGINT/SIGTERM are equivalent to the cancel key.

use std::sync::Weak;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::cancel::CancelController;

/// Detaches the interrupt listener when dropped.
#[derive(Debug)]
pub struct InterruptGuard(JoinHandle<()>);

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Listen for an interrupt and trigger a cancel on `controller`.
///
/// Must be called from within a tokio runtime.
#[must_use]
pub fn install_interrupt(controller: Weak<CancelController>) -> InterruptGuard {
    InterruptGuard(tokio::spawn(async move {
        interrupt_signal().await;
        info!("interrupt received");
        if let Some(controller) = controller.upgrade() {
            controller.trigger_cancel();
        }
    }))
}

async fn interrupt_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            warn!(%err, "ctrl-c signal handler failed");
            std::future::pending::<()>().await;
        }
    }
}

//! Outer run loop: repeats session attempts while restarts are requested.

use tracing::info;

use super::session::{run_session, SessionContext};
use crate::models::outcome::RunOutcome;
use crate::Result;

/// Run attempts until one finishes without a restart request.
///
/// Each attempt gets a new epoch and a cleared display; the display is
/// stopped once, when the loop returns.
///
/// # Errors
///
/// Propagates archive-stage failures from the attempt that hit them.
pub async fn run(ctx: &SessionContext) -> Result<RunOutcome> {
    let mut attempt: u32 = 0;
    let result = loop {
        attempt += 1;
        info!(attempt, "starting session attempt");
        match run_session(ctx).await {
            Ok(outcome) if outcome.restart_requested => {
                info!(attempt, "restart requested");
            }
            other => break other,
        }
    };
    ctx.ui.stop();
    result
}

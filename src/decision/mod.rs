use std::io::{self, Write};

use tokio::sync::{oneshot, Mutex};

use crate::types::PlanReviewDecision;


/// Create the controller/receiver pair for one session. The controller side
/// goes into shared HTTP state; the receiver is the session's single
/// blocking wait.
pub fn channel() -> (DecisionController, oneshot::Receiver<PlanReviewDecision>) {
    let (tx, rx) = oneshot::channel();
    (
        DecisionController {
            tx: Mutex::new(Some(tx)),
        },
        rx,
    )
}

/// Single-resolution bridge between the HTTP handlers and the session flow.
///
/// The sender is consumed on first use, so exactly one decision wins no
/// matter how many approve/deny requests race in.
pub struct DecisionController {
    tx: Mutex<Option<oneshot::Sender<PlanReviewDecision>>>,
}

impl DecisionController {
    /// Resolve the session's decision. Calls after the first are no-ops.
    pub async fn resolve(&self, decision: PlanReviewDecision) {
        if let Some(tx) = self.tx.lock().await.take() {
            // A closed receiver means the session is already past its wait.
            let _ = tx.send(decision);
        }
    }
}

/// Write one decision line to stdout and flush immediately. The process
/// stays alive after this to keep serving the UI, so the explicit flush is
/// what makes the bytes visible to the host reading our output.
pub fn emit_decision_line(line: &str) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(line.as_bytes())?;
    stdout.write_all(b"\n")?;
    stdout.flush()
}

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::PipelineError;
use crate::events::Stage;

/// Cancellation for one turn: the caller's token plus a soft timeout.
///
/// Dropping the guard cancels the turn token, which also stops the timer task.
pub(crate) struct TurnCancel {
    token: CancellationToken,
    timed_out: Arc<AtomicBool>,
    soft_timeout_ms: u64,
    _guard: DropGuard,
}

impl TurnCancel {
    pub(crate) fn arm(parent: Option<&CancellationToken>, soft_timeout_ms: u64) -> Self {
        let token = parent.map_or_else(CancellationToken::new, CancellationToken::child_token);
        let timed_out = Arc::new(AtomicBool::new(false));

        let timer_token = token.clone();
        let flag = Arc::clone(&timed_out);
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(Duration::from_millis(soft_timeout_ms)) => {
                    flag.store(true, Ordering::SeqCst);
                    timer_token.cancel();
                }
                () = timer_token.cancelled() => {}
            }
        });

        Self {
            _guard: token.clone().drop_guard(),
            token,
            timed_out,
            soft_timeout_ms,
        }
    }

    pub(crate) async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn error(&self, stage: Stage) -> PipelineError {
        let reason = if self.timed_out.load(Ordering::SeqCst) {
            format!("soft timeout of {} ms elapsed", self.soft_timeout_ms)
        } else {
            "cancelled by caller".to_owned()
        };
        tracing::warn!(%stage, %reason, "turn aborted");
        PipelineError::Timeout { stage, reason }
    }

    /// Fail fast when the turn is already cancelled.
    pub(crate) fn check(&self, stage: Stage) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            Err(self.error(stage))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn soft_timeout_cancels() {
        let cancel = TurnCancel::arm(None, 50);
        assert!(!cancel.is_cancelled());
        cancel.cancelled().await;
        let err = cancel.error(Stage::Plan);
        assert!(err.to_string().contains("soft timeout of 50 ms"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn parent_cancellation_propagates() {
        let parent = CancellationToken::new();
        let cancel = TurnCancel::arm(Some(&parent), 60_000);
        parent.cancel();
        assert!(cancel.is_cancelled());
        assert!(cancel.check(Stage::Answer).is_err());
        assert!(cancel.error(Stage::Answer).to_string().contains("cancelled by caller"));
    }

    #[tokio::test]
    async fn drop_does_not_cancel_parent() {
        let parent = CancellationToken::new();
        drop(TurnCancel::arm(Some(&parent), 60_000));
        assert!(!parent.is_cancelled());
    }
}

//! Grace-period scheduling for transient focus loss
//!
//! A focus move off the actively-recorded note arms a single-shot deadline;
//! returning to the note (or starting any new session) disarms it. The
//! deadline lives inside the session actor's select loop, so arming and
//! disarming are serialized with every other session mutation — a disarmed
//! deadline can never fire.

use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct GraceScheduler {
    period: Duration,
    deadline: Option<Instant>,
}

impl GraceScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            deadline: None,
        }
    }

    /// Arm the deferred stop. A second trigger while armed keeps the
    /// original deadline.
    pub fn arm(&mut self) {
        if self.deadline.is_none() {
            let deadline = Instant::now() + self.period;
            tracing::debug!("Grace period armed for {:?}", self.period);
            self.deadline = Some(deadline);
        }
    }

    /// Disarm; returns whether a stop was pending.
    pub fn cancel(&mut self) -> bool {
        if self.deadline.take().is_some() {
            tracing::debug!("Grace period canceled");
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves at the armed deadline. Callers must guard with
    /// `is_armed()`; the actor disarms before acting on expiry.
    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    }
}

/// Whether a focus move to `target` should defer a stop for the session
/// recording `recording`. `None` target means the window was hidden.
pub fn should_defer(recording: Option<&str>, target: Option<&str>) -> bool {
    match (recording, target) {
        // Nothing recording: nothing to defer.
        (None, _) => false,
        // Moved to the recorded note itself: do nothing.
        (Some(rec), Some(tgt)) => rec != tgt,
        // Window hidden while recording.
        (Some(_), None) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn focus_on_recorded_note_does_not_defer() {
        assert!(!should_defer(Some("a"), Some("a")));
    }

    #[test]
    fn focus_on_other_note_defers() {
        assert!(should_defer(Some("a"), Some("b")));
    }

    #[test]
    fn hidden_window_defers_only_while_recording() {
        assert!(should_defer(Some("a"), None));
        assert!(!should_defer(None, None));
        assert!(!should_defer(None, Some("b")));
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_keeps_the_original_deadline() {
        let mut grace = GraceScheduler::new(Duration::from_secs(30));
        grace.arm();
        tokio::time::advance(Duration::from_secs(20)).await;
        grace.arm();
        // Original deadline is 10s out, not 30s.
        tokio::time::timeout(Duration::from_secs(11), grace.expired())
            .await
            .expect("deadline should not have been pushed back");
    }

    #[tokio::test]
    async fn cancel_reports_whether_a_stop_was_pending() {
        let mut grace = GraceScheduler::new(Duration::from_secs(30));
        assert!(!grace.cancel());
        grace.arm();
        assert!(grace.is_armed());
        assert!(grace.cancel());
        assert!(!grace.is_armed());
    }
}

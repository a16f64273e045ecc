use serde::Serialize;
use std::fmt;
use tokio::sync::watch;

/// Phase of a migration run.
///
/// `Idle → Inventorying → Uploading → Rewriting → Verifying → {Complete | Failed}`.
/// Any running phase can end in `Failed`; a finished engine returns to `Idle` when run
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    Idle,
    Inventorying,
    Uploading,
    Rewriting,
    Verifying,
    Complete,
    Failed,
}

impl MigrationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, MigrationState::Complete | MigrationState::Failed)
    }

    pub fn can_transition_to(self, next: MigrationState) -> bool {
        use MigrationState::*;
        match (self, next) {
            (Idle, Inventorying)
            | (Inventorying, Uploading)
            | (Uploading, Rewriting)
            | (Rewriting, Verifying)
            | (Verifying, Complete) => true,
            (Inventorying | Uploading | Rewriting | Verifying, Failed) => true,
            (Complete | Failed, Idle) => true,
            _ => false,
        }
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationState::Idle => "idle",
            MigrationState::Inventorying => "inventorying",
            MigrationState::Uploading => "uploading",
            MigrationState::Rewriting => "rewriting",
            MigrationState::Verifying => "verifying",
            MigrationState::Complete => "complete",
            MigrationState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Publishes the current state to any number of observers.
pub(crate) struct StateTracker {
    tx: watch::Sender<MigrationState>,
}

impl StateTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(MigrationState::Idle);
        Self { tx }
    }

    pub fn current(&self) -> MigrationState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<MigrationState> {
        self.tx.subscribe()
    }

    pub fn advance(&self, next: MigrationState) {
        let current = self.current();
        if !current.can_transition_to(next) {
            tracing::warn!(from = %current, to = %next, "Unexpected migration state transition");
        }
        tracing::info!(from = %current, to = %next, "Migration state changed");
        self.tx.send_replace(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MigrationState::*;

    #[test]
    fn happy_path_is_allowed() {
        let path = [Idle, Inventorying, Uploading, Rewriting, Verifying, Complete];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn phases_cannot_be_skipped() {
        assert!(!Idle.can_transition_to(Uploading));
        assert!(!Inventorying.can_transition_to(Rewriting));
        assert!(!Uploading.can_transition_to(Complete));
        assert!(!Idle.can_transition_to(Failed));
        assert!(!Complete.can_transition_to(Failed));
    }

    #[test]
    fn finished_runs_can_restart() {
        assert!(Complete.can_transition_to(Idle));
        assert!(Failed.can_transition_to(Idle));
        assert!(Failed.is_terminal());
        assert!(!Verifying.is_terminal());
    }

    #[tokio::test]
    async fn observers_see_the_latest_state() {
        let tracker = StateTracker::new();
        let rx = tracker.subscribe();
        tracker.advance(Inventorying);
        tracker.advance(Failed);
        assert_eq!(*rx.borrow(), Failed);
        assert_eq!(tracker.current(), Failed);
    }
}

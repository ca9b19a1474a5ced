//! Escalating stop sequences

use std::time::Duration;

/// Grace period between forced kills when a handle is released
pub const RELEASE_KILL_WAIT_MS: u64 = 100;

/// One thing to do to a running child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopAction {
    /// Skip this step
    Noop,
    /// Only wait
    Wait,
    /// SIGTERM, then wait
    Terminate,
    /// SIGKILL, then wait
    Kill,
}

/// An action and how long to wait for the child to exit afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopStep {
    pub action: StopAction,
    pub timeout: Duration,
}

impl StopStep {
    pub const NOOP: StopStep = StopStep::new(StopAction::Noop, Duration::ZERO);

    pub const fn new(action: StopAction, timeout: Duration) -> Self {
        Self { action, timeout }
    }
}

/// Up to three steps, run in order until the child has been reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopSequence {
    steps: [StopStep; 3],
}

impl StopSequence {
    pub const fn new(first: StopStep, second: StopStep, third: StopStep) -> Self {
        Self {
            steps: [first, second, third],
        }
    }

    /// Kill, wait briefly, kill again, then a last kill without waiting.
    ///
    /// Used when a handle is released with its child still running.
    pub const fn release() -> Self {
        let wait = Duration::from_millis(RELEASE_KILL_WAIT_MS);
        Self::new(
            StopStep::new(StopAction::Kill, wait),
            StopStep::new(StopAction::Kill, wait),
            StopStep::new(StopAction::Kill, Duration::ZERO),
        )
    }

    /// SIGTERM with a grace period, then SIGKILL
    pub const fn graceful(grace: Duration) -> Self {
        Self::new(
            StopStep::new(StopAction::Terminate, grace),
            StopStep::new(StopAction::Kill, grace),
            StopStep::NOOP,
        )
    }

    pub fn steps(&self) -> impl Iterator<Item = &StopStep> {
        self.steps.iter().filter(|s| s.action != StopAction::Noop)
    }

    /// Longest time the sequence can block
    pub fn max_wait(&self) -> Duration {
        self.steps().map(|s| s.timeout).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_sequence_is_all_kills() {
        let seq = StopSequence::release();
        assert!(seq.steps().all(|s| s.action == StopAction::Kill));
        assert_eq!(seq.steps().count(), 3);
        assert_eq!(seq.max_wait(), Duration::from_millis(2 * RELEASE_KILL_WAIT_MS));
    }

    #[test]
    fn test_noop_steps_are_skipped() {
        let seq = StopSequence::graceful(Duration::from_secs(1));
        assert_eq!(seq.steps().count(), 2);
        assert_eq!(seq.steps().next().unwrap().action, StopAction::Terminate);
    }
}

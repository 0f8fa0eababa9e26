use std::fmt::{Display, Formatter};
use testbed_model::{Phase, Test};

/// The action that the controller needs to take in order to reconcile the `Test`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(super) enum Action {
    /// The environment has been torn down already.
    Skip,
    Deploy,
    Destroy,
    CheckTimeout,
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Skip => Display::fmt("skip", f),
            Action::Deploy => Display::fmt("deploy", f),
            Action::Destroy => Display::fmt("destroy", f),
            Action::CheckTimeout => Display::fmt("check the timeout of", f),
        }
    }
}

/// Inspect the `test` to determine which `Action` the controller should take.
pub(super) fn determine_action(test: &Test) -> Action {
    if test.is_complete() {
        return Action::Skip;
    }
    match test.phase() {
        phase if phase.is_terminal() => Action::Destroy,
        Phase::Running => Action::CheckTimeout,
        _ => Action::Deploy,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use testbed_model::{Component, TestSpec, TestStatus};

    fn test_with(status: Option<TestStatus>) -> Test {
        let mut test = Test::new(
            "quick-red-fox",
            TestSpec {
                test: Component::new("pytest"),
                ..TestSpec::default()
            },
        );
        test.status = status;
        test
    }

    fn status(phase: Phase, complete: bool) -> Option<TestStatus> {
        Some(TestStatus {
            phase,
            results: None,
            complete,
        })
    }

    #[test]
    fn new_test_is_deployed() {
        assert_eq!(determine_action(&test_with(None)), Action::Deploy);
        assert_eq!(
            determine_action(&test_with(status(Phase::Pending, false))),
            Action::Deploy
        );
    }

    #[test]
    fn running_test_is_timed() {
        assert_eq!(
            determine_action(&test_with(status(Phase::Running, false))),
            Action::CheckTimeout
        );
    }

    #[test]
    fn terminal_tests_are_destroyed() {
        for phase in [Phase::Completed, Phase::Failed, Phase::Cancelled] {
            assert_eq!(
                determine_action(&test_with(status(phase, false))),
                Action::Destroy
            );
        }
    }

    #[test]
    fn complete_tests_are_skipped() {
        // complete wins over every phase, including ones that would otherwise deploy.
        for phase in [
            Phase::Pending,
            Phase::Running,
            Phase::Completed,
            Phase::Failed,
            Phase::Cancelled,
        ] {
            assert_eq!(
                determine_action(&test_with(status(phase, true))),
                Action::Skip
            );
        }
    }
}

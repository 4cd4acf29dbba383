//! Execution contexts
//!
//! A Run is one live execution of an action graph from a single trigger.
//! It owns its continuation frames and a copy of the invocation arguments,
//! so concurrent runs of the same graph never share mutable state.

use crate::action::{Action, RepeatInfo, Scope};
use crate::frame::{Frame, FrameKind};
use autoloop_core::{ArgMap, Context};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Unique identifier of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(pub(crate) u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// Terminal state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Reached the end of its graph
    Completed,
    /// Stopped explicitly or preempted by its script's mode
    Stopped,
    /// Terminated by a runtime error (failed service call, step limit)
    Failed,
}

/// Observable state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Suspended,
    Finished(Outcome),
}

/// Why a run is suspended
#[derive(Debug)]
pub(crate) enum Suspend {
    /// Waiting for a deadline computed at node entry
    Delay { until: Duration },
    /// Waiting for a condition, with an optional deadline from node entry
    Condition { deadline: Option<Duration> },
    /// Waiting on a script's FIFO waiter list; woken by the scheduler
    Script { name: String },
}

#[derive(Debug)]
pub(crate) struct Run {
    pub id: RunId,
    pub context: Context,
    /// Name of the owning script, when started through the script registry
    pub script: Option<String>,
    /// Argument bindings captured at fire time
    pub args: ArgMap,
    /// Continuation frame arena (explicit stack)
    pub frames: Vec<Frame>,
    pub suspend: Option<Suspend>,
    /// Terminal outcome, set once; retired by the scheduler
    pub done: Option<Outcome>,
    /// Monotonic start time
    pub started: Duration,
    /// Wall-clock start time, for observability
    pub started_at: DateTime<Utc>,
}

impl Run {
    pub fn new(
        id: RunId,
        root: Arc<Action>,
        args: ArgMap,
        context: Context,
        script: Option<String>,
        started: Duration,
    ) -> Self {
        Self {
            id,
            context,
            script,
            args,
            frames: vec![Frame::enter(root, None)],
            suspend: None,
            done: None,
            started,
            started_at: Utc::now(),
        }
    }

    /// Scope seen by conditions, effects, and value specs: the run's own
    /// arguments plus the innermost enclosing loop iteration.
    pub fn scope(&self) -> Scope<'_> {
        let repeat = self.frames.iter().rev().find_map(|frame| match frame.kind {
            FrameKind::While { iteration } | FrameKind::Repeat { iteration, .. } => {
                Some(RepeatInfo {
                    index: iteration,
                    first: iteration == 0,
                })
            }
            _ => None,
        });
        Scope {
            args: &self.args,
            context: &self.context,
            repeat,
        }
    }

    pub fn status(&self) -> RunStatus {
        if let Some(outcome) = self.done {
            RunStatus::Finished(outcome)
        } else if self.suspend.is_some() {
            RunStatus::Suspended
        } else {
            RunStatus::Running
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::CountSpec;
    use autoloop_core::ArgValue;

    #[test]
    fn test_run_captures_args() {
        let root = Arc::new(Action::sequence(vec![]));
        let mut args = ArgMap::new();
        args.insert("x".to_string(), ArgValue::Int(3));

        let run = Run::new(
            RunId(1),
            root,
            args.clone(),
            Context::new(),
            None,
            Duration::ZERO,
        );

        assert_eq!(run.args, args);
        assert_eq!(run.frames.len(), 1);
        assert_eq!(run.status(), RunStatus::Running);
    }

    #[test]
    fn test_scope_finds_innermost_loop() {
        let body = Arc::new(Action::sequence(vec![]));
        let root = Arc::new(Action::repeat(CountSpec::Fixed(3), vec![]));
        let mut run = Run::new(
            RunId(2),
            root,
            ArgMap::new(),
            Context::new(),
            None,
            Duration::ZERO,
        );

        // Simulate an in-flight iteration: repeat frame with its body pushed
        if let FrameKind::Repeat { iteration, .. } = &mut run.frames[0].kind {
            *iteration = 2;
        }
        run.frames.push(Frame::enter(body, Some(0)));

        let scope = run.scope();
        assert_eq!(scope.repeat, Some(RepeatInfo { index: 2, first: false }));
    }
}

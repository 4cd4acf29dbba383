//! Continuation frames
//!
//! A frame is the suspended-state record for one action instance: a
//! reference to its immutable descriptor, a back-pointer to its parent
//! frame, and the small bookkeeping the node kind needs (child index,
//! iteration counter, chosen branch). Frames live in the run's own arena
//! (a Vec used as an explicit stack): no capturing closures, no per-step
//! heap allocation.
//!
//! Completion removes the frame by value, so the completion token is
//! consumed at most once by construction.

use crate::action::{Action, ActionKind};
use std::sync::Arc;

#[derive(Debug)]
pub(crate) struct Frame {
    /// Back-pointer into the run's frame arena; None for the root frame.
    pub parent: Option<usize>,
    /// Shared, read-only descriptor this frame executes.
    pub action: Arc<Action>,
    pub kind: FrameKind,
}

#[derive(Debug)]
pub(crate) enum FrameKind {
    Sequence {
        /// Index of the next child to enter.
        index: usize,
    },
    If {
        /// Condition evaluated and branch entered.
        entered: bool,
        /// Branch finished; the next visit completes the node.
        child_done: bool,
    },
    While {
        /// Completed iterations; survives suspensions inside the body.
        iteration: u32,
    },
    Repeat {
        iteration: u32,
        /// Resolved on first visit from the run's arguments.
        count: Option<u32>,
    },
    Delay {
        /// Deadline computed and suspension armed.
        armed: bool,
    },
    WaitUntil {
        armed: bool,
    },
    ScriptWait {
        /// Registered on the script's FIFO waiter list.
        registered: bool,
    },
    /// Synchronous leaf (service call, lambda, script execute/stop).
    Leaf,
}

impl Frame {
    pub fn enter(action: Arc<Action>, parent: Option<usize>) -> Self {
        let kind = match &action.kind {
            ActionKind::Sequence(_) => FrameKind::Sequence { index: 0 },
            ActionKind::If { .. } => FrameKind::If {
                entered: false,
                child_done: false,
            },
            ActionKind::While { .. } => FrameKind::While { iteration: 0 },
            ActionKind::Repeat { .. } => FrameKind::Repeat {
                iteration: 0,
                count: None,
            },
            ActionKind::Delay { .. } => FrameKind::Delay { armed: false },
            ActionKind::WaitUntil { .. } => FrameKind::WaitUntil { armed: false },
            ActionKind::ScriptWait { .. } => FrameKind::ScriptWait { registered: false },
            ActionKind::ScriptExecute { .. }
            | ActionKind::ScriptStop { .. }
            | ActionKind::ServiceCall { .. }
            | ActionKind::Lambda(_) => FrameKind::Leaf,
        };
        Self {
            parent,
            action,
            kind,
        }
    }
}

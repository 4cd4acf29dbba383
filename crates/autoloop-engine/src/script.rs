//! Named scripts and their invocation queues
//!
//! A script is a named action graph with an execution mode governing
//! concurrent invocations. The registry is an explicit object owned by the
//! engine (initialized once at startup, no global state): per script it
//! tracks the live runs, the FIFO queue of pending invocations, and the
//! FIFO list of runs waiting for the script to go idle.
//!
//! Ordering is a tested invariant: invocations enter at the queue tail and
//! start from the head, so arrival order equals start order equals
//! completion order in queued mode. Waiters wake head-first, one per loop
//! tick, never by draining the whole queue inside a single call frame.

use crate::action::Action;
use crate::run::RunId;
use autoloop_core::{ArgMap, Context};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Script execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScriptMode {
    /// Default - refuse new invocations while running
    #[default]
    Single,

    /// Stop the live run and restart with the new arguments
    Restart,

    /// Queue invocations (up to max), strictly FIFO
    Queued,

    /// Run all invocations simultaneously (up to max)
    Parallel,
}

/// What to do when max runs exceeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MaxExceeded {
    /// Log a warning
    #[default]
    Warning,
    /// Silently ignore
    Silent,
}

fn default_max() -> usize {
    10
}

/// A named script definition
pub struct ScriptConfig {
    /// Script name (e.g., "flip_thru_pages")
    pub name: String,

    /// Execution mode
    pub mode: ScriptMode,

    /// Maximum live + queued runs (for queued/parallel modes)
    pub max: usize,

    /// Max exceeded behavior
    pub max_exceeded: MaxExceeded,

    /// Action sequence
    pub sequence: Action,
}

impl ScriptConfig {
    pub fn new(name: impl Into<String>, sequence: Action) -> Self {
        Self {
            name: name.into(),
            mode: ScriptMode::default(),
            max: default_max(),
            max_exceeded: MaxExceeded::default(),
            sequence,
        }
    }

    pub fn mode(mut self, mode: ScriptMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn max(mut self, max: usize) -> Self {
        self.max = max;
        self
    }

    pub fn max_exceeded(mut self, policy: MaxExceeded) -> Self {
        self.max_exceeded = policy;
        self
    }
}

/// A queued invocation with its captured arguments
#[derive(Debug)]
pub(crate) struct PendingInvocation {
    pub args: ArgMap,
    pub context: Context,
}

struct ScriptEntry {
    root: Arc<Action>,
    mode: ScriptMode,
    max: usize,
    max_exceeded: MaxExceeded,
    /// Live runs of this script
    running: Vec<RunId>,
    /// FIFO queue of invocations not yet started
    queue: VecDeque<PendingInvocation>,
    /// FIFO list of runs waiting for this script to go idle
    waiters: VecDeque<RunId>,
}

impl ScriptEntry {
    /// Idle means no live run and nothing pending to start.
    fn is_idle(&self) -> bool {
        self.running.is_empty() && self.queue.is_empty()
    }
}

/// Per-name run/queue state for all registered scripts
pub(crate) struct ScriptRegistry {
    entries: HashMap<String, ScriptEntry>,
    /// Runs whose stop was requested this tick; drained by the engine
    stop_requests: Vec<RunId>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            stop_requests: Vec::new(),
        }
    }

    pub fn register(&mut self, config: ScriptConfig) -> bool {
        if self.entries.contains_key(&config.name) {
            return false;
        }
        self.entries.insert(
            config.name,
            ScriptEntry {
                root: Arc::new(config.sequence),
                mode: config.mode,
                max: config.max,
                max_exceeded: config.max_exceeded,
                running: Vec::new(),
                queue: VecDeque::new(),
                waiters: VecDeque::new(),
            },
        );
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Apply the script's mode policy to a new invocation.
    ///
    /// The invocation is recorded immediately (so `is_idle` reflects it),
    /// but the run itself starts on a later tick via `next_starts`.
    pub fn enqueue(&mut self, name: &str, args: ArgMap, context: Context) {
        let Some(entry) = self.entries.get_mut(name) else {
            warn!("Script '{}' not found; invocation dropped", name);
            return;
        };

        match entry.mode {
            ScriptMode::Single => {
                if !entry.is_idle() {
                    warn!("Script '{}' is already running! (mode: single)", name);
                    return;
                }
                entry.queue.push_back(PendingInvocation { args, context });
            }
            ScriptMode::Restart => {
                self.stop_requests.extend(entry.running.drain(..));
                entry.queue.clear();
                entry.queue.push_back(PendingInvocation { args, context });
            }
            ScriptMode::Queued | ScriptMode::Parallel => {
                if entry.running.len() + entry.queue.len() >= entry.max {
                    if entry.max_exceeded == MaxExceeded::Warning {
                        warn!(
                            "Script '{}' exceeded maximum number of runs ({}); invocation dropped",
                            name, entry.max
                        );
                    }
                    return;
                }
                entry.queue.push_back(PendingInvocation { args, context });
            }
        }
        debug!(
            script = %name,
            queued = entry.queue.len(),
            running = entry.running.len(),
            "Script invocation enqueued"
        );
    }

    /// Stop all running and queued invocations of a script.
    pub fn stop(&mut self, name: &str) -> Vec<RunId> {
        let Some(entry) = self.entries.get_mut(name) else {
            return Vec::new();
        };
        let stopped: Vec<RunId> = entry.running.drain(..).collect();
        entry.queue.clear();
        self.stop_requests.extend(stopped.iter().copied());
        stopped
    }

    pub fn take_stop_requests(&mut self) -> Vec<RunId> {
        std::mem::take(&mut self.stop_requests)
    }

    pub fn is_idle(&self, name: &str) -> bool {
        self.entries.get(name).map_or(true, ScriptEntry::is_idle)
    }

    /// Register a run at the tail of the script's FIFO waiter list.
    pub fn add_waiter(&mut self, name: &str, id: RunId) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.waiters.push_back(id);
        }
    }

    /// Invocations ready to start this tick: at most one per script, and
    /// only when the mode permits another live run.
    pub fn next_starts(&mut self) -> Vec<(String, Arc<Action>, PendingInvocation)> {
        let mut starts = Vec::new();
        for (name, entry) in self.entries.iter_mut() {
            if entry.queue.is_empty() {
                continue;
            }
            let can_start = match entry.mode {
                ScriptMode::Parallel => true,
                _ => entry.running.is_empty(),
            };
            if can_start {
                if let Some(invocation) = entry.queue.pop_front() {
                    starts.push((name.clone(), entry.root.clone(), invocation));
                }
            }
        }
        starts
    }

    pub fn note_started(&mut self, name: &str, id: RunId) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.running.push(id);
        }
    }

    pub fn note_finished(&mut self, name: &str, id: RunId) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.running.retain(|r| *r != id);
        }
    }

    /// Remove a retired run from every waiter list.
    pub fn purge_run(&mut self, id: RunId) {
        for entry in self.entries.values_mut() {
            entry.waiters.retain(|w| *w != id);
        }
    }

    /// Waiters to wake this tick: head of the FIFO list of every fully-idle
    /// script. At most one per script per tick to avoid reentrant cascades.
    pub fn wake_candidates(&mut self) -> Vec<RunId> {
        let mut woken = Vec::new();
        for entry in self.entries.values_mut() {
            if entry.is_idle() {
                if let Some(id) = entry.waiters.pop_front() {
                    woken.push(id);
                }
            }
        }
        woken
    }

    /// Whether any script still has pending queue work to start.
    pub fn has_pending(&self) -> bool {
        !self.stop_requests.is_empty() || self.entries.values().any(|e| !e.queue.is_empty())
    }
}

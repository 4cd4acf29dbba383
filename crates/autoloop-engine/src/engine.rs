//! The cooperative scheduler
//!
//! The engine owns every live run and advances them from a single-threaded,
//! non-blocking loop: the host calls [`Engine::tick`] repeatedly, and each
//! tick does exactly the work available now. Suspended runs keep their
//! continuation frames; the engine registers loop interest only while
//! something is pending and deregisters when fully idle.
//!
//! Cross-thread interaction goes through [`EngineHandle`], which posts
//! commands applied at the start of the next tick, never re-entrantly
//! within the current call frame.

use crate::action::{Action, ActionKind};
use crate::frame::{Frame, FrameKind};
use crate::run::{Outcome, Run, RunId, RunStatus, Suspend};
use crate::script::{ScriptConfig, ScriptRegistry};
use autoloop_core::{ArgMap, Clock, Context};
use autoloop_service_registry::{ServiceError, ServiceRegistry};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Safety bound on non-suspending work per run per tick. A loop that never
/// suspends would otherwise starve the rest of the device loop.
const MAX_STEPS_PER_TICK: u32 = 10_000;

/// Engine errors
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("script not found: {0}")]
    ScriptNotFound(String),

    #[error("script already registered: {0}")]
    DuplicateScript(String),
}

enum Command {
    Fire {
        root: Arc<Action>,
        args: ArgMap,
        context: Context,
    },
    ExecuteScript {
        name: String,
        args: ArgMap,
        context: Context,
    },
    StopScript {
        name: String,
    },
}

fn lock_queue(queue: &Mutex<VecDeque<Command>>) -> MutexGuard<'_, VecDeque<Command>> {
    queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cheap, cloneable command surface for triggers and service handlers
///
/// Commands enqueue and take effect on the engine's next tick.
#[derive(Clone)]
pub struct EngineHandle {
    commands: Arc<Mutex<VecDeque<Command>>>,
}

impl EngineHandle {
    /// Fire an action graph as a new independent run
    pub fn fire(&self, root: Arc<Action>, args: ArgMap) {
        self.fire_with_context(root, args, Context::new());
    }

    pub fn fire_with_context(&self, root: Arc<Action>, args: ArgMap, context: Context) {
        lock_queue(&self.commands).push_back(Command::Fire {
            root,
            args,
            context,
        });
    }

    /// Invoke a named script (mode-dependent)
    pub fn execute_script(&self, name: impl Into<String>, args: ArgMap) {
        lock_queue(&self.commands).push_back(Command::ExecuteScript {
            name: name.into(),
            args,
            context: Context::new(),
        });
    }

    /// Stop all running and queued invocations of a named script
    pub fn stop_script(&self, name: impl Into<String>) {
        lock_queue(&self.commands).push_back(Command::StopScript { name: name.into() });
    }
}

/// The cooperative action execution engine
pub struct Engine {
    clock: Arc<dyn Clock>,
    services: Arc<ServiceRegistry>,
    scripts: ScriptRegistry,
    runs: HashMap<RunId, Run>,
    /// Creation order; also the polling order, so runs suspended on the
    /// same condition complete in FIFO arrival order.
    order: Vec<RunId>,
    outcomes: HashMap<RunId, Outcome>,
    commands: Arc<Mutex<VecDeque<Command>>>,
    next_run_id: u64,
    poll_enabled: bool,
    max_steps_per_tick: u32,
}

impl Engine {
    pub fn new(clock: Arc<dyn Clock>, services: Arc<ServiceRegistry>) -> Self {
        Self {
            clock,
            services,
            scripts: ScriptRegistry::new(),
            runs: HashMap::new(),
            order: Vec::new(),
            outcomes: HashMap::new(),
            commands: Arc::new(Mutex::new(VecDeque::new())),
            next_run_id: 0,
            poll_enabled: true,
            max_steps_per_tick: MAX_STEPS_PER_TICK,
        }
    }

    /// Command surface usable from other threads and from service handlers
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            commands: self.commands.clone(),
        }
    }

    /// Register a named script; rejects duplicates
    pub fn register_script(&mut self, config: ScriptConfig) -> Result<(), EngineError> {
        let name = config.name.clone();
        if self.scripts.register(config) {
            Ok(())
        } else {
            Err(EngineError::DuplicateScript(name))
        }
    }

    /// Fire an action graph immediately (trigger interface)
    pub fn fire(&mut self, root: Arc<Action>, args: ArgMap) -> RunId {
        self.fire_with_context(root, args, Context::new())
    }

    pub fn fire_with_context(&mut self, root: Arc<Action>, args: ArgMap, context: Context) -> RunId {
        self.create_run(root, args, context, None)
    }

    /// Invoke a named script immediately (boot path); mode policy applies
    pub fn execute_script(&mut self, name: &str, args: ArgMap) -> Result<(), EngineError> {
        if !self.scripts.contains(name) {
            return Err(EngineError::ScriptNotFound(name.to_string()));
        }
        self.scripts.enqueue(name, args, Context::new());
        self.poll_enabled = true;
        Ok(())
    }

    /// Stop all running and queued invocations of a named script
    pub fn stop_script(&mut self, name: &str) -> Result<(), EngineError> {
        if !self.scripts.contains(name) {
            return Err(EngineError::ScriptNotFound(name.to_string()));
        }
        self.scripts.stop(name);
        self.apply_stop_requests();
        Ok(())
    }

    /// Stop one run, releasing its continuation chain
    pub fn stop_run(&mut self, id: RunId) -> bool {
        match self.runs.get_mut(&id) {
            Some(run) if run.done.is_none() => {
                run.done = Some(Outcome::Stopped);
                run.suspend = None;
                true
            }
            _ => false,
        }
    }

    /// Boot-phase hook. Disables polling only when no runs are pending:
    /// a run fired during boot, before setup, must keep the loop enabled.
    pub fn setup(&mut self) {
        if self.runs.is_empty() && !self.scripts.has_pending() && lock_queue(&self.commands).is_empty()
        {
            self.poll_enabled = false;
        }
    }

    /// Whether the engine currently wants loop ticks
    pub fn needs_poll(&self) -> bool {
        self.poll_enabled
    }

    pub fn status(&self, id: RunId) -> Option<RunStatus> {
        if let Some(run) = self.runs.get(&id) {
            Some(run.status())
        } else {
            self.outcomes.get(&id).map(|o| RunStatus::Finished(*o))
        }
    }

    pub fn outcome(&self, id: RunId) -> Option<Outcome> {
        self.outcomes.get(&id).copied()
    }

    pub fn is_active(&self, id: RunId) -> bool {
        self.runs.contains_key(&id)
    }

    pub fn active_count(&self) -> usize {
        self.runs.len()
    }

    pub fn script_is_idle(&self, name: &str) -> bool {
        self.scripts.is_idle(name)
    }

    /// The service registry this engine dispatches service calls through
    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    /// Advance every pending run by the work available in this tick
    pub fn tick(&mut self) {
        if !lock_queue(&self.commands).is_empty() {
            self.poll_enabled = true;
        }
        if !self.poll_enabled {
            return;
        }

        self.drain_commands();
        self.apply_stop_requests();
        self.start_pending_scripts();
        self.wake_script_waiters();
        self.poll_runs();
        self.apply_stop_requests();
        self.retire_finished();

        if self.runs.is_empty()
            && !self.scripts.has_pending()
            && lock_queue(&self.commands).is_empty()
        {
            self.poll_enabled = false;
        }
    }

    fn create_run(
        &mut self,
        root: Arc<Action>,
        args: ArgMap,
        context: Context,
        script: Option<String>,
    ) -> RunId {
        let id = RunId(self.next_run_id);
        self.next_run_id += 1;
        let run = Run::new(id, root, args, context, script, self.clock.now());
        debug!(run = %id, script = ?run.script, "run created");
        self.runs.insert(id, run);
        self.order.push(id);
        self.poll_enabled = true;
        id
    }

    fn drain_commands(&mut self) {
        let drained: Vec<Command> = lock_queue(&self.commands).drain(..).collect();
        for command in drained {
            match command {
                Command::Fire {
                    root,
                    args,
                    context,
                } => {
                    self.create_run(root, args, context, None);
                }
                Command::ExecuteScript {
                    name,
                    args,
                    context,
                } => {
                    self.scripts.enqueue(&name, args, context);
                }
                Command::StopScript { name } => {
                    self.scripts.stop(&name);
                }
            }
        }
    }

    fn apply_stop_requests(&mut self) {
        for id in self.scripts.take_stop_requests() {
            if let Some(run) = self.runs.get_mut(&id) {
                if run.done.is_none() {
                    debug!(run = %id, "run stopped");
                    run.done = Some(Outcome::Stopped);
                    run.suspend = None;
                }
            }
        }
    }

    fn start_pending_scripts(&mut self) {
        for (name, root, invocation) in self.scripts.next_starts() {
            let id = self.create_run(
                root,
                invocation.args,
                invocation.context,
                Some(name.clone()),
            );
            self.scripts.note_started(&name, id);
        }
    }

    fn wake_script_waiters(&mut self) {
        for id in self.scripts.wake_candidates() {
            if let Some(run) = self.runs.get_mut(&id) {
                if matches!(run.suspend, Some(Suspend::Script { .. })) {
                    debug!(run = %id, "script waiter woken");
                    run.suspend = None;
                }
            }
        }
    }

    fn poll_runs(&mut self) {
        let order: Vec<RunId> = self.order.clone();
        for id in order {
            let Some(run) = self.runs.get_mut(&id) else {
                continue;
            };
            if run.done.is_some() {
                continue;
            }
            step_run(
                run,
                &mut self.scripts,
                &self.services,
                self.clock.as_ref(),
                self.max_steps_per_tick,
            );
        }
    }

    fn retire_finished(&mut self) {
        let finished: Vec<RunId> = self
            .order
            .iter()
            .copied()
            .filter(|id| self.runs.get(id).is_some_and(|r| r.done.is_some()))
            .collect();
        for id in finished {
            if let Some(run) = self.runs.remove(&id) {
                let outcome = run.done.unwrap_or(Outcome::Completed);
                self.outcomes.insert(id, outcome);
                if let Some(script) = &run.script {
                    self.scripts.note_finished(script, id);
                }
                self.scripts.purge_run(id);
                let elapsed = self.clock.now().saturating_sub(run.started);
                debug!(
                    run = %id,
                    outcome = ?outcome,
                    started_at = %run.started_at,
                    ?elapsed,
                    "run retired"
                );
            }
        }
        self.order.retain(|id| self.runs.contains_key(id));
    }
}

/// What one visit of the top frame decided to do
enum Visit {
    /// Enter the next sequence child
    Push(Arc<Action>),
    /// Enter the chosen if branch
    EnterBranch(Arc<Action>),
    /// Begin a loop iteration
    LoopIteration {
        body: Arc<Action>,
        iteration: u32,
        /// Resolved repeat count to store on first visit
        count: Option<u32>,
    },
    ArmDelay(Duration),
    ArmWait { deadline: Option<Duration> },
    RegisterWait(String),
    ExecuteScript { name: String, args: ArgMap },
    StopScript(String),
    CallService { service: String, args: ArgMap },
    Complete,
    Fail(String),
}

/// Advance one run by exactly the work available in this tick.
fn step_run(
    run: &mut Run,
    scripts: &mut ScriptRegistry,
    services: &ServiceRegistry,
    clock: &dyn Clock,
    max_steps: u32,
) {
    let mut steps: u32 = 0;
    loop {
        // Resume checks for a suspended run.
        if let Some(suspend) = &run.suspend {
            match suspend {
                Suspend::Delay { until } => {
                    if clock.now() < *until {
                        return;
                    }
                    run.suspend = None;
                }
                Suspend::Condition { deadline } => {
                    let deadline = *deadline;
                    let Some(top) = run.frames.last() else {
                        debug_assert!(false, "suspended run without frames");
                        run.suspend = None;
                        continue;
                    };
                    let action = top.action.clone();
                    let ActionKind::WaitUntil { condition, .. } = &action.kind else {
                        debug_assert!(false, "condition suspension on a non-wait frame");
                        run.suspend = None;
                        continue;
                    };
                    if condition(&run.scope()) {
                        run.suspend = None;
                    } else if deadline.is_some_and(|d| clock.now() >= d) {
                        if let Some(label) = action.label() {
                            warn!("{} timed out", label);
                        }
                        run.suspend = None;
                    } else {
                        return;
                    }
                }
                // Woken by the scheduler on the script's idle transition
                Suspend::Script { .. } => return,
            }
        }

        if run.frames.is_empty() {
            run.done = Some(Outcome::Completed);
            debug!(run = %run.id, "run completed");
            return;
        }

        steps += 1;
        if steps > max_steps {
            warn!(run = %run.id, max_steps, "run exceeded step limit in one tick; terminating");
            run.done = Some(Outcome::Failed);
            return;
        }

        let top = run.frames.len() - 1;
        let action = run.frames[top].action.clone();

        let visit = decide_visit(run, top, &action, scripts, clock);

        match visit {
            Visit::Push(child) => push_frame(run, child, top),
            Visit::EnterBranch(branch) => {
                if let FrameKind::If { entered, .. } = &mut run.frames[top].kind {
                    *entered = true;
                }
                push_frame(run, branch, top);
            }
            Visit::LoopIteration {
                body,
                iteration,
                count,
            } => {
                if let Some(label) = action.label() {
                    info!("{} iteration {}", label, iteration);
                }
                if let Some(resolved) = count {
                    if let FrameKind::Repeat { count, .. } = &mut run.frames[top].kind {
                        *count = Some(resolved);
                    }
                }
                push_frame(run, body, top);
            }
            Visit::ArmDelay(duration) => {
                if let FrameKind::Delay { armed } = &mut run.frames[top].kind {
                    *armed = true;
                }
                // Deadline from the entry instant, never from a cached
                // tick-start timestamp.
                run.suspend = Some(Suspend::Delay {
                    until: clock.now() + duration,
                });
            }
            Visit::ArmWait { deadline } => {
                if let FrameKind::WaitUntil { armed } = &mut run.frames[top].kind {
                    *armed = true;
                }
                run.suspend = Some(Suspend::Condition { deadline });
            }
            Visit::RegisterWait(name) => {
                if let FrameKind::ScriptWait { registered } = &mut run.frames[top].kind {
                    *registered = true;
                }
                scripts.add_waiter(&name, run.id);
                run.suspend = Some(Suspend::Script { name });
            }
            Visit::ExecuteScript { name, args } => {
                scripts.enqueue(&name, args, run.context.child());
                pop_complete(run);
            }
            Visit::StopScript(name) => {
                let stopped = scripts.stop(&name);
                if stopped.contains(&run.id) {
                    debug!(run = %run.id, "run stopped by its own script.stop");
                    run.done = Some(Outcome::Stopped);
                    return;
                }
                pop_complete(run);
            }
            Visit::CallService { service, args } => {
                match dispatch_service(services, &service, args, &run.context) {
                    Ok(()) => pop_complete(run),
                    Err(err) => {
                        error!(
                            run = %run.id,
                            service = %service,
                            error = %err,
                            "service call failed; terminating run"
                        );
                        run.done = Some(Outcome::Failed);
                        return;
                    }
                }
            }
            Visit::Complete => pop_complete(run),
            Visit::Fail(reason) => {
                error!(run = %run.id, %reason, "run failed");
                run.done = Some(Outcome::Failed);
                return;
            }
        }
    }
}

fn decide_visit(
    run: &Run,
    top: usize,
    action: &Arc<Action>,
    scripts: &ScriptRegistry,
    clock: &dyn Clock,
) -> Visit {
    let frame = &run.frames[top];
    match (&frame.kind, &action.kind) {
        (FrameKind::Sequence { index }, ActionKind::Sequence(children)) => {
            if *index < children.len() {
                Visit::Push(children[*index].clone())
            } else {
                Visit::Complete
            }
        }
        (
            FrameKind::If { entered, child_done },
            ActionKind::If {
                condition,
                then,
                otherwise,
            },
        ) => {
            if *child_done {
                Visit::Complete
            } else if !*entered {
                if condition(&run.scope()) {
                    Visit::EnterBranch(then.clone())
                } else if let Some(branch) = otherwise {
                    Visit::EnterBranch(branch.clone())
                } else {
                    Visit::Complete
                }
            } else {
                debug_assert!(false, "if frame revisited while its branch is active");
                Visit::Complete
            }
        }
        (FrameKind::While { iteration }, ActionKind::While { condition, body }) => {
            if condition(&run.scope()) {
                Visit::LoopIteration {
                    body: body.clone(),
                    iteration: *iteration,
                    count: None,
                }
            } else {
                Visit::Complete
            }
        }
        (FrameKind::Repeat { iteration, count }, ActionKind::Repeat { count: spec, body }) => {
            let resolved = count.unwrap_or_else(|| spec.resolve(&run.scope()));
            if *iteration < resolved {
                Visit::LoopIteration {
                    body: body.clone(),
                    iteration: *iteration,
                    count: Some(resolved),
                }
            } else {
                Visit::Complete
            }
        }
        (FrameKind::Delay { armed }, ActionKind::Delay { duration }) => {
            if *armed {
                Visit::Complete
            } else {
                Visit::ArmDelay(duration.resolve(&run.scope()))
            }
        }
        (FrameKind::WaitUntil { armed }, ActionKind::WaitUntil { condition, timeout }) => {
            if *armed {
                Visit::Complete
            } else if condition(&run.scope()) {
                // Condition already true at entry: no suspension
                Visit::Complete
            } else {
                let deadline = timeout
                    .as_ref()
                    .map(|t| clock.now() + t.resolve(&run.scope()));
                Visit::ArmWait { deadline }
            }
        }
        (FrameKind::ScriptWait { registered }, ActionKind::ScriptWait { script }) => {
            if *registered || scripts.is_idle(script) {
                Visit::Complete
            } else {
                Visit::RegisterWait(script.clone())
            }
        }
        (FrameKind::Leaf, ActionKind::ScriptExecute { script, args }) => {
            let scope = run.scope();
            let resolved: ArgMap = args
                .iter()
                .filter_map(|(name, spec)| spec.resolve(&scope).map(|v| (name.clone(), v)))
                .collect();
            Visit::ExecuteScript {
                name: script.clone(),
                args: resolved,
            }
        }
        (FrameKind::Leaf, ActionKind::ScriptStop { script }) => Visit::StopScript(script.clone()),
        (FrameKind::Leaf, ActionKind::ServiceCall { service, data }) => {
            let scope = run.scope();
            let resolved: ArgMap = data
                .iter()
                .filter_map(|(name, spec)| spec.resolve(&scope).map(|v| (name.clone(), v)))
                .collect();
            Visit::CallService {
                service: service.clone(),
                args: resolved,
            }
        }
        (FrameKind::Leaf, ActionKind::Lambda(effect)) => {
            effect(&run.scope());
            Visit::Complete
        }
        _ => {
            debug_assert!(false, "frame/descriptor kind mismatch");
            Visit::Fail("internal frame/descriptor mismatch".to_string())
        }
    }
}

fn push_frame(run: &mut Run, action: Arc<Action>, parent: usize) {
    if let Some(label) = action.label() {
        debug!("{} started", label);
    }
    run.frames.push(Frame::enter(action, Some(parent)));
}

/// Pop the finished top frame by value and notify its direct parent.
///
/// The popped frame is the completion token: it is consumed here exactly
/// once, so double-completion is unrepresentable.
fn pop_complete(run: &mut Run) {
    let Some(frame) = run.frames.pop() else {
        debug_assert!(false, "completion signaled with no frame");
        return;
    };
    if let Some(label) = frame.action.label() {
        info!("{} completed", label);
    }
    debug_assert_eq!(
        frame.parent,
        run.frames.len().checked_sub(1),
        "frame parent pointer out of sync"
    );
    if let Some(parent) = run.frames.last_mut() {
        match &mut parent.kind {
            FrameKind::Sequence { index } => *index += 1,
            FrameKind::While { iteration } => *iteration += 1,
            FrameKind::Repeat { iteration, .. } => *iteration += 1,
            FrameKind::If { child_done, .. } => *child_done = true,
            _ => debug_assert!(false, "completed child under a leaf frame"),
        }
    }
}

fn dispatch_service(
    services: &ServiceRegistry,
    service: &str,
    args: ArgMap,
    context: &Context,
) -> Result<(), ServiceError> {
    let (domain, name) = service.split_once('.').ok_or_else(|| {
        ServiceError::InvalidData(format!("invalid service format: {service}"))
    })?;
    if let Some(payload) = services.call(domain, name, args, context.child())? {
        debug!(service = %service, %payload, "service returned a response");
    }
    Ok(())
}

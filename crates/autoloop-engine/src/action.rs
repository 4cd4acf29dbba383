//! Action graph descriptors
//!
//! Actions are the building blocks of automations and scripts. A graph is
//! built once at configuration time, shared via `Arc`, and never mutated;
//! every run walks the same descriptors with its own continuation state.
//!
//! Conditions and effects are closures fixed at build time. Values that vary
//! per invocation (delay durations, repeat counts, sub-script arguments) are
//! resolved against the run's [`Scope`] when the node executes.

use autoloop_core::{ArgMap, ArgValue, Context};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Condition closure evaluated against the running scope
pub type Predicate = Arc<dyn Fn(&Scope) -> bool + Send + Sync>;

/// Effect closure executed by a lambda action
pub type Effect = Arc<dyn Fn(&Scope) + Send + Sync>;

/// What a node sees while executing: the run's captured arguments, its
/// context, and the innermost enclosing loop iteration (if any).
#[derive(Debug)]
pub struct Scope<'a> {
    pub args: &'a ArgMap,
    pub context: &'a Context,
    pub repeat: Option<RepeatInfo>,
}

/// Iteration info of the innermost enclosing while/repeat loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatInfo {
    /// Current iteration, counting from 0
    pub index: u32,
    /// Whether this is the first iteration
    pub first: bool,
}

impl Scope<'_> {
    pub fn arg(&self, name: &str) -> Option<&ArgValue> {
        self.args.get(name)
    }

    pub fn int_arg(&self, name: &str) -> Option<i64> {
        self.args.get(name).and_then(ArgValue::as_int)
    }

    pub fn bool_arg(&self, name: &str) -> Option<bool> {
        self.args.get(name).and_then(ArgValue::as_bool)
    }

    pub fn float_arg(&self, name: &str) -> Option<f64> {
        self.args.get(name).and_then(ArgValue::as_float)
    }

    pub fn str_arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).and_then(ArgValue::as_str)
    }
}

/// A delay duration, fixed or resolved per invocation
#[derive(Clone)]
pub enum DurationSpec {
    /// Fixed duration
    Fixed(Duration),
    /// Milliseconds read from a named argument (0 if absent)
    FromArgMillis(String),
    /// Computed from the scope
    Computed(Arc<dyn Fn(&Scope) -> Duration + Send + Sync>),
}

impl DurationSpec {
    pub(crate) fn resolve(&self, scope: &Scope) -> Duration {
        match self {
            DurationSpec::Fixed(d) => *d,
            DurationSpec::FromArgMillis(name) => {
                Duration::from_millis(scope.int_arg(name).unwrap_or(0).max(0) as u64)
            }
            DurationSpec::Computed(f) => f(scope),
        }
    }
}

impl fmt::Debug for DurationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DurationSpec::Fixed(d) => write!(f, "Fixed({:?})", d),
            DurationSpec::FromArgMillis(name) => write!(f, "FromArgMillis({:?})", name),
            DurationSpec::Computed(_) => write!(f, "Computed(..)"),
        }
    }
}

/// A repeat count, fixed or resolved per invocation
#[derive(Clone)]
pub enum CountSpec {
    /// Fixed count
    Fixed(u32),
    /// Count read from a named argument (0 if absent or negative)
    FromArg(String),
    /// Computed from the scope
    Computed(Arc<dyn Fn(&Scope) -> u32 + Send + Sync>),
}

impl CountSpec {
    pub(crate) fn resolve(&self, scope: &Scope) -> u32 {
        match self {
            CountSpec::Fixed(n) => *n,
            CountSpec::FromArg(name) => scope.int_arg(name).unwrap_or(0).max(0) as u32,
            CountSpec::Computed(f) => f(scope),
        }
    }
}

impl fmt::Debug for CountSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CountSpec::Fixed(n) => write!(f, "Fixed({})", n),
            CountSpec::FromArg(name) => write!(f, "FromArg({:?})", name),
            CountSpec::Computed(_) => write!(f, "Computed(..)"),
        }
    }
}

/// An argument value for a sub-script or service invocation
#[derive(Clone)]
pub enum ArgSpec {
    /// Literal value
    Value(ArgValue),
    /// Forwarded from the caller's argument of the given name
    FromArg(String),
    /// Computed from the scope
    Computed(Arc<dyn Fn(&Scope) -> ArgValue + Send + Sync>),
}

impl ArgSpec {
    pub(crate) fn resolve(&self, scope: &Scope) -> Option<ArgValue> {
        match self {
            ArgSpec::Value(v) => Some(v.clone()),
            ArgSpec::FromArg(name) => scope.arg(name).cloned(),
            ArgSpec::Computed(f) => Some(f(scope)),
        }
    }
}

impl fmt::Debug for ArgSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgSpec::Value(v) => write!(f, "Value({:?})", v),
            ArgSpec::FromArg(name) => write!(f, "FromArg({:?})", name),
            ArgSpec::Computed(_) => write!(f, "Computed(..)"),
        }
    }
}

/// One node of an immutable action graph
pub struct Action {
    pub(crate) label: Option<Arc<str>>,
    pub(crate) kind: ActionKind,
}

pub(crate) enum ActionKind {
    /// Children execute in declaration order; each completes fully
    /// (including suspensions) before the next starts.
    Sequence(Vec<Arc<Action>>),

    /// Evaluate once on entry, run the chosen branch, complete once.
    /// Branches are Sequence nodes so the active child of the frame is
    /// always a child listed in the descriptor.
    If {
        condition: Predicate,
        then: Arc<Action>,
        otherwise: Option<Arc<Action>>,
    },

    /// Re-evaluates the condition before each iteration.
    While { condition: Predicate, body: Arc<Action> },

    /// Fixed iteration count, 0..count-1.
    Repeat { count: CountSpec, body: Arc<Action> },

    /// Suspend for a duration measured from node entry.
    Delay { duration: DurationSpec },

    /// Suspend until the condition holds or the timeout (from entry) elapses.
    WaitUntil {
        condition: Predicate,
        timeout: Option<DurationSpec>,
    },

    /// Invoke a named script (mode-dependent) and continue.
    ScriptExecute {
        script: String,
        args: Vec<(String, ArgSpec)>,
    },

    /// Suspend until the named script is fully idle.
    ScriptWait { script: String },

    /// Stop all running and queued invocations of a named script.
    ScriptStop { script: String },

    /// Dispatch through the service registry ("domain.service").
    ServiceCall {
        service: String,
        data: Vec<(String, ArgSpec)>,
    },

    /// Arbitrary synchronous effect.
    Lambda(Effect),
}

impl ActionKind {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            ActionKind::Sequence(_) => "sequence",
            ActionKind::If { .. } => "if",
            ActionKind::While { .. } => "while",
            ActionKind::Repeat { .. } => "repeat",
            ActionKind::Delay { .. } => "delay",
            ActionKind::WaitUntil { .. } => "wait_until",
            ActionKind::ScriptExecute { .. } => "script.execute",
            ActionKind::ScriptWait { .. } => "script.wait",
            ActionKind::ScriptStop { .. } => "script.stop",
            ActionKind::ServiceCall { .. } => "service_call",
            ActionKind::Lambda(_) => "lambda",
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("kind", &self.kind.name())
            .field("label", &self.label)
            .finish()
    }
}

impl Action {
    fn new(kind: ActionKind) -> Self {
        Self { label: None, kind }
    }

    /// Attach a label driving the stable log contract
    /// (`"<label> iteration <N>"`, `"<label> completed"`, `"<label> timed out"`).
    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(Arc::from(label.into().into_boxed_str()));
        self
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Sequence of actions executed in order
    pub fn sequence(children: Vec<Action>) -> Self {
        Self::new(ActionKind::Sequence(
            children.into_iter().map(Arc::new).collect(),
        ))
    }

    /// If/then with no else branch
    pub fn if_then<C>(condition: C, then: Vec<Action>) -> Self
    where
        C: Fn(&Scope) -> bool + Send + Sync + 'static,
    {
        Self::new(ActionKind::If {
            condition: Arc::new(condition),
            then: Arc::new(Action::sequence(then)),
            otherwise: None,
        })
    }

    /// If/then/else
    pub fn if_else<C>(condition: C, then: Vec<Action>, otherwise: Vec<Action>) -> Self
    where
        C: Fn(&Scope) -> bool + Send + Sync + 'static,
    {
        Self::new(ActionKind::If {
            condition: Arc::new(condition),
            then: Arc::new(Action::sequence(then)),
            otherwise: Some(Arc::new(Action::sequence(otherwise))),
        })
    }

    /// While loop; the condition is re-evaluated before every iteration
    pub fn while_loop<C>(condition: C, body: Vec<Action>) -> Self
    where
        C: Fn(&Scope) -> bool + Send + Sync + 'static,
    {
        Self::new(ActionKind::While {
            condition: Arc::new(condition),
            body: Arc::new(Action::sequence(body)),
        })
    }

    /// Repeat loop with a fixed or per-invocation count
    pub fn repeat(count: CountSpec, body: Vec<Action>) -> Self {
        Self::new(ActionKind::Repeat {
            count,
            body: Arc::new(Action::sequence(body)),
        })
    }

    /// Suspend for a fixed duration
    pub fn delay(duration: Duration) -> Self {
        Self::new(ActionKind::Delay {
            duration: DurationSpec::Fixed(duration),
        })
    }

    /// Suspend for a duration resolved per invocation
    pub fn delay_spec(duration: DurationSpec) -> Self {
        Self::new(ActionKind::Delay { duration })
    }

    /// Suspend until the condition holds
    pub fn wait_until<C>(condition: C) -> Self
    where
        C: Fn(&Scope) -> bool + Send + Sync + 'static,
    {
        Self::new(ActionKind::WaitUntil {
            condition: Arc::new(condition),
            timeout: None,
        })
    }

    /// Suspend until the condition holds or the timeout elapses
    pub fn wait_until_with_timeout<C>(condition: C, timeout: Duration) -> Self
    where
        C: Fn(&Scope) -> bool + Send + Sync + 'static,
    {
        Self::new(ActionKind::WaitUntil {
            condition: Arc::new(condition),
            timeout: Some(DurationSpec::Fixed(timeout)),
        })
    }

    /// Invoke a named script with argument bindings
    pub fn script_execute(script: impl Into<String>, args: Vec<(&str, ArgSpec)>) -> Self {
        Self::new(ActionKind::ScriptExecute {
            script: script.into(),
            args: args
                .into_iter()
                .map(|(name, spec)| (name.to_string(), spec))
                .collect(),
        })
    }

    /// Suspend until the named script is fully idle
    pub fn script_wait(script: impl Into<String>) -> Self {
        Self::new(ActionKind::ScriptWait {
            script: script.into(),
        })
    }

    /// Stop all running and queued invocations of a named script
    pub fn script_stop(script: impl Into<String>) -> Self {
        Self::new(ActionKind::ScriptStop {
            script: script.into(),
        })
    }

    /// Call a service ("domain.service") with argument bindings
    pub fn service_call(service: impl Into<String>, data: Vec<(&str, ArgSpec)>) -> Self {
        Self::new(ActionKind::ServiceCall {
            service: service.into(),
            data: data
                .into_iter()
                .map(|(name, spec)| (name.to_string(), spec))
                .collect(),
        })
    }

    /// Arbitrary synchronous effect
    pub fn lambda<F>(effect: F) -> Self
    where
        F: Fn(&Scope) + Send + Sync + 'static,
    {
        Self::new(ActionKind::Lambda(Arc::new(effect)))
    }
}

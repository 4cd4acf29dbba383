//! Cooperative action execution engine
//!
//! This crate runs automation action graphs cooperatively inside a
//! single-threaded, non-blocking event loop. An external trigger fires an
//! immutable action graph; the engine creates an execution context (a run)
//! and advances it a little each loop tick. Suspending actions (delay,
//! wait_until, script.wait) return control to the loop without blocking and
//! resume on a later tick.
//!
//! # Action Types
//!
//! - Sequences, if/else, while, repeat
//! - Delays and wait-until with timeouts
//! - Named sub-script invocation and waiting (single/restart/queued/parallel)
//! - Service calls and lambdas
//!
//! # Key Types
//!
//! - [`Action`] - One node of an immutable action graph
//! - [`Engine`] - The cooperative scheduler; advance it with [`Engine::tick`]
//! - [`EngineHandle`] - `Send + Sync` command surface for triggers/handlers
//! - [`ScriptConfig`] - A named script with an execution mode
//!
//! The engine core is an explicit poll-driven state machine: suspension is
//! recorded per-run state, not an `async` construct. The only async surface
//! is the optional tokio driver in [`runtime`].

mod action;
mod engine;
mod frame;
mod run;
pub mod runtime;
mod script;

pub use action::{Action, ArgSpec, CountSpec, DurationSpec, RepeatInfo, Scope};
pub use engine::{Engine, EngineError, EngineHandle};
pub use run::{Outcome, RunId, RunStatus};
pub use script::{MaxExceeded, ScriptConfig, ScriptMode};

//! Remote action-call-with-response lifecycle
//!
//! Remote callers invoke user-defined actions with typed named arguments.
//! Actions advertising response support get a tracked PendingActionCall
//! with a deadline; the firmware side responds asynchronously by call id.
//! The state machine per call is `Idle -> AwaitingResponse -> {Responded |
//! TimedOut}`: a call is Idle until tracked, AwaitingResponse while in the
//! table, and leaves the table exactly once, through a response or
//! through timeout expiry. Late responses after removal are detected,
//! logged, and dropped without ever reaching a stale recipient.

mod calls;
mod user_action;

pub use calls::{
    ActionCallTable, ActionResponse, PendingActionCall, ResponseSink, DEFAULT_ACTION_CALL_TIMEOUT,
};
pub use user_action::{ArgDescriptor, ArgType, SupportsResponse, UserAction};

use autoloop_core::{ArgMap, Clock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// API errors
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("action not found: {0}")]
    ActionNotFound(String),

    #[error("unknown argument '{arg}' for action {action}")]
    UnknownArgument { action: String, arg: String },

    #[error("argument '{arg}' for action {action} must be of type {expected:?}")]
    InvalidArgumentType {
        action: String,
        arg: String,
        expected: ArgType,
    },

    #[error("action does not support responses: {0}")]
    ResponseNotSupported(String),
}

/// One inbound invocation delivered to an action handler
#[derive(Debug, Clone)]
pub struct ActionCall {
    pub call_id: u32,
    pub args: ArgMap,
    pub return_response: bool,
}

/// Handler invoked for each remote action call
pub type ActionHandler = Arc<dyn Fn(ActionCall) + Send + Sync>;

struct RegisteredAction {
    descriptor: UserAction,
    handler: ActionHandler,
}

/// Dispatches remote action calls and tracks pending responses
pub struct ActionServer {
    actions: HashMap<String, RegisteredAction>,
    calls: ActionCallTable,
    next_key: u32,
    next_call_id: u32,
}

impl ActionServer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_timeout(clock, DEFAULT_ACTION_CALL_TIMEOUT)
    }

    /// The call timeout is configuration, not an invariant.
    pub fn with_timeout(clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            actions: HashMap::new(),
            calls: ActionCallTable::with_timeout(clock, timeout),
            next_key: 1,
            next_call_id: 1,
        }
    }

    /// Register a user action with its declared argument types
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        args: Vec<ArgDescriptor>,
        supports_response: SupportsResponse,
        handler: F,
    ) -> u32
    where
        F: Fn(ActionCall) + Send + Sync + 'static,
    {
        let name = name.into();
        let key = self.next_key;
        self.next_key += 1;

        debug!(action = %name, key, "Registering user action");

        self.actions.insert(
            name.clone(),
            RegisteredAction {
                descriptor: UserAction {
                    key,
                    name,
                    args,
                    supports_response,
                },
                handler: Arc::new(handler),
            },
        );
        key
    }

    /// List registered action descriptors
    pub fn actions(&self) -> Vec<&UserAction> {
        self.actions.values().map(|a| &a.descriptor).collect()
    }

    pub fn get_action(&self, name: &str) -> Option<&UserAction> {
        self.actions.get(name).map(|a| &a.descriptor)
    }

    /// Invoke an action remotely; returns the allocated call id.
    ///
    /// When the caller requests a response and the action supports one, a
    /// PendingActionCall is created with deadline = now + timeout.
    pub fn invoke(
        &mut self,
        name: &str,
        args: ArgMap,
        return_response: bool,
        connection: Arc<dyn ResponseSink>,
    ) -> Result<u32, ApiError> {
        let action = self
            .actions
            .get(name)
            .ok_or_else(|| ApiError::ActionNotFound(name.to_string()))?;

        for (arg_name, value) in &args {
            let descriptor = action
                .descriptor
                .args
                .iter()
                .find(|d| &d.name == arg_name)
                .ok_or_else(|| ApiError::UnknownArgument {
                    action: name.to_string(),
                    arg: arg_name.clone(),
                })?;
            if !descriptor.arg_type.matches(value) {
                return Err(ApiError::InvalidArgumentType {
                    action: name.to_string(),
                    arg: arg_name.clone(),
                    expected: descriptor.arg_type,
                });
            }
        }

        let supports = action.descriptor.supports_response;
        if return_response && supports == SupportsResponse::None {
            return Err(ApiError::ResponseNotSupported(name.to_string()));
        }

        let call_id = self.next_call_id;
        self.next_call_id += 1;

        if return_response {
            self.calls.track(call_id, supports, connection);
        }

        debug!(action = %name, call_id, return_response, "Invoking user action");

        let handler = action.handler.clone();
        handler(ActionCall {
            call_id,
            args,
            return_response,
        });
        Ok(call_id)
    }

    /// Deliver a response for a tracked call.
    ///
    /// Returns false (after logging a warning) when no active call exists
    /// for the id, the late-response path after a timeout.
    pub fn respond(
        &mut self,
        call_id: u32,
        success: bool,
        error_message: impl Into<String>,
        payload: Option<serde_json::Value>,
    ) -> bool {
        self.calls.respond(call_id, success, error_message, payload)
    }

    /// Expire pending calls whose deadline has passed
    pub fn tick(&mut self) {
        self.calls.expire();
    }

    pub fn pending_count(&self) -> usize {
        self.calls.pending_count()
    }
}

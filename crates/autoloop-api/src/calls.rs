//! Pending action call tracking
//!
//! Every remote call that expects a response is tracked here until it is
//! responded to or its deadline passes, whichever comes first. Removal
//! happens exactly once; a response arriving after removal is logged and
//! dropped so it can never reach a stale or wrong recipient.

use crate::user_action::SupportsResponse;
use autoloop_core::Clock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default deadline for action calls awaiting a response.
///
/// A configuration default, not an invariant: override it per table with
/// [`ActionCallTable::with_timeout`].
pub const DEFAULT_ACTION_CALL_TIMEOUT: Duration = Duration::from_millis(500);

/// Response delivered to the remote caller
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResponse {
    pub call_id: u32,
    pub success: bool,
    pub error_message: String,
    /// Structured payload (arbitrary nested JSON); None for status-only
    pub payload: Option<serde_json::Value>,
}

/// Delivery boundary back to the originating connection
pub trait ResponseSink: Send + Sync {
    fn send_response(&self, response: ActionResponse);
}

/// A tracked in-flight call awaiting a response
pub struct PendingActionCall {
    pub call_id: u32,
    /// Absolute deadline on the table's clock
    pub deadline: Duration,
    supports_response: SupportsResponse,
    connection: Arc<dyn ResponseSink>,
}

/// Table of calls in the AwaitingResponse state
pub struct ActionCallTable {
    clock: Arc<dyn Clock>,
    timeout: Duration,
    pending: HashMap<u32, PendingActionCall>,
}

impl ActionCallTable {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_timeout(clock, DEFAULT_ACTION_CALL_TIMEOUT)
    }

    pub fn with_timeout(clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            clock,
            timeout,
            pending: HashMap::new(),
        }
    }

    /// Track a call: deadline = now + timeout, measured when tracking
    /// starts, not from any cached ambient timestamp.
    pub fn track(
        &mut self,
        call_id: u32,
        supports_response: SupportsResponse,
        connection: Arc<dyn ResponseSink>,
    ) {
        let deadline = self.clock.now() + self.timeout;
        debug!(call_id, ?deadline, "Tracking action call");
        self.pending.insert(
            call_id,
            PendingActionCall {
                call_id,
                deadline,
                supports_response,
                connection,
            },
        );
    }

    /// Deliver a response if the call is still tracked.
    ///
    /// Late responses (after timeout removal) log a warning and no-op; the
    /// table stays fully functional for subsequent calls.
    pub fn respond(
        &mut self,
        call_id: u32,
        success: bool,
        error_message: impl Into<String>,
        payload: Option<serde_json::Value>,
    ) -> bool {
        let Some(call) = self.pending.remove(&call_id) else {
            warn!(
                "Cannot send response: no active call found for action_call_id {}",
                call_id
            );
            return false;
        };

        let payload = match call.supports_response {
            SupportsResponse::Status => {
                if payload.is_some() {
                    debug!(call_id, "Status-mode response drops its payload");
                }
                None
            }
            _ => payload,
        };

        call.connection.send_response(ActionResponse {
            call_id,
            success,
            error_message: error_message.into(),
            payload,
        });
        true
    }

    /// Remove expired calls and deliver timeout failures to their callers
    pub fn expire(&mut self) {
        let now = self.clock.now();
        let expired: Vec<u32> = self
            .pending
            .values()
            .filter(|call| now >= call.deadline)
            .map(|call| call.call_id)
            .collect();

        for call_id in expired {
            if let Some(call) = self.pending.remove(&call_id) {
                debug!(call_id, "Action call timed out; removing");
                call.connection.send_response(ActionResponse {
                    call_id,
                    success: false,
                    error_message: "Action call timed out".to_string(),
                    payload: None,
                });
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

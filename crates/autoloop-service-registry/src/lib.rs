//! Service registry for the autoloop engine
//!
//! This crate provides the ServiceRegistry, which manages all registered
//! services a device exposes. Services are the targets of the engine's
//! service-call actions: the handlers that actually touch hardware or
//! publish state.
//!
//! Handlers are synchronous: the engine advances runs from a single-threaded
//! cooperative loop, and a handler runs to completion within one tick. Work
//! that needs to span ticks belongs in the action graph (delay, wait_until),
//! not in a handler.

use autoloop_core::{ArgMap, Context};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Result type for service calls
pub type ServiceResult = Result<Option<serde_json::Value>, ServiceError>;

/// Service handler function type
pub type ServiceHandler = Arc<dyn Fn(ServiceInvocation) -> ServiceResult + Send + Sync>;

/// Errors that can occur when working with services
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("service not found: {domain}.{service}")]
    NotFound { domain: String, service: String },

    #[error("service call failed: {0}")]
    CallFailed(String),

    #[error("invalid service data: {0}")]
    InvalidData(String),
}

/// One call into a registered service handler
#[derive(Debug, Clone)]
pub struct ServiceInvocation {
    /// The domain the service belongs to (e.g., "light", "script")
    pub domain: String,

    /// The service name (e.g., "turn_on")
    pub service: String,

    /// Named arguments passed to the service
    pub args: ArgMap,

    /// Context tracking the run that initiated this call
    pub context: Context,
}

impl ServiceInvocation {
    pub fn new(
        domain: impl Into<String>,
        service: impl Into<String>,
        args: ArgMap,
        context: Context,
    ) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            args,
            context,
        }
    }

    /// Get the full service identifier (domain.service)
    pub fn service_id(&self) -> String {
        format!("{}.{}", self.domain, self.service)
    }
}

/// Information about a registered service
#[derive(Debug, Clone)]
pub struct ServiceDescription {
    /// Domain the service belongs to
    pub domain: String,
    /// Service name
    pub service: String,
    /// Description of what the service does
    pub description: Option<String>,
}

struct RegisteredService {
    handler: ServiceHandler,
    description: ServiceDescription,
}

/// The service registry manages all registered services
///
/// The ServiceRegistry is responsible for:
/// - Registering services with their handlers
/// - Calling services and routing to the appropriate handler
/// - Providing information about available services
pub struct ServiceRegistry {
    /// Services indexed by "domain.service" key
    services: DashMap<String, RegisteredService>,
}

impl ServiceRegistry {
    /// Create a new empty service registry
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
        }
    }

    /// Register a new service
    pub fn register<F>(&self, domain: impl Into<String>, service: impl Into<String>, handler: F)
    where
        F: Fn(ServiceInvocation) -> ServiceResult + Send + Sync + 'static,
    {
        let domain = domain.into();
        let service = service.into();
        let key = format!("{}.{}", domain, service);

        debug!(domain = %domain, service = %service, "Registering service");

        let description = ServiceDescription {
            domain,
            service,
            description: None,
        };

        self.services.insert(
            key,
            RegisteredService {
                handler: Arc::new(handler),
                description,
            },
        );
    }

    /// Call a service
    ///
    /// Routes to the registered handler for `domain.service`. The handler is
    /// invoked outside the registry lock so it may re-register or look up
    /// other services.
    pub fn call(
        &self,
        domain: &str,
        service: &str,
        args: ArgMap,
        context: Context,
    ) -> ServiceResult {
        let key = format!("{}.{}", domain, service);

        let handler = {
            let registered = self.services.get(&key).ok_or_else(|| {
                warn!(domain = %domain, service = %service, "Service not found");
                ServiceError::NotFound {
                    domain: domain.to_string(),
                    service: service.to_string(),
                }
            })?;
            registered.handler.clone()
        };

        debug!(domain = %domain, service = %service, "Calling service");

        handler(ServiceInvocation::new(domain, service, args, context))
    }

    /// Check if a service exists
    pub fn has_service(&self, domain: &str, service: &str) -> bool {
        let key = format!("{}.{}", domain, service);
        self.services.contains_key(&key)
    }

    /// Get service description
    pub fn get_service(&self, domain: &str, service: &str) -> Option<ServiceDescription> {
        let key = format!("{}.{}", domain, service);
        self.services.get(&key).map(|s| s.description.clone())
    }

    /// Get all services for a domain
    pub fn domain_services(&self, domain: &str) -> Vec<ServiceDescription> {
        self.services
            .iter()
            .filter(|s| s.description.domain == domain)
            .map(|s| s.description.clone())
            .collect()
    }

    /// Get all registered services grouped by domain
    pub fn all_services(&self) -> HashMap<String, Vec<ServiceDescription>> {
        let mut result: HashMap<String, Vec<ServiceDescription>> = HashMap::new();

        for entry in self.services.iter() {
            result
                .entry(entry.description.domain.clone())
                .or_default()
                .push(entry.description.clone());
        }

        result
    }

    /// Unregister a service
    pub fn unregister(&self, domain: &str, service: &str) -> bool {
        let key = format!("{}.{}", domain, service);
        let removed = self.services.remove(&key).is_some();

        if removed {
            debug!(domain = %domain, service = %service, "Unregistered service");
        }

        removed
    }

    /// Get total number of registered services
    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe wrapper for ServiceRegistry
pub type SharedServiceRegistry = Arc<ServiceRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use autoloop_core::ArgValue;
    use serde_json::json;

    fn args(pairs: &[(&str, ArgValue)]) -> ArgMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_register_and_call() {
        let registry = ServiceRegistry::new();

        registry.register("test", "echo", |call: ServiceInvocation| {
            let value = call.args.get("value").and_then(ArgValue::as_int);
            Ok(Some(json!({ "value": value })))
        });

        let result = registry
            .call(
                "test",
                "echo",
                args(&[("value", ArgValue::Int(5))]),
                Context::new(),
            )
            .unwrap();

        assert_eq!(result, Some(json!({ "value": 5 })));
    }

    #[test]
    fn test_service_not_found() {
        let registry = ServiceRegistry::new();

        let result = registry.call("nonexistent", "service", ArgMap::new(), Context::new());

        assert!(matches!(result, Err(ServiceError::NotFound { .. })));
    }

    #[test]
    fn test_has_service() {
        let registry = ServiceRegistry::new();

        registry.register("light", "turn_on", |_| Ok(None));

        assert!(registry.has_service("light", "turn_on"));
        assert!(!registry.has_service("light", "turn_off"));
        assert!(!registry.has_service("switch", "turn_on"));
    }

    #[test]
    fn test_domain_services() {
        let registry = ServiceRegistry::new();

        registry.register("light", "turn_on", |_| Ok(None));
        registry.register("light", "turn_off", |_| Ok(None));
        registry.register("switch", "toggle", |_| Ok(None));

        assert_eq!(registry.domain_services("light").len(), 2);
        assert_eq!(registry.domain_services("switch").len(), 1);
        assert_eq!(registry.service_count(), 3);
    }

    #[test]
    fn test_unregister() {
        let registry = ServiceRegistry::new();

        registry.register("light", "turn_on", |_| Ok(None));

        assert!(registry.has_service("light", "turn_on"));
        assert!(registry.unregister("light", "turn_on"));
        assert!(!registry.has_service("light", "turn_on"));
        assert!(!registry.unregister("light", "turn_on")); // Already removed
    }

    #[test]
    fn test_service_error() {
        let registry = ServiceRegistry::new();

        registry.register("test", "fail", |_| {
            Err(ServiceError::CallFailed("intentional failure".to_string()))
        });

        let result = registry.call("test", "fail", ArgMap::new(), Context::new());

        assert!(matches!(result, Err(ServiceError::CallFailed(_))));
    }
}

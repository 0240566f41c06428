//! Service registry and handler chains.
//!
//! Services are registered explicitly at startup: each `Service` lists its
//! methods as typed closures into a `MethodTable`, and every listed method
//! becomes a *plain delegate* for `(service, method)`. Registering a second
//! instance under the same service name appends more delegates; dispatch in
//! plain-delegate mode runs ALL of them in registration order and returns
//! the last non-`None` result. That fan-out is intentional and preserved
//! as-is; do not extend it.
//!
//! `register_handler` adds a *next-aware* handler instead: handlers for one
//! method compose right-to-left into a continuation chain, and a handler
//! that never invokes its continuation ends the chain early. When any
//! next-aware handlers exist for a method they take precedence over the
//! plain delegates.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use driftsync_core::{DriftError, Result};

use crate::session::PeerId;

/// Boxed handler future.
pub type HandlerFuture = BoxFuture<'static, Result<Option<Value>>>;

/// A plain delegate: `(params, caller) -> result`.
pub type PlainHandler = Arc<dyn Fn(Vec<Value>, PeerId) -> HandlerFuture + Send + Sync>;

/// The continuation passed to a next-aware handler. `None` for the last
/// handler in the chain.
pub type Next = Box<dyn FnOnce() -> HandlerFuture + Send>;

/// A next-aware handler: `(params, caller, next) -> result`.
pub type ChainHandler = Arc<dyn Fn(Vec<Value>, PeerId, Option<Next>) -> HandlerFuture + Send + Sync>;

/// Wrap a synchronous closure as a `PlainHandler`.
pub fn plain_handler<F>(f: F) -> PlainHandler
where
    F: Fn(Vec<Value>, PeerId) -> Result<Option<Value>> + Send + Sync + 'static,
{
    Arc::new(move |params, caller| {
        let out = f(params, caller);
        Box::pin(async move { out })
    })
}

/// Wrap an async closure as a `ChainHandler`.
pub fn chain_handler<F>(f: F) -> ChainHandler
where
    F: Fn(Vec<Value>, PeerId, Option<Next>) -> HandlerFuture + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A service is a named bundle of methods registered at startup.
pub trait Service: Send + Sync {
    fn name(&self) -> &'static str;
    /// List this instance's methods. Called once per registration.
    fn register(&self, methods: &mut MethodTable);
}

/// Collects `(method name, delegate)` pairs during `Service::register`.
#[derive(Default)]
pub struct MethodTable {
    entries: Vec<(&'static str, PlainHandler)>,
}

impl MethodTable {
    /// Add an async method.
    pub fn method<F>(&mut self, name: &'static str, handler: F)
    where
        F: Fn(Vec<Value>, PeerId) -> HandlerFuture + Send + Sync + 'static,
    {
        self.entries.push((name, Arc::new(handler)));
    }

    /// Add a synchronous method.
    pub fn sync_method<F>(&mut self, name: &'static str, handler: F)
    where
        F: Fn(Vec<Value>, PeerId) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        self.entries.push((name, plain_handler(handler)));
    }
}

type MethodKey = (String, String);

/// Maps `(service, method)` to its handlers.
#[derive(Default)]
pub struct ServiceRegistry {
    services: DashSet<String>,
    plain: DashMap<MethodKey, Vec<PlainHandler>>,
    chained: DashMap<MethodKey, Vec<ChainHandler>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every method a service instance lists. Multiple instances
    /// (or repeat registrations) per service name all take effect.
    pub fn register_service(&self, service: &dyn Service) {
        let mut table = MethodTable::default();
        service.register(&mut table);
        let name = service.name();
        self.services.insert(name.to_string());
        for (method, handler) in table.entries {
            self.plain
                .entry((name.to_string(), method.to_string()))
                .or_default()
                .push(handler);
            debug!(service = name, method, "registered service method");
        }
    }

    /// Append a next-aware handler for one method.
    pub fn register_handler(&self, service: &str, method: &str, handler: ChainHandler) {
        self.services.insert(service.to_string());
        self.chained
            .entry((service.to_string(), method.to_string()))
            .or_default()
            .push(handler);
        debug!(service, method, "registered chained handler");
    }

    /// Invoke the handlers for `(service, method)`.
    ///
    /// Unknown service or method is fatal to this call only.
    pub async fn dispatch(
        &self,
        service: &str,
        method: &str,
        params: Vec<Value>,
        caller: PeerId,
    ) -> Result<Option<Value>> {
        let key = (service.to_string(), method.to_string());

        if let Some(chain) = self.chained.get(&key).map(|e| e.value().clone()) {
            return compose_chain(chain, params, caller).await;
        }

        if let Some(handlers) = self.plain.get(&key).map(|e| e.value().clone()) {
            let mut last = None;
            for handler in handlers {
                if let Some(value) = handler(params.clone(), caller).await? {
                    last = Some(value);
                }
            }
            return Ok(last);
        }

        if self.services.contains(service) {
            Err(DriftError::UnknownMethod {
                service: service.to_string(),
                method: method.to_string(),
            })
        } else {
            Err(DriftError::UnknownService(service.to_string()))
        }
    }

    /// Whether any handler exists for `(service, method)`.
    pub fn has_method(&self, service: &str, method: &str) -> bool {
        let key = (service.to_string(), method.to_string());
        self.chained.contains_key(&key) || self.plain.contains_key(&key)
    }
}

/// Build the continuation chain right-to-left and invoke the first handler.
fn compose_chain(handlers: Vec<ChainHandler>, params: Vec<Value>, caller: PeerId) -> HandlerFuture {
    let mut next: Option<Next> = None;
    for handler in handlers.into_iter().rev() {
        let downstream = next.take();
        let params = params.clone();
        next = Some(Box::new(move || handler(params, caller, downstream)));
    }
    match next {
        Some(head) => head(),
        None => Box::pin(async { Ok(None) }),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    const CALLER: PeerId = PeerId(1);

    struct CounterService {
        name: &'static str,
        hits: Arc<AtomicUsize>,
        reply: Option<Value>,
    }

    impl Service for CounterService {
        fn name(&self) -> &'static str {
            self.name
        }
        fn register(&self, methods: &mut MethodTable) {
            let hits = Arc::clone(&self.hits);
            let reply = self.reply.clone();
            methods.sync_method("poke", move |_params, _caller| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(reply.clone())
            });
        }
    }

    #[tokio::test]
    async fn plain_delegates_fan_out_and_last_result_wins() {
        let registry = ServiceRegistry::new();
        let first_hits = Arc::new(AtomicUsize::new(0));
        let second_hits = Arc::new(AtomicUsize::new(0));

        registry.register_service(&CounterService {
            name: "stats",
            hits: Arc::clone(&first_hits),
            reply: Some(json!("first")),
        });
        registry.register_service(&CounterService {
            name: "stats",
            hits: Arc::clone(&second_hits),
            reply: Some(json!("second")),
        });

        let result = registry
            .dispatch("stats", "poke", vec![], CALLER)
            .await
            .unwrap();

        // All delegates run; the last non-None result is returned.
        assert_eq!(first_hits.load(Ordering::SeqCst), 1);
        assert_eq!(second_hits.load(Ordering::SeqCst), 1);
        assert_eq!(result, Some(json!("second")));
    }

    #[tokio::test]
    async fn none_results_do_not_mask_earlier_values() {
        let registry = ServiceRegistry::new();
        registry.register_service(&CounterService {
            name: "stats",
            hits: Arc::new(AtomicUsize::new(0)),
            reply: Some(json!(41)),
        });
        registry.register_service(&CounterService {
            name: "stats",
            hits: Arc::new(AtomicUsize::new(0)),
            reply: None,
        });

        let result = registry
            .dispatch("stats", "poke", vec![], CALLER)
            .await
            .unwrap();
        assert_eq!(result, Some(json!(41)));
    }

    #[tokio::test]
    async fn chain_runs_in_registration_order() {
        let registry = ServiceRegistry::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for label in ["outer", "inner"] {
            let order = Arc::clone(&order);
            registry.register_handler(
                "auth",
                "login",
                chain_handler(move |_params, _caller, next| {
                    let order = Arc::clone(&order);
                    Box::pin(async move {
                        order.lock().unwrap().push(label);
                        match next {
                            Some(next) => next().await,
                            None => Ok(Some(json!(label))),
                        }
                    })
                }),
            );
        }

        let result = registry
            .dispatch("auth", "login", vec![], CALLER)
            .await
            .unwrap();
        assert_eq!(result, Some(json!("inner")));
        assert_eq!(*order.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn chain_short_circuits_when_next_is_skipped() {
        let registry = ServiceRegistry::new();
        let inner_hits = Arc::new(AtomicUsize::new(0));

        registry.register_handler(
            "auth",
            "login",
            chain_handler(|_params, _caller, _next| {
                // Never calls `next`: the rest of the chain must not run.
                Box::pin(async { Ok(Some(json!("denied"))) })
            }),
        );
        let hits = Arc::clone(&inner_hits);
        registry.register_handler(
            "auth",
            "login",
            chain_handler(move |_params, _caller, _next| {
                let hits = Arc::clone(&hits);
                Box::pin(async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                })
            }),
        );

        let result = registry
            .dispatch("auth", "login", vec![], CALLER)
            .await
            .unwrap();
        assert_eq!(result, Some(json!("denied")));
        assert_eq!(inner_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn chained_handlers_take_precedence_over_plain() {
        let registry = ServiceRegistry::new();
        let plain_hits = Arc::new(AtomicUsize::new(0));

        registry.register_service(&CounterService {
            name: "auth",
            hits: Arc::clone(&plain_hits),
            reply: Some(json!("plain")),
        });
        registry.register_handler(
            "auth",
            "poke",
            chain_handler(|_params, _caller, _next| Box::pin(async { Ok(Some(json!("chained"))) })),
        );

        let result = registry
            .dispatch("auth", "poke", vec![], CALLER)
            .await
            .unwrap();
        assert_eq!(result, Some(json!("chained")));
        assert_eq!(plain_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_service_and_method_are_distinct_errors() {
        let registry = ServiceRegistry::new();
        registry.register_service(&CounterService {
            name: "stats",
            hits: Arc::new(AtomicUsize::new(0)),
            reply: None,
        });

        let err = registry
            .dispatch("nope", "poke", vec![], CALLER)
            .await
            .unwrap_err();
        assert!(matches!(err, DriftError::UnknownService(_)));

        let err = registry
            .dispatch("stats", "nope", vec![], CALLER)
            .await
            .unwrap_err();
        assert!(matches!(err, DriftError::UnknownMethod { .. }));
    }

    #[tokio::test]
    async fn handlers_receive_parameters() {
        let registry = ServiceRegistry::new();
        registry.register_handler(
            "math",
            "add",
            chain_handler(|params, _caller, _next| {
                Box::pin(async move {
                    let sum: i64 = params.iter().filter_map(|v| v.as_i64()).sum();
                    Ok(Some(json!(sum)))
                })
            }),
        );

        let result = registry
            .dispatch("math", "add", vec![json!(2), json!(3)], CALLER)
            .await
            .unwrap();
        assert_eq!(result, Some(json!(5)));
    }
}

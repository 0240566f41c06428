//! Middleware pipeline wrapping service dispatch.
//!
//! Stages run in the order they were layered, each receiving the call
//! context and a continuation. The chain terminates in a built-in stage
//! that performs the registry dispatch and marks the context handled; a
//! stage that never calls `next` prevents everything downstream, terminal
//! dispatch included, from running (cache hits, auth rejections).
//!
//! The context is passed by value and returned, so a stage cannot hold a
//! reference to it beyond its own call.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;

use driftsync_core::Result;

use crate::registry::ServiceRegistry;
use crate::session::PeerId;

/// The mutable record threaded through the pipeline.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub service: String,
    pub method: String,
    pub params: Vec<Value>,
    pub caller: PeerId,
    /// Set by the terminal dispatch stage, or by a short-circuiting stage.
    pub result: Option<Value>,
    /// True once terminal dispatch has run.
    pub handled: bool,
}

impl CallContext {
    pub fn new(service: String, method: String, params: Vec<Value>, caller: PeerId) -> Self {
        Self {
            service,
            method,
            params,
            caller,
            result: None,
            handled: false,
        }
    }
}

/// Continuation to the next pipeline stage.
pub type NextStage = Box<dyn FnOnce(CallContext) -> BoxFuture<'static, Result<CallContext>> + Send>;

/// One pipeline stage.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, ctx: CallContext, next: NextStage) -> Result<CallContext>;
}

/// Ordered middleware stages over a service registry.
pub struct Pipeline {
    stages: std::sync::Mutex<Vec<Arc<dyn Middleware>>>,
    registry: Arc<ServiceRegistry>,
}

impl Pipeline {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self {
            stages: std::sync::Mutex::new(Vec::new()),
            registry,
        }
    }

    /// Append a stage. Stages run in the order they were added.
    pub fn layer(&self, middleware: Arc<dyn Middleware>) {
        self.lock_stages().push(middleware);
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Run the context through every stage and the terminal dispatch.
    pub async fn execute(&self, ctx: CallContext) -> Result<CallContext> {
        let stages = self.lock_stages().clone();
        let registry = Arc::clone(&self.registry);

        // Terminal stage: registry dispatch.
        let mut next: NextStage = Box::new(move |mut ctx: CallContext| {
            Box::pin(async move {
                let result = registry
                    .dispatch(&ctx.service, &ctx.method, ctx.params.clone(), ctx.caller)
                    .await?;
                ctx.result = result;
                ctx.handled = true;
                Ok(ctx)
            })
        });

        // Wrap right-to-left so stages execute in layering order.
        for middleware in stages.into_iter().rev() {
            let downstream = next;
            next = Box::new(move |ctx| {
                Box::pin(async move { middleware.handle(ctx, downstream).await })
            });
        }

        next(ctx).await
    }

    fn lock_stages(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn Middleware>>> {
        match self.stages.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

//! # CompensationRegistry - Compensating Action Registration and Execution
//!
//! This module provides the [`CompensationRegistry`], a table from stable
//! [`ActionKey`]s to handlers populated at startup. Delivered compensation
//! messages carry the key, never an executable reference.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use crate::context::CallContext;
use crate::model::{ActionKey, CompensationInvocation};

/// Errors from compensating actions.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Compensation handler not found: {0}")]
    NotFound(ActionKey),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Compensation failed: {0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// A compensating action.
///
/// The handler receives the call context bound to a `Local` token, so any
/// intercepted work it performs is recorded against the delivered
/// transaction.
#[async_trait]
pub trait CompensationHandler: Send + Sync + 'static {
    async fn execute(&self, ctx: CallContext, args: Vec<Value>) -> Result<Value, HandlerError>;
}

/// Adapter turning an async closure into a [`CompensationHandler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> CompensationHandler for FnHandler<F>
where
    F: Fn(CallContext, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn execute(&self, ctx: CallContext, args: Vec<Value>) -> Result<Value, HandlerError> {
        (self.f)(ctx, args).await
    }
}

/// Registry of compensating actions keyed by [`ActionKey`].
#[derive(Default)]
pub struct CompensationRegistry {
    handlers: HashMap<ActionKey, Arc<dyn CompensationHandler>>,
}

impl fmt::Debug for CompensationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.handlers.keys().map(|k| k.as_str()).collect();
        keys.sort_unstable();
        f.debug_struct("CompensationRegistry")
            .field("actions", &keys)
            .finish()
    }
}

impl CompensationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one under the same key.
    pub fn register(
        &mut self,
        key: impl Into<String>,
        handler: Arc<dyn CompensationHandler>,
    ) -> &mut Self {
        self.handlers.insert(ActionKey::new(key), handler);
        self
    }

    /// Register an async closure.
    pub fn register_fn<F, Fut>(&mut self, key: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(CallContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.register(key, Arc::new(FnHandler { f }))
    }

    pub fn resolve(&self, key: &ActionKey) -> Option<Arc<dyn CompensationHandler>> {
        self.handlers.get(key).cloned()
    }

    pub fn contains(&self, key: &ActionKey) -> bool {
        self.handlers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Resolve and run the invocation's handler.
    pub async fn invoke(
        &self,
        invocation: &CompensationInvocation,
        ctx: CallContext,
    ) -> Result<Value, HandlerError> {
        let handler = self
            .resolve(&invocation.action_key)
            .ok_or_else(|| HandlerError::NotFound(invocation.action_key.clone()))?;

        if !invocation.arg_types.is_empty() && invocation.arg_types.len() != invocation.args.len()
        {
            return Err(HandlerError::InvalidArguments(format!(
                "{} declares {} argument types but carries {} arguments",
                invocation.action_key,
                invocation.arg_types.len(),
                invocation.args.len()
            )));
        }

        handler.execute(ctx, invocation.args.clone()).await
    }
}

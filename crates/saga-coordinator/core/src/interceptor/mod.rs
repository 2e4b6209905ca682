//! # Transaction Interceptor
//!
//! Wraps a unit of work with the transaction lifecycle. Call sites hand in
//! the call's [`CallContext`], a [`TargetDescriptor`] naming the operation,
//! the inbound [`PropagationToken`] (if the transport delivered one) and the
//! work itself.
//!
//! Routing:
//!
//! | Inbound token | Context token     | Branch                                   |
//! |---------------|-------------------|------------------------------------------|
//! | none          | none              | start: begin, work, send or fail         |
//! | `Local`       | any               | local: work, commit_local or fail_local  |
//! | none          | `Local`           | local                                    |
//! | `Start`/`Provider` | any          | provider: join, work, commit_local or fail_local |
//! | none          | `Start`/`Provider`| nested: work only                        |

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::codec::MessageCodec;
use crate::context::CallContext;
use crate::error::{CoordinatorError, ErrorKind};
use crate::model::{
    PropagationToken, TargetDescriptor, TransactionRecord, TransactionRole, TransactionStatus,
};
use crate::port::{MessageDispatcher, TransactionRepository};
use crate::propagation;
use crate::transaction::TransactionManager;

/// Failure of an intercepted call.
#[derive(Debug, Error)]
pub enum InterceptError<E> {
    /// The coordinator could not record or advance the transaction.
    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    /// The unit of work itself failed.
    #[error("{0}")]
    Work(E),
}

impl<E> InterceptError<E> {
    /// The work error, if that is what failed.
    pub fn into_work(self) -> Option<E> {
        match self {
            Self::Work(e) => Some(e),
            Self::Coordinator(_) => None,
        }
    }
}

/// Decorator applying begin/join/commit around a unit of work.
pub struct TransactionInterceptor<R: TransactionRepository, D: MessageDispatcher> {
    manager: Arc<TransactionManager<R, D>>,
    codec: Arc<dyn MessageCodec>,
}

impl<R: TransactionRepository, D: MessageDispatcher> TransactionInterceptor<R, D> {
    pub fn new(manager: Arc<TransactionManager<R, D>>, codec: Arc<dyn MessageCodec>) -> Self {
        Self { manager, codec }
    }

    /// Run `work` inside the transaction lifecycle selected by the tokens.
    pub async fn intercept<T, E, F, Fut>(
        &self,
        ctx: &CallContext,
        target: TargetDescriptor,
        inbound: Option<PropagationToken>,
        work: F,
    ) -> Result<T, InterceptError<E>>
    where
        F: FnOnce(CallContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        match inbound.or_else(|| ctx.token()) {
            None => self.start(ctx, target, work).await,
            Some(token) if token.role == TransactionRole::Local => {
                self.local(ctx, target, token, work).await
            }
            Some(token) if !ctx.is_active() || ctx.trans_id().as_ref() != Some(&token.trans_id) => {
                self.provider(ctx, target, token, work).await
            }
            Some(token) => {
                debug!(trans_id = %token.trans_id, target = %target, "Nested call, reusing binding");
                work(ctx.clone()).await.map_err(InterceptError::Work)
            }
        }
    }

    /// Like [`intercept`](Self::intercept), reading the inbound token from
    /// transport headers.
    pub async fn intercept_headers<T, E, F, Fut>(
        &self,
        ctx: &CallContext,
        target: TargetDescriptor,
        headers: &HashMap<String, String>,
        work: F,
    ) -> Result<T, InterceptError<E>>
    where
        F: FnOnce(CallContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let inbound = propagation::extract(headers, self.codec.as_ref())?;
        self.intercept(ctx, target, inbound, work).await
    }

    async fn start<T, E, F, Fut>(
        &self,
        ctx: &CallContext,
        target: TargetDescriptor,
        work: F,
    ) -> Result<T, InterceptError<E>>
    where
        F: FnOnce(CallContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let scope = ctx.scope();
        let record = self.manager.begin(ctx, target).await?;
        let result = work(ctx.clone()).await;

        if !scope.is_outermost() {
            return result.map_err(InterceptError::Work);
        }

        match result {
            Ok(value) => {
                match self.manager.send_message(ctx).await {
                    Ok(_) => {}
                    // The record stays Begin and the recovery scan resends it.
                    Err(e) if e.kind() == ErrorKind::Dispatch => {
                        warn!(trans_id = %record.trans_id, "Deferring compensation dispatch to recovery: {}", e);
                    }
                    Err(e) => return Err(e.into()),
                }
                Ok(value)
            }
            Err(e) => {
                if let Err(fail_err) = self.manager.fail(ctx, e.to_string()).await {
                    error!(
                        trans_id = %record.trans_id,
                        "Failed to record transaction failure: {}",
                        fail_err
                    );
                }
                Err(InterceptError::Work(e))
            }
        }
    }

    async fn provider<T, E, F, Fut>(
        &self,
        ctx: &CallContext,
        target: TargetDescriptor,
        inbound: PropagationToken,
        work: F,
    ) -> Result<T, InterceptError<E>>
    where
        F: FnOnce(CallContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let _scope = ctx.scope();
        self.manager.join(ctx, target.clone(), &inbound).await?;
        let result = work(ctx.clone()).await;
        self.finish_local(ctx, target, &inbound, result).await
    }

    async fn local<T, E, F, Fut>(
        &self,
        ctx: &CallContext,
        target: TargetDescriptor,
        token: PropagationToken,
        work: F,
    ) -> Result<T, InterceptError<E>>
    where
        F: FnOnce(CallContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        if ctx.trans_id().as_ref() == Some(&token.trans_id) {
            return work(ctx.clone()).await.map_err(InterceptError::Work);
        }

        // Nested calls see this placeholder and run without finalizing.
        let result = {
            let placeholder = TransactionRecord::provider(
                token.trans_id.clone(),
                target.clone(),
                TransactionStatus::Begin,
            );
            let _binding = ctx.bind_scoped(placeholder, token.clone());
            work(ctx.clone()).await
        };
        self.finish_local(ctx, target, &token, result).await
    }

    async fn finish_local<T, E: Display>(
        &self,
        ctx: &CallContext,
        target: TargetDescriptor,
        token: &PropagationToken,
        result: Result<T, E>,
    ) -> Result<T, InterceptError<E>> {
        match result {
            Ok(value) => {
                self.manager
                    .commit_local(ctx, target, &token.trans_id)
                    .await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(fail_err) = self
                    .manager
                    .fail_local(ctx, target, &token.trans_id, e.to_string())
                    .await
                {
                    error!(
                        trans_id = %token.trans_id,
                        "Failed to record local failure: {}",
                        fail_err
                    );
                }
                Err(InterceptError::Work(e))
            }
        }
    }

    pub fn manager(&self) -> &Arc<TransactionManager<R, D>> {
        &self.manager
    }
}

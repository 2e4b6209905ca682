//! # Call Context
//!
//! Per-call transaction state, passed explicitly through the call chain.
//!
//! A [`CallContext`] is allocated for each inbound request and handed to the
//! unit of work. It carries the [`PropagationToken`] for outbound calls and the
//! [`TransactionRecord`] bound to this call. Cloning yields another handle to
//! the same call; unrelated calls must use separate contexts.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::model::{PropagationToken, TransId, TransactionRecord};

#[derive(Debug, Default)]
struct CallState {
    token: Option<PropagationToken>,
    transaction: Option<TransactionRecord>,
    depth: u32,
}

/// Handle to the transaction state of one logical call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    state: Arc<Mutex<CallState>>,
}

impl CallContext {
    /// Fresh context with nothing bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context pre-bound to a token, e.g. the one decoded from an inbound call.
    pub fn with_token(token: PropagationToken) -> Self {
        let ctx = Self::new();
        ctx.set_token(token);
        ctx
    }

    /// Token to attach to outbound calls.
    pub fn token(&self) -> Option<PropagationToken> {
        self.state.lock().token.clone()
    }

    pub fn set_token(&self, token: PropagationToken) {
        self.state.lock().token = Some(token);
    }

    /// Snapshot of the bound record.
    pub fn transaction(&self) -> Option<TransactionRecord> {
        self.state.lock().transaction.clone()
    }

    pub fn trans_id(&self) -> Option<TransId> {
        self.state
            .lock()
            .transaction
            .as_ref()
            .map(|t| t.trans_id.clone())
    }

    /// True when a record is bound to this call.
    pub fn is_active(&self) -> bool {
        self.state.lock().transaction.is_some()
    }

    pub(crate) fn bind(&self, record: TransactionRecord, token: PropagationToken) {
        let mut state = self.state.lock();
        state.transaction = Some(record);
        state.token = Some(token);
    }

    /// Bind for the lifetime of the returned guard, then restore whatever was
    /// bound before.
    pub(crate) fn bind_scoped(&self, record: TransactionRecord, token: PropagationToken) -> BindingGuard {
        let mut state = self.state.lock();
        let previous_transaction = state.transaction.replace(record);
        let previous_token = state.token.replace(token);
        BindingGuard {
            ctx: self.clone(),
            previous_token,
            previous_transaction,
        }
    }

    /// Mutate the bound record in place, returning `None` when nothing is bound.
    pub(crate) fn with_transaction<R>(
        &self,
        f: impl FnOnce(&mut TransactionRecord) -> R,
    ) -> Option<R> {
        self.state.lock().transaction.as_mut().map(f)
    }

    /// Drop the bound record and token.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.transaction = None;
        state.token = None;
    }

    /// Enter a scope; the returned guard clears the context when the
    /// outermost scope exits, on every exit path.
    pub fn scope(&self) -> CallScope {
        let outermost = {
            let mut state = self.state.lock();
            state.depth += 1;
            state.depth == 1
        };
        CallScope {
            ctx: self.clone(),
            outermost,
        }
    }
}

/// Guard returned by [`CallContext::scope`].
#[derive(Debug)]
pub struct CallScope {
    ctx: CallContext,
    outermost: bool,
}

impl CallScope {
    /// True for the scope that owns completion of the call.
    pub fn is_outermost(&self) -> bool {
        self.outermost
    }
}

impl Drop for CallScope {
    fn drop(&mut self) {
        let mut state = self.ctx.state.lock();
        state.depth = state.depth.saturating_sub(1);
        if self.outermost {
            state.transaction = None;
            state.token = None;
        }
    }
}

/// Guard returned by [`CallContext::bind_scoped`].
#[derive(Debug)]
pub(crate) struct BindingGuard {
    ctx: CallContext,
    previous_token: Option<PropagationToken>,
    previous_transaction: Option<TransactionRecord>,
}

impl Drop for BindingGuard {
    fn drop(&mut self) {
        let mut state = self.ctx.state.lock();
        state.token = self.previous_token.take();
        state.transaction = self.previous_transaction.take();
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-call cancellation signal.
//!
//! Every store, policy, identity and enclave operation takes a [`Context`].
//! It wraps a `tokio_util::sync::CancellationToken` (explicit cancellation,
//! usually derived from the process shutdown token) and an optional deadline.
//! A context whose deadline has passed behaves exactly like a canceled one.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{KmsError, KmsResult};

/// Cancellation signal passed down through every operation.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is only ever canceled explicitly.
    pub fn background() -> Self {
        Self::default()
    }

    /// Wrap an existing token, e.g. a child of the shutdown token.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Bound the context by a timeout starting now.
    ///
    /// An earlier deadline already on the context is kept.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Bound the context by an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// Derive a context that is canceled with this one but can also be
    /// canceled on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Cooperative cancellation point.
    pub fn check(&self) -> KmsResult<()> {
        if self.is_canceled() {
            Err(KmsError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Resolves once the context is canceled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Drive `fut` unless the context ends first.
    ///
    /// Only use this for operations that are safe to abandon (reads). A
    /// future that is ready at the same time as the cancellation wins.
    pub async fn run<F, T>(&self, fut: F) -> KmsResult<T>
    where
        F: Future<Output = KmsResult<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            res = fut => res,
            _ = self.done() => Err(KmsError::Canceled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_context_is_live() {
        let ctx = Context::background();
        assert!(!ctx.is_canceled());
        assert!(ctx.check().is_ok());
        let value = ctx.run(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn cancel_propagates_to_children() {
        let parent = Context::background();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_canceled());
        assert!(matches!(child.check(), Err(KmsError::Canceled)));
    }

    #[tokio::test]
    async fn child_cancel_does_not_affect_parent() {
        let parent = Context::background();
        let child = parent.child();
        child.cancel();
        assert!(child.is_canceled());
        assert!(!parent.is_canceled());
    }

    #[tokio::test]
    async fn expired_deadline_counts_as_canceled() {
        let ctx = Context::background().with_timeout(Duration::ZERO);
        assert!(ctx.is_canceled());
        let result = ctx.run(async { Ok(()) }).await;
        assert!(matches!(result, Err(KmsError::Canceled)));
    }

    #[tokio::test]
    async fn earlier_deadline_is_kept() {
        let ctx = Context::background().with_timeout(Duration::from_secs(1));
        let first = ctx.deadline().unwrap();
        let ctx = ctx.with_timeout(Duration::from_secs(60));
        assert_eq!(ctx.deadline(), Some(first));
    }

    #[tokio::test]
    async fn run_aborts_pending_future_on_cancel() {
        let ctx = Context::background();
        let canceler = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceler.cancel();
        });

        let result: KmsResult<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(KmsError::Canceled)));
    }

    #[tokio::test]
    async fn run_times_out_at_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_millis(20));
        let result: KmsResult<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;
        assert!(result.unwrap_err().is_canceled());
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Store Contract
//!
//! The minimal, backend-agnostic contract every secret-storage connector
//! implements. The rest of the service depends only on [`Store`], never on a
//! concrete connector.
//!
//! ## Semantics
//!
//! - `create` inserts only if the name is absent. It is atomic: of any number
//!   of concurrent creates on the same new name exactly one succeeds and the
//!   others fail with `AlreadyExists`. Connectors must use a native
//!   conditional write, never read-then-write.
//! - `get` returns exactly the value committed by the successful `create`, or
//!   `NotFound`.
//! - `delete` is idempotent.
//! - `list` returns a lazy, finite iterator over the names matching a glob
//!   pattern. Iterators are not rewindable; list again to restart.
//! - `status` is a side-effect free reachability check.
//!
//! Every call takes a [`Context`]. Writes check it right before their commit
//! point and never abandon a commit halfway: once the backend has committed,
//! the call reports success.
//!
//! ## Connectors
//!
//! - [`MemStore`] - in-process map
//! - [`FsStore`] - one file per name
//! - [`RedbStore`] - embedded redb database
//!
//! [`PrefixStore`] and [`Records`](crate::repository::Records) layer
//! namespacing and typed records on top of any connector.

pub mod database;
pub mod fs;
pub mod memory;
pub mod prefix;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::cancel::Context;
use crate::config::{BackendKind, Config};
use crate::error::{KmsError, KmsResult};

pub use self::database::RedbStore;
pub use self::fs::FsStore;
pub use self::memory::MemStore;
pub use self::prefix::PrefixStore;

/// Health information returned by [`Store::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreState {
    /// Round-trip time of the health check.
    pub latency: Duration,
}

/// Contract implemented by every secret-storage connector.
#[async_trait]
pub trait Store<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Lightweight reachability and authentication check.
    async fn status(&self, ctx: &Context) -> KmsResult<StoreState>;

    /// Insert `value` under `key` if and only if `key` is absent.
    async fn create(&self, ctx: &Context, key: K, value: V) -> KmsResult<()>;

    /// Fetch the value stored under `key`.
    async fn get(&self, ctx: &Context, key: &K) -> KmsResult<V>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, ctx: &Context, key: &K) -> KmsResult<()>;

    /// Iterate over the names matching `pattern` (empty means all).
    async fn list(&self, ctx: &Context, pattern: &str) -> KmsResult<KeyIter<K>>;
}

/// Byte-level store as implemented by the connectors.
pub type BlobStore = dyn Store<String, Vec<u8>>;

/// Shared handle to a byte-level store.
pub type SharedStore = Arc<BlobStore>;

/// Lazy iterator over stored names.
///
/// Errors discovered while iterating end the iteration and are reported by
/// the first call to [`Iter::close`]. Closing is idempotent; later calls
/// return `Ok(())`.
#[async_trait]
pub trait Iter<K>: Send {
    /// Next name, or `None` once exhausted, failed, canceled or closed.
    async fn next(&mut self, ctx: &Context) -> Option<K>;

    /// Release the iterator and report any deferred error.
    async fn close(&mut self) -> KmsResult<()>;
}

/// Boxed name iterator returned by [`Store::list`].
pub type KeyIter<K> = Box<dyn Iter<K>>;

/// Deferred-error bookkeeping shared by the iterator implementations.
#[derive(Debug, Default)]
pub(crate) struct CloseState {
    err: Option<KmsError>,
    closed: bool,
}

impl CloseState {
    /// Record a failure; only the first one is kept.
    pub(crate) fn fail(&mut self, err: KmsError) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }

    /// Whether iteration must stop.
    pub(crate) fn is_done(&self) -> bool {
        self.closed || self.err.is_some()
    }

    /// Stop if the context ended, recording `Canceled`.
    pub(crate) fn check(&mut self, ctx: &Context) -> bool {
        if self.is_done() {
            return false;
        }
        if let Err(e) = ctx.check() {
            self.fail(e);
            return false;
        }
        true
    }

    pub(crate) fn close(&mut self) -> KmsResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.err.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Iterator over an already materialized list of names.
pub struct VecIter<K> {
    items: VecDeque<K>,
    state: CloseState,
}

impl<K> VecIter<K> {
    pub fn new(items: impl IntoIterator<Item = K>) -> Self {
        Self {
            items: items.into_iter().collect(),
            state: CloseState::default(),
        }
    }
}

#[async_trait]
impl<K: Send> Iter<K> for VecIter<K> {
    async fn next(&mut self, ctx: &Context) -> Option<K> {
        if !self.state.check(ctx) {
            return None;
        }
        self.items.pop_front()
    }

    async fn close(&mut self) -> KmsResult<()> {
        self.items.clear();
        self.state.close()
    }
}

/// Collect every remaining name and close the iterator.
///
/// Surfaces the deferred error (including cancellation) from `close`.
pub async fn drain<K: Send>(mut iter: KeyIter<K>, ctx: &Context) -> KmsResult<Vec<K>> {
    let mut names = Vec::new();
    while let Some(name) = iter.next(ctx).await {
        names.push(name);
    }
    iter.close().await?;
    Ok(names)
}

/// Reject the empty name, which no connector can address.
pub(crate) fn require_key(key: &str) -> KmsResult<()> {
    if key.is_empty() {
        Err(KmsError::invalid("key name must not be empty"))
    } else {
        Ok(())
    }
}

/// Open the connector selected by the configuration.
pub async fn open(config: &Config) -> KmsResult<SharedStore> {
    let store: SharedStore = match config.backend {
        BackendKind::Memory => Arc::new(MemStore::new()),
        BackendKind::Fs => Arc::new(FsStore::open(&config.data_dir).await?),
        BackendKind::Redb => Arc::new(RedbStore::open(config.redb_path()).await?),
    };
    tracing::info!(backend = ?config.backend, "Store connector opened");
    Ok(store)
}
